//! Relay server: bridges client sessions to the STT provider
//!
//! Each accepted WebSocket gets its own provider connection, 1:1, for
//! the lifetime of the session. Binary audio is forwarded verbatim and
//! immediately; control messages are translated to provider semantics;
//! provider events are normalized before going back to the client.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message as ProviderMessage;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::provider::{ProviderConfig, close_stream_message, normalize};
use crate::Result;
use crate::stt::{ClientControl, RelayMessage};

/// Shared state for the relay server
#[derive(Debug, Clone)]
pub struct RelayState {
    pub provider: ProviderConfig,
}

/// Build the relay router
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws/listen", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the relay until ctrl-c
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(addr: SocketAddr, state: Arc<RelayState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "relay listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}

/// Health status response
#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    provider_configured: bool,
}

async fn healthz(State(state): State<Arc<RelayState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        provider_configured: state.provider.api_key.is_some(),
    })
}

async fn ws_upgrade(State(state): State<Arc<RelayState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Bridge one client connection to one provider connection
async fn handle_session(mut client: WebSocket, state: Arc<RelayState>) {
    let session_id = Uuid::new_v4();
    tracing::info!(%session_id, "session connected");

    // The provider leg opens immediately; a client connection never sits
    // half-bridged waiting for audio.
    let provider = match state.provider.connect(&state.provider.language).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!(%session_id, error = %e, "provider connection failed");
            let error = RelayMessage::Error {
                error: format!("provider unreachable: {e}"),
            };
            if let Ok(json) = serde_json::to_string(&error) {
                let _ = client.send(Message::Text(json.into())).await;
            }
            let _ = client.send(Message::Close(None)).await;
            return;
        }
    };

    if let Ok(ready) = serde_json::to_string(&RelayMessage::Ready) {
        if client.send(Message::Text(ready.into())).await.is_err() {
            return;
        }
    }

    let (mut client_tx, mut client_rx) = client.split();
    let (mut provider_tx, mut provider_rx) = provider.split();

    // Uplink: audio and control from the client to the provider
    let uplink_id = session_id;
    let mut uplink = tokio::spawn(async move {
        while let Some(Ok(msg)) = client_rx.next().await {
            match msg {
                Message::Binary(audio) => {
                    if provider_tx.send(ProviderMessage::Binary(audio)).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => match serde_json::from_str::<ClientControl>(text.as_str()) {
                    Ok(ClientControl::Start { language, format }) => {
                        tracing::debug!(%uplink_id, language, format, "stream started");
                    }
                    Ok(ClientControl::Stop) => {
                        tracing::debug!(%uplink_id, "stream stopped by client");
                        if provider_tx.send(close_stream_message()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(%uplink_id, error = %e, "dropping undecodable control message");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        // Client leg is gone: drain the provider cleanly
        let _ = provider_tx.send(close_stream_message()).await;
        let _ = provider_tx.send(ProviderMessage::Close(None)).await;
    });

    // Downlink: normalized provider events back to the client
    let downlink_id = session_id;
    let mut downlink = tokio::spawn(async move {
        while let Some(msg) = provider_rx.next().await {
            match msg {
                Ok(ProviderMessage::Text(text)) => {
                    if let Some(normalized) = normalize(text.as_str()) {
                        let Ok(json) = serde_json::to_string(&normalized) else {
                            continue;
                        };
                        if client_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(ProviderMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%downlink_id, error = %e, "provider leg failed");
                    let error = RelayMessage::Error {
                        error: e.to_string(),
                    };
                    if let Ok(json) = serde_json::to_string(&error) {
                        let _ = client_tx.send(Message::Text(json.into())).await;
                    }
                    break;
                }
            }
        }
        let _ = client_tx.send(Message::Close(None)).await;
    });

    // Either side closing terminates the other
    tokio::select! {
        _ = &mut uplink => downlink.abort(),
        _ = &mut downlink => uplink.abort(),
    }

    tracing::info!(%session_id, "session closed");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn test_state(api_key: Option<String>) -> Arc<RelayState> {
        Arc::new(RelayState {
            provider: ProviderConfig {
                url: "ws://127.0.0.1:9".to_string(),
                api_key,
                sample_rate: 16_000,
                language: "en".to_string(),
            },
        })
    }

    #[tokio::test]
    async fn healthz_reports_provider_state() {
        let response = router(test_state(Some("key".to_string())))
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["provider_configured"], true);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = router(test_state(None))
            .oneshot(
                Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
