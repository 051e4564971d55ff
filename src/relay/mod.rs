//! Relay proxy: one client connection bridged 1:1 to one provider connection

mod provider;
mod server;

pub use provider::{ProviderConfig, ProviderSocket, close_stream_message, normalize};
pub use server::{RelayState, router, serve};
