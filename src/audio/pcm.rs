//! PCM encoding and sample-rate conversion
//!
//! Converts floating-point capture frames to the signed 16-bit PCM the
//! transcription provider expects, resampling with linear interpolation.

/// Resample a mono f32 frame from `in_rate` to `out_rate` with linear
/// interpolation.
///
/// The output holds exactly `floor(len * out_rate / in_rate)` samples,
/// except that a non-empty input never produces an empty output. With
/// `in_rate == out_rate` the input is returned unchanged.
#[must_use]
pub fn resample_f32(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if input.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }

    if in_rate == out_rate {
        return input.to_vec();
    }

    let out_len = usize::try_from(
        u64::try_from(input.len()).unwrap_or(u64::MAX) * u64::from(out_rate) / u64::from(in_rate),
    )
    .unwrap_or(usize::MAX)
    .max(1);

    let step = f64::from(in_rate) / f64::from(out_rate);
    let last = input.len() - 1;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * step;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let idx = (pos.floor() as usize).min(last);
        let frac = pos - pos.floor();
        let s0 = f64::from(input[idx]);
        let s1 = f64::from(input[(idx + 1).min(last)]);
        #[allow(clippy::cast_possible_truncation)]
        output.push((s0 + (s1 - s0) * frac) as f32);
    }

    output
}

/// Resample a mono f32 frame and quantize to signed 16-bit PCM
///
/// Same length contract as [`resample_f32`]; with `in_rate == out_rate`
/// this is a pure quantization pass-through.
#[must_use]
pub fn resample_to_i16(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<i16> {
    resample_f32(input, in_rate, out_rate)
        .into_iter()
        .map(quantize)
        .collect()
}

/// Quantize one f32 sample in [-1.0, 1.0] to i16
///
/// Out-of-range samples are clamped before quantization. Positive and
/// negative halves scale asymmetrically so both full-scale values map
/// onto the i16 extremes.
#[must_use]
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s >= 0.0 { s * 32_767.0 } else { s * 32_768.0 };
    #[allow(clippy::cast_possible_truncation)]
    let value = scaled.round() as i16;
    value
}

/// Serialize i16 samples as little-endian bytes for the wire
#[must_use]
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Resample and encode one capture frame into wire-ready PCM bytes
#[must_use]
pub fn encode_frame(samples: &[f32], in_rate: u32, out_rate: u32) -> Vec<u8> {
    to_le_bytes(&resample_to_i16(samples, in_rate, out_rate))
}
