//! Wire types for `/ws/live` and binary audio frame decoding shared with the
//! plain `/ws` streaming protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Start { config: Option<StartConfig> },
    Stop,
    GetHistory,
    ClearHistory,
    Ping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartConfig {
    pub model: Option<String>,
    pub language: Option<String>,
    pub translation_enabled: Option<bool>,
    pub translation_target_language: Option<String>,
    pub webrtc_sensitivity: Option<i32>,
    pub silero_sensitivity: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk,
    AuthFail,
    Status { data: Value, timestamp: i64 },
    State { data: String, timestamp: i64 },
    Partial { data: String, timestamp: i64 },
    Sentence { data: String, timestamp: i64 },
    History { data: Vec<String>, timestamp: i64 },
    HistoryCleared { timestamp: i64 },
    Pong { timestamp: i64 },
    Error { data: ErrorData, timestamp: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub message: String,
}

/// Binary audio frame layout shared by `/ws` and `/ws/live`: a 4-byte
/// little-endian metadata length, the metadata JSON, then PCM Int16 samples.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AudioFrameMetadata {
    pub sample_rate: Option<u32>,
}

pub struct DecodedAudioFrame {
    pub metadata: AudioFrameMetadata,
    pub samples: Vec<f32>,
}

pub fn decode_audio_frame(bytes: &[u8]) -> anyhow::Result<DecodedAudioFrame> {
    if bytes.len() < 4 {
        anyhow::bail!("audio frame too short to contain a metadata length");
    }

    let metadata_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let metadata_start = 4;
    let metadata_end = metadata_start + metadata_len;
    if bytes.len() < metadata_end {
        anyhow::bail!("audio frame shorter than its declared metadata length");
    }

    let metadata: AudioFrameMetadata = if metadata_len == 0 {
        AudioFrameMetadata::default()
    } else {
        serde_json::from_slice(&bytes[metadata_start..metadata_end])?
    };

    let pcm_bytes = &bytes[metadata_end..];
    let samples: Vec<f32> = pcm_bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32_768.0)
        .collect();

    Ok(DecodedAudioFrame { metadata, samples })
}

pub fn encode_audio_frame(metadata: &AudioFrameMetadata, samples: &[f32]) -> anyhow::Result<Vec<u8>> {
    let metadata_json = serde_json::to_vec(metadata)?;
    let mut out = Vec::with_capacity(4 + metadata_json.len() + samples.len() * 2);
    out.extend_from_slice(&(metadata_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&metadata_json);
    for sample in samples {
        let clamped = (sample * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_binary_audio_frame() {
        let metadata = AudioFrameMetadata { sample_rate: Some(16_000) };
        let samples = vec![0.0_f32, 0.5, -0.5, 1.0];

        let encoded = encode_audio_frame(&metadata, &samples).unwrap();
        let decoded = decode_audio_frame(&encoded).unwrap();

        assert_eq!(decoded.metadata.sample_rate, Some(16_000));
        assert_eq!(decoded.samples.len(), samples.len());
    }

    #[test]
    fn rejects_truncated_frames() {
        let bytes = vec![10, 0, 0, 0, 1, 2];
        assert!(decode_audio_frame(&bytes).is_err());
    }

    #[test]
    fn parses_client_auth_message() {
        let raw = r#"{"type":"auth","data":{"token":"abc"}}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        matches!(parsed, ClientMessage::Auth { .. });
    }
}
