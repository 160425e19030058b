//! YAML config file, overlaid by environment variables, loaded once at startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: None,
            key_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    pub model: String,
    pub device: String,
    pub compute_type: String,
    pub beam_size: i32,
    pub batch_size: i32,
    pub initial_prompt: Option<String>,
    pub faster_whisper_vad_filter: bool,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            device: "cpu".to_string(),
            compute_type: "int8".to_string(),
            beam_size: 5,
            batch_size: 1,
            initial_prompt: None,
            faster_whisper_vad_filter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveTranscriberConfig {
    pub enabled: bool,
    pub model: String,
    pub device: String,
    pub compute_type: String,
    pub beam_size: i32,
    pub batch_size: i32,
    pub webrtc_sensitivity: i32,
    pub silero_sensitivity: f32,
    pub post_speech_silence_duration: f32,
    pub early_transcription_on_silence: f32,
    pub live_language: Option<String>,
}

impl Default for LiveTranscriberConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "tiny".to_string(),
            device: "cpu".to_string(),
            compute_type: "int8".to_string(),
            beam_size: 1,
            batch_size: 1,
            webrtc_sensitivity: 2,
            silero_sensitivity: 0.4,
            post_speech_silence_duration: 0.6,
            early_transcription_on_silence: 0.2,
            live_language: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub webrtc_sensitivity: i32,
    pub post_speech_silence_duration: f32,
    pub min_length_of_recording: f32,
    pub min_gap_between_recordings: f32,
    pub pre_recording_buffer_duration: f32,
    pub max_silence_duration: f32,
    pub normalize_audio: bool,
    pub ensure_sentence_starting_uppercase: bool,
    pub ensure_sentence_ends_with_period: bool,
    pub buffer_size: usize,
    pub allowed_latency_limit: usize,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            webrtc_sensitivity: 2,
            post_speech_silence_duration: 0.6,
            min_length_of_recording: 0.3,
            min_gap_between_recordings: 0.2,
            pre_recording_buffer_duration: 0.8,
            max_silence_duration: 10.0,
            normalize_audio: true,
            ensure_sentence_starting_uppercase: true,
            ensure_sentence_ends_with_period: true,
            buffer_size: 1024,
            allowed_latency_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiarizationConfig {
    pub model: String,
    pub hf_token: Option<String>,
    pub device: String,
    pub num_speakers: Option<u32>,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub min_duration_on: f32,
    pub min_duration_off: f32,
}

impl Default for DiarizationConfig {
    fn default() -> Self {
        Self {
            model: "pyannote/segmentation-3.0".to_string(),
            hf_token: None,
            device: "cpu".to_string(),
            num_speakers: None,
            min_speakers: None,
            max_speakers: None,
            min_duration_on: 0.0,
            min_duration_off: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackend {
    Ffmpeg,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    Peak,
    Loudnorm,
    Dynaudnorm,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioProcessingConfig {
    pub backend: AudioBackend,
    pub normalization_method: NormalizationMethod,
}

impl Default for AudioProcessingConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackend::Ffmpeg,
            normalization_method: NormalizationMethod::Peak,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub max_age_hours: u64,
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_hours: 24,
            max_backups: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalLlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub default_system_prompt: Option<String>,
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            default_system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LongformRecordingConfig {
    pub auto_add_to_audio_notebook: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranscriptionOptionsConfig {
    pub enable_live_transcriber: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub main_transcriber: TranscriberConfig,
    pub live_transcriber: LiveTranscriberConfig,
    /// Legacy name; v1 treats it as a synonym of `live_transcriber`, which wins
    /// on key conflict.
    pub preview_transcriber: Option<LiveTranscriberConfig>,
    pub stt: SttConfig,
    pub diarization: DiarizationConfig,
    pub audio_processing: AudioProcessingConfig,
    pub backup: BackupConfig,
    pub local_llm: LocalLlmConfig,
    pub longform_recording: LongformRecordingConfig,
    pub transcription_options: TranscriptionOptionsConfig,
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(skip)]
    pub huggingface_token: Option<String>,
    #[serde(skip)]
    pub lm_studio_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            main_transcriber: TranscriberConfig::default(),
            live_transcriber: LiveTranscriberConfig::default(),
            preview_transcriber: None,
            stt: SttConfig::default(),
            diarization: DiarizationConfig::default(),
            audio_processing: AudioProcessingConfig::default(),
            backup: BackupConfig::default(),
            local_llm: LocalLlmConfig::default(),
            longform_recording: LongformRecordingConfig::default(),
            transcription_options: TranscriptionOptionsConfig::default(),
            data_dir: PathBuf::from("."),
            huggingface_token: None,
            lm_studio_url: None,
        }
    }
}

impl AppConfig {
    /// Load from an optional YAML file, then overlay well-known environment
    /// variables (`SERVER_HOST`, `SERVER_PORT`, `LOG_LEVEL`, `DATA_DIR`,
    /// `TLS_ENABLED`, `TLS_CERT_FILE`, `TLS_KEY_FILE`, `HUGGINGFACE_TOKEN`/
    /// `HF_TOKEN`, `LM_STUDIO_URL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        // The legacy `preview_transcriber` section only takes effect when
        // `live_transcriber` was never set explicitly in the file.
        if let Some(preview) = config.preview_transcriber.take() {
            if !config_file_had_live_transcriber(path)? {
                config.live_transcriber = preview;
            }
        }

        if let Ok(host) = std::env::var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("SERVER_PORT") {
            config.server.port = port
                .parse()
                .context("SERVER_PORT must be a valid port number")?;
        }
        if let Ok(data_dir) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(tls_enabled) = std::env::var("TLS_ENABLED") {
            config.server.tls.enabled = tls_enabled == "1" || tls_enabled.eq_ignore_ascii_case("true");
        }
        if let Ok(cert) = std::env::var("TLS_CERT_FILE") {
            config.server.tls.cert_file = Some(PathBuf::from(cert));
        }
        if let Ok(key) = std::env::var("TLS_KEY_FILE") {
            config.server.tls.key_file = Some(PathBuf::from(key));
        }
        config.huggingface_token = std::env::var("HUGGINGFACE_TOKEN")
            .or_else(|_| std::env::var("HF_TOKEN"))
            .ok();
        config.lm_studio_url = std::env::var("LM_STUDIO_URL").ok();

        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database").join("notebook.db")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("database").join("backups")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join("audio")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.data_dir.join("tokens").join("tokens.json")
    }
}

fn config_file_had_live_transcriber(path: Option<&Path>) -> Result<bool> {
    let Some(path) = path else {
        return Ok(false);
    };
    let raw = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&raw)?;
    Ok(value
        .get("live_transcriber")
        .is_some())
}
