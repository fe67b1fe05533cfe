//! TOML configuration file loading
//!
//! Supports `~/.config/lumi/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LumiConfigFile {
    /// Remote speech/chat service configuration
    #[serde(default)]
    pub remote: RemoteFileConfig,

    /// Conversation loop configuration
    #[serde(default)]
    pub conversation: ConversationFileConfig,
}

/// Remote service configuration
#[derive(Debug, Default, Deserialize)]
pub struct RemoteFileConfig {
    /// API key (prefer the `OPENAI_API_KEY` env var)
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    pub base_url: Option<String>,

    /// Chat model (e.g. "gpt-4o-mini")
    pub chat_model: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,

    /// Per-request time bound in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Conversation loop configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Language hint for transcription (e.g. "ja")
    pub language: Option<String>,

    /// System prompt for reply generation
    pub system_prompt: Option<String>,

    /// Number of past utterances sent as reply context
    pub history_limit: Option<usize>,

    /// Resume listening automatically after a reply plays
    pub auto_rearm: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LumiConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LumiConfigFile {
    let Some(path) = config_file_path() else {
        return LumiConfigFile::default();
    };

    if !path.exists() {
        return LumiConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LumiConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<LumiConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/lumi/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("lumi").join("config.toml"))
}
