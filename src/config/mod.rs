//! Configuration management for LUMI
//!
//! Sources, lowest to highest priority: built-in defaults, the TOML config
//! file, then the process environment (which `.env` may populate).

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;
use file::LumiConfigFile;

/// Default base URL for the OpenAI-compatible API
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Default STT model
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Default TTS model
pub const DEFAULT_TTS_MODEL: &str = "tts-1";

/// Default TTS voice
pub const DEFAULT_TTS_VOICE: &str = "alloy";

/// Default system prompt for reply generation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly conversation partner. \
Reply briefly and naturally, in one or two spoken sentences.";

/// Default number of past utterances sent as reply context
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Default per-request time bound
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// LUMI configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Remote speech/chat service configuration
    pub remote: RemoteConfig,

    /// Conversation loop configuration
    pub conversation: ConversationConfig,
}

/// Remote service configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// API key; absence is reported when the client is built
    pub api_key: Option<SecretString>,

    /// Base URL of an OpenAI-compatible API
    pub base_url: String,

    /// Chat model for reply generation
    pub chat_model: String,

    /// STT model
    pub stt_model: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,

    /// Time bound applied to each remote call
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            stt_model: DEFAULT_STT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            tts_speed: 1.0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Conversation loop configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Language hint passed to transcription
    pub language: Option<String>,

    /// System prompt prepended to every reply request
    pub system_prompt: String,

    /// Number of past utterances sent as reply context
    pub history_limit: usize,

    /// Resume listening automatically after a reply plays
    pub auto_rearm: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            language: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            auto_rearm: true,
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// With `path` set the file must exist and parse; otherwise the standard
    /// location is tried and silently skipped when absent.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => file::read_config_file(p)?,
            None => file::load_config_file(),
        };

        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Build configuration from a parsed file and an environment lookup
    #[must_use]
    pub fn from_sources(file: LumiConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RemoteConfig::default();
        let env_str = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let remote = RemoteConfig {
            api_key: env_str("OPENAI_API_KEY")
                .or(file.remote.api_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            base_url: env_str("OPENAI_BASE_URL")
                .or(file.remote.base_url)
                .unwrap_or(defaults.base_url),
            chat_model: env_str("OPENAI_CHAT_MODEL")
                .or(file.remote.chat_model)
                .unwrap_or(defaults.chat_model),
            stt_model: env_str("OPENAI_STT_MODEL")
                .or(file.remote.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_model: env_str("OPENAI_TTS_MODEL")
                .or(file.remote.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: env_str("OPENAI_TTS_VOICE")
                .or(file.remote.tts_voice)
                .unwrap_or(defaults.tts_voice),
            tts_speed: parse_env(&env_str, "LUMI_TTS_SPEED")
                .or(file.remote.tts_speed)
                .unwrap_or(defaults.tts_speed)
                .clamp(0.25, 4.0),
            request_timeout: parse_env(&env_str, "LUMI_REQUEST_TIMEOUT_SECS")
                .or(file.remote.request_timeout_secs)
                .map_or(defaults.request_timeout, Duration::from_secs),
        };

        let conversation_defaults = ConversationConfig::default();
        let conversation = ConversationConfig {
            language: env_str("LUMI_LANGUAGE").or(file.conversation.language),
            system_prompt: env_str("LUMI_SYSTEM_PROMPT")
                .or(file.conversation.system_prompt)
                .unwrap_or(conversation_defaults.system_prompt),
            history_limit: parse_env(&env_str, "LUMI_HISTORY_LIMIT")
                .or(file.conversation.history_limit)
                .unwrap_or(conversation_defaults.history_limit),
            auto_rearm: env_str("LUMI_AUTO_REARM")
                .map(|v| parse_bool(&v))
                .or(file.conversation.auto_rearm)
                .unwrap_or(conversation_defaults.auto_rearm),
        };

        Self {
            remote,
            conversation,
        }
    }
}

/// Parse an env var, warning and ignoring it when malformed
fn parse_env<T: std::str::FromStr>(env: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    raw.trim().parse().map_or_else(
        |_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable env var");
            None
        },
        Some,
    )
}

fn parse_bool(value: &str) -> bool {
    let v = value.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}
