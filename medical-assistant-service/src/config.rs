use std::path::PathBuf;
use std::time::Duration;

use consult_flow::HistoryWindow;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_TTS_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub timeout: Duration,
}

pub const DEFAULT_FONT_FAMILY: &str = "DejaVuSans";

/// Report fonts. Without `font_dir` the bundled family is used.
#[derive(Debug, Clone, Default)]
pub struct PdfConfig {
    pub font_dir: Option<PathBuf>,
    pub font_family: Option<String>,
}

/// Service configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub model: ModelConfig,
    /// `None` disables speech synthesis
    pub speech: Option<SpeechConfig>,
    pub pdf: PdfConfig,
    pub history_window: HistoryWindow,
    /// Consultations with no activity for this long are discarded
    pub session_idle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key =
            get("OPENROUTER_API_KEY").ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;

        let model = ModelConfig {
            api_key,
            model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            timeout: seconds("MODEL_TIMEOUT_SECS", get("MODEL_TIMEOUT_SECS"), 30)?,
        };

        let speech = match get("TTS_API_KEY") {
            Some(api_key) => Some(SpeechConfig {
                api_key,
                base_url: get("TTS_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_TTS_BASE_URL.to_string()),
                model: get("TTS_MODEL").unwrap_or_else(|| "tts-1".to_string()),
                voice: get("TTS_VOICE").unwrap_or_else(|| "fable".to_string()),
                timeout: seconds("TTS_TIMEOUT_SECS", get("TTS_TIMEOUT_SECS"), 10)?,
            }),
            None => None,
        };

        let pdf = PdfConfig {
            font_dir: get("PDF_FONT_DIR").map(PathBuf::from),
            font_family: get("PDF_FONT_FAMILY"),
        };

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => 3000,
        };

        let history_window = match get("HISTORY_WINDOW") {
            Some(raw) => raw
                .parse::<HistoryWindow>()
                .map_err(|reason| ConfigError::Invalid {
                    name: "HISTORY_WINDOW",
                    reason,
                })?,
            None => HistoryWindow::default(),
        };

        let session_idle_timeout = seconds(
            "SESSION_IDLE_TIMEOUT_SECS",
            get("SESSION_IDLE_TIMEOUT_SECS"),
            3600,
        )?;

        Ok(Self {
            port,
            model,
            speech,
            pdf,
            history_window,
            session_idle_timeout,
        })
    }
}

fn seconds(
    name: &'static str,
    raw: Option<String>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => Err(ConfigError::Invalid {
                name,
                reason: "must be greater than zero".to_string(),
            }),
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
        },
        None => Ok(Duration::from_secs(default)),
    }
}
