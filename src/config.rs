use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{gemini::GenerationParams, pipeline::AnalyzerOptions};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_GEMINI_HTTP_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;
const DEFAULT_ACTIVE_TIMEOUT_SECONDS: u64 = 90;
const GENERATION_TEMPERATURE: f32 = 0.3;
const GENERATION_MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY n'est pas configurée")]
    MissingApiKey,
    #[error("Origine invalide dans ALLOWED_ORIGINS : {0}. Utilisez des valeurs comme https://domaine.com")]
    InvalidOrigin(String),
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub gemini_http_timeout: Duration,
    pub yt_dlp_bin: String,
    pub download_timeout: Duration,
    pub poll_interval: Duration,
    pub active_timeout: Duration,
    /// Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read_string = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };
        let read_seconds = |name: &str, default: u64| {
            lookup(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(default))
        };

        let gemini_api_key = read_string("GEMINI_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(|origin| {
                        normalize_origin(origin)
                            .ok_or_else(|| ConfigError::InvalidOrigin(origin.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr: resolve_bind_addr(&lookup),
            gemini_api_key,
            gemini_model: read_string("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_api_base: read_string("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            gemini_http_timeout: read_seconds(
                "GEMINI_HTTP_TIMEOUT_SECONDS",
                DEFAULT_GEMINI_HTTP_TIMEOUT_SECONDS,
            ),
            yt_dlp_bin: read_string("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            download_timeout: read_seconds("YT_DLP_TIMEOUT_SECONDS", DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            poll_interval: read_seconds("FILE_POLL_INTERVAL_SECONDS", DEFAULT_POLL_INTERVAL_SECONDS),
            active_timeout: read_seconds(
                "FILE_ACTIVE_TIMEOUT_SECONDS",
                DEFAULT_ACTIVE_TIMEOUT_SECONDS,
            ),
            allowed_origins,
        })
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            poll_interval: self.poll_interval,
            active_timeout: self.active_timeout,
            generation: GenerationParams {
                temperature: GENERATION_TEMPERATURE,
                max_output_tokens: GENERATION_MAX_OUTPUT_TOKENS,
            },
        }
    }
}

fn resolve_bind_addr<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(configured) =
        lookup("APP_ADDR").and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = lookup("PORT").and_then(|value| value.trim().parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let settings = settings_from(&[("GEMINI_API_KEY", "secret")]).unwrap();

        assert_eq!(settings.gemini_api_key, "secret");
        assert_eq!(settings.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(settings.gemini_api_base, DEFAULT_GEMINI_API_BASE);
        assert_eq!(settings.bind_addr, "127.0.0.1:8000");
        assert_eq!(settings.yt_dlp_bin, "yt-dlp");
        assert_eq!(settings.download_timeout, Duration::from_secs(120));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.active_timeout, Duration::from_secs(90));
        assert!(settings.allowed_origins.is_empty());
    }

    #[test]
    fn missing_or_blank_key_is_rejected() {
        assert!(matches!(settings_from(&[]), Err(ConfigError::MissingApiKey)));
        assert!(matches!(
            settings_from(&[("GEMINI_API_KEY", "   ")]),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn port_variable_binds_all_interfaces() {
        let settings = settings_from(&[("GEMINI_API_KEY", "k"), ("PORT", "9000")]).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:9000");

        let settings = settings_from(&[
            ("GEMINI_API_KEY", "k"),
            ("PORT", "9000"),
            ("APP_ADDR", "10.0.0.1:7000"),
        ])
        .unwrap();
        assert_eq!(settings.bind_addr, "10.0.0.1:7000");
    }

    #[test]
    fn unparseable_durations_fall_back_to_defaults() {
        let settings = settings_from(&[
            ("GEMINI_API_KEY", "k"),
            ("FILE_POLL_INTERVAL_SECONDS", "soon"),
            ("FILE_ACTIVE_TIMEOUT_SECONDS", "0"),
            ("YT_DLP_TIMEOUT_SECONDS", "30"),
        ])
        .unwrap();

        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.active_timeout, Duration::from_secs(90));
        assert_eq!(settings.download_timeout, Duration::from_secs(30));
    }

    #[test]
    fn origins_are_normalized() {
        let settings = settings_from(&[
            ("GEMINI_API_KEY", "k"),
            (
                "ALLOWED_ORIGINS",
                "https://Recettes.example.com, http://localhost:3000,http://localhost:80",
            ),
        ])
        .unwrap();

        assert_eq!(
            settings.allowed_origins,
            vec![
                "https://recettes.example.com".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost".to_string(),
            ]
        );
    }

    #[test]
    fn origin_with_a_path_is_a_config_error() {
        let result = settings_from(&[
            ("GEMINI_API_KEY", "k"),
            ("ALLOWED_ORIGINS", "https://example.com/app"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidOrigin(origin)) if origin == "https://example.com/app"));
    }

    #[test]
    fn analyzer_options_carry_generation_parameters() {
        let options = settings_from(&[("GEMINI_API_KEY", "k")])
            .unwrap()
            .analyzer_options();

        assert_eq!(options.generation.temperature, 0.3);
        assert_eq!(options.generation.max_output_tokens, 4096);
        assert_eq!(options.poll_interval, Duration::from_secs(2));
    }
}
