// Site Configuration
//
// Endpoint URLs, locale and pipeline tuning supplied by the hosting
// application. Every field has a default matching the production site.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the replay kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Base URL for the site's static files.
    pub static_url: String,

    /// Base URL for the playback widget's own assets.
    pub joust_static_url: String,

    /// Base URL for card art; card ids are appended with a `.jpg` suffix.
    pub card_art_url: String,

    /// Metadata document URL with `%(build)s` and `%(locale)s` placeholders.
    pub metadata_url_template: String,

    pub locale: String,

    /// Line-protocol write endpoint for telemetry.
    pub telemetry_endpoint: String,

    pub metrics_prefix: String,

    pub flush_interval_ms: u64,

    /// Error reporting DSN. Reporting is disabled when absent.
    pub error_dsn: Option<String>,

    pub error_environment: String,

    /// Directory backing the metadata cache. `None` uses the platform cache dir.
    pub cache_dir: Option<PathBuf>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            static_url: "https://static.hsreplay.net/static/".into(),
            joust_static_url: "https://static.hsreplay.net/static/joust/".into(),
            card_art_url: "https://art.hearthstonejson.com/v1/256x/".into(),
            metadata_url_template:
                "https://cdn.hearthstonejson.com/v1/%(build)s/%(locale)s/cards.json".into(),
            locale: "enUS".into(),
            telemetry_endpoint:
                "https://metrics.hearthsim.net:8086/write?db=hsreplaynet&precision=s".into(),
            metrics_prefix: "joust_".into(),
            flush_interval_ms: 15_000,
            error_dsn: None,
            error_environment: "development".into(),
            cache_dir: None,
        }
    }
}

impl SiteConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: SiteConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("static_url", &self.static_url),
            ("joust_static_url", &self.joust_static_url),
            ("card_art_url", &self.card_art_url),
            ("metadata_url_template", &self.metadata_url_template),
            ("telemetry_endpoint", &self.telemetry_endpoint),
            ("locale", &self.locale),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("`{name}` must not be empty")));
            }
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "`flush_interval_ms` must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Directory used by file-backed metadata caching.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("hsreplay").join("metadata")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = SiteConfig::from_json("{}").unwrap();
        assert_eq!(config, SiteConfig::default());
        assert_eq!(config.flush_interval(), Duration::from_secs(15));
        assert_eq!(config.locale, "enUS");
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = SiteConfig::from_json(
            r#"{ "locale": "deDE", "error_dsn": "https://key@sentry.example/3" }"#,
        )
        .unwrap();

        assert_eq!(config.locale, "deDE");
        assert_eq!(config.error_dsn.as_deref(), Some("https://key@sentry.example/3"));
        assert_eq!(config.metrics_prefix, "joust_");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = SiteConfig::from_json(r#"{ "flush_interval_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn blank_endpoint_is_rejected() {
        let err = SiteConfig::from_json(r#"{ "telemetry_endpoint": " " }"#).unwrap_err();
        assert!(err.to_string().contains("telemetry_endpoint"));
    }

    #[test]
    fn explicit_cache_dir_wins() {
        let config = SiteConfig {
            cache_dir: Some(PathBuf::from("/tmp/hsjson")),
            ..SiteConfig::default()
        };
        assert_eq!(config.resolved_cache_dir(), Some(PathBuf::from("/tmp/hsjson")));
    }
}
