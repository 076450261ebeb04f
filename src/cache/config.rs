//! Cache configuration.
//!
//! Process-wide settings come from a `[cache]` TOML table. Per-request
//! options start from those settings and can be tightened by the route or
//! the request itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::keys::DEFAULT_NAMESPACE;
use super::lock::DEFAULT_LOCK_TTL;
use crate::http::Request;

const DEFAULT_KEY_SCHEMA_VERSION: u32 = 1;
const DEFAULT_CACHE_AGE_TOLERANCE_SECS: u64 = 0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Cache settings from the `[cache]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Master switch. When off every request is treated as ineligible.
    pub enabled: bool,
    /// How old (seconds) a mismatched record may be and still be served
    /// while someone else regenerates. 0 disables stale serving.
    pub cache_age_tolerance_secs: u64,
    /// Serve whatever sits in the unversioned slot without a version check.
    pub serve_unversioned: bool,
    /// Bumping this invalidates every key at once.
    pub key_schema_version: u32,
    /// Lifetime of a regeneration lock claim for the in-memory lock.
    pub lock_ttl_secs: u64,
    /// Prefix of every hashed key.
    pub key_namespace: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_age_tolerance_secs: DEFAULT_CACHE_AGE_TOLERANCE_SECS,
            serve_unversioned: false,
            key_schema_version: DEFAULT_KEY_SCHEMA_VERSION,
            lock_ttl_secs: DEFAULT_LOCK_TTL.as_secs(),
            key_namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }
}

#[derive(Deserialize, Default)]
struct SettingsFile {
    #[serde(default)]
    cache: CacheSettings,
}

impl CacheSettings {
    /// Parses the `[cache]` table of a TOML document. A document without
    /// one yields the defaults; unrelated tables are ignored.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(source)?;
        Ok(file.cache)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn cache_age_tolerance(&self) -> Duration {
        Duration::from_secs(self.cache_age_tolerance_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Options for a single cached request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub cache_age_tolerance: Duration,
    pub serve_unversioned: bool,
    /// Skip every lookup and regenerate.
    pub force_refill: bool,
    /// TTL handed to the store when this response is written.
    pub versioned_cache_expiry: Option<Duration>,
}

impl CacheOptions {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            cache_age_tolerance: settings.cache_age_tolerance(),
            serve_unversioned: settings.serve_unversioned,
            force_refill: false,
            versioned_cache_expiry: None,
        }
    }

    #[must_use]
    pub fn cache_age_tolerance(mut self, tolerance: Duration) -> Self {
        self.cache_age_tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn serve_unversioned(mut self, serve_unversioned: bool) -> Self {
        self.serve_unversioned = serve_unversioned;
        self
    }

    #[must_use]
    pub fn force_refill(mut self, force_refill: bool) -> Self {
        self.force_refill = force_refill;
        self
    }

    #[must_use]
    pub fn versioned_cache_expiry(mut self, expiry: Duration) -> Self {
        self.versioned_cache_expiry = Some(expiry);
        self
    }

    /// Applies request-driven overrides: `fill_cache=true` forces a refill.
    #[must_use]
    pub fn for_request(mut self, request: &Request) -> Self {
        if request.query_param("fill_cache") == Some("true") {
            self.force_refill = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_table_missing() {
        let settings = CacheSettings::from_toml_str("[server]\nport = 8080\n").unwrap();
        assert_eq!(settings, CacheSettings::default());
        assert!(settings.enabled);
        assert_eq!(settings.key_schema_version, 1);
        assert_eq!(settings.lock_ttl(), Duration::from_secs(30));
        assert_eq!(settings.key_namespace, "cacheable");
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let settings = CacheSettings::from_toml_str(
            r#"
            [cache]
            cache_age_tolerance_secs = 120
            key_namespace = "pages"
            "#,
        )
        .unwrap();
        assert_eq!(settings.cache_age_tolerance(), Duration::from_secs(120));
        assert_eq!(settings.key_namespace, "pages");
        assert!(!settings.serve_unversioned);
        assert_eq!(settings.key_schema_version, 1);
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        let err = CacheSettings::from_toml_str("[cache]\nenabled = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = CacheSettings::from_file("/nonexistent/cachet.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn fill_cache_forces_refill() {
        let settings = CacheSettings::default();
        let raw = b"GET /posts?fill_cache=true HTTP/1.1\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        let options = CacheOptions::from_settings(&settings).for_request(&request);
        assert!(options.force_refill);

        let raw = b"GET /posts?fill_cache=1 HTTP/1.1\r\n\r\n";
        let (request, _) = Request::parse(raw).unwrap();
        assert!(!CacheOptions::from_settings(&settings).for_request(&request).force_refill);
    }
}
