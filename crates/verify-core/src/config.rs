//! ============================================================================
//! AppConfig - Process-wide settings
//! ============================================================================
//! Read once at startup from the environment (a .env file is loaded by the
//! binary first). The backend base URL is required; its absence is reported
//! as a configuration error before any request is attempted.
//! ============================================================================

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::capture::{CaptureLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_DURATION_SECS};
use crate::item_row::ItemFilter;
use crate::types::VerifyError;

pub const ENV_API_BASE_URL: &str = "VERIFY_API_BASE_URL";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "VERIFY_HTTP_TIMEOUT_SECS";
pub const ENV_PROOF_MAX_MB: &str = "VERIFY_PROOF_MAX_MB";
pub const ENV_PROOF_MAX_SECS: &str = "VERIFY_PROOF_MAX_SECS";
pub const ENV_DEFAULT_REQUEST_ID: &str = "VERIFY_DEFAULT_REQUEST_ID";
pub const ENV_EXCLUDED_FIELDS: &str = "VERIFY_EXCLUDED_FIELDS";

/// Sample request ID the root route redirects to
pub const DEFAULT_REQUEST_ID: &str = "FA4492";

/// Per-request timeout when none is configured
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    pub http_timeout: Duration,
    pub capture_limits: CaptureLimits,
    pub default_request_id: String,
    pub item_filter: ItemFilter,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            capture_limits: CaptureLimits::default(),
            default_request_id: DEFAULT_REQUEST_ID.to_string(),
            item_filter: ItemFilter::default(),
        }
    }
}

impl AppConfig {
    /// Load from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup; unset or blank keys use defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let timeout_secs = parse_nonzero(
            var(ENV_HTTP_TIMEOUT_SECS),
            ENV_HTTP_TIMEOUT_SECS,
            DEFAULT_HTTP_TIMEOUT_SECS,
        );
        let max_mb = parse_nonzero(
            var(ENV_PROOF_MAX_MB),
            ENV_PROOF_MAX_MB,
            DEFAULT_MAX_BYTES / (1024 * 1024),
        );
        let max_secs = parse_nonzero(
            var(ENV_PROOF_MAX_SECS),
            ENV_PROOF_MAX_SECS,
            DEFAULT_MAX_DURATION_SECS,
        );

        let item_filter = ItemFilter {
            excluded: var(ENV_EXCLUDED_FIELDS)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            drop_zero_sent: false,
        };

        Self {
            api_base_url: var(ENV_API_BASE_URL),
            http_timeout: Duration::from_secs(timeout_secs),
            capture_limits: CaptureLimits {
                max_bytes: max_mb.saturating_mul(1024 * 1024),
                max_duration: Duration::from_secs(max_secs),
            },
            default_request_id: var(ENV_DEFAULT_REQUEST_ID)
                .unwrap_or_else(|| DEFAULT_REQUEST_ID.to_string()),
            item_filter,
        }
    }

    /// Validated backend settings. Fails when the base URL is missing or
    /// not an http(s) URL.
    pub fn backend(&self) -> Result<BackendConfig, VerifyError> {
        let raw = self.api_base_url.as_deref().ok_or_else(|| {
            VerifyError::Configuration(format!(
                "Backend URL is not set (set {} or pass --api-url)",
                ENV_API_BASE_URL
            ))
        })?;
        BackendConfig::new(raw, self.http_timeout)
    }
}

/// Parse a limit that must be positive; zero and garbage fall back to `default`
fn parse_nonzero<T>(value: Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display + Default + PartialEq,
    T::Err: Display,
{
    let Some(raw) = value else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) if v == T::default() => {
            warn!("{} must be greater than zero (using {})", key, default);
            default
        }
        Ok(v) => v,
        Err(e) => {
            warn!("Invalid {} value '{}': {} (using {})", key, raw, e, default);
            default
        }
    }
}

/// Validated backend endpoint settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    base_url: Url,
    timeout: Duration,
}

impl BackendConfig {
    pub fn new(raw: &str, timeout: Duration) -> Result<Self, VerifyError> {
        if timeout.is_zero() {
            return Err(VerifyError::Configuration(
                "HTTP timeout must be greater than zero".into(),
            ));
        }

        let mut base_url = Url::parse(raw.trim()).map_err(|e| {
            VerifyError::Configuration(format!("Invalid backend URL '{}': {}", raw, e))
        })?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(VerifyError::Configuration(format!(
                "Backend URL must be http or https, got '{}'",
                base_url.scheme()
            )));
        }

        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        base_url.set_query(None);
        base_url.set_fragment(None);

        debug!("Backend base URL: {}", base_url);
        Ok(Self { base_url, timeout })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a relative API path such as `api/confirm-delivery/`
    pub fn endpoint(&self, path: &str) -> Result<Url, VerifyError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| {
                VerifyError::Configuration(format!("Invalid endpoint '{}': {}", path, e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.api_base_url, None);
        assert_eq!(config.http_timeout, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
        assert_eq!(config.capture_limits, CaptureLimits::default());
        assert_eq!(config.default_request_id, DEFAULT_REQUEST_ID);
        assert!(config.item_filter.is_noop());
    }

    #[test]
    fn test_missing_url_is_configuration_error() {
        let config = AppConfig::from_lookup(lookup(&[(ENV_API_BASE_URL, "   ")]));
        let err = config.backend().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains(ENV_API_BASE_URL));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_API_BASE_URL, "http://localhost:8000"),
            (ENV_HTTP_TIMEOUT_SECS, "5"),
            (ENV_PROOF_MAX_MB, "lots"),
            (ENV_PROOF_MAX_SECS, "60"),
            (ENV_DEFAULT_REQUEST_ID, "ZZ1"),
            (ENV_EXCLUDED_FIELDS, "Pincode, Vendor No,,"),
        ]));
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.capture_limits.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(config.capture_limits.max_duration, Duration::from_secs(60));
        assert_eq!(config.default_request_id, "ZZ1");
        assert_eq!(config.item_filter.excluded, vec!["Pincode", "Vendor No"]);
        assert!(config.backend().is_ok());
    }

    #[test]
    fn test_zero_values_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_HTTP_TIMEOUT_SECS, "0"),
            (ENV_PROOF_MAX_MB, "0"),
            (ENV_PROOF_MAX_SECS, "0"),
        ]));
        assert_eq!(config.http_timeout, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
        assert_eq!(config.capture_limits, CaptureLimits::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(matches!(
            BackendConfig::new("http://localhost:8000", Duration::ZERO),
            Err(VerifyError::Configuration(_))
        ));
    }

    #[test]
    fn test_endpoint_join_keeps_prefix() {
        let backend =
            BackendConfig::new("https://example.com/delivery", Duration::from_secs(1)).unwrap();
        assert_eq!(
            backend.endpoint("/api/confirm-delivery/").unwrap().as_str(),
            "https://example.com/delivery/api/confirm-delivery/"
        );

        let backend = BackendConfig::new("http://localhost:8000", Duration::from_secs(1)).unwrap();
        assert_eq!(
            backend.endpoint("api/customer-details/").unwrap().as_str(),
            "http://localhost:8000/api/customer-details/"
        );
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            BackendConfig::new("not a url", Duration::from_secs(1)),
            Err(VerifyError::Configuration(_))
        ));
        assert!(matches!(
            BackendConfig::new("ftp://example.com", Duration::from_secs(1)),
            Err(VerifyError::Configuration(_))
        ));
    }
}
