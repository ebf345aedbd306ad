//! Configuration for storage backends and the datasets built on them.
//!
//! A [`Config`] is constructed once (typically with [`Config::from_path`] or [`Config::from_json_str`]) and passed
//! explicitly to every component that needs it. Nothing reads configuration from a global.
//!
//! ```json
//! {
//!     "version": "1",
//!     "endpoints": {
//!         "minio": {
//!             "url": "http://localhost:9000",
//!             "credentials": { "access_key": "key", "secret_key": "secret" },
//!             "backend": "s3"
//!         }
//!     },
//!     "cache_location": "/tmp/ncarray_cache",
//!     "max_object_size": "64MB",
//!     "max_object_size_for_memory": "1GB",
//!     "max_cache_size": "10GB",
//!     "backends": {
//!         "s3": { "maximum_part_size": "50MB", "max_parts": 8, "connect_timeout": 30.0, "read_timeout": 30.0 }
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Io {
        /// The configuration path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The configuration is not valid JSON or is missing required keys.
    #[error("invalid configuration: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// A byte size could not be parsed.
    #[error("invalid byte size {0:?}")]
    InvalidByteSize(String),
    /// No endpoint matches a URI.
    #[error("no endpoint is configured for {0}")]
    MissingEndpoint(String),
    /// An endpoint has no credentials.
    #[error("endpoint {0} has no credentials")]
    MissingCredentials(String),
    /// A value is out of range.
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue {
        /// The configuration key.
        key: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
}

/// A size in bytes.
///
/// Deserializes from an integer or from a string with a unit suffix, e.g. `"50MB"`, `"1.5GB"` or `"64MiB"`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "ByteSizeRepr", into = "u64")]
pub struct ByteSize(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Int(u64),
    Text(String),
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = ConfigError;

    fn try_from(repr: ByteSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            ByteSizeRepr::Int(size) => Ok(Self(size)),
            ByteSizeRepr::Text(text) => text.parse(),
        }
    }
}

impl std::str::FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const UNITS: [(&str, u64); 13] = [
            ("KiB", 1 << 10),
            ("MiB", 1 << 20),
            ("GiB", 1 << 30),
            ("TiB", 1 << 40),
            ("kB", 1_000),
            ("KB", 1_000),
            ("MB", 1_000_000),
            ("GB", 1_000_000_000),
            ("TB", 1_000_000_000_000),
            ("K", 1_000),
            ("M", 1_000_000),
            ("G", 1_000_000_000),
            ("B", 1),
        ];
        let s = s.trim();
        let (number, multiplier) = UNITS
            .iter()
            .find_map(|(unit, multiplier)| {
                s.strip_suffix(unit)
                    .map(|number| (number.trim(), *multiplier))
            })
            .unwrap_or((s, 1));
        if let Ok(number) = number.parse::<u64>() {
            return number
                .checked_mul(multiplier)
                .map(Self)
                .ok_or_else(|| ConfigError::InvalidByteSize(s.to_string()));
        }
        match number.parse::<f64>() {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            Ok(number) if number.is_finite() && number >= 0.0 => {
                Ok(Self((number * multiplier as f64).round() as u64))
            }
            _ => Err(ConfigError::InvalidByteSize(s.to_string())),
        }
    }
}

/// Credentials for an endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// The access key.
    pub access_key: String,
    /// The secret key.
    pub secret_key: String,
}

/// A named remote storage endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// The URL of the endpoint, e.g. `http://localhost:9000`.
    pub url: String,
    /// The credentials, if the endpoint requires them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// The backend kind tag, e.g. `s3`.
    #[serde(alias = "backend_kind")]
    pub backend: String,
    /// The region, for backends which need one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Options for a backend kind.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendOptions {
    /// Objects larger than this are transferred in parts of this size.
    #[serde(alias = "maximum_part_size")]
    pub part_size: ByteSize,
    /// The maximum number of parts transferred concurrently.
    pub max_parts: usize,
    /// The connect timeout in seconds.
    pub connect_timeout: f64,
    /// The read timeout in seconds.
    pub read_timeout: f64,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            part_size: ByteSize(50 * 1_000_000),
            max_parts: 8,
            connect_timeout: 30.0,
            read_timeout: 30.0,
        }
    }
}

impl BackendOptions {
    /// The connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout.max(0.0))
    }

    /// The read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout.max(0.0))
    }
}

/// Resource limits.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceAllocation {
    /// The memory available for in-memory objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<ByteSize>,
    /// The number of file handles available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filehandles: Option<usize>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_cache_location() -> PathBuf {
    std::env::temp_dir().join("ncarray_cache")
}

/// The configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// The configuration version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Named endpoints.
    #[serde(default, alias = "hosts")]
    pub endpoints: BTreeMap<String, EndpointConfig>,
    /// The root directory of the disk cache.
    #[serde(default = "default_cache_location")]
    pub cache_location: PathBuf,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_allocation: Option<ResourceAllocation>,
    /// The split budget: the maximum size in bytes of one sub-array.
    pub max_object_size: ByteSize,
    /// Objects larger than this are cached on disk rather than in memory.
    pub max_object_size_for_memory: ByteSize,
    /// The intended maximum size of the disk cache. Not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cache_size: Option<ByteSize>,
    /// Options per backend kind.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendOptions>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            endpoints: BTreeMap::new(),
            cache_location: default_cache_location(),
            resource_allocation: None,
            max_object_size: ByteSize(64 * 1_000_000),
            max_object_size_for_memory: ByteSize(1_000_000_000),
            max_cache_size: None,
            backends: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Parse a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the JSON is invalid, required keys are missing, or a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or is not a valid configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if a size or count is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_object_size.0 == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_object_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        for options in self.backends.values() {
            if options.part_size.0 == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "maximum_part_size",
                    reason: "must be greater than zero".to_string(),
                });
            }
            if options.max_parts == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "max_parts",
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Set the root directory of the disk cache.
    #[must_use]
    pub fn with_cache_location(mut self, cache_location: impl Into<PathBuf>) -> Self {
        self.cache_location = cache_location.into();
        self
    }

    /// Set the split budget in bytes.
    #[must_use]
    pub fn with_max_object_size(mut self, max_object_size: u64) -> Self {
        self.max_object_size = ByteSize(max_object_size);
        self
    }

    /// Set the threshold above which objects are cached on disk.
    #[must_use]
    pub fn with_max_object_size_for_memory(mut self, size: u64) -> Self {
        self.max_object_size_for_memory = ByteSize(size);
        self
    }

    /// Add an endpoint under `alias`.
    #[must_use]
    pub fn with_endpoint(mut self, alias: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.endpoints.insert(alias.into(), endpoint);
        self
    }

    /// Set the options of a backend kind.
    #[must_use]
    pub fn with_backend_options(mut self, kind: impl Into<String>, options: BackendOptions) -> Self {
        self.backends.insert(kind.into(), options);
        self
    }

    /// Return the options of a backend kind, or the defaults if it is not configured.
    #[must_use]
    pub fn backend_options(&self, kind: &str) -> BackendOptions {
        self.backends.get(kind).cloned().unwrap_or_default()
    }

    /// Find the endpoint for `uri`.
    ///
    /// The host of the URI is matched against the endpoint aliases first, then the URI is matched against the
    /// endpoint URLs as a prefix.
    #[must_use]
    pub fn endpoint_for(&self, uri: &str) -> Option<(&str, &EndpointConfig)> {
        let host = url::Url::parse(uri)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        if let Some(host) = host {
            if let Some((alias, endpoint)) = self.endpoints.get_key_value(&host) {
                return Some((alias.as_str(), endpoint));
            }
        }
        self.endpoints
            .iter()
            .find(|(_, endpoint)| uri.starts_with(&endpoint.url))
            .map(|(alias, endpoint)| (alias.as_str(), endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "version": "9",
        "hosts": {
            "minio": {
                "url": "http://localhost:9000",
                "credentials": { "access_key": "key", "secret_key": "secret" },
                "backend": "s3"
            }
        },
        "cache_location": "/tmp/cache",
        "resource_allocation": { "memory": "1GB", "filehandles": 20 },
        "max_object_size": "64MB",
        "max_object_size_for_memory": 1024,
        "max_cache_size": "10GiB",
        "backends": {
            "s3": { "maximum_part_size": "5MB", "max_parts": 4, "connect_timeout": 1.5, "read_timeout": 2 }
        }
    }"#;

    #[test]
    fn config_parse() -> Result<(), Box<dyn std::error::Error>> {
        let config = Config::from_json_str(JSON)?;
        assert_eq!(config.version, "9");
        assert_eq!(config.max_object_size, ByteSize(64_000_000));
        assert_eq!(config.max_object_size_for_memory, ByteSize(1024));
        assert_eq!(config.max_cache_size, Some(ByteSize(10 << 30)));
        assert_eq!(config.cache_location, PathBuf::from("/tmp/cache"));
        let options = config.backend_options("s3");
        assert_eq!(options.part_size, ByteSize(5_000_000));
        assert_eq!(options.max_parts, 4);
        assert_eq!(options.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.backend_options("other"), BackendOptions::default());

        let (alias, endpoint) = config.endpoint_for("s3://minio/bucket/a.nca").unwrap();
        assert_eq!(alias, "minio");
        assert_eq!(endpoint.backend, "s3");
        assert_eq!(
            config.endpoint_for("http://localhost:9000/bucket/a.nca").unwrap().0,
            "minio"
        );
        assert!(config.endpoint_for("s3://other/bucket/a.nca").is_none());
        Ok(())
    }

    #[test]
    fn config_invalid() {
        assert!(matches!(
            Config::from_json_str(r#"{"max_object_size": "64MB"}"#),
            Err(ConfigError::InvalidJson(_))
        ));
        assert!(Config::from_json_str(
            r#"{"max_object_size": "lots", "max_object_size_for_memory": 1}"#
        )
        .is_err());
        assert!(matches!(
            Config::from_json_str(r#"{"max_object_size": 0, "max_object_size_for_memory": 1}"#),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn byte_size_parse() {
        assert_eq!("100".parse::<ByteSize>().unwrap(), ByteSize(100));
        assert_eq!("100B".parse::<ByteSize>().unwrap(), ByteSize(100));
        assert_eq!("2kB".parse::<ByteSize>().unwrap(), ByteSize(2000));
        assert_eq!("1.5 GB".parse::<ByteSize>().unwrap(), ByteSize(1_500_000_000));
        assert_eq!("4MiB".parse::<ByteSize>().unwrap(), ByteSize(4 << 20));
        assert!("-1MB".parse::<ByteSize>().is_err());
        assert!("MB".parse::<ByteSize>().is_err());
    }
}
