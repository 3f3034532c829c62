//! Daemon TLS configuration.
//!
//! Configuration is plain data, deserialized from TOML or built in code.
//! Validation is separate from loading so callers can assemble a config
//! programmatically and still get the same checks.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// ALPN protocol identifiers are length-prefixed with a single octet.
const MAX_PROTOCOL_ID_LEN: usize = 255;

fn default_protocols() -> Vec<String> {
    vec!["spdy/3".to_string(), "http/1.1".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    256
}

/// TLS settings for one daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PEM file holding the certificate chain, leaf first.
    pub certificate: PathBuf,
    /// PEM file holding the matching private key.
    pub private_key: PathBuf,
    /// Application protocols offered via ALPN, most preferred first.
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    /// Server-side session resumption cache.
    #[serde(default)]
    pub session_cache: SessionCacheConfig,
}

/// Session resumption cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    /// Whether resumption is offered at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of cached sessions.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
        }
    }
}

impl DaemonConfig {
    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Check the configuration for problems. Returns one message per
    /// issue found; an empty vector means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.certificate.as_os_str().is_empty() {
            issues.push("certificate path is empty".to_string());
        }
        if self.private_key.as_os_str().is_empty() {
            issues.push("private_key path is empty".to_string());
        }
        if self.protocols.is_empty() {
            issues.push("protocols list is empty".to_string());
        }
        for proto in &self.protocols {
            if proto.is_empty() {
                issues.push("empty ALPN protocol identifier".to_string());
            } else if proto.len() > MAX_PROTOCOL_ID_LEN {
                issues.push(format!(
                    "ALPN protocol identifier {:?} exceeds {} bytes",
                    &proto[..32.min(proto.len())],
                    MAX_PROTOCOL_ID_LEN
                ));
            }
        }
        if self.session_cache.enabled && self.session_cache.capacity == 0 {
            issues.push("session cache enabled with zero capacity".to_string());
        }

        issues
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn minimal() -> DaemonConfig {
        DaemonConfig {
            certificate: PathBuf::from("cert.pem"),
            private_key: PathBuf::from("key.pem"),
            protocols: default_protocols(),
            session_cache: SessionCacheConfig::default(),
        }
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            certificate = "cert.pem"
            private_key = "key.pem"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.protocols, vec!["spdy/3", "http/1.1"]);
        assert!(cfg.session_cache.enabled);
        assert_eq!(cfg.session_cache.capacity, 256);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn missing_certificate_fails_to_parse() {
        let err = toml::from_str::<DaemonConfig>(r#"private_key = "key.pem""#);
        assert!(err.is_err());
    }

    #[test]
    fn validate_flags_empty_protocols() {
        let mut cfg = minimal();
        cfg.protocols.clear();
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("protocols"));
    }

    #[test]
    fn validate_flags_oversized_protocol_id() {
        let mut cfg = minimal();
        cfg.protocols.push("x".repeat(300));
        assert!(!cfg.validate().is_empty());
    }

    #[test]
    fn validate_flags_zero_capacity_cache() {
        let mut cfg = minimal();
        cfg.session_cache.capacity = 0;
        assert!(!cfg.validate().is_empty());

        cfg.session_cache.enabled = false;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "certificate = \"c.pem\"\nprivate_key = \"k.pem\"\nprotocols = [\"h2\"]"
        )
        .unwrap();
        let cfg = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(cfg.protocols, vec!["h2"]);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = DaemonConfig::load(Path::new("/nonexistent/tls.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
