//! Per-daemon TLS context.
//!
//! A [`DaemonContext`] holds everything shared by the sessions of one
//! listening daemon: the parsed certificate chain and key, the ALPN
//! preference list, and the resumption cache. It is built once at daemon
//! startup and handed out as an `Arc`; sessions keep a clone, so the
//! context cannot be torn down while any session is alive.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{NoServerSessionStorage, ServerSessionMemoryCache};
use rustls::ServerConfig;
use tracing::debug;

use crate::config::{DaemonConfig, SessionCacheConfig};
use crate::error::{Error, Result};
use crate::global::GlobalContext;

/// Shared TLS state for all sessions of one daemon.
pub struct DaemonContext {
    server_config: Arc<ServerConfig>,
    protocols: Vec<Bytes>,
    global: GlobalContext,
}

impl DaemonContext {
    /// Build a daemon context from a configuration, reading certificate
    /// and key material from the paths it names.
    pub fn new(global: &GlobalContext, config: &DaemonConfig) -> Result<Arc<Self>> {
        let issues = config.validate();
        if let Some(first) = issues.first() {
            return Err(Error::Config(first.clone()));
        }
        let certs = load_cert_file(&config.certificate)?;
        let key = load_key_file(&config.private_key)?;
        Self::build(global, certs, key, &config.protocols, &config.session_cache)
    }

    /// Build a daemon context from in-memory PEM material.
    pub fn from_pem(
        global: &GlobalContext,
        cert_pem: &[u8],
        key_pem: &[u8],
        protocols: &[String],
        cache: &SessionCacheConfig,
    ) -> Result<Arc<Self>> {
        let certs = parse_certs(&mut &cert_pem[..])
            .map_err(|e| Error::Certificate(format!("bad PEM input: {e}")))?;
        if certs.is_empty() {
            return Err(Error::Certificate("no certificates in PEM input".to_string()));
        }
        let key = parse_key(&mut &key_pem[..])
            .map_err(|e| Error::PrivateKey(format!("bad PEM input: {e}")))?
            .ok_or_else(|| Error::PrivateKey("no private key in PEM input".to_string()))?;
        Self::build(global, certs, key, protocols, cache)
    }

    fn build(
        global: &GlobalContext,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        protocols: &[String],
        cache: &SessionCacheConfig,
    ) -> Result<Arc<Self>> {
        let mut config = ServerConfig::builder_with_provider(global.provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Certificate(format!("certificate/key rejected: {e}")))?;

        config.alpn_protocols = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();
        config.session_storage = if cache.enabled {
            ServerSessionMemoryCache::new(cache.capacity)
        } else {
            Arc::new(NoServerSessionStorage {})
        };

        debug!(
            protocols = ?protocols,
            resumption = cache.enabled,
            "daemon TLS context ready"
        );

        Ok(Arc::new(Self {
            server_config: Arc::new(config),
            protocols: protocols
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect(),
            global: global.clone(),
        }))
    }

    /// ALPN protocols this daemon offers, most preferred first.
    pub fn protocols(&self) -> &[Bytes] {
        &self.protocols
    }

    /// Global state this daemon was built from.
    pub fn global(&self) -> &GlobalContext {
        &self.global
    }

    pub(crate) fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

impl std::fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonContext")
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}

fn load_cert_file(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Certificate(format!("cannot open {}: {e}", path.display())))?;
    let certs = parse_certs(&mut BufReader::new(file))
        .map_err(|e| Error::Certificate(format!("cannot parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Certificate(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key_file(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::PrivateKey(format!("cannot open {}: {e}", path.display())))?;
    parse_key(&mut BufReader::new(file))
        .map_err(|e| Error::PrivateKey(format!("cannot parse {}: {e}", path.display())))?
        .ok_or_else(|| Error::PrivateKey(format!("no private key in {}", path.display())))
}

fn parse_certs(reader: &mut dyn io::BufRead) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(reader).collect()
}

fn parse_key(reader: &mut dyn io::BufRead) -> io::Result<Option<PrivateKeyDer<'static>>> {
    rustls_pemfile::private_key(reader)
}

// ============================================================================
// Tests
// ============================================================================
