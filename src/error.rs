//! Error types for the TLS transport layer.
//!
//! Everything fallible in this crate returns [`Result`]. Fatal errors from
//! an I/O call mean the session is unusable and must be closed; retryable
//! conditions are not errors and are reported through
//! [`IoOutcome`](crate::engine::IoOutcome) instead.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by daemon setup and per-session I/O.
#[derive(Debug, Error)]
pub enum Error {
    /// Certificate material could not be read or was rejected.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Private key material could not be read or was rejected.
    #[error("private key error: {0}")]
    PrivateKey(String),

    /// Invalid daemon configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The peer violated the TLS protocol, or the handshake failed.
    #[error("TLS protocol error: {0}")]
    Tls(#[from] rustls::Error),

    /// A socket error that is neither retryable nor a disconnect.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was attempted on a session that already failed.
    #[error("session already failed")]
    SessionFailed,
}
