//! Non-blocking TLS transport core for an event-driven application server.
//!
//! The server above this crate runs a single-threaded readiness loop; this
//! crate gives it an encrypted byte pipe per connection with no blocking,
//! no threads, and no socket ownership. Every I/O call reports one of four
//! things: bytes moved, peer gone, retry after readiness, or a fatal error
//! that ends the session.
//!
//! Architecture:
//! - [`GlobalContext`]: process-wide cryptographic state, created once
//! - [`DaemonContext`]: per-listener certificate, ALPN and cache state
//! - [`SessionContext`]: per-connection transport with failure latching
//! - [`engine`]: the pluggable protocol machine behind each session
//!
//! Lifetimes nest strictly: sessions hold their daemon alive, daemons hold
//! the global state alive, and teardown happens in reverse order of
//! creation.
//!
//! ```no_run
//! use spdyd_tls::{DaemonConfig, DaemonContext, GlobalContext, SessionContext};
//!
//! # fn main() -> spdyd_tls::Result<()> {
//! let global = GlobalContext::init();
//! let config = DaemonConfig::load(std::path::Path::new("tls.toml"))?;
//! let daemon = DaemonContext::new(&global, &config)?;
//! let session = SessionContext::new(&daemon)?;
//! # drop(session);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod global;
pub mod session;

pub use config::{DaemonConfig, SessionCacheConfig};
pub use daemon::DaemonContext;
pub use engine::rustls::RustlsEngine;
pub use engine::{Interest, IoOutcome, SessionPhase, Socket, TlsEngine};
pub use error::{Error, Result};
pub use global::GlobalContext;
pub use session::SessionContext;
