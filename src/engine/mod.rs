//! Pluggable TLS engine contract.
//!
//! A [`TlsEngine`] owns all protocol state for one encrypted session and
//! moves bytes between a caller-supplied non-blocking socket and the
//! caller's plaintext buffers. The engine never blocks and never owns the
//! socket; every call borrows it for the duration of that call only.
//!
//! Architecture:
//! - [`Socket`]: blanket trait for any `Read + Write` transport
//! - [`IoOutcome`]: the three non-fatal results of a transfer attempt
//! - [`Interest`]: readiness directions to wait for after `Again`
//! - [`SessionPhase`]: coarse lifecycle of one session
//! - [`rustls`][self::rustls]: the default engine implementation

pub mod rustls;

use std::io;

use crate::error::Result;

/// Any non-blocking byte transport the engine can drive.
///
/// Blanket-implemented for everything that is `Read + Write`, including
/// `TcpStream` in non-blocking mode and in-memory test transports.
pub trait Socket: io::Read + io::Write {}

impl<T: io::Read + io::Write + ?Sized> Socket for T {}

/// Readiness directions a caller should wait for before retrying.
///
/// Returned inside [`IoOutcome::Again`]. During a handshake a logical
/// read may need socket writability and vice versa, so both directions
/// are reported explicitly rather than inferred from the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    /// Wait until the socket is readable.
    pub read: bool,
    /// Wait until the socket is writable.
    pub write: bool,
}

impl Interest {
    /// True when neither direction is requested.
    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// Result of one non-fatal `recv` or `send` attempt.
///
/// Fatal failures are reported as `Err` on the call itself and terminate
/// the session. The three variants here are mutually exclusive with each
/// other and with errors: `Transferred(n)` always carries `n > 0` unless
/// the caller passed an empty buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// This many bytes of application plaintext moved.
    Transferred(usize),
    /// The peer closed the connection; no more data will flow.
    Closed,
    /// No progress right now. Retry after the socket reports the
    /// given readiness.
    Again(Interest),
}

/// Coarse lifecycle of one encrypted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, no handshake traffic yet.
    Unestablished,
    /// Handshake in flight.
    Handshaking,
    /// Handshake complete, application data may flow.
    Established,
    /// Local close requested, close_notify being delivered.
    Closing,
    /// Session over, all further I/O reports `Closed`.
    Closed,
}

/// One encrypted session's protocol machine.
///
/// Object safe so sessions can carry `Box<dyn TlsEngine>` and tests can
/// substitute scripted engines.
pub trait TlsEngine {
    /// Move decrypted application bytes into `buf`.
    ///
    /// Transparently advances the handshake if one is in flight; no
    /// application bytes are delivered before the session is
    /// [`SessionPhase::Established`].
    fn recv(&mut self, socket: &mut dyn Socket, buf: &mut [u8]) -> Result<IoOutcome>;

    /// Encrypt bytes from `buf` and push them toward the socket.
    ///
    /// May accept fewer bytes than offered; `Transferred(n)` reports how
    /// many were consumed. Before the handshake completes this performs a
    /// handshake step instead and reports `Again`.
    fn send(&mut self, socket: &mut dyn Socket, buf: &[u8]) -> Result<IoOutcome>;

    /// True when decrypted bytes are already buffered inside the engine.
    ///
    /// When this returns true, the next `recv` makes progress without any
    /// socket readiness.
    fn is_pending(&self) -> bool;

    /// Current lifecycle phase.
    fn phase(&self) -> SessionPhase;

    /// Application protocol agreed during the handshake, if any.
    fn negotiated_protocol(&self) -> Option<&[u8]>;

    /// Deliver a best-effort close_notify and retire the session.
    ///
    /// Never fails; an unflushable alert is dropped. After this call all
    /// I/O reports [`IoOutcome::Closed`].
    fn close(&mut self, socket: &mut dyn Socket);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_default_is_empty() {
        assert!(Interest::default().is_empty());
        assert!(!Interest { read: true, write: false }.is_empty());
        assert!(!Interest { read: false, write: true }.is_empty());
    }

    #[test]
    fn outcome_variants_are_distinct() {
        let again = IoOutcome::Again(Interest { read: true, write: false });
        assert_ne!(IoOutcome::Transferred(1), IoOutcome::Closed);
        assert_ne!(IoOutcome::Transferred(1), again);
        assert_ne!(IoOutcome::Closed, again);
    }
}
