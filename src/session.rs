//! Per-connection session context.
//!
//! A [`SessionContext`] wraps one [`TlsEngine`] and pins the
//! [`DaemonContext`] it came from, so teardown order is always sessions,
//! then daemon, then global state. It also latches fatal failures: once a
//! `recv` or `send` returns an error the session refuses further I/O
//! instead of letting the caller retry against broken protocol state.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::daemon::DaemonContext;
use crate::engine::rustls::RustlsEngine;
use crate::engine::{IoOutcome, SessionPhase, Socket, TlsEngine};
use crate::error::{Error, Result};

/// One accepted connection's encrypted transport.
pub struct SessionContext {
    daemon: Arc<DaemonContext>,
    engine: Box<dyn TlsEngine>,
    failed: bool,
}

impl SessionContext {
    /// New server-side session using the daemon's default engine.
    pub fn new(daemon: &Arc<DaemonContext>) -> Result<Self> {
        let engine = RustlsEngine::server(daemon)?;
        Ok(Self::with_engine(daemon, Box::new(engine)))
    }

    /// New session driven by a caller-supplied engine.
    pub fn with_engine(daemon: &Arc<DaemonContext>, engine: Box<dyn TlsEngine>) -> Self {
        debug!("session created");
        Self {
            daemon: Arc::clone(daemon),
            engine,
            failed: false,
        }
    }

    /// Daemon this session belongs to.
    pub fn daemon(&self) -> &Arc<DaemonContext> {
        &self.daemon
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.engine.phase()
    }

    /// ALPN protocol agreed during the handshake, if any.
    pub fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.engine.negotiated_protocol()
    }

    /// True when the next [`recv`](Self::recv) will make progress without
    /// waiting for socket readiness.
    pub fn is_pending(&self) -> bool {
        !self.failed && self.engine.is_pending()
    }

    /// Receive decrypted application bytes into `buf`.
    pub fn recv(&mut self, socket: &mut dyn Socket, buf: &mut [u8]) -> Result<IoOutcome> {
        self.guard()?;
        match self.engine.recv(socket, buf) {
            Err(err) => Err(self.fail("recv", err)),
            ok => ok,
        }
    }

    /// Send application bytes from `buf`, encrypted.
    pub fn send(&mut self, socket: &mut dyn Socket, buf: &[u8]) -> Result<IoOutcome> {
        self.guard()?;
        match self.engine.send(socket, buf) {
            Err(err) => Err(self.fail("send", err)),
            ok => ok,
        }
    }

    /// Close the session, delivering a best-effort close_notify.
    pub fn close(&mut self, socket: &mut dyn Socket) {
        self.engine.close(socket);
    }

    fn guard(&self) -> Result<()> {
        if self.failed {
            return Err(Error::SessionFailed);
        }
        Ok(())
    }

    fn fail(&mut self, op: &str, err: Error) -> Error {
        self.failed = true;
        warn!(op, error = %err, "terminating session after fatal I/O error");
        err
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;
    use crate::config::SessionCacheConfig;
    use crate::engine::Interest;
    use crate::global::GlobalContext;

    fn test_daemon() -> Arc<DaemonContext> {
        let global = GlobalContext::init();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        DaemonContext::from_pem(
            &global,
            cert.cert.pem().as_bytes(),
            cert.key_pair.serialize_pem().as_bytes(),
            &["spdy/3".to_string()],
            &SessionCacheConfig::default(),
        )
        .unwrap()
    }

    /// Engine that replays a script of outcomes, for exercising the
    /// session wrapper without real TLS traffic.
    struct ScriptedEngine {
        script: VecDeque<Result<IoOutcome>>,
        phase: SessionPhase,
        pending: bool,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Result<IoOutcome>>) -> Box<Self> {
            Box::new(Self {
                script: script.into(),
                phase: SessionPhase::Established,
                pending: false,
            })
        }

        fn next(&mut self) -> Result<IoOutcome> {
            self.script
                .pop_front()
                .unwrap_or(Ok(IoOutcome::Again(Interest::default())))
        }
    }

    impl TlsEngine for ScriptedEngine {
        fn recv(&mut self, _socket: &mut dyn Socket, _buf: &mut [u8]) -> Result<IoOutcome> {
            self.next()
        }

        fn send(&mut self, _socket: &mut dyn Socket, _buf: &[u8]) -> Result<IoOutcome> {
            self.next()
        }

        fn is_pending(&self) -> bool {
            self.pending
        }

        fn phase(&self) -> SessionPhase {
            self.phase
        }

        fn negotiated_protocol(&self) -> Option<&[u8]> {
            None
        }

        fn close(&mut self, _socket: &mut dyn Socket) {
            self.phase = SessionPhase::Closed;
        }
    }

    /// Socket stub; the scripted engine never touches it.
    struct NullSocket;

    impl io::Read for NullSocket {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl io::Write for NullSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn outcomes_pass_through() {
        let daemon = test_daemon();
        let engine = ScriptedEngine::new(vec![
            Ok(IoOutcome::Again(Interest { read: true, write: false })),
            Ok(IoOutcome::Transferred(7)),
            Ok(IoOutcome::Closed),
        ]);
        let mut session = SessionContext::with_engine(&daemon, engine);
        let mut sock = NullSocket;
        let mut buf = [0u8; 16];

        assert_eq!(
            session.recv(&mut sock, &mut buf).unwrap(),
            IoOutcome::Again(Interest { read: true, write: false })
        );
        assert_eq!(
            session.recv(&mut sock, &mut buf).unwrap(),
            IoOutcome::Transferred(7)
        );
        assert_eq!(session.recv(&mut sock, &mut buf).unwrap(), IoOutcome::Closed);
    }

    #[test]
    fn fatal_error_latches() {
        let daemon = test_daemon();
        let engine = ScriptedEngine::new(vec![
            Err(Error::Certificate("scripted failure".to_string())),
            Ok(IoOutcome::Transferred(1)),
        ]);
        let mut session = SessionContext::with_engine(&daemon, engine);
        let mut sock = NullSocket;
        let mut buf = [0u8; 16];

        assert!(session.recv(&mut sock, &mut buf).is_err());
        // the scripted Transferred(1) must never be reachable
        assert!(matches!(
            session.recv(&mut sock, &mut buf).unwrap_err(),
            Error::SessionFailed
        ));
        assert!(matches!(
            session.send(&mut sock, b"x").unwrap_err(),
            Error::SessionFailed
        ));
        assert!(!session.is_pending());
    }

    #[test]
    fn close_reaches_the_engine() {
        let daemon = test_daemon();
        let mut session = SessionContext::with_engine(&daemon, ScriptedEngine::new(vec![]));
        let mut sock = NullSocket;
        assert_eq!(session.phase(), SessionPhase::Established);
        session.close(&mut sock);
        assert_eq!(session.phase(), SessionPhase::Closed);
        // closing again is harmless
        session.close(&mut sock);
        assert_eq!(session.phase(), SessionPhase::Closed);
    }

    #[test]
    fn session_pins_its_daemon() {
        let daemon = test_daemon();
        let session = SessionContext::new(&daemon).unwrap();
        assert!(Arc::ptr_eq(session.daemon(), &daemon));
        drop(daemon);
        // the daemon context stays alive through the session's clone
        assert_eq!(session.phase(), SessionPhase::Unestablished);
    }
}
