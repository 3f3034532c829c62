//! Default [`TlsEngine`] backed by `rustls`.
//!
//! The engine runs the record layer in a strictly non-blocking fashion:
//! every call does at most one round of socket I/O, classifies the result,
//! and reports either progress, a retry hint, or the end of the session.
//!
//! Error classification:
//! - `WouldBlock` / `Interrupted` become [`IoOutcome::Again`]
//! - EOF, `BrokenPipe`, `ConnectionReset`, `ConnectionAborted` and a
//!   missing close_notify all become [`IoOutcome::Closed`]
//! - TLS protocol violations and other socket errors are fatal `Err`s;
//!   a queued fatal alert is pushed out best-effort before reporting

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConnection};
use tracing::{debug, trace, warn};

use crate::daemon::DaemonContext;
use crate::engine::{Interest, IoOutcome, SessionPhase, Socket, TlsEngine};
use crate::error::{Error, Result};

/// Plaintext the record layer buffers before `send` starts reporting
/// partial transfers.
pub const DEFAULT_BUFFER_LIMIT: usize = 16 * 1024;

/// `rustls`-backed session engine.
pub struct RustlsEngine {
    conn: Connection,
    phase: SessionPhase,
    /// Decrypted bytes queued inside the connection, per the last
    /// `process_new_packets` and subsequent reads.
    plaintext_available: usize,
    protocol: Option<Bytes>,
}

/// Borrows a [`Socket`] as the `io::Read`/`io::Write` the record layer
/// expects.
struct SocketIo<'a>(&'a mut dyn Socket);

impl io::Read for SocketIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl io::Write for SocketIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

fn is_retry(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

fn set_buffer_limit(conn: &mut Connection, limit: Option<usize>) {
    match conn {
        Connection::Client(c) => c.set_buffer_limit(limit),
        Connection::Server(c) => c.set_buffer_limit(limit),
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
    )
}

impl RustlsEngine {
    /// Server-side engine for one accepted connection.
    pub fn server(daemon: &DaemonContext) -> Result<Self> {
        let conn = ServerConnection::new(daemon.server_config())?;
        Ok(Self::from_connection(Connection::Server(conn)))
    }

    /// Client-side engine, used by outbound connections and tests.
    pub fn client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Result<Self> {
        let conn = ClientConnection::new(config, server_name)?;
        Ok(Self::from_connection(Connection::Client(conn)))
    }

    fn from_connection(mut conn: Connection) -> Self {
        set_buffer_limit(&mut conn, Some(DEFAULT_BUFFER_LIMIT));
        Self {
            conn,
            phase: SessionPhase::Unestablished,
            plaintext_available: 0,
            protocol: None,
        }
    }

    /// Cap the plaintext the record layer will buffer ahead of the
    /// socket. `None` removes the cap.
    pub fn set_buffer_limit(&mut self, limit: Option<usize>) {
        set_buffer_limit(&mut self.conn, limit);
    }

    fn wants_read(&self) -> bool {
        match &self.conn {
            Connection::Client(c) => c.wants_read(),
            Connection::Server(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match &self.conn {
            Connection::Client(c) => c.wants_write(),
            Connection::Server(c) => c.wants_write(),
        }
    }

    fn handshaking(&self) -> bool {
        match &self.conn {
            Connection::Client(c) => c.is_handshaking(),
            Connection::Server(c) => c.is_handshaking(),
        }
    }

    fn interest(&self) -> Interest {
        let mut interest = Interest {
            read: self.wants_read(),
            write: self.wants_write(),
        };
        // an engine with no declared direction is still waiting on the peer
        if interest.is_empty() {
            interest.read = true;
        }
        interest
    }

    fn read_tls(&mut self, socket: &mut dyn Socket) -> io::Result<usize> {
        let mut io = SocketIo(socket);
        match &mut self.conn {
            Connection::Client(c) => c.read_tls(&mut io),
            Connection::Server(c) => c.read_tls(&mut io),
        }
    }

    fn write_tls(&mut self, socket: &mut dyn Socket) -> io::Result<usize> {
        let mut io = SocketIo(socket);
        match &mut self.conn {
            Connection::Client(c) => c.write_tls(&mut io),
            Connection::Server(c) => c.write_tls(&mut io),
        }
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.conn {
            Connection::Client(c) => c.reader().read(buf),
            Connection::Server(c) => c.reader().read(buf),
        }
    }

    fn write_plaintext(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.conn {
            Connection::Client(c) => c.writer().write(buf),
            Connection::Server(c) => c.writer().write(buf),
        }
    }

    fn queue_close_notify(&mut self) {
        match &mut self.conn {
            Connection::Client(c) => c.send_close_notify(),
            Connection::Server(c) => c.send_close_notify(),
        }
    }

    fn alpn(&self) -> Option<&[u8]> {
        match &self.conn {
            Connection::Client(c) => c.alpn_protocol(),
            Connection::Server(c) => c.alpn_protocol(),
        }
    }

    /// Push queued ciphertext toward the socket until it is drained or
    /// the socket stops cooperating. A disconnect here is not fatal; it
    /// retires the session instead.
    fn flush_ciphertext(&mut self, socket: &mut dyn Socket) -> Result<()> {
        while self.wants_write() {
            match self.write_tls(socket) {
                Ok(0) => break,
                Ok(n) => trace!(bytes = n, "wrote ciphertext"),
                Err(e) if is_retry(&e) => break,
                Err(e) if is_disconnect(&e) => {
                    debug!(error = %e, "peer went away during write");
                    self.phase = SessionPhase::Closed;
                    break;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// Run the record layer over freshly read ciphertext, then flush any
    /// responses it queued (handshake flights, alerts, acks).
    fn advance(&mut self, socket: &mut dyn Socket) -> Result<()> {
        let processed = match &mut self.conn {
            Connection::Client(c) => c.process_new_packets(),
            Connection::Server(c) => c.process_new_packets(),
        };
        match processed {
            Ok(state) => {
                self.plaintext_available = state.plaintext_bytes_to_read();
                self.flush_ciphertext(socket)?;
                self.update_phase();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "TLS protocol failure");
                // the record layer queues a fatal alert; try to deliver it
                let _ = self.flush_ciphertext(socket);
                self.phase = SessionPhase::Closed;
                Err(Error::Tls(err))
            }
        }
    }

    fn update_phase(&mut self) {
        match self.phase {
            SessionPhase::Closing | SessionPhase::Closed => {}
            _ if self.handshaking() => self.phase = SessionPhase::Handshaking,
            SessionPhase::Established => {}
            _ => {
                self.protocol = self.alpn().map(Bytes::copy_from_slice);
                debug!(protocol = ?self.protocol, "handshake complete");
                self.phase = SessionPhase::Established;
            }
        }
    }

    fn retire(&mut self, reason: &str) -> IoOutcome {
        debug!(reason, "session over");
        self.phase = SessionPhase::Closed;
        IoOutcome::Closed
    }

    /// One handshake step while a logical `send` waits for the session
    /// to establish.
    fn step_handshake(&mut self, socket: &mut dyn Socket) -> Result<Option<IoOutcome>> {
        self.flush_ciphertext(socket)?;
        if self.phase == SessionPhase::Closed {
            return Ok(Some(IoOutcome::Closed));
        }
        match self.read_tls(socket) {
            Ok(0) => return Ok(Some(self.retire("eof during handshake"))),
            Ok(n) => {
                trace!(bytes = n, "read ciphertext");
                self.advance(socket)?;
            }
            Err(e) if is_retry(&e) => {}
            Err(e) if is_disconnect(&e) => {
                return Ok(Some(self.retire("disconnect during handshake")))
            }
            Err(e) => return Err(Error::Io(e)),
        }
        if self.phase == SessionPhase::Closed {
            return Ok(Some(IoOutcome::Closed));
        }
        if self.handshaking() {
            return Ok(Some(IoOutcome::Again(self.interest())));
        }
        Ok(None)
    }
}

impl TlsEngine for RustlsEngine {
    fn recv(&mut self, socket: &mut dyn Socket, buf: &mut [u8]) -> Result<IoOutcome> {
        if self.phase == SessionPhase::Closed {
            return Ok(IoOutcome::Closed);
        }
        if buf.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }
        self.update_phase();

        loop {
            // drain already-decrypted bytes before touching the socket,
            // so is_pending() implies progress without readiness
            match self.read_plaintext(buf) {
                Ok(0) => return Ok(self.retire("peer sent close_notify")),
                Ok(n) => {
                    self.plaintext_available = self.plaintext_available.saturating_sub(n);
                    trace!(bytes = n, "delivered plaintext");
                    return Ok(IoOutcome::Transferred(n));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(self.retire("peer closed without close_notify"));
                }
                Err(e) => return Err(Error::Io(e)),
            }

            match self.read_tls(socket) {
                Ok(0) => return Ok(self.retire("socket eof")),
                Ok(n) => trace!(bytes = n, "read ciphertext"),
                Err(e) if is_retry(&e) => {
                    // a handshake in flight may need to write before the
                    // peer can say anything more
                    self.flush_ciphertext(socket)?;
                    if self.phase == SessionPhase::Closed {
                        return Ok(IoOutcome::Closed);
                    }
                    return Ok(IoOutcome::Again(self.interest()));
                }
                Err(e) if is_disconnect(&e) => return Ok(self.retire("disconnect")),
                Err(e) => return Err(Error::Io(e)),
            }

            self.advance(socket)?;
        }
    }

    fn send(&mut self, socket: &mut dyn Socket, buf: &[u8]) -> Result<IoOutcome> {
        if self.phase == SessionPhase::Closed {
            return Ok(IoOutcome::Closed);
        }
        self.update_phase();

        if self.handshaking() {
            if let Some(outcome) = self.step_handshake(socket)? {
                return Ok(outcome);
            }
        }

        if buf.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }

        let queued = self.write_plaintext(buf).map_err(Error::Io)?;
        self.flush_ciphertext(socket)?;
        if self.phase == SessionPhase::Closed {
            return Ok(IoOutcome::Closed);
        }
        if queued == 0 {
            // record-layer buffer is full; ciphertext must drain first
            return Ok(IoOutcome::Again(Interest {
                read: false,
                write: true,
            }));
        }
        trace!(bytes = queued, "queued plaintext");
        Ok(IoOutcome::Transferred(queued))
    }

    fn is_pending(&self) -> bool {
        self.phase != SessionPhase::Closed && self.plaintext_available > 0
    }

    fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.protocol.as_deref()
    }

    fn close(&mut self, socket: &mut dyn Socket) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closing;
        self.queue_close_notify();
        if let Err(err) = self.flush_ciphertext(socket) {
            debug!(error = %err, "discarding undeliverable close_notify");
        }
        self.phase = SessionPhase::Closed;
        debug!("session closed");
    }
}
