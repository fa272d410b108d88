//! Listener and peer socket lifecycle for the bridge.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, trace, warn};

use crate::api::Result;
use crate::errors::Error;
use crate::types::Side;

const READABLE: PollFlags = PollFlags::POLLIN
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLERR);

/// One peer of the bridged connection.
///
/// Disconnected -> Connected on accept, back to Disconnected when a read
/// sees EOF or an error. The recorded address outlives the stream just long
/// enough to stamp the end-of-flow header, then
/// [`SockPair::clear_stale_addrs`] drops it.
#[derive(Debug, Default)]
pub(crate) struct Endpoint {
    stream: Option<TcpStream>,
    addr: Option<SocketAddr>,
}

impl Endpoint {
    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn reset(&mut self) {
        self.stream = None;
        self.addr = None;
    }
}

/// What a poll cycle observed on the active side.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollEvent {
    /// Nothing to do: timeout, not listening, or data for an inactive side.
    Idle,
    /// The active peer has bytes (or an EOF) to read.
    PeerReadable,
    /// The active side is disconnected and a connection is waiting.
    Pending,
}

/// The listener plus both peer endpoints.
#[derive(Debug, Default)]
pub(crate) struct SockPair {
    listener: Option<TcpListener>,
    a: Endpoint,
    b: Endpoint,
}

impl SockPair {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Binds and listens on `port`; returns the actual local port.
    pub(crate) fn listen(&mut self, port: u16) -> Result<u16> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| Error::Bind { source })?;
        // accept must not block if the connection vanished between poll
        // and accept
        listener
            .set_nonblocking(true)
            .map_err(|source| Error::Bind { source })?;
        let port = listener
            .local_addr()
            .map_err(|source| Error::Bind { source })?
            .port();
        self.listener = Some(listener);
        Ok(port)
    }

    pub(crate) fn close_all(&mut self) {
        self.listener = None;
        self.a.reset();
        self.b.reset();
    }

    pub(crate) fn endpoint(&self, side: Side) -> &Endpoint {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    fn endpoint_mut(&mut self, side: Side) -> &mut Endpoint {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    pub(crate) fn any_connected(&self) -> bool {
        self.a.is_connected() || self.b.is_connected()
    }

    /// Waits up to `timeout` for readiness on the listener or the active
    /// peer.
    ///
    /// A pending connection is only reported while the active side is
    /// disconnected; with both slots filled, further connections sit in the
    /// backlog.
    pub(crate) fn poll_active(&self, side: Side, timeout: Duration) -> PollEvent {
        let Some(listener) = &self.listener else {
            return PollEvent::Idle;
        };
        let timeout = PollTimeout::from(u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX));
        let ep = self.endpoint(side);

        match &ep.stream {
            Some(stream) => {
                let mut fds = [
                    PollFd::new(listener.as_fd(), PollFlags::POLLIN),
                    PollFd::new(stream.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, timeout) {
                    Ok(0) => PollEvent::Idle,
                    Ok(_) if fds[1].revents().is_some_and(|r| r.intersects(READABLE)) => {
                        PollEvent::PeerReadable
                    }
                    Ok(_) => PollEvent::Idle,
                    Err(e) => {
                        if e != nix::errno::Errno::EINTR {
                            warn!("poll failed: {e}");
                        }
                        PollEvent::Idle
                    }
                }
            }
            None => {
                let mut fds = [PollFd::new(listener.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, timeout) {
                    Ok(0) => PollEvent::Idle,
                    Ok(_) if fds[0].revents().is_some_and(|r| r.intersects(READABLE)) => {
                        PollEvent::Pending
                    }
                    Ok(_) => PollEvent::Idle,
                    Err(e) => {
                        if e != nix::errno::Errno::EINTR {
                            warn!("poll failed: {e}");
                        }
                        PollEvent::Idle
                    }
                }
            }
        }
    }

    /// Completes a pending connection on `side` and sends its role banner.
    pub(crate) fn accept(&mut self, side: Side) -> Result<SocketAddr> {
        let listener = self.listener.as_ref().ok_or_else(|| Error::Accept {
            source: io::Error::from(io::ErrorKind::NotConnected),
        })?;
        let (stream, addr) = listener
            .accept()
            .map_err(|source| Error::Accept { source })?;
        stream
            .set_nonblocking(false)
            .map_err(|source| Error::Accept { source })?;

        let ep = self.endpoint_mut(side);
        ep.stream = Some(stream);
        ep.addr = Some(addr);

        let banner: &[u8] = match side {
            Side::A => b"client\n",
            Side::B => b"server\n",
        };
        // banner delivery is best effort, as is losing the peer right away
        if let Err(e) = self.send(side, banner) {
            trace!(?side, "banner send failed: {e}");
        }
        Ok(addr)
    }

    /// Reads from `side` into `buf`.
    ///
    /// EOF and hard errors tear the stream down and report
    /// [`RecvOutcome::EndOfFlow`]; the address is kept for the end-of-flow
    /// header stamp.
    pub(crate) fn recv(&mut self, side: Side, buf: &mut [u8]) -> RecvOutcome {
        let ep = self.endpoint_mut(side);
        let Some(stream) = ep.stream.as_mut() else {
            return RecvOutcome::Nothing;
        };
        match stream.read(buf) {
            Ok(0) => {
                debug!(?side, "peer closed");
                ep.stream = None;
                RecvOutcome::EndOfFlow
            }
            Ok(n) => RecvOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => RecvOutcome::Nothing,
            Err(e) => {
                debug!(?side, "recv failed: {e}");
                ep.stream = None;
                RecvOutcome::EndOfFlow
            }
        }
    }

    /// Writes the whole buffer to `side`, looping over partial writes.
    ///
    /// Writing to a disconnected side is a silent no-op so a forward can
    /// outlive its target peer.
    pub(crate) fn send(&mut self, side: Side, buf: &[u8]) -> Result<()> {
        let Some(stream) = self.endpoint_mut(side).stream.as_mut() else {
            return Ok(());
        };
        stream
            .write_all(buf)
            .map_err(|source| Error::Send { source })
    }

    /// Drops the recorded address of every disconnected endpoint so
    /// forwarding no longer names a stale identity.
    pub(crate) fn clear_stale_addrs(&mut self) {
        for ep in [&mut self.a, &mut self.b] {
            if ep.stream.is_none() {
                ep.addr = None;
            }
        }
    }
}

/// Outcome of a read attempt on a peer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RecvOutcome {
    Data(usize),
    /// The peer disconnected; its endpoint is now in the Disconnected state.
    EndOfFlow,
    /// Nothing read and nothing changed (no stream, or EINTR).
    Nothing,
}
