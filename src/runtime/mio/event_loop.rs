//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when the listener or a participant
//! is ready, then we perform non-blocking accept/read/write syscalls.
//!
//! Each iteration waits at most `poll_interval`, lets the operator hook run,
//! accepts pending connections, drains every readable participant (framing
//! and broadcasting as it goes) and finally sweeps participants that were
//! marked closed along the way.

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::runtime::{broadcast, Framer, Operator, Registry, Shutdown};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::IntoRawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// The relay server: listener, participants and loop state.
pub struct Relay {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    registry: Registry<TcpStream>,
    framer: Framer,
    chunk_size: usize,
    poll_interval: Duration,
    shutdown: Shutdown,
    /// Participant keys reported readable in the current iteration.
    ready: Vec<usize>,
    /// Set when accept stopped on an error before draining the backlog.
    /// Readiness is edge-triggered, so the listener would not be reported
    /// again for connections that are already queued.
    accept_pending: bool,
}

impl Relay {
    /// Bind the listener and set up the poller.
    ///
    /// Failing to bind (for example because the port is in use) is fatal.
    pub fn bind(config: &Config, shutdown: Shutdown) -> Result<Self> {
        let listen = config.listen_addr();
        let bind_error = |source| RelayError::Bind {
            addr: listen.clone(),
            source,
        };

        let addr = listen
            .to_socket_addrs()
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address did not resolve",
                ))
            })?;

        let listener = create_listener(addr, config.backlog).map_err(bind_error)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            registry: Registry::new(),
            framer: Framer::new(config.terminator.clone()),
            chunk_size: config.chunk_size,
            poll_interval: config.poll_interval,
            shutdown,
            ready: Vec::new(),
            accept_pending: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until shutdown is requested or a fatal error occurs.
    ///
    /// Every participant is closed on the way out, whatever its state.
    pub fn run<O: Operator>(&mut self, operator: &mut O) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            terminator = %String::from_utf8_lossy(self.framer.terminator()),
            "Relay listening"
        );
        let result = self.run_loop(operator);
        self.teardown();
        result
    }

    fn run_loop<O: Operator>(&mut self, operator: &mut O) -> Result<()> {
        while !self.shutdown.is_triggered() {
            match self.poll.poll(&mut self.events, Some(self.poll_interval)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            operator.service(self.registry.len());
            if self.shutdown.is_triggered() {
                break;
            }

            let mut listener_ready = false;
            self.ready.clear();
            for event in self.events.iter() {
                match event.token() {
                    LISTENER_TOKEN => listener_ready = true,
                    Token(key) => self.ready.push(key),
                }
            }

            if listener_ready || self.accept_pending {
                self.accept_pending = !self.accept_connections();
            }

            // Service in registry order, not event order
            self.ready.sort_unstable();
            self.ready.dedup();
            let ready: Vec<usize> = self
                .registry
                .keys()
                .iter()
                .copied()
                .filter(|key| self.ready.binary_search(key).is_ok())
                .collect();
            for key in ready {
                self.handle_readable(key)?;
            }

            self.sweep();
        }

        Ok(())
    }

    /// Accept until the backlog is empty.
    ///
    /// Returns `false` when a resource error (such as running out of file
    /// descriptors) stopped the pass with connections possibly still queued.
    fn accept_connections(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => match self.registry.add(stream) {
                    Ok(conn_id) => {
                        let Some(participant) = self.registry.get_mut(conn_id) else {
                            continue;
                        };
                        if let Err(e) = self.poll.registry().register(
                            &mut participant.stream,
                            Token(conn_id),
                            Interest::READABLE,
                        ) {
                            warn!(conn_id, error = %e, "Failed to register connection");
                            self.registry.mark_closed(conn_id);
                            continue;
                        }
                        debug!(
                            conn_id,
                            peer = %peer_addr,
                            participants = self.registry.len(),
                            "Accepted connection"
                        );
                    }
                    Err(stream) => {
                        // The descriptor belongs to a live participant; leave it open.
                        let _ = stream.into_raw_fd();
                        debug!(peer = %peer_addr, "Duplicate handle ignored");
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                    debug!(error = %e, "Connection aborted before accept");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Accept error, retrying next iteration");
                    return false;
                }
            }
        }
    }

    /// Drain a readable participant until the socket would block.
    ///
    /// Each completed message is broadcast before the next read. End of
    /// stream or a read error marks the participant closed.
    fn handle_readable(&mut self, conn_id: usize) -> Result<()> {
        loop {
            let Some(participant) = self.registry.get_mut(conn_id) else {
                return Ok(());
            };
            if participant.is_closed() {
                return Ok(());
            }

            participant.buffer.reserve_chunk(self.chunk_size)?;
            let received = match participant.stream.read(participant.buffer.spare_mut()) {
                Ok(0) => {
                    debug!(conn_id, "Peer closed connection");
                    participant.close();
                    return Ok(());
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(conn_id, error = %e, "Read error");
                    participant.close();
                    return Ok(());
                }
            };

            participant.buffer.commit(received);
            let messages = self.framer.consume(&mut participant.buffer, received);

            for message in messages {
                broadcast(&message, &mut self.registry);
            }
        }
    }

    /// Remove participants marked closed during this iteration.
    fn sweep(&mut self) {
        for (conn_id, mut participant) in self.registry.sweep() {
            let _ = self.poll.registry().deregister(&mut participant.stream);
            debug!(
                conn_id,
                fd = participant.handle(),
                unframed = participant.buffer.len(),
                participants = self.registry.len(),
                "Connection closed"
            );
        }
    }

    /// Close every participant, open or not.
    fn teardown(&mut self) {
        let drained = self.registry.drain_all();
        let count = drained.len();
        for (_, mut participant) in drained {
            let _ = self.poll.registry().deregister(&mut participant.stream);
        }
        info!(closed = count, "Relay stopped");
    }
}

/// Create a non-blocking listening socket.
///
/// `SO_REUSEADDR` lets a restart bind over sockets in TIME_WAIT; without
/// `SO_REUSEPORT` a port held by another listener still fails to bind.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
