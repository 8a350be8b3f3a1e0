//! TCP listener that turns client writes into queued trigger messages.

use super::framing::{Deframer, Framing, Oversized};
use crate::config::TriggerConfig;
use crate::error::OpenError;
use crate::lifecycle::{join_with_timeout, spawn_named};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, SendTimeoutError};
use parking_lot::Mutex;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// A zero socket timeout is rejected by the OS
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// One message received from a trigger client.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMessage {
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub peer: Option<SocketAddr>,
}

impl TriggerMessage {
    pub fn new(text: impl Into<String>, peer: Option<SocketAddr>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
            peer,
        }
    }
}

/// Queue item. `Wake` only unblocks the consumer and carries no message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(TriggerMessage),
    Wake,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("trigger queue has no consumer")]
    QueueClosed,
    #[error("trigger channel is stopping")]
    Stopped,
    #[error(transparent)]
    Oversized(#[from] Oversized),
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    framing: Framing,
    read_buffer: usize,
    read_timeout: Duration,
    /// How often a handler waiting on a full queue re-checks the stop flag
    stop_poll: Duration,
}

struct Connection {
    peer: SocketAddr,
    // Shut down on stop so a blocked read returns at once.
    stream: TcpStream,
    handle: JoinHandle<()>,
}

/// Running listener plus its connection handlers.
///
/// Messages from one connection are queued in the order they were read;
/// there is no ordering between connections.
pub struct TriggerChannel {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    stop_timeout: Duration,
    listener: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<Mutex<Vec<Connection>>>,
}

impl TriggerChannel {
    /// Bind `config.host:config.port` and start accepting clients.
    ///
    /// Port 0 binds an ephemeral port; see [`TriggerChannel::local_addr`].
    pub fn start(config: &TriggerConfig, queue: Sender<Inbound>) -> Result<Self, OpenError> {
        let addr = config.addr();
        let bind_error = |source| OpenError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));
        let accept = AcceptLoop {
            listener,
            queue,
            stop: Arc::clone(&stop),
            connections: Arc::clone(&connections),
            poll: config.accept_poll(),
            settings: ConnectionSettings {
                framing: config.framing,
                read_buffer: config.read_buffer.max(1),
                read_timeout: config.read_timeout().max(MIN_SOCKET_TIMEOUT),
                stop_poll: config.accept_poll().max(MIN_SOCKET_TIMEOUT),
            },
        };

        let handle = spawn_named("trigger-listener", move || accept.run()).map_err(bind_error)?;
        info!("trigger channel listening on {local}");

        Ok(Self {
            addr: local,
            stop,
            stop_timeout: config.stop_timeout(),
            listener: Mutex::new(Some(handle)),
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listener thread alive and no stop requested.
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
            && self.listener.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of client connections whose handler is still running.
    pub fn active_connections(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|c| !c.handle.is_finished())
            .count()
    }

    /// Stop accepting, close every connection and wait for the threads.
    ///
    /// The listener and all connection handlers share one deadline, `timeout`
    /// from now. Only the first call does anything.
    pub fn stop(&self, timeout: Duration) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stopping trigger channel on {}", self.addr);
        let deadline = Instant::now() + timeout;

        // Blocked reads return at once; handlers waiting on the queue see the flag
        let connections: Vec<Connection> = self.connections.lock().drain(..).collect();
        for connection in &connections {
            let _ = connection.stream.shutdown(Shutdown::Both);
        }

        // Nudge the listener in case it is parked in accept
        let wake_timeout = WAKE_CONNECT_TIMEOUT.min(remaining(deadline)).max(MIN_SOCKET_TIMEOUT);
        match TcpStream::connect_timeout(&wake_addr(self.addr), wake_timeout) {
            Ok(stream) => drop(stream),
            Err(e) => debug!("wake connection failed: {e}"),
        }

        if let Some(handle) = self.listener.lock().take() {
            join_with_timeout(handle, remaining(deadline), "trigger listener");
        }
        // A client accepted while stopping is registered before the listener exits
        let late: Vec<Connection> = self.connections.lock().drain(..).collect();
        for connection in &late {
            let _ = connection.stream.shutdown(Shutdown::Both);
        }

        for connection in connections.into_iter().chain(late) {
            join_with_timeout(
                connection.handle,
                remaining(deadline),
                &format!("trigger connection {}", connection.peer),
            );
        }
        info!("trigger channel stopped");
    }
}

impl Drop for TriggerChannel {
    fn drop(&mut self) {
        self.stop(self.stop_timeout);
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Where to connect to reach a listener bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

struct AcceptLoop {
    listener: TcpListener,
    queue: Sender<Inbound>,
    stop: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<Connection>>>,
    poll: Duration,
    settings: ConnectionSettings,
}

impl AcceptLoop {
    fn run(self) {
        while !self.stop.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = self.spawn_connection(stream, peer) {
                        warn!("dropping trigger client {peer}: {e}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.poll);
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !self.stop.load(Ordering::Acquire) {
                        warn!("trigger listener failed: {e}");
                    }
                    break;
                }
            }
        }
        debug!("trigger listener exiting");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.settings.read_timeout))?;
        let control = stream.try_clone()?;

        let handler = ConnectionHandler {
            stream,
            peer,
            queue: self.queue.clone(),
            stop: Arc::clone(&self.stop),
            settings: self.settings,
        };
        let handle = spawn_named("trigger-connection", move || handler.run())?;

        let mut connections = self.connections.lock();
        connections.retain(|c| !c.handle.is_finished());
        connections.push(Connection {
            peer,
            stream: control,
            handle,
        });
        Ok(())
    }
}

struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    queue: Sender<Inbound>,
    stop: Arc<AtomicBool>,
    settings: ConnectionSettings,
}

impl ConnectionHandler {
    fn run(mut self) {
        info!("trigger client connected from {}", self.peer);
        match self.serve() {
            Ok(()) | Err(ChannelError::Stopped) => {}
            Err(ChannelError::Io(_)) if self.stop.load(Ordering::Acquire) => {}
            Err(e @ ChannelError::Oversized(_)) => {
                warn!("closing trigger client {}: {e}", self.peer)
            }
            Err(e) => debug!("trigger client {}: {e}", self.peer),
        }
        info!("trigger client {} disconnected", self.peer);
    }

    fn serve(&mut self) -> Result<(), ChannelError> {
        let mut deframer = Deframer::new(self.settings.framing, self.settings.read_buffer);
        let mut buf = vec![0u8; self.settings.read_buffer];

        while !self.stop.load(Ordering::Acquire) {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if is_retryable(&e) => continue,
                Err(e) => return Err(e.into()),
            };

            for text in deframer.push(&buf[..n])? {
                self.enqueue(TriggerMessage::new(text.clone(), Some(self.peer)))?;
                let ack = format!("Server received: {text}{}", self.settings.framing.ack_suffix());
                self.stream.write_all(ack.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Blocks while the queue is full, giving up only on stop.
    fn enqueue(&self, message: TriggerMessage) -> Result<(), ChannelError> {
        let mut item = Inbound::Message(message);
        let mut warned = false;
        loop {
            match self.queue.send_timeout(item, self.settings.stop_poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.stop.load(Ordering::Acquire) {
                        return Err(ChannelError::Stopped);
                    }
                    if !warned {
                        warn!("trigger queue full; {} waits", self.peer);
                        warned = true;
                    }
                    item = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(ChannelError::QueueClosed),
            }
        }
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
