use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use lspmux_frame::FrameConfig;
use lspmux_transport::{peer_credentials, ListenerConfig, UnixDomainSocket};
use mio::net::UnixStream;
use mio::Token;
use tracing::{debug, info, warn};

use crate::connection::{Connection, DEFAULT_READ_BUDGET, DEFAULT_READ_CHUNK};
use crate::error::{PoolError, Result};
use crate::handler::{FrameHandler, PeerId};
use crate::registrar::{Readiness, Registrar};

/// Token reserved for the listening socket. Peers are numbered from 1.
pub const LISTENER: Token = Token(0);

/// Default number of readiness events fetched per poll.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// Tunables for a [`ConnectionPool`] and the loop that drives it.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Limits applied to every connection's parser.
    pub frame: FrameConfig,
    /// Bytes requested per receive.
    pub read_chunk_size: usize,
    /// Receives a connection may make per readable event.
    pub read_budget: usize,
    /// Listen backlog.
    pub backlog: i32,
    /// Permission bits for the socket path.
    pub socket_mode: u32,
    /// Events fetched per poll by [`crate::EventLoop`].
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            read_chunk_size: DEFAULT_READ_CHUNK,
            read_budget: DEFAULT_READ_BUDGET,
            backlog: UnixDomainSocket::DEFAULT_BACKLOG,
            socket_mode: UnixDomainSocket::DEFAULT_SOCKET_MODE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Bound, listener not yet registered.
    Idle,
    /// Accepting and dispatching.
    Running,
    /// Every connection closed and the listener released.
    ShutDown,
}

/// Owns the listening socket and every accepted [`Connection`].
///
/// Each key in the connection table is registered with the registrar;
/// closed connections are closed before they leave the table. Tokens in
/// `pending` may still have input that no new readiness edge will report.
pub struct ConnectionPool<H> {
    listener: Option<UnixDomainSocket>,
    path: PathBuf,
    connections: HashMap<Token, Connection<UnixStream>>,
    pending: HashSet<Token>,
    handler: H,
    config: PoolConfig,
    next_token: usize,
    state: PoolState,
}

impl<H: FrameHandler> ConnectionPool<H> {
    /// Bind `path` with default settings.
    pub fn bind(path: impl AsRef<Path>, handler: H) -> Result<Self> {
        Self::bind_with_config(path, handler, PoolConfig::default())
    }

    /// Bind `path` and prepare a pool. Nothing is registered until
    /// [`startup`](Self::startup).
    pub fn bind_with_config(path: impl AsRef<Path>, handler: H, config: PoolConfig) -> Result<Self> {
        let listener = UnixDomainSocket::bind_with_config(
            path.as_ref(),
            ListenerConfig {
                mode: config.socket_mode,
                backlog: config.backlog,
            },
        )?;

        Ok(Self {
            path: listener.path().to_path_buf(),
            listener: Some(listener),
            connections: HashMap::new(),
            pending: HashSet::new(),
            handler,
            config,
            next_token: LISTENER.0 + 1,
            state: PoolState::Idle,
        })
    }

    /// Register the listener for READ.
    pub fn startup<R>(&mut self, registrar: &R) -> Result<()>
    where
        R: Registrar + ?Sized,
    {
        match self.state {
            PoolState::Running => return Ok(()),
            PoolState::ShutDown => return Err(PoolError::ShutDown),
            PoolState::Idle => {}
        }

        let Some(listener) = self.listener.as_mut() else {
            return Err(PoolError::ShutDown);
        };
        registrar.register(listener, LISTENER, mio::Interest::READABLE)?;
        info!(path = ?self.path, transport = listener.transport_name(), "pool started");
        self.state = PoolState::Running;
        Ok(())
    }

    /// Dispatch one readiness notification.
    pub fn event<R>(&mut self, token: Token, readiness: Readiness, registrar: &R)
    where
        R: Registrar + ?Sized,
    {
        if self.state != PoolState::Running {
            debug!(token = token.0, "event ignored; pool not running");
            return;
        }

        if token == LISTENER {
            if readiness.is_readable() {
                self.accept_pending(registrar);
            }
            return;
        }

        let Some(conn) = self.connections.get_mut(&token) else {
            debug!(token = token.0, "event for unknown token ignored");
            return;
        };
        conn.event(readiness, registrar, &mut self.handler);
        if conn.is_closed() {
            self.connections.remove(&token);
            self.pending.remove(&token);
        } else if conn.has_pending_input() {
            self.pending.insert(token);
        } else {
            self.pending.remove(&token);
        }
    }

    /// True when some handle stopped short of would-block on its last
    /// event and must be revisited without waiting for readiness.
    pub fn has_pending_input(&self) -> bool {
        self.state == PoolState::Running && !self.pending.is_empty()
    }

    /// Dispatch a readable event to every handle recorded as still having
    /// input. Returns how many were revisited.
    pub fn service_pending<R>(&mut self, registrar: &R) -> usize
    where
        R: Registrar + ?Sized,
    {
        let tokens: Vec<Token> = self.pending.drain().collect();
        for token in &tokens {
            self.event(*token, Readiness::READABLE, registrar);
        }
        tokens.len()
    }

    /// Queue already-framed bytes on a live peer.
    pub fn queue_send<R>(&mut self, peer: PeerId, bytes: &[u8], registrar: &R) -> Result<()>
    where
        R: Registrar + ?Sized,
    {
        if self.state == PoolState::ShutDown {
            return Err(PoolError::ShutDown);
        }

        let token = Token::from(peer);
        let conn = self
            .connections
            .get_mut(&token)
            .ok_or(PoolError::UnknownPeer(peer))?;
        let result = conn.queue_send(bytes, registrar);
        if conn.is_closed() {
            self.connections.remove(&token);
        }
        result
    }

    /// Close one peer. Returns `false` if it was not connected.
    pub fn close_peer<R>(&mut self, peer: PeerId, registrar: &R) -> bool
    where
        R: Registrar + ?Sized,
    {
        match self.connections.remove(&Token::from(peer)) {
            Some(mut conn) => {
                conn.close(registrar);
                true
            }
            None => false,
        }
    }

    /// Close every connection, then unregister and drop the listener, which
    /// unlinks its socket path. Repeated calls do nothing.
    pub fn shutdown<R>(&mut self, registrar: &R)
    where
        R: Registrar + ?Sized,
    {
        if self.state == PoolState::ShutDown {
            return;
        }

        let closed = self.connections.len();
        self.pending.clear();
        for (_, mut conn) in self.connections.drain() {
            conn.close(registrar);
        }

        if let Some(mut listener) = self.listener.take() {
            if self.state == PoolState::Running {
                if let Err(err) = registrar.unregister(&mut listener) {
                    debug!(error = %err, "listener unregister failed");
                }
            }
            drop(listener);
        }

        self.state = PoolState::ShutDown;
        info!(path = ?self.path, closed, "pool shut down");
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of open connections, ascending.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.connections.keys().map(|t| PeerId::from(*t)).collect();
        peers.sort_unstable();
        peers
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Accept until the listener would block.
    ///
    /// Any other accept failure (for example running out of descriptors)
    /// leaves peers queued in the backlog with no readiness edge to announce
    /// them, so the listener is recorded as pending and retried on the next
    /// poll.
    fn accept_pending<R>(&mut self, registrar: &R)
    where
        R: Registrar + ?Sized,
    {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            let stream = match listener.try_accept() {
                Ok(Some(stream)) => stream,
                Ok(None) => return,
                Err(err) if err.is_transient_accept() => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed; retrying on next poll");
                    self.pending.insert(LISTENER);
                    return;
                }
            };

            let id = self.allocate_id();
            match peer_credentials(&stream) {
                Some(creds) => debug!(
                    peer = %id,
                    uid = creds.uid,
                    gid = creds.gid,
                    pid = creds.pid,
                    "peer accepted"
                ),
                None => debug!(peer = %id, "peer accepted"),
            }

            match Connection::open(
                id,
                stream,
                self.config.frame.clone(),
                self.config.read_chunk_size,
                registrar,
            ) {
                Ok(conn) => {
                    let conn = conn.with_read_budget(self.config.read_budget);
                    self.connections.insert(id.into(), conn);
                }
                Err(err) => warn!(peer = %id, error = %err, "failed to register peer"),
            }
        }
    }

    fn allocate_id(&mut self) -> PeerId {
        loop {
            let candidate = self.next_token;
            self.next_token = match self.next_token.checked_add(1) {
                Some(next) if next < crate::event_loop::WAKER.0 => next,
                _ => LISTENER.0 + 1,
            };
            if !self.connections.contains_key(&Token(candidate)) {
                return PeerId(candidate);
            }
        }
    }
}

impl<H> std::fmt::Debug for ConnectionPool<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    use bytes::BytesMut;
    use lspmux_frame::{encode_frame, Frame, FrameReader, Headers};

    use super::*;
    use crate::event_loop::EventLoop;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/lspmux-pool-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    type Collected = Receiver<(PeerId, Frame)>;

    fn collecting_pool(dir: &Path) -> (ConnectionPool<mpsc::Sender<(PeerId, Frame)>>, Collected) {
        let (tx, rx) = mpsc::channel();
        let pool = ConnectionPool::bind(dir.join("pool.sock"), tx).unwrap();
        (pool, rx)
    }

    /// Poll until `done` holds or roughly two seconds pass.
    fn pump_until<H, F>(ev: &mut EventLoop, pool: &mut ConnectionPool<H>, mut done: F)
    where
        H: FrameHandler,
        F: FnMut(&ConnectionPool<H>) -> bool,
    {
        for _ in 0..200 {
            if done(&*pool) {
                return;
            }
            ev.poll_once(pool, Some(Duration::from_millis(10))).unwrap();
        }
        assert!(done(&*pool), "condition not reached while polling");
    }

    #[test]
    fn split_frame_then_empty_frame_end_to_end() {
        let dir = temp_dir("split");
        let (mut pool, rx) = collecting_pool(&dir);
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let mut client = StdUnixStream::connect(pool.path()).unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 1);

        let wire = b"Content-Length: 5\r\n\r\nhello";
        client.write_all(&wire[..10]).unwrap();
        ev.poll_once(&mut pool, Some(Duration::from_millis(20))).unwrap();
        assert!(rx.try_recv().is_err());

        client.write_all(&wire[10..]).unwrap();
        let mut received = Vec::new();
        pump_until(&mut ev, &mut pool, |_| {
            received.extend(rx.try_iter());
            !received.is_empty()
        });
        let (peer, frame) = &received[0];
        assert_eq!(*peer, PeerId(1));
        assert_eq!(frame.body.as_ref(), b"hello");
        assert_eq!(frame.headers.get("Content-Length"), Some("5"));

        client.write_all(b"Content-Length: 0\r\n\r\n").unwrap();
        let mut empty = Vec::new();
        pump_until(&mut ev, &mut pool, |_| {
            empty.extend(rx.try_iter());
            !empty.is_empty()
        });
        assert!(empty[0].1.body.is_empty());

        pool.shutdown(ev.registry());
        assert!(!dir.join("pool.sock").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn echo_reply_round_trips() {
        let dir = temp_dir("echo");
        let handler = |_: PeerId, frame: Frame, reply: &mut BytesMut| {
            let headers = Headers::new().with("Type", "echo");
            if let Err(err) = encode_frame(&frame.body, &headers, reply) {
                panic!("encode failed: {err}");
            }
        };
        let mut pool = ConnectionPool::bind(dir.join("echo.sock"), handler).unwrap();
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let path = pool.path().to_path_buf();
        let client = std::thread::spawn(move || {
            let stream = StdUnixStream::connect(path).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut writer = lspmux_frame::FrameWriter::new(stream.try_clone().unwrap());
            writer.send(b"{\"ping\":1}", &Headers::new()).unwrap();
            FrameReader::new(stream).read_frame().unwrap()
        });

        let mut replied = None;
        for _ in 0..500 {
            ev.poll_once(&mut pool, Some(Duration::from_millis(10))).unwrap();
            if client.is_finished() {
                replied = Some(client.join().unwrap());
                break;
            }
        }

        let reply = replied.expect("client should receive a reply");
        assert_eq!(reply.body.as_ref(), b"{\"ping\":1}");
        assert_eq!(reply.header("Type"), Some("echo"));

        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn framing_violation_only_closes_offending_peer() {
        let dir = temp_dir("isolation");
        let (mut pool, rx) = collecting_pool(&dir);
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let mut good = StdUnixStream::connect(pool.path()).unwrap();
        let mut bad = StdUnixStream::connect(pool.path()).unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 2);

        bad.write_all(b"Type: documentSymbol\r\n\r\n").unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 1);

        let mut buf = [0u8; 1];
        bad.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(bad.read(&mut buf).unwrap(), 0, "bad peer should see EOF");

        good.write_all(b"Content-Length: 2\r\n\r\nok").unwrap();
        let mut received = Vec::new();
        pump_until(&mut ev, &mut pool, |_| {
            received.extend(rx.try_iter());
            !received.is_empty()
        });
        assert_eq!(received[0].1.body.as_ref(), b"ok");
        assert_eq!(pool.len(), 1);

        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn peer_hangup_removes_connection() {
        let dir = temp_dir("hangup");
        let (mut pool, _rx) = collecting_pool(&dir);
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let client = StdUnixStream::connect(pool.path()).unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 1);
        let peer = pool.peers()[0];

        drop(client);
        pump_until(&mut ev, &mut pool, |p| p.is_empty());

        assert!(matches!(
            pool.queue_send(peer, b"late", ev.registry()),
            Err(PoolError::UnknownPeer(p)) if p == peer
        ));
        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn queue_send_reaches_peer() {
        let dir = temp_dir("queue");
        let (mut pool, _rx) = collecting_pool(&dir);
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let client = StdUnixStream::connect(pool.path()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 1);

        let mut wire = BytesMut::new();
        encode_frame(b"pushed", &Headers::new(), &mut wire).unwrap();
        pool.queue_send(pool.peers()[0], &wire, ev.registry()).unwrap();
        for _ in 0..5 {
            ev.poll_once(&mut pool, Some(Duration::from_millis(10))).unwrap();
        }

        let frame = FrameReader::new(client).read_frame().unwrap();
        assert_eq!(frame.body.as_ref(), b"pushed");

        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_without_connections_is_repeatable() {
        let dir = temp_dir("shutdown");
        let sock = dir.join("pool.sock");
        let (mut pool, _rx) = collecting_pool(&dir);
        let ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        pool.shutdown(ev.registry());
        pool.shutdown(ev.registry());

        assert_eq!(pool.state(), PoolState::ShutDown);
        assert!(!sock.exists());
        assert!(matches!(pool.startup(ev.registry()), Err(PoolError::ShutDown)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn events_after_shutdown_are_ignored() {
        let dir = temp_dir("after");
        let (mut pool, _rx) = collecting_pool(&dir);
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let _client = StdUnixStream::connect(pool.path()).unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 1);
        let peer = pool.peers()[0];
        pool.shutdown(ev.registry());

        pool.event(peer.into(), Readiness::BOTH, ev.registry());
        pool.event(LISTENER, Readiness::READABLE, ev.registry());

        assert!(pool.is_empty());
        assert!(!pool.close_peer(peer, ev.registry()));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_token_is_ignored() {
        let dir = temp_dir("unknown");
        let (mut pool, _rx) = collecting_pool(&dir);
        let ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        pool.event(Token(42), Readiness::BOTH, ev.registry());

        assert!(pool.is_empty());
        assert_eq!(pool.state(), PoolState::Running);
        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[derive(Default)]
    struct Counter {
        frames: usize,
    }

    impl FrameHandler for Counter {
        fn handle(&mut self, _: PeerId, _: Frame, _: &mut BytesMut) {
            self.frames += 1;
        }
    }

    #[test]
    fn busy_peer_is_revisited_after_read_budget() {
        let dir = temp_dir("budget");
        let frame = b"Content-Length: 1\r\n\r\na";
        let config = PoolConfig {
            read_chunk_size: frame.len(),
            read_budget: 1,
            ..PoolConfig::default()
        };
        let mut pool =
            ConnectionPool::bind_with_config(dir.join("budget.sock"), Counter::default(), config)
                .unwrap();
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let mut client = StdUnixStream::connect(pool.path()).unwrap();
        pump_until(&mut ev, &mut pool, |p| p.len() == 1);

        client.write_all(&frame.repeat(3)).unwrap();
        pump_until(&mut ev, &mut pool, |p| p.handler().frames > 0);
        assert_eq!(pool.handler().frames, 1);
        assert!(pool.has_pending_input());

        assert_eq!(pool.service_pending(ev.registry()), 1);
        assert_eq!(pool.handler().frames, 2);
        assert_eq!(pool.service_pending(ev.registry()), 1);
        assert_eq!(pool.handler().frames, 3);

        pump_until(&mut ev, &mut pool, |p| !p.has_pending_input());
        assert_eq!(pool.handler().frames, 3);
        assert_eq!(pool.len(), 1);

        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pending_listener_accepts_without_new_readiness() {
        let dir = temp_dir("retry");
        let (mut pool, _rx) = collecting_pool(&dir);
        let ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let _client = StdUnixStream::connect(pool.path()).unwrap();
        pool.pending.insert(LISTENER);

        assert_eq!(pool.service_pending(ev.registry()), 1);
        assert_eq!(pool.len(), 1);
        assert!(!pool.has_pending_input());

        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_config_values() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.read_chunk_size, 4096);
        assert_eq!(cfg.read_budget, 16);
        assert_eq!(cfg.backlog, 5);
        assert_eq!(cfg.socket_mode, 0o600);
        assert_eq!(cfg.event_capacity, 128);
    }
}
