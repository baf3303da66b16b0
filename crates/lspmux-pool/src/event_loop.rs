use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token, Waker};
use tracing::{debug, info};

use crate::error::Result;
use crate::handler::FrameHandler;
use crate::pool::{ConnectionPool, DEFAULT_EVENT_CAPACITY};
use crate::registrar::Readiness;

/// Token reserved for the stop waker.
pub const WAKER: Token = Token(usize::MAX);

/// Single-threaded `mio` driver for a [`ConnectionPool`].
pub struct EventLoop {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    stopped: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a loop that fetches at most `capacity` events per poll.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(capacity.max(1)),
            waker: Arc::new(waker),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The registry connections and the listener are registered with.
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// A handle that stops [`run`](Self::run) from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            waker: Arc::clone(&self.waker),
            stopped: Arc::clone(&self.stopped),
        }
    }

    /// Revisit handles the pool left with unread input, then wait once for
    /// readiness and dispatch every event to `pool`.
    ///
    /// The wait does not block while the pool still has pending input.
    /// Returns the number of events dispatched. An interrupted wait counts
    /// as zero events.
    pub fn poll_once<H: FrameHandler>(
        &mut self,
        pool: &mut ConnectionPool<H>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let registry = self.poll.registry();
        let mut dispatched = pool.service_pending(registry);

        let timeout = if pool.has_pending_input() {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(dispatched),
            Err(err) => return Err(err.into()),
        }

        let registry = self.poll.registry();
        for event in self.events.iter() {
            if event.token() == WAKER {
                continue;
            }
            pool.event(event.token(), Readiness::from(event), registry);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Start the pool, dispatch until stopped, then shut the pool down.
    ///
    /// The pool is shut down even when polling fails.
    pub fn run<H: FrameHandler>(&mut self, pool: &mut ConnectionPool<H>) -> Result<()> {
        pool.startup(self.poll.registry())?;
        info!(path = ?pool.path(), "event loop running");

        let outcome = loop {
            if self.stopped.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(err) = self.poll_once(pool, None) {
                break Err(err);
            }
        };

        pool.shutdown(self.poll.registry());
        debug!("event loop stopped");
        outcome
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Cross-thread stop signal for an [`EventLoop`].
#[derive(Clone)]
pub struct StopHandle {
    waker: Arc<Waker>,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the loop to stop after the current dispatch.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.waker.wake() {
                debug!(error = %err, "failed to wake event loop");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::sync::mpsc;

    use bytes::BytesMut;
    use lspmux_frame::Frame;

    use super::*;
    use crate::handler::PeerId;
    use crate::pool::{PoolConfig, PoolState};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/lspmux-loop-{}-{}-{}",
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

    #[test]
    fn stop_from_other_thread_ends_run() {
        let dir = temp_dir("stop");
        let sock = dir.join("loop.sock");
        let (tx, _rx) = mpsc::channel::<(PeerId, Frame)>();
        let mut pool = ConnectionPool::bind(&sock, tx).unwrap();
        let mut ev = EventLoop::new().unwrap();
        let stop = ev.stop_handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.stop();
        });
        ev.run(&mut pool).unwrap();
        stopper.join().unwrap();

        assert!(ev.is_stopped());
        assert_eq!(pool.state(), PoolState::ShutDown);
        assert!(!sock.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn handler_can_stop_after_frame() {
        let dir = temp_dir("count");
        let mut ev = EventLoop::new().unwrap();
        let stop = ev.stop_handle();
        let mut seen = 0usize;
        let handler = move |_: PeerId, _: Frame, _: &mut BytesMut| {
            seen += 1;
            if seen == 2 {
                stop.stop();
            }
        };
        let mut pool = ConnectionPool::bind(dir.join("count.sock"), handler).unwrap();
        let path = pool.path().to_path_buf();

        let client = std::thread::spawn(move || {
            for _ in 0..100 {
                if let Ok(mut stream) = UnixStream::connect(&path) {
                    stream
                        .write_all(b"Content-Length: 1\r\n\r\naContent-Length: 1\r\n\r\nb")
                        .unwrap();
                    return stream;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            panic!("could not connect");
        });
        ev.run(&mut pool).unwrap();
        drop(client.join().unwrap());

        assert_eq!(pool.state(), PoolState::ShutDown);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn poll_once_with_no_activity_dispatches_nothing() {
        let dir = temp_dir("idle");
        let (tx, _rx) = mpsc::channel::<(PeerId, Frame)>();
        let mut pool = ConnectionPool::bind(dir.join("idle.sock"), tx).unwrap();
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let n = ev
            .poll_once(&mut pool, Some(Duration::from_millis(10)))
            .unwrap();

        assert_eq!(n, 0);
        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn pending_input_does_not_wait_for_readiness() {
        let dir = temp_dir("pending");
        let frame = b"Content-Length: 1\r\n\r\na";
        let config = PoolConfig {
            read_chunk_size: frame.len(),
            read_budget: 1,
            ..PoolConfig::default()
        };
        let (tx, rx) = mpsc::channel::<(PeerId, Frame)>();
        let mut pool =
            ConnectionPool::bind_with_config(dir.join("pending.sock"), tx, config).unwrap();
        let mut ev = EventLoop::new().unwrap();
        pool.startup(ev.registry()).unwrap();

        let mut client = UnixStream::connect(pool.path()).unwrap();
        client.write_all(&frame.repeat(3)).unwrap();

        let mut received = 0;
        for _ in 0..200 {
            received += rx.try_iter().count();
            if received > 0 {
                break;
            }
            ev.poll_once(&mut pool, Some(Duration::from_millis(10))).unwrap();
        }
        assert_eq!(received, 1);

        // Nothing new arrives on the socket, so these only return because
        // the pool still holds unread input.
        ev.poll_once(&mut pool, None).unwrap();
        ev.poll_once(&mut pool, None).unwrap();
        received += rx.try_iter().count();
        assert_eq!(received, 3);

        pool.shutdown(ev.registry());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
