use bytes::BytesMut;
use lspmux_frame::{encode_frame, Frame, FrameConfig};
use lspmux_pool::{ConnectionPool, EventLoop, FrameHandler, PeerId, PoolConfig, StopHandle};
use tracing::{info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{pool_error, CliError, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let config = PoolConfig {
        frame: FrameConfig {
            max_body_size: args.max_body,
            ..FrameConfig::default()
        },
        read_chunk_size: args.chunk_size,
        read_budget: args.read_budget,
        ..PoolConfig::default()
    };

    let mut event_loop = EventLoop::with_capacity(config.event_capacity)
        .map_err(|err| pool_error("event loop setup failed", err))?;
    let stop = event_loop.stop_handle();
    install_ctrlc_handler(stop.clone())?;

    let printer = FramePrinter {
        format,
        echo: args.echo,
        check_json: args.json,
        limit: args.count,
        printed: 0,
        stop,
    };
    let mut pool = ConnectionPool::bind_with_config(&args.path, printer, config)
        .map_err(|err| pool_error("bind failed", err))?;
    info!(path = ?pool.path(), echo = args.echo, "listening");

    event_loop
        .run(&mut pool)
        .map_err(|err| pool_error("event loop failed", err))?;
    info!(path = ?pool.path(), frames = pool.handler().printed, "listener stopped");

    Ok(SUCCESS)
}

/// Prints each frame and optionally echoes it back.
struct FramePrinter {
    format: OutputFormat,
    echo: bool,
    check_json: bool,
    limit: Option<usize>,
    printed: usize,
    stop: StopHandle,
}

impl FramePrinter {
    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.printed >= limit)
    }
}

impl FrameHandler for FramePrinter {
    fn handle(&mut self, peer: PeerId, frame: Frame, reply: &mut BytesMut) {
        if self.limit_reached() {
            return;
        }

        let body_error = if self.check_json {
            frame
                .json::<serde_json::Value>()
                .err()
                .map(|err| err.to_string())
        } else {
            None
        };
        if let Some(err) = &body_error {
            warn!(%peer, error = %err, "body is not valid JSON");
        }

        print_frame(&frame, &peer.to_string(), body_error.as_deref(), self.format);
        self.printed = self.printed.saturating_add(1);

        if self.echo {
            if let Err(err) = encode_frame(&frame.body, &frame.headers, reply) {
                warn!(%peer, error = %err, "failed to encode echo reply");
            }
        }

        if self.limit_reached() {
            self.stop.stop();
        }
    }
}

fn install_ctrlc_handler(stop: StopHandle) -> CliResult<()> {
    ctrlc::set_handler(move || stop.stop()).map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use lspmux_frame::Headers;

    use super::*;

    fn printer(event_loop: &EventLoop, echo: bool, limit: Option<usize>) -> FramePrinter {
        FramePrinter {
            format: OutputFormat::Pretty,
            echo,
            check_json: true,
            limit,
            printed: 0,
            stop: event_loop.stop_handle(),
        }
    }

    #[test]
    fn echo_copies_body_and_extra_headers() {
        let event_loop = EventLoop::new().unwrap();
        let mut handler = printer(&event_loop, true, None);
        let frame = Frame::new("{}", Headers::new().with("Type", "documentSymbol")).unwrap();
        let mut reply = BytesMut::new();

        handler.handle(PeerId(1), frame, &mut reply);

        assert_eq!(
            &reply[..],
            b"Content-Length: 2\r\nType: documentSymbol\r\n\r\n{}"
        );
    }

    #[test]
    fn no_reply_without_echo() {
        let event_loop = EventLoop::new().unwrap();
        let mut handler = printer(&event_loop, false, None);
        let mut reply = BytesMut::new();

        handler.handle(PeerId(1), Frame::new("x", Headers::new()).unwrap(), &mut reply);

        assert!(reply.is_empty());
        assert!(!event_loop.is_stopped());
    }

    #[test]
    fn count_limit_stops_loop_and_ignores_extra_frames() {
        let event_loop = EventLoop::new().unwrap();
        let mut handler = printer(&event_loop, true, Some(1));
        let mut reply = BytesMut::new();

        handler.handle(PeerId(1), Frame::new("a", Headers::new()).unwrap(), &mut reply);
        let after_first = reply.len();
        handler.handle(PeerId(1), Frame::new("b", Headers::new()).unwrap(), &mut reply);

        assert!(event_loop.is_stopped());
        assert_eq!(handler.printed, 1);
        assert_eq!(reply.len(), after_first);
    }
}
