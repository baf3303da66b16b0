use std::fs;
use std::time::Duration;

use lspmux_frame::{FrameConfig, FrameReader, FrameWriter, Headers};
use lspmux_transport::IpcStream;
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let body = resolve_body(&args)?;
    let headers: Headers = args.headers.iter().cloned().collect();

    let stream =
        IpcStream::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    debug!(path = ?args.path, server = ?stream.peer_credentials(), "connected");
    let config = FrameConfig {
        read_timeout: Some(wait_timeout),
        write_timeout: Some(wait_timeout),
        ..FrameConfig::default()
    };

    let write_half = stream
        .try_clone()
        .map_err(|err| transport_error("connect failed", err))?;
    let mut writer = FrameWriter::with_config_ipc(write_half, config.clone())
        .map_err(|err| frame_error("send failed", err))?;
    writer
        .send(&body, &headers)
        .map_err(|err| frame_error("send failed", err))?;
    debug!(path = ?args.path, size = body.len(), "frame sent");

    if !args.wait {
        stream
            .shutdown_write()
            .map_err(|err| transport_error("send failed", err))?;
        return Ok(SUCCESS);
    }

    let mut reader = FrameReader::with_config_ipc(stream, config)
        .map_err(|err| frame_error("receive failed", err))?;
    let frame = reader
        .read_frame()
        .map_err(|err| frame_error("receive failed", err))?;
    print_frame(&frame, "server", None, format);

    Ok(SUCCESS)
}

fn resolve_body(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
