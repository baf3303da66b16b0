use std::collections::BTreeMap;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lspmux_frame::{Frame, CONTENT_LENGTH};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    peer: &'a str,
    content_length: usize,
    headers: BTreeMap<&'a str, &'a str>,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_error: Option<&'a str>,
    timestamp: String,
}

/// Print one received frame. `body_error` carries a JSON validation
/// failure when the listener checks bodies.
pub fn print_frame(frame: &Frame, peer: &str, body_error: Option<&str>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                peer,
                content_length: frame.body.len(),
                headers: extra_headers(frame).collect(),
                body: body_preview(frame),
                body_error,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let headers = extra_headers(frame)
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join("\n");
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "SIZE", "HEADERS", "BODY"])
                .add_row(vec![
                    peer.to_string(),
                    frame.body.len().to_string(),
                    headers,
                    match body_error {
                        Some(err) => format!("{} (invalid: {err})", body_preview(frame)),
                        None => body_preview(frame),
                    },
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let headers = extra_headers(frame)
                .map(|(name, value)| format!(" {name}={value}"))
                .collect::<String>();
            print!("peer={} size={}{}", peer, frame.body.len(), headers);
            if let Some(err) = body_error {
                print!(" invalid={err:?}");
            }
            println!(" body={}", body_preview(frame));
        }
        OutputFormat::Raw => {
            print_raw(frame.body.as_ref());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Headers other than `Content-Length`, in arrival order.
fn extra_headers(frame: &Frame) -> impl Iterator<Item = (&str, &str)> {
    frame
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_LENGTH))
}

fn body_preview(frame: &Frame) -> String {
    match frame.body_str() {
        Some(text) => text.to_string(),
        None => format!("<binary {} bytes>", frame.body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use lspmux_frame::Headers;

    use super::*;

    #[test]
    fn extra_headers_skip_content_length() {
        let frame = Frame::new("{}", Headers::new().with("Type", "documentSymbol")).unwrap();
        let headers: Vec<_> = extra_headers(&frame).collect();

        assert_eq!(headers, vec![("Type", "documentSymbol")]);
    }

    #[test]
    fn binary_body_preview() {
        let binary = Frame::new(vec![0xffu8, 0xfe], Headers::new()).unwrap();
        let text = Frame::new("text", Headers::new()).unwrap();

        assert_eq!(body_preview(&binary), "<binary 2 bytes>");
        assert_eq!(body_preview(&text), "text");
    }
}
