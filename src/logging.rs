//! Logging setup: console (stderr, stdout carries the MCP transport) plus a
//! daily-rolling file, both behind a masking writer so bearer tokens and
//! credential-looking values never reach a sink.

use std::io::{self, Write};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MASK: &str = "***";

const SECRET_KEYS: [&str; 4] = ["Bearer ", "api_key=", "password=", "token="];

/// Replace the value following any credential marker with `***`. Values end
/// at whitespace or a common delimiter.
pub fn redact(input: &str) -> String {
    let mut out = input.to_string();
    for key in SECRET_KEYS {
        mask_after(&mut out, key);
    }
    out
}

fn mask_after(out: &mut String, key: &str) {
    let mut search_from = 0;
    while let Some(found) = out[search_from..].find(key) {
        let value_start = search_from + found + key.len();
        let value_end = out[value_start..]
            .find(|c: char| c.is_whitespace() || matches!(c, '&' | '"' | '\'' | ',' | ';'))
            .map(|i| value_start + i)
            .unwrap_or(out.len());
        if value_end > value_start {
            out.replace_range(value_start..value_end, MASK);
            search_from = value_start + MASK.len();
        } else {
            search_from = value_start;
        }
    }
}

pub struct MaskingWriter<W> {
    inner: W,
}

impl<W: Write> Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps any `MakeWriter` so every produced writer masks secrets.
pub struct Masked<M>(pub M);

impl<'a, M> MakeWriter<'a> for Masked<M>
where
    M: MakeWriter<'a>,
{
    type Writer = MaskingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter {
            inner: self.0.make_writer(),
        }
    }
}

/// Install the global subscriber. The returned guard must be held for the
/// process lifetime so buffered file output is flushed on exit.
pub fn init(log_dir: &Path) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = rolling::daily(log_dir, "ctxmcp.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Masked(io::stderr)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Masked(file_writer)),
        )
        .init();
    guard
}
