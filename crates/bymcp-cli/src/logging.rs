//! Tracing setup.
//!
//! Stdout carries the MCP protocol, so human-readable logs go to stderr.
//! `serve` additionally appends debug logs to `<data_dir>/logs/server.log`.
//! Every line passes through [`mask_ibans_in_text`] before it is written.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use bymcp_adapters::iban::mask_ibans_in_text;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;

/// Filter for the log file: everything from bymcp, less from the HTTP stack.
const FILE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info,rustls=info,h2=info";

// ---------------------------------------------------------------------------
// IBAN masking writer
// ---------------------------------------------------------------------------

/// Wraps a writer and masks IBANs in everything written through it.
pub struct MaskingWriter<W> {
    inner: W,
}

impl<W: Write> Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let masked = mask_ibans_in_text(&String::from_utf8_lossy(buf));
        self.inner.write_all(masked.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// [`MakeWriter`] producing [`MaskingWriter`]s.
pub struct Masked<M> {
    inner: M,
}

impl<M> Masked<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for Masked<M> {
    type Writer = MaskingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter {
            inner: self.inner.make_writer(),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initialize tracing with a stderr layer and, if `log_dir` is given, a
/// file layer appending to `server.log` inside it.
///
/// `RUST_LOG` overrides `default_level` for stderr only.
pub fn init_tracing(default_level: &str, log_dir: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer()
        .with_writer(Masked::new(io::stderr))
        .with_target(false)
        .compact()
        .with_filter(filter);

    let file_layer = match log_dir {
        Some(dir) => {
            let file = open_log_file(dir)?;
            Some(
                fmt::layer()
                    .with_writer(Masked::new(Mutex::new(file)))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(EnvFilter::new(FILE_FILTER)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")?;
    Ok(())
}

fn open_log_file(dir: &Path) -> Result<File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let path = dir.join("server.log");
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
