use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{error, info};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{sink} sink write failed: {source}")]
    Write {
        sink: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{sink} sink flush failed: {source}")]
    Flush {
        sink: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A destination for serialized event records, one JSON line per record.
pub enum Sink {
    Stdout(StreamSink),
    File(FileSink),
}

impl Sink {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stdout(_) => "stdout",
            Self::File(_) => "file",
        }
    }

    pub async fn write_line(
        &mut self,
        line: &[u8],
    ) -> Result<(), SinkError> {
        let sink = self.name();
        let written = match self {
            Self::Stdout(stream) => stream.write_line(line).await,
            Self::File(file) => file.write_line(line).await,
        };
        written.map_err(|source| SinkError::Write { sink, source })
    }

    pub async fn flush(&mut self) -> Result<(), SinkError> {
        let sink = self.name();
        let flushed = match self {
            Self::Stdout(stream) => stream.writer.flush().await,
            Self::File(file) => file.writer.flush().await,
        };
        flushed.map_err(|source| SinkError::Flush { sink, source })
    }

    fn is_buffered(&self) -> bool {
        matches!(self, Self::File(file) if !file.sync)
    }
}

/// Line-flushed stream; stdout in production.
pub struct StreamSink {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl StreamSink {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self { writer: Box::new(writer) }
    }

    async fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

/// Append-only log file. With `sync` every record is flushed and fsynced
/// before the next one is taken; otherwise writes are buffered and flushed
/// by the writer's tick.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    sync: bool,
}

impl FileSink {
    pub async fn open(
        path: &Path,
        sync: bool,
    ) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file), sync })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_line(
        &mut self,
        line: &[u8],
    ) -> io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\n").await?;

        if self.sync {
            self.writer.flush().await?;
            self.writer.get_ref().sync_data().await?;
        }

        Ok(())
    }
}

/// Every active sink. Empty is valid: records are still produced, nothing
/// is persisted.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Sink>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Sink>) -> Self {
        Self { sinks }
    }

    /// Opens the sinks enabled in `config`.
    ///
    /// A file sink with a missing or invalid directory is reported once and
    /// left out; startup only fails when that leaves nothing but a disabled
    /// stdout sink.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut sinks = Vec::with_capacity(2);

        if config.stdout {
            sinks.push(Sink::Stdout(StreamSink::stdout()));
        }

        if config.file.enabled {
            let opened = match config.file.validate() {
                Ok(path) => FileSink::open(&path, config.file.sync)
                    .await
                    .map_err(anyhow::Error::new),
                Err(err) => Err(anyhow::Error::new(err)),
            };

            match opened {
                Ok(file) => {
                    info!(
                        "file sink ready: path={}, sync={}",
                        file.path().display(),
                        config.file.sync
                    );
                    sinks.push(Sink::File(file));
                }
                Err(err) if config.stdout => {
                    error!(
                        "file sink disabled, continuing with stdout only: error={err}"
                    );
                }
                Err(err) => bail!("file sink unavailable: {err}"),
            }
        }

        Ok(Self::new(sinks))
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(Sink::name).collect()
    }

    pub fn needs_periodic_flush(&self) -> bool {
        self.sinks.iter().any(Sink::is_buffered)
    }

    /// Writes one line to every sink; a failing sink does not stop the
    /// others.
    pub async fn write_line(&mut self, line: &[u8]) -> Vec<SinkError> {
        let mut errors = Vec::new();
        for sink in &mut self.sinks {
            if let Err(err) = sink.write_line(line).await {
                errors.push(err);
            }
        }
        errors
    }

    pub async fn flush(&mut self) -> Vec<SinkError> {
        let mut errors = Vec::new();
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush().await {
                errors.push(err);
            }
        }
        errors
    }
}
