//! Logger setup.
//!
//! Without a log file, `env_logger` writes to stderr. With one, every
//! formatted line goes through a channel to [`LogFileService`], a pingora
//! background service that appends to the file and rotates it once it grows
//! past `max_size`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use env_logger::{Builder, Env};
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, rename, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config;

const DEFAULT_FILTER: &str = "info";

/// `io::Write` end of the log channel handed to `env_logger`.
struct ChannelWriter {
    lines: UnboundedSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lines.send(buf.to_vec()).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Append-only log file with size-based rotation to `<path>.1`.
struct LogFile {
    path: PathBuf,
    max_size: Option<u64>,
    written: u64,
    file: BufWriter<File>,
}

impl LogFile {
    async fn open(path: impl Into<PathBuf>, max_size: Option<u64>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).await?;
        }

        let file = Self::append(&path).await?;
        let written = file.metadata().await?.len();
        Ok(Self {
            path,
            max_size,
            written,
            file: BufWriter::new(file),
        })
    }

    async fn append(path: &Path) -> io::Result<File> {
        OpenOptions::new().append(true).create(true).open(path).await
    }

    fn rotated_path(&self) -> PathBuf {
        let mut rotated = self.path.clone().into_os_string();
        rotated.push(".1");
        rotated.into()
    }

    async fn write(&mut self, line: &[u8]) -> io::Result<()> {
        if let Some(max) = self.max_size {
            if self.written > 0 && self.written + line.len() as u64 > max {
                self.rotate().await?;
            }
        }
        self.file.write_all(line).await?;
        self.written += line.len() as u64;
        Ok(())
    }

    /// Moves the current file aside, replacing any earlier rotation.
    async fn rotate(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        rename(&self.path, self.rotated_path()).await?;
        self.file = BufWriter::new(Self::append(&self.path).await?);
        self.written = 0;
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await
    }
}

/// Background service draining log lines into the configured file.
pub struct LogFileService {
    lines: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

fn builder() -> Builder {
    Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
}

/// Installs the global logger.
///
/// With a log file configured, returns the service that drains lines into it;
/// it must be added to the server or nothing is written.
pub fn init_logging(config: Option<&config::Log>) -> Option<LogFileService> {
    let Some(log_cfg) = config else {
        builder().init();
        return None;
    };

    let (sender, lines) = unbounded_channel();
    builder()
        .target(env_logger::Target::Pipe(Box::new(ChannelWriter { lines: sender })))
        .init();

    Some(LogFileService {
        lines,
        config: log_cfg.clone(),
    })
}

#[async_trait]
impl Service for LogFileService {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut file = match LogFile::open(&self.config.path, self.config.max_size).await {
            Ok(file) => file,
            Err(e) => {
                // env_logger writes into this service, so stderr is the only way out.
                eprintln!("Failed to open log file {}: {e}", self.config.path);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },
                line = self.lines.recv() => {
                    let Some(line) = line else { break };
                    if let Err(e) = file.write(&line).await {
                        eprintln!("Failed to write log file {}: {e}", self.config.path);
                    }
                }
            }
        }

        // Lines queued before shutdown still land in the file.
        while let Ok(line) = self.lines.try_recv() {
            if file.write(&line).await.is_err() {
                break;
            }
        }
        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file {}: {e}", self.config.path);
        }
    }

    fn name(&self) -> &'static str {
        "edgerouter log file"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}
