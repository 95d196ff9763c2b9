use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::BufReader;
use tokio::net::unix::pipe;
use tracing::{debug, info};

use super::{frame_line, ChannelError, EventSource, EventWriter, LineReader};

/// Writer side of the named pipe.
///
/// The pipe is opened read-write rather than write-only: a write-only open
/// with no reader attached blocks forever, or fails with `ENXIO` when
/// non-blocking, while a read-write open always succeeds.
#[derive(Debug, Clone)]
pub struct FifoWriter {
    path: PathBuf,
}

impl FifoWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventWriter for FifoWriter {
    fn send_line(&self, line: &str) -> Result<(), ChannelError> {
        let buf = frame_line(line)?;

        let mut fifo = OpenOptions::new().read(true).write(true).open(&self.path)?;

        // One write(2): at or below PIPE_BUF the kernel never interleaves it
        // with another writer's data.
        let written = loop {
            match fifo.write(&buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if written != buf.len() {
            return Err(ChannelError::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(())
    }
}

/// Reader side of the named pipe, owned by the handler.
///
/// Also opened read-write, which keeps one writer attached for the lifetime of
/// the reader so hook processes exiting never produce EOF.
pub struct FifoReader {
    path: PathBuf,
    lines: LineReader<BufReader<pipe::Receiver>>,
}

impl FifoReader {
    /// Must be called from within a tokio runtime
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let path = path.into();
        let receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)?;

        info!("Listening for hotplug events on {}", path.display());

        Ok(Self {
            path,
            lines: LineReader::new(BufReader::new(receiver)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSource for FifoReader {
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError> {
        self.lines.next_line().await
    }
}

/// Create the named pipe at `path` with mode 0600, reusing an existing FIFO.
pub fn create_fifo(path: &Path) -> Result<(), ChannelError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => {
            debug!("Reusing existing FIFO at {}", path.display());
            return Ok(());
        }
        Ok(_) => return Err(ChannelError::NotAFifo(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;

    info!("Created FIFO at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_EVENT_LINE;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_create_fifo_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run").join("hook-hotplug-cmd");

        create_fifo(&path).unwrap();
        create_fifo(&path).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_create_fifo_refuses_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook-hotplug-cmd");
        fs::write(&path, b"").unwrap();

        assert!(matches!(create_fifo(&path), Err(ChannelError::NotAFifo(_))));
    }

    #[test]
    fn test_writer_rejects_unframeable_lines() {
        let dir = tempdir().unwrap();
        let writer = FifoWriter::new(dir.path().join("never-opened"));

        assert!(matches!(
            writer.send_line("a\nb"),
            Err(ChannelError::EmbeddedNewline)
        ));
        assert!(matches!(
            writer.send_line(&"x".repeat(MAX_EVENT_LINE)),
            Err(ChannelError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_through_fifo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hook-hotplug-cmd");
        create_fifo(&path).unwrap();

        let mut reader = FifoReader::open(&path).unwrap();
        let writer = FifoWriter::new(&path);

        writer.send_line("first").unwrap();
        writer.send_line("second").unwrap();

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("second"));
    }
}
