use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::MountError;

/// Install the global subscriber.
///
/// The terminal layer writes to stderr: everything from this crate at debug
/// with `verbose`, otherwise `RUST_LOG` plus `sshmount=info`. The file layer
/// always captures `sshmount=debug` but discards until the returned handle
/// is pointed at a file, since the log path depends on the loaded config.
pub fn init(verbose: bool) -> Result<DeferredFileHandle, MountError> {
    let terminal_filter = if verbose {
        EnvFilter::new("sshmount=debug")
    } else {
        let directive = "sshmount=info".parse().map_err(|e| MountError::Validation {
            message: format!("invalid log directive: {e}"),
        })?;
        EnvFilter::from_default_env().add_directive(directive)
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    let (file_writer, file_handle) = DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("sshmount=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    Ok(file_handle)
}

// ── DeferredFileWriter ───────────────────────────────────

/// A `MakeWriter` that discards writes until a file is attached through its
/// [`DeferredFileHandle`].
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: Arc<Mutex<Option<File>>>,
}

#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: Arc<Mutex<Option<File>>>,
}

fn lock(inner: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

impl DeferredFileHandle {
    /// Start appending to `path`, creating its directory if needed.
    pub fn set_file(&self, path: &Path) -> Result<(), MountError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| MountError::Io {
                context: format!("creating log directory {}", parent.display()),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| MountError::Io {
                context: format!("opening log file {}", path.display()),
                source,
            })?;
        *lock(&self.inner) = Some(file);
        Ok(())
    }
}

pub struct DeferredWriter {
    inner: Arc<Mutex<Option<File>>>,
}

impl std::io::Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn discards_until_file_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("sshmount.log");
        let (writer, handle) = DeferredFileWriter::new();

        writer.make_writer().write_all(b"dropped\n").unwrap();
        handle.set_file(&path).unwrap();
        writer.make_writer().write_all(b"kept\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");
    }

    #[test]
    fn appends_to_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshmount.log");
        std::fs::write(&path, "earlier\n").unwrap();
        let (writer, handle) = DeferredFileWriter::new();

        handle.set_file(&path).unwrap();
        writer.make_writer().write_all(b"later\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }
}
