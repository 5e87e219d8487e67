use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

/// Default permission mode for created pipe paths.
pub const DEFAULT_FIFO_MODE: u32 = 0o600;

/// Make sure a named pipe exists at `path`.
///
/// Creates the FIFO if nothing is there. An existing FIFO is reused; any
/// other kind of file at `path` is an error and is never removed.
pub fn ensure_fifo(path: impl AsRef<Path>) -> Result<()> {
    ensure_fifo_with_mode(path, DEFAULT_FIFO_MODE)
}

/// Make sure a named pipe exists at `path`, creating it with explicit mode.
pub fn ensure_fifo_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<()> {
    let path = path.as_ref();

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_fifo() => {
            debug!(?path, "reusing existing fifo");
            return Ok(());
        }
        Ok(_) => {
            return Err(TransportError::Pipe {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a fifo",
                ),
            });
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(TransportError::Pipe {
                path: path.to_path_buf(),
                source: err,
            });
        }
    }

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| TransportError::Pipe {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path contains an interior NUL byte",
        ),
    })?;

    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Lost a creation race with the peer: fine as long as it is a FIFO.
        if err.kind() == std::io::ErrorKind::AlreadyExists {
            return ensure_fifo_with_mode(path, mode);
        }
        return Err(TransportError::Pipe {
            path: path.to_path_buf(),
            source: err,
        });
    }

    info!(?path, "created fifo");
    Ok(())
}

/// Open the read end of a named pipe.
///
/// Blocks until some process opens the same pipe for writing.
pub fn open_read(path: impl AsRef<Path>) -> Result<ByteStream> {
    let path = path.as_ref();
    ensure_fifo(path)?;
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| TransportError::Pipe {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(?path, "opened fifo for reading");
    Ok(ByteStream::from_fifo(file))
}

/// Open the write end of a named pipe.
///
/// Blocks until some process opens the same pipe for reading.
pub fn open_write(path: impl AsRef<Path>) -> Result<ByteStream> {
    let path = path.as_ref();
    ensure_fifo(path)?;
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| TransportError::Pipe {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(?path, "opened fifo for writing");
    Ok(ByteStream::from_fifo(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "hopwire-fifo-{tag}-{}-{}",
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
    fn test_ensure_creates_fifo() {
        let dir = temp_dir("create");
        let path = dir.join("in.fifo");

        ensure_fifo(&path).unwrap();
        let metadata = std::fs::symlink_metadata(&path).unwrap();
        assert!(metadata.file_type().is_fifo());

        // Second call reuses it.
        ensure_fifo(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_ensure_rejects_regular_file() {
        let dir = temp_dir("regular");
        let path = dir.join("not-a-fifo");
        std::fs::write(&path, b"regular-file").unwrap();

        let result = ensure_fifo(&path);
        assert!(matches!(result, Err(TransportError::Pipe { .. })));
        assert!(path.exists(), "non-fifo paths must never be removed");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_read_write_pair() {
        let dir = temp_dir("pair");
        let path = dir.join("pipe.fifo");

        let writer_path = path.clone();
        let handle = std::thread::spawn(move || {
            let mut writer = open_write(&writer_path).unwrap();
            writer.write_all(b"hello").unwrap();
        });

        let mut reader = open_read(&path).unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.kind(), "fifo");

        handle.join().unwrap();
        // Writer dropped: reader sees end of stream.
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
