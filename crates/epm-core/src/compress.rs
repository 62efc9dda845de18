//! External compressor selection and invocation.
//!
//! One tool is chosen from an ordered preference list when the session is
//! constructed and stays fixed for the process lifetime. Snapshots are piped
//! through the tool as a child process; the store blocks on it.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use filetime::FileTime;
use tracing::debug;

use crate::error::StoreError;

/// One external compression tool: executable plus fixed argument sets.
#[derive(Debug)]
struct Tool {
    binary: &'static str,
    extension: &'static str,
    compress_args: &'static [&'static str],
    decompress_args: &'static [&'static str],
    stdout_args: &'static [&'static str],
}

/// Most preferred first.
const TOOLS: &[Tool] = &[
    Tool {
        binary: "zstd",
        extension: ".zst",
        compress_args: &["-15", "--quiet", "--threads=0"],
        decompress_args: &["--decompress", "--quiet", "--threads=0"],
        stdout_args: &["--stdout"],
    },
    Tool {
        binary: "lz4",
        extension: ".lz4",
        compress_args: &["-9", "--quiet"],
        decompress_args: &["--decompress", "--quiet"],
        stdout_args: &["--stdout"],
    },
    Tool {
        binary: "xz",
        extension: ".xz",
        compress_args: &["-5", "--quiet"],
        decompress_args: &["--decompress", "--quiet"],
        stdout_args: &["--stdout"],
    },
    Tool {
        binary: "plzip",
        extension: ".lz",
        compress_args: &["-5", "--quiet"],
        decompress_args: &["--decompress", "--quiet"],
        stdout_args: &["--stdout"],
    },
    Tool {
        binary: "lzip",
        extension: ".lz",
        compress_args: &["-5", "--quiet"],
        decompress_args: &["--decompress", "--quiet"],
        stdout_args: &["--stdout"],
    },
    Tool {
        binary: "gzip",
        extension: ".gz",
        compress_args: &["-9", "--quiet"],
        decompress_args: &["--decompress", "--quiet"],
        stdout_args: &["--stdout"],
    },
];

#[derive(Clone, Copy, Debug)]
pub enum Direction {
    Compress,
    Decompress,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Compress => "compressing",
            Direction::Decompress => "decompressing",
        }
    }
}

/// The compressor selected for this process, or an explicit uncompressed
/// mode.
#[derive(Debug)]
pub struct Compressor {
    tool: Option<&'static Tool>,
}

impl Compressor {
    /// Probes the preference list and selects the first tool whose
    /// executable resolves on this host.
    ///
    /// # Errors
    /// Fails fast when none is resolvable; persistence cannot proceed
    /// without a deterministic choice.
    pub fn detect() -> Result<Self, StoreError> {
        for tool in TOOLS {
            if which::which(tool.binary).is_ok() {
                debug!(binary = tool.binary, "selected compressor");
                return Ok(Self { tool: Some(tool) });
            }
        }
        Err(StoreError::NoCompressor {
            tried: TOOLS
                .iter()
                .map(|tool| tool.binary)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Compression explicitly turned off; snapshots are stored raw.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tool: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tool.is_some()
    }

    /// File extension of the selected tool, empty when disabled.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        self.tool.map_or("", |tool| tool.extension)
    }

    /// Opens a snapshot for reading, decompressing through a child-process
    /// pipe when a tool is selected.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the decompressor
    /// cannot be spawned.
    pub fn compressed_open(&self, path: &Path) -> Result<Box<dyn Read>, StoreError> {
        let file = File::open(path)?;
        let Some(tool) = self.tool else {
            return Ok(Box::new(file));
        };

        let mut child = Command::new(tool.binary)
            .args(tool.decompress_args)
            .args(tool.stdout_args)
            .stdin(Stdio::from(file))
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            StoreError::Io(io::Error::other("decompressor spawned without stdout"))
        })?;

        Ok(Box::new(CompressedReader { child, stdout }))
    }

    /// Compresses `source` into `destination`, removing the source and
    /// carrying its timestamps over on success. A plain rename when
    /// compression is disabled.
    ///
    /// # Errors
    /// Returns an error on spawn failure or a nonzero tool exit; the
    /// source file is left in place in that case.
    pub fn compress_file(&self, source: &Path, destination: &Path) -> Result<(), StoreError> {
        if self.tool.is_none() {
            fs::rename(source, destination)?;
            return Ok(());
        }
        self.run_compressor(source, destination, Direction::Compress)
    }

    /// Runs the selected tool over `source`, writing `destination`. On
    /// success the source is removed and its access/modification times are
    /// copied to the destination.
    ///
    /// # Errors
    /// Returns `NoCompressor` when disabled, `CompressorFailed` on a
    /// nonzero exit.
    pub fn run_compressor(
        &self,
        source: &Path,
        destination: &Path,
        direction: Direction,
    ) -> Result<(), StoreError> {
        let Some(tool) = self.tool else {
            return Err(StoreError::NoCompressor {
                tried: String::new(),
            });
        };

        let source_meta = fs::metadata(source)?;
        let stdin = File::open(source)?;
        let stdout = File::create(destination)?;

        let args = match direction {
            Direction::Compress => tool.compress_args,
            Direction::Decompress => tool.decompress_args,
        };
        let status = Command::new(tool.binary)
            .args(args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .status()?;

        if !status.success() {
            return Err(StoreError::CompressorFailed {
                verb: direction.verb(),
                path: source.display().to_string(),
                code: status.code().unwrap_or(-1),
            });
        }

        fs::remove_file(source)?;
        let atime = FileTime::from_last_access_time(&source_meta);
        let mtime = FileTime::from_last_modification_time(&source_meta);
        filetime::set_file_times(destination, atime, mtime)?;
        Ok(())
    }
}

/// Decompressor stdout plus the child it belongs to, so the process is
/// reaped when the reader goes away.
struct CompressedReader {
    child: Child,
    stdout: ChildStdout,
}

impl Read for CompressedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for CompressedReader {
    fn drop(&mut self) {
        // the stream may not have been drained; kill before waiting so a
        // blocked writer cannot stall the drop
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_compressor_has_no_extension() {
        let compressor = Compressor::disabled();
        assert!(!compressor.is_enabled());
        assert_eq!(compressor.extension(), "");
    }

    #[test]
    fn disabled_compressor_renames_instead_of_compressing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::write(&src, b"payload").unwrap();

        Compressor::disabled().compress_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn run_compressor_requires_a_tool() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, b"payload").unwrap();
        let result = Compressor::disabled().run_compressor(
            &src,
            &dir.path().join("b"),
            Direction::Compress,
        );
        assert!(matches!(result, Err(StoreError::NoCompressor { .. })));
    }

    #[test]
    fn round_trips_through_a_real_tool_when_available() {
        let Ok(compressor) = Compressor::detect() else {
            return; // host has no compression tool installed
        };
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("snapshot");
        fs::write(&src, b"{\"epm:meta\":{\"version\":4}}").unwrap();

        let packed = dir.path().join(format!("snapshot.0{}", compressor.extension()));
        compressor.compress_file(&src, &packed).unwrap();
        assert!(!src.exists());

        let mut unpacked = Vec::new();
        compressor
            .compressed_open(&packed)
            .unwrap()
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, b"{\"epm:meta\":{\"version\":4}}");
    }
}
