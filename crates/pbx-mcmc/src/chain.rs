//! Chain files: one JSON-serialized [`GlobalParameterState`] per line.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_model::GlobalParameterState;

/// Sequential access to saved parameter snapshots.
pub trait ChainReader {
    /// Next snapshot, or `Ok(None)` once the chain is exhausted.
    fn next_snapshot(&mut self) -> Result<Option<GlobalParameterState>, PbxError>;

    /// Discards up to `n` snapshots and returns how many were skipped.
    fn skip(&mut self, n: usize) -> Result<usize, PbxError> {
        let mut skipped = 0;
        while skipped < n && self.next_snapshot()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }
}

/// [`ChainReader`] over JSON lines; blank lines are ignored.
#[derive(Debug)]
pub struct JsonLinesChain<R> {
    reader: R,
    line: usize,
    buffer: String,
}

impl JsonLinesChain<BufReader<File>> {
    /// Opens a chain file.
    pub fn open(path: &Path) -> Result<Self, PbxError> {
        let file = File::open(path).map_err(|err| PbxError::io("chain-open", err, path))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesChain<R> {
    /// Wraps any buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buffer: String::new(),
        }
    }
}

impl<R: BufRead> ChainReader for JsonLinesChain<R> {
    fn next_snapshot(&mut self) -> Result<Option<GlobalParameterState>, PbxError> {
        loop {
            self.buffer.clear();
            let read = self.reader.read_line(&mut self.buffer).map_err(|err| {
                PbxError::Serde(
                    ErrorInfo::new("chain-read", err.to_string()).with_context("line", self.line + 1),
                )
            })?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            let text = self.buffer.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text).map(Some).map_err(|err| {
                PbxError::Serde(
                    ErrorInfo::new("chain-parse", err.to_string()).with_context("line", self.line),
                )
            });
        }
    }
}

/// Appends snapshots to a chain file.
#[derive(Debug)]
pub struct ChainWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    written: usize,
}

impl ChainWriter {
    /// Creates (or truncates) the chain file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, PbxError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PbxError::io("chain-mkdir", err, parent))?;
        }
        let file = File::create(path).map_err(|err| PbxError::io("chain-create", err, path))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Writes one snapshot line.
    pub fn append(&mut self, state: &GlobalParameterState) -> Result<(), PbxError> {
        let line = serde_json::to_string(state).map_err(|err| {
            PbxError::Serde(ErrorInfo::new("chain-serialize", err.to_string()))
        })?;
        writeln!(self.writer, "{line}").map_err(|err| PbxError::io("chain-write", err, &self.path))?;
        self.written += 1;
        Ok(())
    }

    /// Number of snapshots written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and returns the file path.
    pub fn finish(mut self) -> Result<PathBuf, PbxError> {
        self.writer
            .flush()
            .map_err(|err| PbxError::io("chain-flush", err, &self.path))?;
        Ok(self.path)
    }
}

/// Number of snapshots stored in the chain at `path`.
pub fn count_snapshots(path: &Path) -> Result<usize, PbxError> {
    let file = File::open(path).map_err(|err| PbxError::io("chain-open", err, path))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| PbxError::io("chain-read", err, path))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
