//! In-memory source buffer with a line index, plus whole-file load/save.
//!
//! The buffer is a single `String`; a table of line-start offsets keeps the
//! line view and the byte-offset view interchangeable. Offsets are UTF-8 byte
//! offsets and lines are 0-based.

use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBuffer {
    text: String,
    /// Byte offset of the first character of each line. Always starts with 0.
    line_starts: Vec<usize>,
}

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Target file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File is not valid UTF-8: {0}")]
    Utf8(PathBuf),

    #[error("File I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SourceBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = index_lines(&text);
        Self { text, line_starts }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of lines. A trailing newline does not open an extra line.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Line containing `offset`. Offsets past the end map to the last line.
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// End of `line`, excluding its newline.
    pub fn line_end(&self, line: usize) -> usize {
        let next = self.line_end_inclusive(line);
        if next > self.line_start(line) && self.text.as_bytes()[next - 1] == b'\n' {
            next - 1
        } else {
            next
        }
    }

    /// End of `line` including its newline (the start of the next line).
    pub fn line_end_inclusive(&self, line: usize) -> usize {
        self.line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Text of `line` without its newline.
    pub fn line_text(&self, line: usize) -> &str {
        if line >= self.line_count() {
            return "";
        }
        &self.text[self.line_start(line)..self.line_end(line)]
    }

    /// Leading spaces and tabs of `line`.
    pub fn indent_of(&self, line: usize) -> &str {
        let text = self.line_text(line);
        let trimmed = text.trim_start_matches([' ', '\t']);
        &text[..text.len() - trimmed.len()]
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.line_count()).map(move |line| self.line_text(line))
    }

    pub fn slice(&self, range: Range<usize>) -> &str {
        &self.text[range]
    }

    pub fn ends_with_newline(&self) -> bool {
        self.text.ends_with('\n')
    }

    /// Byte range covering lines `first..=last` including the last newline.
    pub fn line_span(&self, first: usize, last: usize) -> Range<usize> {
        self.line_start(first)..self.line_end_inclusive(last)
    }
}

impl From<String> for SourceBuffer {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for SourceBuffer {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

fn index_lines(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(
        text.match_indices('\n')
            .map(|(idx, _)| idx + 1)
            .filter(|&start| start < text.len()),
    );
    starts
}

/// Read the target file into a buffer.
pub fn load(path: impl AsRef<Path>) -> Result<SourceBuffer, BufferError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            BufferError::FileNotFound(path.to_path_buf())
        } else {
            BufferError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let text = String::from_utf8(bytes).map_err(|_| BufferError::Utf8(path.to_path_buf()))?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "loaded buffer");
    Ok(SourceBuffer::new(text))
}

/// Overwrite the target file with the buffer contents.
pub fn save(path: impl AsRef<Path>, buffer: &SourceBuffer) -> Result<(), BufferError> {
    let path = path.as_ref();
    atomic_write(path, buffer.as_str().as_bytes()).map_err(|source| BufferError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = buffer.len(), "saved buffer");
    Ok(())
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the original file is left untouched.
/// The permissions of an existing target are carried over to the new file.
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
