use crate::buffer::SourceBuffer;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: byte-span replacement with verification.
///
/// Every mutation kind compiles down to one or more of these. Intelligence
/// lives in span acquisition (the anchor locator), not in application.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until applied to a buffer"]
pub struct Edit {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// New text to insert at [byte_start, byte_end)
    pub new_text: String,
    /// Verification of what we expect to find before applying
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (faster for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("Before-text verification failed at byte {byte_start}")]
    BeforeTextMismatch {
        byte_start: usize,
        byte_end: usize,
        found: String,
    },

    #[error("Invalid byte range: [{byte_start}, {byte_end}) in buffer of length {len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        len: usize,
    },

    #[error("Byte offset {0} is not on a UTF-8 character boundary")]
    NotCharBoundary(usize),

    #[error("Overlapping edits: [{first_start}, {first_end}) and [{second_start}, {second_end})")]
    Overlapping {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },
}

impl Edit {
    /// Create a new edit with automatic verification generation.
    pub fn new(
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: &str,
    ) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: EditVerification::from_text(expected_before),
        }
    }

    /// Zero-width edit that inserts `text` at `offset`.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset, offset, text, "")
    }

    /// Validate the edit against the current buffer text.
    fn validate(&self, text: &str) -> Result<(), EditError> {
        if self.byte_start > self.byte_end || self.byte_end > text.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                len: text.len(),
            });
        }

        for offset in [self.byte_start, self.byte_end] {
            if !text.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary(offset));
            }
        }

        let current = &text[self.byte_start..self.byte_end];
        if !self.expected_before.matches(current) {
            return Err(EditError::BeforeTextMismatch {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                found: current.to_string(),
            });
        }

        Ok(())
    }

    /// Apply this edit to a buffer, producing a new buffer.
    pub fn apply_to(&self, buffer: &SourceBuffer) -> Result<SourceBuffer, EditError> {
        Edit::apply_all(buffer, vec![self.clone()])
    }

    /// Apply several non-overlapping edits to one buffer in a single pass.
    ///
    /// Edits are sorted by byte_start and applied bottom-to-top to avoid
    /// offset invalidation. Zero-width edits at the same offset keep
    /// their given order in the output.
    pub fn apply_all(buffer: &SourceBuffer, mut edits: Vec<Edit>) -> Result<SourceBuffer, EditError> {
        let text = buffer.as_str();

        // Validate all edits first
        for edit in &edits {
            edit.validate(text)?;
        }

        edits.sort_by_key(|edit| (edit.byte_start, edit.byte_end));

        for window in edits.windows(2) {
            let (earlier, later) = (&window[0], &window[1]);
            if earlier.byte_end > later.byte_start {
                return Err(EditError::Overlapping {
                    first_start: earlier.byte_start,
                    first_end: earlier.byte_end,
                    second_start: later.byte_start,
                    second_end: later.byte_end,
                });
            }
        }

        let mut new_text = text.to_string();
        for edit in edits.iter().rev() {
            new_text.replace_range(edit.byte_start..edit.byte_end, &edit.new_text);
        }

        Ok(SourceBuffer::new(new_text))
    }
}
