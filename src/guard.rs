//! Idempotence guard: has this patch already been applied?
//!
//! A patch carries a signature, a string (or regex) that is present in the
//! buffer exactly when the patch has been applied. Repairs carry the inverse:
//! a marker of the defect they fix, present exactly until the repair has run.

use crate::anchor::AnchorError;
use crate::buffer::SourceBuffer;
use crate::cache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Literal(String),
    Regex(String),
}

impl Signature {
    pub fn literal(text: impl Into<String>) -> Self {
        Signature::Literal(text.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Signature::Regex(pattern.into())
    }

    /// Containment check against arbitrary text.
    pub fn is_present_in(&self, text: &str) -> Result<bool, AnchorError> {
        match self {
            Signature::Literal(needle) => Ok(!needle.is_empty() && text.contains(needle.as_str())),
            Signature::Regex(pattern) => Ok(compile_signature(pattern)?.is_match(text)),
        }
    }

    pub fn validate(&self) -> Result<(), AnchorError> {
        match self {
            Signature::Literal(needle) if needle.is_empty() => Err(AnchorError::EmptyPattern),
            Signature::Literal(_) => Ok(()),
            Signature::Regex(pattern) => compile_signature(pattern).map(|_| ()),
        }
    }
}

/// A regex that matches the empty string is present in every buffer.
fn compile_signature(pattern: &str) -> Result<regex::Regex, AnchorError> {
    let re = cache::get_or_compile(pattern).map_err(|e| AnchorError::invalid_regex(pattern, e))?;
    if re.is_match("") {
        return Err(AnchorError::EmptyPattern);
    }
    Ok(re)
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signature::Literal(text) => write!(f, "{text:?}"),
            Signature::Regex(pattern) => write!(f, "/{pattern}/"),
        }
    }
}

/// How a patch recognises that it has already run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Applied once the signature is present
    Present(Signature),
    /// Applied once the defect marker is gone from the whole buffer
    Absent(Signature),
}

impl Guard {
    pub fn signature(&self) -> &Signature {
        match self {
            Guard::Present(signature) | Guard::Absent(signature) => signature,
        }
    }

    pub fn is_satisfied(&self, buffer: &SourceBuffer) -> Result<bool, AnchorError> {
        match self {
            Guard::Present(signature) => already_applied(buffer, signature),
            Guard::Absent(marker) => {
                let present = marker.is_present_in(buffer.as_str())?;
                tracing::trace!(%marker, present, "repair check");
                Ok(!present)
            }
        }
    }
}

/// True when `signature` is already present in the buffer.
pub fn already_applied(buffer: &SourceBuffer, signature: &Signature) -> Result<bool, AnchorError> {
    let present = signature.is_present_in(buffer.as_str())?;
    tracing::trace!(%signature, present, "idempotence check");
    Ok(present)
}
