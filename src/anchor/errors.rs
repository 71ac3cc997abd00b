use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("anchor pattern is empty")]
    EmptyPattern,

    #[error("line matcher has no conditions")]
    EmptyLineMatcher,

    #[error("lookahead window must be at least 1 line")]
    ZeroLookahead,

    #[error("invalid line range [{start}, {end}] (lines are 1-based, start <= end)")]
    InvalidLineRange { start: usize, end: usize },

    #[error("nth selection is 1-based, got 0")]
    ZeroNth,

    #[error("regex match at byte {offset} could not be re-captured for expansion")]
    CaptureMismatch { offset: usize },
}

impl AnchorError {
    pub(crate) fn invalid_regex(pattern: &str, error: regex::Error) -> Self {
        AnchorError::InvalidRegex {
            pattern: pattern.to_string(),
            message: error.to_string(),
        }
    }
}
