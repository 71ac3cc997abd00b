use crate::anchor::errors::AnchorError;
use crate::cache;
use serde::Deserialize;

/// A pattern plus the scope it is searched in and the rule that picks
/// among its candidates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnchorSpec {
    #[serde(flatten)]
    pub pattern: Pattern,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub select: Selection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Pattern {
    /// Exact substring, may span several lines
    Literal { text: String },
    /// Regular expression (regex crate syntax); captures are available to
    /// the applier for indentation and `$name` expansion
    Regex { pattern: String },
    /// Every line satisfying the matcher
    Line { line: LineMatcher },
    /// Two-phase scan: each `outer` line, then the first `inner` line within
    /// `max_lookahead` lines after it
    LinePair {
        outer: LineMatcher,
        inner: LineMatcher,
        #[serde(default = "default_pair_lookahead")]
        max_lookahead: usize,
        #[serde(default)]
        take: PairTake,
    },
}

/// Which part of a line pair becomes the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairTake {
    Outer,
    #[default]
    Inner,
    /// Both lines and everything between them
    Span,
}

fn default_pair_lookahead() -> usize {
    1
}

/// Content-based search restriction. All bounds are optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Scope {
    /// Search starts after the end of the first occurrence of this marker
    #[serde(default)]
    pub after: Option<String>,
    /// Search stops at the first occurrence of this marker after the start
    #[serde(default)]
    pub before: Option<String>,
    /// 1-based inclusive line range
    #[serde(default)]
    pub lines: Option<(usize, usize)>,
}

impl Scope {
    pub fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.before.is_none() && self.lines.is_none()
    }
}

/// How candidates are turned into the matches a patch operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
    /// Exactly one candidate, otherwise ambiguous
    #[default]
    Unique,
    /// First candidate in scope
    First,
    /// The nth candidate in scope (1-based)
    Nth(usize),
    /// Every candidate
    All,
}

/// Single-line predicate. Every condition that is set must hold.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct LineMatcher {
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub not_contains: Option<String>,
    #[serde(default)]
    pub trimmed_eq: Option<String>,
    /// Compared against the line with leading whitespace removed
    #[serde(default)]
    pub starts_with: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

impl LineMatcher {
    pub fn contains(token: impl Into<String>) -> Self {
        Self {
            contains: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn trimmed_eq(text: impl Into<String>) -> Self {
        Self {
            trimmed_eq: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contains.is_none()
            && self.not_contains.is_none()
            && self.trimmed_eq.is_none()
            && self.starts_with.is_none()
            && self.regex.is_none()
    }

    pub fn matches(&self, line: &str) -> Result<bool, AnchorError> {
        if let Some(token) = &self.contains {
            if !line.contains(token.as_str()) {
                return Ok(false);
            }
        }
        if let Some(token) = &self.not_contains {
            if line.contains(token.as_str()) {
                return Ok(false);
            }
        }
        if let Some(expected) = &self.trimmed_eq {
            if line.trim() != expected.trim() {
                return Ok(false);
            }
        }
        if let Some(prefix) = &self.starts_with {
            if !line.trim_start().starts_with(prefix.as_str()) {
                return Ok(false);
            }
        }
        if let Some(pattern) = &self.regex {
            let re = cache::get_or_compile(pattern)
                .map_err(|e| AnchorError::invalid_regex(pattern, e))?;
            if !re.is_match(line) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn validate(&self) -> Result<(), AnchorError> {
        if self.is_empty() {
            return Err(AnchorError::EmptyLineMatcher);
        }
        if let Some(pattern) = &self.regex {
            cache::get_or_compile(pattern).map_err(|e| AnchorError::invalid_regex(pattern, e))?;
        }
        Ok(())
    }
}

impl AnchorSpec {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            scope: Scope::default(),
            select: Selection::default(),
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self::new(Pattern::Literal { text: text.into() })
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(Pattern::Regex {
            pattern: pattern.into(),
        })
    }

    pub fn line(matcher: LineMatcher) -> Self {
        Self::new(Pattern::Line { line: matcher })
    }

    pub fn line_pair(outer: LineMatcher, inner: LineMatcher, max_lookahead: usize) -> Self {
        Self::new(Pattern::LinePair {
            outer,
            inner,
            max_lookahead,
            take: PairTake::default(),
        })
    }

    pub fn after(mut self, marker: impl Into<String>) -> Self {
        self.scope.after = Some(marker.into());
        self
    }

    pub fn before(mut self, marker: impl Into<String>) -> Self {
        self.scope.before = Some(marker.into());
        self
    }

    pub fn within_lines(mut self, start: usize, end: usize) -> Self {
        self.scope.lines = Some((start, end));
        self
    }

    pub fn select(mut self, select: Selection) -> Self {
        self.select = select;
        self
    }

    /// The literal text of the anchor, if it has one.
    pub fn literal_text(&self) -> Option<&str> {
        match &self.pattern {
            Pattern::Literal { text } => Some(text),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.pattern {
            Pattern::Literal { .. } => "literal",
            Pattern::Regex { .. } => "regex",
            Pattern::Line { .. } => "line",
            Pattern::LinePair { .. } => "line-pair",
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.pattern, Pattern::Regex { .. })
    }

    /// Check the anchor is usable before any buffer is touched.
    pub fn validate(&self) -> Result<(), AnchorError> {
        match &self.pattern {
            Pattern::Literal { text } => {
                if text.is_empty() {
                    return Err(AnchorError::EmptyPattern);
                }
            }
            Pattern::Regex { pattern } => {
                if pattern.is_empty() {
                    return Err(AnchorError::EmptyPattern);
                }
                cache::get_or_compile(pattern)
                    .map_err(|e| AnchorError::invalid_regex(pattern, e))?;
            }
            Pattern::Line { line } => line.validate()?,
            Pattern::LinePair {
                outer,
                inner,
                max_lookahead,
                ..
            } => {
                outer.validate()?;
                inner.validate()?;
                if *max_lookahead == 0 {
                    return Err(AnchorError::ZeroLookahead);
                }
            }
        }

        if let Some((start, end)) = self.scope.lines {
            if start == 0 || start > end {
                return Err(AnchorError::InvalidLineRange { start, end });
            }
        }
        for marker in [&self.scope.after, &self.scope.before].into_iter().flatten() {
            if marker.is_empty() {
                return Err(AnchorError::EmptyPattern);
            }
        }
        if self.select == Selection::Nth(0) {
            return Err(AnchorError::ZeroNth);
        }

        Ok(())
    }
}
