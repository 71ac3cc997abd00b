use crate::anchor::errors::AnchorError;
use crate::anchor::spec::{AnchorSpec, LineMatcher, PairTake, Pattern, Scope, Selection};
use crate::buffer::SourceBuffer;
use crate::cache;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::ops::Range;

/// One anchor candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Byte range of the match
    pub start: usize,
    pub end: usize,
    /// Line of the first matched byte (0-based)
    pub line: usize,
    /// Line of the last matched byte (0-based)
    pub end_line: usize,
    /// The matched text
    pub text: String,
    /// Positional regex groups; index 0 is the whole match
    pub groups: Vec<Option<String>>,
    /// Named regex groups that participated in the match
    pub named: BTreeMap<String, String>,
    /// Leading whitespace of the line containing the match start
    pub indent: String,
}

impl Match {
    fn from_span(buffer: &SourceBuffer, start: usize, end: usize) -> Self {
        let line = buffer.line_of(start);
        let end_line = if end > start {
            buffer.line_of(end - 1)
        } else {
            line
        };
        Self {
            start,
            end,
            line,
            end_line,
            text: buffer.slice(start..end).to_string(),
            groups: Vec::new(),
            named: BTreeMap::new(),
            indent: buffer.indent_of(line).to_string(),
        }
    }

    fn from_captures(buffer: &SourceBuffer, re: &Regex, caps: &Captures<'_>) -> Option<Self> {
        let whole = caps.get(0)?;
        let mut found = Self::from_span(buffer, whole.start(), whole.end());
        found.groups = caps
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();
        found.named = re
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Some(found)
    }

    /// 1-based line number for reporting.
    pub fn line_number(&self) -> usize {
        self.line + 1
    }
}

/// Outcome of applying an anchor to a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NotFound,
    Found(Vec<Match>),
}

impl MatchResult {
    pub fn count(&self) -> usize {
        match self {
            MatchResult::NotFound => 0,
            MatchResult::Found(matches) => matches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn matches(&self) -> &[Match] {
        match self {
            MatchResult::NotFound => &[],
            MatchResult::Found(matches) => matches,
        }
    }
}

/// Candidates after the selection rule has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected {
    NotFound,
    /// More candidates than the rule allows; carries the candidate count
    Ambiguous(usize),
    Matches(Vec<Match>),
}

/// Find every candidate for `spec` inside its scope.
pub fn locate(buffer: &SourceBuffer, spec: &AnchorSpec) -> Result<MatchResult, AnchorError> {
    let Some(window) = scope_window(buffer, &spec.scope) else {
        tracing::debug!(scope = ?spec.scope, "scope marker not found");
        return Ok(MatchResult::NotFound);
    };

    let matches = match &spec.pattern {
        Pattern::Literal { text } => locate_literal(buffer, &window, text)?,
        Pattern::Regex { pattern } => locate_regex(buffer, &window, pattern)?,
        Pattern::Line { line } => locate_lines(buffer, &window, line)?,
        Pattern::LinePair {
            outer,
            inner,
            max_lookahead,
            take,
        } => locate_line_pairs(buffer, &window, outer, inner, *max_lookahead, *take)?,
    };

    tracing::debug!(
        count = matches.len(),
        window_start = window.start,
        window_end = window.end,
        "located anchor candidates"
    );

    if matches.is_empty() {
        Ok(MatchResult::NotFound)
    } else {
        Ok(MatchResult::Found(matches))
    }
}

/// Apply a selection rule to located candidates.
///
/// `Unique` never picks among several candidates: more than one is reported
/// as ambiguous. `First` and `Nth` are explicit, declared disambiguation.
pub fn select(result: MatchResult, selection: Selection) -> Selected {
    let matches = match result {
        MatchResult::NotFound => return Selected::NotFound,
        MatchResult::Found(matches) => matches,
    };

    match selection {
        Selection::Unique if matches.len() == 1 => Selected::Matches(matches),
        Selection::Unique => Selected::Ambiguous(matches.len()),
        Selection::First => Selected::Matches(matches.into_iter().take(1).collect()),
        Selection::Nth(n) => match n.checked_sub(1).and_then(|idx| matches.into_iter().nth(idx)) {
            Some(found) => Selected::Matches(vec![found]),
            None => Selected::NotFound,
        },
        Selection::All => Selected::Matches(matches),
    }
}

/// Expand `$1` / `${name}` references in `template` against a regex match.
///
/// Non-regex anchors return the template unchanged.
pub fn expand(
    buffer: &SourceBuffer,
    spec: &AnchorSpec,
    found: &Match,
    template: &str,
) -> Result<String, AnchorError> {
    let Pattern::Regex { pattern } = &spec.pattern else {
        return Ok(template.to_string());
    };

    let re = cache::get_or_compile(pattern).map_err(|e| AnchorError::invalid_regex(pattern, e))?;
    let caps = re
        .captures_at(buffer.as_str(), found.start)
        .filter(|caps| {
            caps.get(0)
                .is_some_and(|m| m.start() == found.start && m.end() == found.end)
        })
        .ok_or(AnchorError::CaptureMismatch {
            offset: found.start,
        })?;

    let mut expanded = String::with_capacity(template.len());
    caps.expand(template, &mut expanded);
    Ok(expanded)
}

/// Resolve the scope to a byte window, or `None` when a marker is missing.
fn scope_window(buffer: &SourceBuffer, scope: &Scope) -> Option<Range<usize>> {
    let text = buffer.as_str();
    let mut window = 0..text.len();

    if let Some((first, last)) = scope.lines {
        if first == 0 || first > buffer.line_count() {
            return None;
        }
        let last = last.min(buffer.line_count());
        window = buffer.line_span(first - 1, last - 1);
    }

    if let Some(marker) = &scope.after {
        let offset = text[window.clone()].find(marker.as_str())?;
        window.start += offset + marker.len();
    }

    if let Some(marker) = &scope.before {
        let offset = text[window.clone()].find(marker.as_str())?;
        window.end = window.start + offset;
    }

    Some(window)
}

fn locate_literal(
    buffer: &SourceBuffer,
    window: &Range<usize>,
    needle: &str,
) -> Result<Vec<Match>, AnchorError> {
    let Some(first_char) = needle.chars().next() else {
        return Err(AnchorError::EmptyPattern);
    };

    // Overlapping occurrences count: restart one char past each match start
    let haystack = buffer.slice(window.clone());
    let mut matches = Vec::new();
    let mut pos = 0;
    while let Some(idx) = haystack[pos..].find(needle) {
        let start = window.start + pos + idx;
        matches.push(Match::from_span(buffer, start, start + needle.len()));
        pos += idx + first_char.len_utf8();
    }
    Ok(matches)
}

fn locate_regex(
    buffer: &SourceBuffer,
    window: &Range<usize>,
    pattern: &str,
) -> Result<Vec<Match>, AnchorError> {
    let re = cache::get_or_compile(pattern).map_err(|e| AnchorError::invalid_regex(pattern, e))?;
    let text = buffer.as_str();
    let mut matches = Vec::new();
    let mut pos = window.start;

    // Search the full text from the window start so `^`/`\b` see real context
    while pos <= window.end {
        let Some(caps) = re.captures_at(text, pos) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        if whole.start() > window.end || (whole.start() == window.end && !whole.is_empty()) {
            break;
        }
        if whole.end() > window.end {
            // Crosses the window end; a later match may still fit inside
            match text[whole.start()..].chars().next() {
                Some(c) => pos = whole.start() + c.len_utf8(),
                None => break,
            }
            continue;
        }
        if let Some(found) = Match::from_captures(buffer, &re, &caps) {
            matches.push(found);
        }
        pos = if whole.is_empty() {
            match text[whole.end()..].chars().next() {
                Some(c) => whole.end() + c.len_utf8(),
                None => break,
            }
        } else {
            whole.end()
        };
    }

    Ok(matches)
}

/// Lines lying entirely inside the window.
fn lines_in(buffer: &SourceBuffer, window: &Range<usize>) -> Vec<usize> {
    let mut first = buffer.line_of(window.start);
    if buffer.line_start(first) < window.start {
        first += 1;
    }
    (first..buffer.line_count())
        .take_while(|&line| buffer.line_end(line) <= window.end)
        .collect()
}

fn locate_lines(
    buffer: &SourceBuffer,
    window: &Range<usize>,
    matcher: &LineMatcher,
) -> Result<Vec<Match>, AnchorError> {
    let mut matches = Vec::new();
    for line in lines_in(buffer, window) {
        if matcher.matches(buffer.line_text(line))? {
            matches.push(Match::from_span(
                buffer,
                buffer.line_start(line),
                buffer.line_end(line),
            ));
        }
    }
    Ok(matches)
}

fn locate_line_pairs(
    buffer: &SourceBuffer,
    window: &Range<usize>,
    outer: &LineMatcher,
    inner: &LineMatcher,
    max_lookahead: usize,
    take: PairTake,
) -> Result<Vec<Match>, AnchorError> {
    if max_lookahead == 0 {
        return Err(AnchorError::ZeroLookahead);
    }

    let lines = lines_in(buffer, window);
    let mut matches = Vec::new();

    for (pos, &outer_line) in lines.iter().enumerate() {
        if !outer.matches(buffer.line_text(outer_line))? {
            continue;
        }

        // Bounded: never look past max_lookahead lines or the scope window
        let mut inner_line = None;
        for &candidate in lines.iter().skip(pos + 1).take(max_lookahead) {
            if inner.matches(buffer.line_text(candidate))? {
                inner_line = Some(candidate);
                break;
            }
        }

        let Some(inner_line) = inner_line else {
            tracing::trace!(
                line = outer_line + 1,
                max_lookahead,
                "outer line without inner line in lookahead window"
            );
            continue;
        };

        let (first, last) = match take {
            PairTake::Outer => (outer_line, outer_line),
            PairTake::Inner => (inner_line, inner_line),
            PairTake::Span => (outer_line, inner_line),
        };
        matches.push(Match::from_span(
            buffer,
            buffer.line_start(first),
            buffer.line_end(last),
        ));
    }

    Ok(matches)
}
