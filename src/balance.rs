//! Structural sanity check after a mutation.
//!
//! A delimiter-balance heuristic, not a parser: it flags insertions at the
//! wrong nesting depth but never blocks a patch.

use crate::buffer::SourceBuffer;
use crate::patch::AffectedRange;
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Delimiter {
    Brace,
    Paren,
    Bracket,
    Tag,
}

impl Delimiter {
    pub const ALL: [Delimiter; 4] = [
        Delimiter::Brace,
        Delimiter::Paren,
        Delimiter::Bracket,
        Delimiter::Tag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Delimiter::Brace => "braces",
            Delimiter::Paren => "parentheses",
            Delimiter::Bracket => "brackets",
            Delimiter::Tag => "tags",
        }
    }
}

/// Net counts (opened minus closed) per delimiter kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub braces: i64,
    pub parens: i64,
    pub brackets: i64,
    pub tags: i64,
}

impl Tally {
    pub fn get(&self, delimiter: Delimiter) -> i64 {
        match delimiter {
            Delimiter::Brace => self.braces,
            Delimiter::Paren => self.parens,
            Delimiter::Bracket => self.brackets,
            Delimiter::Tag => self.tags,
        }
    }

    pub fn is_balanced(&self) -> bool {
        Delimiter::ALL.iter().all(|&d| self.get(d) == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWarning {
    pub delimiter: Delimiter,
    /// Net count in the original window
    pub before: i64,
    /// Net count in the patched window
    pub after: i64,
    /// 1-based inclusive line window in the patched buffer
    pub lines: (usize, usize),
}

impl fmt::Display for BalanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed balance near lines {}-{} (net {} before, {} after)",
            self.delimiter.name(),
            self.lines.0,
            self.lines.1,
            self.before,
            self.after
        )
    }
}

#[derive(Clone, Copy)]
enum TagState {
    Outside,
    /// Inside `<Name ...`, opened at this brace depth
    Opening(i64),
    /// Inside `</Name`, opened at this brace depth
    Closing(i64),
}

/// Count delimiters in `text`.
///
/// `<` opens a tag when followed by a letter or `>` and not preceded by an
/// identifier character, so `useState<any>` and `a < b` are skipped. Inside
/// a tag, `>` and `/>` only count at the tag's own brace depth, which keeps
/// `onClick={() => x}` from closing it early.
pub fn tally(text: &str) -> Tally {
    let bytes = text.as_bytes();
    let mut tally = Tally::default();
    let mut depth: i64 = 0;
    let mut state = TagState::Outside;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                tally.braces += 1;
                depth += 1;
            }
            b'}' => {
                tally.braces -= 1;
                depth -= 1;
            }
            b'(' => tally.parens += 1,
            b')' => tally.parens -= 1,
            b'[' => tally.brackets += 1,
            b']' => tally.brackets -= 1,
            b'<' if matches!(state, TagState::Outside) => {
                let after_ident = i > 0 && is_ident(bytes[i - 1]);
                match bytes.get(i + 1) {
                    Some(b'/') => {
                        tally.tags -= 1;
                        state = TagState::Closing(depth);
                        i += 2;
                        continue;
                    }
                    Some(b'>') => {
                        tally.tags += 1;
                        i += 2;
                        continue;
                    }
                    Some(c) if c.is_ascii_alphabetic() && !after_ident => {
                        tally.tags += 1;
                        state = TagState::Opening(depth);
                    }
                    _ => {}
                }
            }
            b'/' => {
                if let TagState::Opening(at) = state {
                    if at == depth && bytes.get(i + 1) == Some(&b'>') {
                        tally.tags -= 1;
                        state = TagState::Outside;
                        i += 2;
                        continue;
                    }
                }
            }
            b'>' => match state {
                TagState::Opening(at) | TagState::Closing(at) if at == depth => {
                    state = TagState::Outside;
                }
                _ => {}
            },
            _ => {}
        }
        i += 1;
    }

    tally
}

fn is_ident(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// Whole lines around `range`, widened by `margin` lines on each side.
///
/// The end side is anchored on the line containing `range.end`, so the same
/// unchanged suffix lines are covered in old and new coordinates.
fn window(buffer: &SourceBuffer, range: Range<usize>, margin: usize) -> Range<usize> {
    let last_line = buffer.line_count().saturating_sub(1);
    let first = buffer.line_of(range.start).saturating_sub(margin);
    let last = buffer
        .line_of(range.end)
        .saturating_add(margin)
        .min(last_line)
        .max(first);
    buffer.line_start(first)..buffer.line_end_inclusive(last)
}

/// Compare delimiter balance around the affected range before and after a
/// patch. Returns one warning per delimiter kind whose net count changed.
pub fn check_balance(
    before: &SourceBuffer,
    after: &SourceBuffer,
    affected: &AffectedRange,
    margin: usize,
) -> Vec<BalanceWarning> {
    let old_window = window(before, affected.old_range(), margin);
    let new_window = window(after, affected.new_range(), margin);

    let old_tally = tally(before.slice(old_window));
    let new_tally = tally(after.slice(new_window.clone()));

    let first_line = after.line_of(new_window.start) + 1;
    let last_line = after.line_of(new_window.end.saturating_sub(1).max(new_window.start)) + 1;

    let warnings: Vec<BalanceWarning> = Delimiter::ALL
        .iter()
        .filter_map(|&delimiter| {
            let (was, now) = (old_tally.get(delimiter), new_tally.get(delimiter));
            (was != now).then_some(BalanceWarning {
                delimiter,
                before: was,
                after: now,
                lines: (first_line, last_line),
            })
        })
        .collect();

    tracing::debug!(
        warnings = warnings.len(),
        first_line,
        last_line,
        "balance check"
    );
    warnings
}
