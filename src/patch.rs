//! Patch applier: turns a located anchor plus a mutation into a new buffer.
//!
//! Pipeline for one patch over one buffer:
//!
//! 1. locate every anchor candidate in scope
//! 2. idempotence guard (signature present, or repair marker absent)
//! 3. selection rule (unique / first / nth / all)
//! 4. compile the mutation into [`Edit`]s and apply them in one pass
//! 5. confirm that a second run would be detected as already applied
//!
//! Nothing here touches the filesystem; the caller decides whether to save.

use crate::anchor::{self, AnchorError, AnchorSpec, LineMatcher, Match, Selected};
use crate::buffer::SourceBuffer;
use crate::edit::{Edit, EditError};
use crate::guard::{Guard, Signature};
use serde::Deserialize;
use std::ops::Range;
use thiserror::Error;

/// A named, declarative transformation of one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    pub id: String,
    /// How a rerun recognises the patch. Required by [`apply`].
    pub guard: Option<Guard>,
    pub anchor: AnchorSpec,
    pub mutation: Mutation,
}

impl PatchSpec {
    pub fn new(id: impl Into<String>, anchor: AnchorSpec, mutation: Mutation) -> Self {
        Self {
            id: id.into(),
            guard: None,
            anchor,
            mutation,
        }
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.guard = Some(Guard::Present(signature));
        self
    }

    /// Guard a repair by a marker of the defect it removes.
    pub fn repaired_when_absent(mut self, marker: Signature) -> Self {
        self.guard = Some(Guard::Absent(marker));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Mutation {
    InsertAfter {
        text: String,
        #[serde(default)]
        at: AfterPoint,
        #[serde(default)]
        indent: Indent,
    },
    InsertBefore {
        text: String,
        #[serde(default)]
        at: BeforePoint,
        #[serde(default)]
        indent: Indent,
    },
    /// Replace whole lines from the anchor line through a terminator line
    /// found by a bounded forward scan.
    ReplaceSpan {
        text: String,
        terminator: Terminator,
        #[serde(default = "default_inclusive")]
        inclusive: bool,
        #[serde(default = "default_span_lookahead")]
        max_lookahead: usize,
        #[serde(default)]
        indent: Indent,
    },
    /// Replace exactly the matched text.
    ReplaceMatch {
        text: String,
        /// Expand `$1` / `${name}` from a regex anchor
        #[serde(default)]
        expand: bool,
    },
    /// Replace every selected match; reports the replacement count.
    ReplaceAll {
        text: String,
        #[serde(default)]
        expand: bool,
    },
    /// Remove the full lines covered by each selected match.
    DeleteLines,
}

fn default_inclusive() -> bool {
    true
}

fn default_span_lookahead() -> usize {
    100
}

impl Mutation {
    pub fn payload(&self) -> Option<&str> {
        match self {
            Mutation::InsertAfter { text, .. }
            | Mutation::InsertBefore { text, .. }
            | Mutation::ReplaceSpan { text, .. }
            | Mutation::ReplaceMatch { text, .. }
            | Mutation::ReplaceAll { text, .. } => Some(text),
            Mutation::DeleteLines => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::InsertAfter { .. } => "insert-after",
            Mutation::InsertBefore { .. } => "insert-before",
            Mutation::ReplaceSpan { .. } => "replace-span",
            Mutation::ReplaceMatch { .. } => "replace-match",
            Mutation::ReplaceAll { .. } => "replace-all",
            Mutation::DeleteLines => "delete-lines",
        }
    }

    /// Repairs may be guarded by a defect marker instead of a signature.
    pub fn is_repair(&self) -> bool {
        matches!(self, Mutation::ReplaceAll { .. } | Mutation::DeleteLines)
    }

    pub fn indent(&self) -> Option<&Indent> {
        match self {
            Mutation::InsertAfter { indent, .. }
            | Mutation::InsertBefore { indent, .. }
            | Mutation::ReplaceSpan { indent, .. } => Some(indent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AfterPoint {
    /// Directly after the last matched byte
    #[default]
    MatchEnd,
    /// After the newline of the match's last line
    LineEnd,
    /// After the newline of the k-th line of the match (1-based)
    AfterMatchLine(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeforePoint {
    #[default]
    MatchStart,
    LineStart,
}

/// How payload lines are indented.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Indent {
    /// Payload is inserted as written
    #[default]
    Verbatim,
    /// Every non-blank payload line is prefixed with the anchor line's indentation
    Anchor,
    /// Every non-blank payload line is prefixed with a named regex capture
    Capture(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Terminator {
    pub line: LineMatcher,
    /// Condition on the line directly above the terminator
    #[serde(default)]
    pub previous: Option<LineMatcher>,
}

impl Terminator {
    pub fn new(line: LineMatcher) -> Self {
        Self {
            line,
            previous: None,
        }
    }

    pub fn after(mut self, previous: LineMatcher) -> Self {
        self.previous = Some(previous);
        self
    }

    fn matches_at(&self, buffer: &SourceBuffer, line: usize) -> Result<bool, AnchorError> {
        if !self.line.matches(buffer.line_text(line))? {
            return Ok(false);
        }
        match &self.previous {
            Some(previous) if line > 0 => previous.matches(buffer.line_text(line - 1)),
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }
}

/// Byte range touched by an applied patch, in old and new coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffectedRange {
    pub start: usize,
    /// End of the replaced region in the original buffer
    pub old_end: usize,
    /// End of the replacement in the patched buffer
    pub new_end: usize,
}

impl AffectedRange {
    pub fn old_range(&self) -> Range<usize> {
        self.start..self.old_end
    }

    pub fn new_range(&self) -> Range<usize> {
        self.start..self.new_end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked; Applied carries the new buffer"]
pub enum PatchResult {
    AlreadyApplied,
    Applied {
        buffer: SourceBuffer,
        affected: AffectedRange,
        replacements: usize,
    },
    AnchorNotFound,
    AmbiguousMatch {
        count: usize,
    },
    /// The span start was found but no terminator within the lookahead window
    TerminatorNotFound {
        /// 1-based line of the span start
        start_line: usize,
        lookahead: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error(transparent)]
    Anchor(#[from] AnchorError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("patch '{id}' would not be detected as applied on a second run")]
    NotIdempotent { id: String },

    #[error("patch '{id}' has neither a signature nor a repair marker")]
    MissingGuard { id: String },

    #[error("indent capture '{name}' did not participate in the anchor match")]
    MissingCapture { name: String },

    #[error("insertion after match line {requested}, but the match spans {lines} line(s)")]
    MatchLineOutOfRange { requested: usize, lines: usize },
}

/// Apply `spec` to `buffer`.
///
/// Non-fatal outcomes (already applied, not found, ambiguous, no terminator)
/// are `Ok` variants; the input buffer is never modified.
pub fn apply(buffer: &SourceBuffer, spec: &PatchSpec) -> Result<PatchResult, PatchError> {
    let guard = spec.guard.as_ref().ok_or_else(|| PatchError::MissingGuard {
        id: spec.id.clone(),
    })?;

    if guard.is_satisfied(buffer)? {
        tracing::debug!(patch = %spec.id, "already applied");
        return Ok(PatchResult::AlreadyApplied);
    }

    let located = anchor::locate(buffer, &spec.anchor)?;

    let matches = match anchor::select(located, spec.anchor.select) {
        Selected::NotFound => {
            tracing::debug!(patch = %spec.id, "anchor not found");
            return Ok(PatchResult::AnchorNotFound);
        }
        Selected::Ambiguous(count) => {
            tracing::debug!(patch = %spec.id, count, "ambiguous anchor");
            return Ok(PatchResult::AmbiguousMatch { count });
        }
        Selected::Matches(matches) => matches,
    };

    let edits = match plan_edits(buffer, spec, &matches)? {
        Plan::Edits(edits) => edits,
        Plan::NoTerminator {
            start_line,
            lookahead,
        } => {
            tracing::debug!(patch = %spec.id, start_line, lookahead, "terminator not found");
            return Ok(PatchResult::TerminatorNotFound {
                start_line,
                lookahead,
            });
        }
    };

    let replacements = edits.len();
    let start = edits.iter().map(|e| e.byte_start).min().unwrap_or(0);
    let old_end = edits.iter().map(|e| e.byte_end).max().unwrap_or(start);
    let patched = Edit::apply_all(buffer, edits)?;
    let new_end = (old_end + patched.len()).saturating_sub(buffer.len());

    if !guard.is_satisfied(&patched)? {
        return Err(PatchError::NotIdempotent {
            id: spec.id.clone(),
        });
    }

    tracing::debug!(
        patch = %spec.id,
        kind = spec.mutation.kind(),
        replacements,
        start,
        old_end,
        new_end,
        "applied patch"
    );

    Ok(PatchResult::Applied {
        buffer: patched,
        affected: AffectedRange {
            start,
            old_end,
            new_end,
        },
        replacements,
    })
}

enum Plan {
    Edits(Vec<Edit>),
    NoTerminator { start_line: usize, lookahead: usize },
}

fn plan_edits(
    buffer: &SourceBuffer,
    spec: &PatchSpec,
    matches: &[Match],
) -> Result<Plan, PatchError> {
    let mut edits = Vec::with_capacity(matches.len());

    for found in matches {
        let edit = match &spec.mutation {
            Mutation::InsertAfter { text, at, indent } => {
                let payload = indent_payload(text, indent, found)?;
                match at {
                    AfterPoint::MatchEnd => Edit::insert(found.end, payload),
                    AfterPoint::LineEnd => insert_after_line(buffer, found.end_line, &payload),
                    AfterPoint::AfterMatchLine(k) => {
                        let lines = found.end_line - found.line + 1;
                        if *k == 0 || *k > lines {
                            return Err(PatchError::MatchLineOutOfRange {
                                requested: *k,
                                lines,
                            });
                        }
                        insert_after_line(buffer, found.line + k - 1, &payload)
                    }
                }
            }
            Mutation::InsertBefore { text, at, indent } => {
                let payload = indent_payload(text, indent, found)?;
                match at {
                    BeforePoint::MatchStart => Edit::insert(found.start, payload),
                    BeforePoint::LineStart => {
                        Edit::insert(buffer.line_start(found.line), with_newline(&payload))
                    }
                }
            }
            Mutation::ReplaceSpan {
                text,
                terminator,
                inclusive,
                max_lookahead,
                indent,
            } => {
                let Some(end_line) = find_terminator(buffer, found.line, terminator, *max_lookahead)?
                else {
                    return Ok(Plan::NoTerminator {
                        start_line: found.line_number(),
                        lookahead: *max_lookahead,
                    });
                };
                let span_start = buffer.line_start(found.line);
                let span_end = if *inclusive {
                    buffer.line_end_inclusive(end_line)
                } else {
                    buffer.line_start(end_line)
                };
                let payload = indent_payload(text, indent, found)?;
                let replacement = if span_end == buffer.len() && !buffer.ends_with_newline() {
                    payload.trim_end_matches('\n').to_string()
                } else {
                    with_newline(&payload)
                };
                Edit::new(
                    span_start,
                    span_end,
                    replacement,
                    buffer.slice(span_start..span_end),
                )
            }
            Mutation::ReplaceMatch { text, expand } | Mutation::ReplaceAll { text, expand } => {
                let replacement = if *expand {
                    anchor::expand(buffer, &spec.anchor, found, text)?
                } else {
                    text.clone()
                };
                Edit::new(found.start, found.end, replacement, &found.text)
            }
            Mutation::DeleteLines => {
                let mut span = buffer.line_span(found.line, found.end_line);
                // Last line without newline: take the preceding newline instead
                if span.end == buffer.len() && !buffer.ends_with_newline() && span.start > 0 {
                    span.start -= 1;
                }
                Edit::new(span.start, span.end, "", buffer.slice(span.clone()))
            }
        };
        edits.push(edit);
    }

    Ok(Plan::Edits(edits))
}

/// Scan at most `max_lookahead` lines after `start_line` for the terminator.
fn find_terminator(
    buffer: &SourceBuffer,
    start_line: usize,
    terminator: &Terminator,
    max_lookahead: usize,
) -> Result<Option<usize>, AnchorError> {
    let last = buffer.line_count().saturating_sub(1);
    let limit = start_line.saturating_add(max_lookahead).min(last);
    for line in (start_line + 1)..=limit {
        if terminator.matches_at(buffer, line)? {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

fn insert_after_line(buffer: &SourceBuffer, line: usize, payload: &str) -> Edit {
    let offset = buffer.line_end_inclusive(line);
    if offset == buffer.len() && !buffer.ends_with_newline() {
        // Final line has no newline: open a new line before the payload
        Edit::insert(offset, format!("\n{}", payload.trim_end_matches('\n')))
    } else {
        Edit::insert(offset, with_newline(payload))
    }
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

fn indent_payload(text: &str, indent: &Indent, found: &Match) -> Result<String, PatchError> {
    let prefix = match indent {
        Indent::Verbatim => return Ok(text.to_string()),
        Indent::Anchor => found.indent.as_str(),
        Indent::Capture(name) => found
            .named
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PatchError::MissingCapture { name: name.clone() })?,
    };
    Ok(reindent(text, prefix))
}

fn reindent(text: &str, prefix: &str) -> String {
    text.split_inclusive('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::Selection;

    fn insert_after(text: &str, at: AfterPoint, indent: Indent) -> Mutation {
        Mutation::InsertAfter {
            text: text.to_string(),
            at,
            indent,
        }
    }

    fn applied(result: PatchResult) -> (SourceBuffer, AffectedRange, usize) {
        match result {
            PatchResult::Applied {
                buffer,
                affected,
                replacements,
            } => (buffer, affected, replacements),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn test_modal_insertion_example() {
        let buffer = SourceBuffer::new("  </AnimatePresence>\n  </main>\n</div>");
        let spec = PatchSpec::new(
            "modal",
            AnchorSpec::literal("</AnimatePresence>\n  </main>\n</div>"),
            insert_after("  <Modal/>", AfterPoint::AfterMatchLine(2), Indent::Verbatim),
        )
        .with_signature(Signature::literal("<Modal/>"));

        let (patched, affected, replacements) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(
            patched.as_str(),
            "  </AnimatePresence>\n  </main>\n  <Modal/>\n</div>"
        );
        assert_eq!(replacements, 1);
        assert_eq!(affected.start, 31);
        assert_eq!(affected.old_end, 31);
        assert_eq!(patched.slice(affected.new_range()), "  <Modal/>\n");

        assert_eq!(apply(&patched, &spec).unwrap(), PatchResult::AlreadyApplied);
    }

    #[test]
    fn test_ambiguous_anchor_is_reported() {
        let buffer = SourceBuffer::new("</div>\n</div>\n");
        let spec = PatchSpec::new(
            "footer",
            AnchorSpec::literal("</div>"),
            insert_after("<Footer/>", AfterPoint::LineEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("<Footer/>"));

        assert_eq!(
            apply(&buffer, &spec).unwrap(),
            PatchResult::AmbiguousMatch { count: 2 }
        );
    }

    #[test]
    fn test_self_overlapping_anchor_is_ambiguous() {
        let buffer = SourceBuffer::new("    </div>\n    </div>\n    </div>\n");
        let spec = PatchSpec::new(
            "closing",
            AnchorSpec::literal("</div>\n    </div>"),
            insert_after("<X/>", AfterPoint::MatchEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("<X/>"));

        assert_eq!(
            apply(&buffer, &spec).unwrap(),
            PatchResult::AmbiguousMatch { count: 2 }
        );
    }

    #[test]
    fn test_first_selection_is_explicit_disambiguation() {
        let buffer = SourceBuffer::new("</div>\n</div>\n");
        let spec = PatchSpec::new(
            "footer",
            AnchorSpec::literal("</div>").select(Selection::First),
            insert_after("<Footer/>", AfterPoint::LineEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("<Footer/>"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(patched.as_str(), "</div>\n<Footer/>\n</div>\n");
    }

    #[test]
    fn test_anchor_not_found() {
        let buffer = SourceBuffer::new("<main></main>");
        let spec = PatchSpec::new(
            "modal",
            AnchorSpec::literal("</AnimatePresence>"),
            insert_after("<Modal/>", AfterPoint::MatchEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("<Modal/>"));
        assert_eq!(apply(&buffer, &spec).unwrap(), PatchResult::AnchorNotFound);
    }

    #[test]
    fn test_signature_wins_over_missing_anchor() {
        let buffer = SourceBuffer::new("<Modal/>");
        let spec = PatchSpec::new(
            "modal",
            AnchorSpec::literal("</AnimatePresence>"),
            insert_after("<Modal/>", AfterPoint::MatchEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("<Modal/>"));
        assert_eq!(apply(&buffer, &spec).unwrap(), PatchResult::AlreadyApplied);
    }

    #[test]
    fn test_insert_after_line_end_with_anchor_indent() {
        let buffer = SourceBuffer::new(
            "function App() {\n  const [newSymptom, setNewSymptom] = useState('')\n  return null\n}\n",
        );
        let spec = PatchSpec::new(
            "states",
            AnchorSpec::literal("const [newSymptom, setNewSymptom]"),
            insert_after(
                "const [categoriaFiltro, setCategoriaFiltro] = useState('todas')\n\nconst [regiao, setRegiao] = useState(0)\n",
                AfterPoint::LineEnd,
                Indent::Anchor,
            ),
        )
        .with_signature(Signature::literal("setCategoriaFiltro"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(
            patched.as_str(),
            "function App() {\n  const [newSymptom, setNewSymptom] = useState('')\n  const [categoriaFiltro, setCategoriaFiltro] = useState('todas')\n\n  const [regiao, setRegiao] = useState(0)\n  return null\n}\n"
        );
    }

    #[test]
    fn test_insert_with_capture_indent() {
        let buffer = SourceBuffer::new("\t\t<main>\n\t\t</main>\n");
        let spec = PatchSpec::new(
            "header",
            AnchorSpec::regex(r"(?m)^(?P<ws>[ \t]*)<main>"),
            insert_after("<Header/>", AfterPoint::LineEnd, Indent::Capture("ws".into())),
        )
        .with_signature(Signature::literal("<Header/>"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(patched.as_str(), "\t\t<main>\n\t\t<Header/>\n\t\t</main>\n");
    }

    #[test]
    fn test_missing_capture_is_an_error() {
        let buffer = SourceBuffer::new("<main>\n");
        let spec = PatchSpec::new(
            "header",
            AnchorSpec::regex(r"<main>"),
            insert_after("<Header/>", AfterPoint::LineEnd, Indent::Capture("ws".into())),
        )
        .with_signature(Signature::literal("<Header/>"));

        assert_eq!(
            apply(&buffer, &spec),
            Err(PatchError::MissingCapture { name: "ws".into() })
        );
    }

    #[test]
    fn test_insert_after_final_line_without_newline() {
        let buffer = SourceBuffer::new("a\nlast");
        let spec = PatchSpec::new(
            "tail",
            AnchorSpec::literal("last"),
            insert_after("tail\n", AfterPoint::LineEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("tail"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(patched.as_str(), "a\nlast\ntail");
    }

    #[test]
    fn test_after_match_line_out_of_range() {
        let buffer = SourceBuffer::new("one\ntwo\n");
        let spec = PatchSpec::new(
            "x",
            AnchorSpec::literal("one"),
            insert_after("X", AfterPoint::AfterMatchLine(2), Indent::Verbatim),
        )
        .with_signature(Signature::literal("X"));

        assert_eq!(
            apply(&buffer, &spec),
            Err(PatchError::MatchLineOutOfRange {
                requested: 2,
                lines: 1
            })
        );
    }

    #[test]
    fn test_insert_before_line_start() {
        let buffer = SourceBuffer::new("import a from 'a'\nexport default App\n");
        let spec = PatchSpec::new(
            "banner",
            AnchorSpec::literal("default App"),
            Mutation::InsertBefore {
                text: "// patched".into(),
                at: BeforePoint::LineStart,
                indent: Indent::Verbatim,
            },
        )
        .with_signature(Signature::literal("// patched"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(
            patched.as_str(),
            "import a from 'a'\n// patched\nexport default App\n"
        );
    }

    const GRID: &str = "\
<section>
  <div className=\"grid\">
    {[1, 2].map((n) => (
      <motion.div key={n}>
        {n}
      </motion.div>
    ))}
  </div>
</section>
";

    fn grid_spec(inclusive: bool, max_lookahead: usize) -> PatchSpec {
        PatchSpec::new(
            "grid",
            AnchorSpec::literal("<div className=\"grid\">"),
            Mutation::ReplaceSpan {
                text: "<div className=\"grid\">\n  {items.map(renderItem)}\n</div>".into(),
                terminator: Terminator::new(LineMatcher::trimmed_eq("</div>"))
                    .after(LineMatcher::trimmed_eq("))}")),
                inclusive,
                max_lookahead,
                indent: Indent::Anchor,
            },
        )
        .with_signature(Signature::literal("items.map(renderItem)"))
    }

    #[test]
    fn test_replace_span_inclusive() {
        let buffer = SourceBuffer::new(GRID);
        let (patched, affected, _) = applied(apply(&buffer, &grid_spec(true, 100)).unwrap());
        assert_eq!(
            patched.as_str(),
            "<section>\n  <div className=\"grid\">\n    {items.map(renderItem)}\n  </div>\n</section>\n"
        );
        // Locality: bytes outside the affected range are untouched
        assert_eq!(&buffer.as_str()[..affected.start], &patched.as_str()[..affected.start]);
        assert_eq!(
            &buffer.as_str()[affected.old_end..],
            &patched.as_str()[affected.new_end..]
        );
    }

    #[test]
    fn test_replace_span_exclusive_keeps_terminator() {
        let buffer = SourceBuffer::new(GRID);
        let mut spec = grid_spec(false, 100);
        if let Mutation::ReplaceSpan { text, .. } = &mut spec.mutation {
            *text = "<div className=\"grid\">\n  {items.map(renderItem)}".into();
        }
        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(
            patched.as_str(),
            "<section>\n  <div className=\"grid\">\n    {items.map(renderItem)}\n  </div>\n</section>\n"
        );
    }

    #[test]
    fn test_replace_span_bounded_lookahead() {
        let buffer = SourceBuffer::new(GRID);
        // The terminator is 6 lines below the start line
        assert_eq!(
            apply(&buffer, &grid_spec(true, 5)).unwrap(),
            PatchResult::TerminatorNotFound {
                start_line: 2,
                lookahead: 5
            }
        );
        assert!(matches!(
            apply(&buffer, &grid_spec(true, 6)).unwrap(),
            PatchResult::Applied { .. }
        ));
    }

    #[test]
    fn test_replace_match_with_capture_expansion() {
        let buffer = SourceBuffer::new("import { fetchFromAPI } from './lib/api'\n");
        let spec = PatchSpec::new(
            "imports",
            AnchorSpec::regex(r"import \{ (?P<names>[^}]+) \} from './lib/api'"),
            Mutation::ReplaceMatch {
                text: "import { ${names}, analyzeSymptoms } from './lib/api'".into(),
                expand: true,
            },
        )
        .with_signature(Signature::literal("analyzeSymptoms"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(
            patched.as_str(),
            "import { fetchFromAPI, analyzeSymptoms } from './lib/api'\n"
        );
    }

    #[test]
    fn test_replace_match_without_expand_keeps_dollar_text() {
        let buffer = SourceBuffer::new("<p className=\"a\">");
        let spec = PatchSpec::new(
            "theme",
            AnchorSpec::regex(r#"className="a""#),
            Mutation::ReplaceMatch {
                text: "className={`${darkMode ? 'a' : 'b'}`}".into(),
                expand: false,
            },
        )
        .with_signature(Signature::literal("darkMode ?"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(patched.as_str(), "<p className={`${darkMode ? 'a' : 'b'}`}>");
    }

    #[test]
    fn test_replace_all_repair_counts_and_is_idempotent() {
        let buffer = SourceBuffer::new(
            "<div className=`a ${x}`>\n<p className={`ok`}>\n<span className=`b`>\n",
        );
        let spec = PatchSpec::new(
            "classname",
            AnchorSpec::regex(r"className=`([^`]*)`>").select(Selection::All),
            Mutation::ReplaceAll {
                text: "className={`${1}`}>".into(),
                expand: true,
            },
        )
        .repaired_when_absent(Signature::literal("className=`"));

        let (patched, _, replacements) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(replacements, 2);
        assert_eq!(
            patched.as_str(),
            "<div className={`a ${x}`}>\n<p className={`ok`}>\n<span className={`b`}>\n"
        );
        assert_eq!(apply(&patched, &spec).unwrap(), PatchResult::AlreadyApplied);
    }

    #[test]
    fn test_delete_duplicate_closing_line() {
        let buffer = SourceBuffer::new("      </main>\n    </div>\n    </div>\n  )\n}\n");
        let spec = PatchSpec::new(
            "dedupe",
            AnchorSpec::line_pair(
                LineMatcher::trimmed_eq("</div>"),
                LineMatcher::trimmed_eq("</div>"),
                1,
            )
            .after("</main>"),
            Mutation::DeleteLines,
        )
        .repaired_when_absent(Signature::regex(r"</main>\n\s*</div>\n\s*</div>"));

        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(patched.as_str(), "      </main>\n    </div>\n  )\n}\n");
        assert_eq!(apply(&patched, &spec).unwrap(), PatchResult::AlreadyApplied);
    }

    #[test]
    fn test_repair_with_missing_scope_is_not_found() {
        // The defect is still there but the scope marker has drifted
        let buffer = SourceBuffer::new("      </section>\n    </div>\n    </div>\n");
        let spec = PatchSpec::new(
            "dedupe",
            AnchorSpec::line_pair(
                LineMatcher::trimmed_eq("</div>"),
                LineMatcher::trimmed_eq("</div>"),
                1,
            )
            .after("</main>"),
            Mutation::DeleteLines,
        )
        .repaired_when_absent(Signature::regex(r"</div>\n\s*</div>"));

        assert_eq!(apply(&buffer, &spec).unwrap(), PatchResult::AnchorNotFound);
    }

    #[test]
    fn test_repair_leaving_marker_is_not_idempotent() {
        // Only the scoped occurrence is repaired; the marker survives outside it
        let buffer = SourceBuffer::new("<a className=`x`>\n<main>\n<b className=`y`>\n");
        let spec = PatchSpec::new(
            "classname",
            AnchorSpec::regex(r"className=`([^`]*)`>")
                .select(Selection::All)
                .after("<main>"),
            Mutation::ReplaceAll {
                text: "className={`${1}`}>".into(),
                expand: true,
            },
        )
        .repaired_when_absent(Signature::literal("className=`"));

        assert_eq!(
            apply(&buffer, &spec),
            Err(PatchError::NotIdempotent {
                id: "classname".into()
            })
        );
    }

    #[test]
    fn test_unguarded_patch_is_an_error() {
        let buffer = SourceBuffer::new("drop\n");
        let spec = PatchSpec::new(
            "drop",
            AnchorSpec::line(LineMatcher::trimmed_eq("drop")),
            Mutation::DeleteLines,
        );
        assert_eq!(
            apply(&buffer, &spec),
            Err(PatchError::MissingGuard { id: "drop".into() })
        );
    }

    #[test]
    fn test_delete_last_line_without_newline() {
        let buffer = SourceBuffer::new("keep\ndrop");
        let spec = PatchSpec::new(
            "drop",
            AnchorSpec::line(LineMatcher::trimmed_eq("drop")),
            Mutation::DeleteLines,
        )
        .repaired_when_absent(Signature::literal("drop"));
        let (patched, _, _) = applied(apply(&buffer, &spec).unwrap());
        assert_eq!(patched.as_str(), "keep");
    }

    #[test]
    fn test_non_idempotent_patch_is_rejected() {
        let buffer = SourceBuffer::new("<main></main>");
        // Signature never appears in the payload
        let spec = PatchSpec::new(
            "broken",
            AnchorSpec::literal("<main>"),
            insert_after("<Modal/>", AfterPoint::MatchEnd, Indent::Verbatim),
        )
        .with_signature(Signature::literal("<Dialog/>"));

        assert_eq!(
            apply(&buffer, &spec),
            Err(PatchError::NotIdempotent { id: "broken".into() })
        );
    }

    #[test]
    fn test_deserialize_mutations() {
        #[derive(Deserialize)]
        struct Wrapper {
            operation: Mutation,
        }

        let parsed: Wrapper = toml_edit::de::from_str(
            r#"
[operation]
type = "insert-after"
text = "<Modal/>"
at = { after-match-line = 2 }
indent = "anchor"
"#,
        )
        .unwrap();
        assert_eq!(
            parsed.operation,
            insert_after("<Modal/>", AfterPoint::AfterMatchLine(2), Indent::Anchor)
        );

        let parsed: Wrapper = toml_edit::de::from_str(
            r#"
[operation]
type = "replace-span"
text = "x"
terminator = { line = { trimmed_eq = "</div>" }, previous = { contains = "))}" } }
inclusive = false
indent = { capture = "ws" }
"#,
        )
        .unwrap();
        match parsed.operation {
            Mutation::ReplaceSpan {
                terminator,
                inclusive,
                max_lookahead,
                indent,
                ..
            } => {
                assert_eq!(terminator.line, LineMatcher::trimmed_eq("</div>"));
                assert_eq!(terminator.previous, Some(LineMatcher::contains("))}")));
                assert!(!inclusive);
                assert_eq!(max_lookahead, 100);
                assert_eq!(indent, Indent::Capture("ws".into()));
            }
            other => panic!("unexpected mutation: {other:?}"),
        }

        let parsed: Wrapper =
            toml_edit::de::from_str("[operation]\ntype = \"delete-lines\"\n").unwrap();
        assert_eq!(parsed.operation, Mutation::DeleteLines);
    }
}
