//! Patch applicator: runs a patch set against a workspace.
//!
//! Each patch is an independent Load -> Locate -> Guard -> Apply -> Check ->
//! Save run over the latest state of its target file. Non-fatal outcomes are
//! collected into [`PatchReport`]s; a missing target, a path outside the
//! workspace, or an unwritable destination aborts the whole run.

use crate::balance::{check_balance, BalanceWarning};
use crate::buffer::{self, BufferError, SourceBuffer};
use crate::config::schema::{PatchConfig, PatchDefinition};
use crate::patch::{self, PatchResult};
use crate::safety::{SafetyError, WorkspaceGuard};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lines of context on each side of the affected range for the balance check.
pub const DEFAULT_BALANCE_MARGIN: usize = 3;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Evaluate patches against in-memory copies; nothing is written
    pub dry_run: bool,
    /// Keep full before/after text of applied patches (for diffs)
    pub capture_text: bool,
    /// Patch this file instead of each patch's configured target
    pub target_override: Option<PathBuf>,
    pub balance_margin: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            capture_text: false,
            target_override: None,
            balance_margin: DEFAULT_BALANCE_MARGIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub before: String,
    pub after: String,
}

/// Outcome of one patch in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutcome should be checked for success/failure"]
pub enum PatchOutcome {
    Applied {
        replacements: usize,
        /// 1-based line range of the new content
        lines: (usize, usize),
        warnings: Vec<BalanceWarning>,
        change: Option<TextChange>,
    },
    AlreadyApplied,
    AnchorNotFound,
    AmbiguousMatch {
        count: usize,
    },
    TerminatorNotFound {
        line: usize,
        lookahead: usize,
    },
    Failed {
        reason: String,
    },
}

impl PatchOutcome {
    /// Applied and already-applied both count as success.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PatchOutcome::Applied { .. } | PatchOutcome::AlreadyApplied
        )
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOutcome::Applied {
                replacements,
                lines,
                ..
            } => {
                let noun = if *replacements == 1 {
                    "replacement"
                } else {
                    "replacements"
                };
                write!(
                    f,
                    "applied ({replacements} {noun}, lines {}-{})",
                    lines.0, lines.1
                )
            }
            PatchOutcome::AlreadyApplied => write!(f, "already applied"),
            PatchOutcome::AnchorNotFound => write!(f, "anchor not found"),
            PatchOutcome::AmbiguousMatch { count } => {
                write!(f, "ambiguous anchor ({count} matches, expected 1)")
            }
            PatchOutcome::TerminatorNotFound { line, lookahead } => write!(
                f,
                "terminator not found within {lookahead} lines after line {line}"
            ),
            PatchOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub id: String,
    pub file: PathBuf,
    pub outcome: PatchOutcome,
}

/// Fatal errors: the run stops at the first one.
#[derive(Debug)]
pub enum ApplicationError {
    /// Target file does not exist
    FileNotFound { path: PathBuf },
    /// Patch has neither `file` nor `meta.target`
    MissingTarget { patch_id: String },
    Safety(SafetyError),
    Load(BufferError),
    Write(BufferError),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::FileNotFound { path } => {
                write!(f, "target file not found: {}", path.display())
            }
            ApplicationError::MissingTarget { patch_id } => {
                write!(f, "patch '{patch_id}' has no target file")
            }
            ApplicationError::Safety(e) => write!(f, "workspace safety check failed: {e}"),
            ApplicationError::Load(e) => write!(f, "failed to load target: {e}"),
            ApplicationError::Write(e) => write!(f, "failed to write target: {e}"),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Safety(e) => Some(e),
            ApplicationError::Load(e) | ApplicationError::Write(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SafetyError> for ApplicationError {
    fn from(e: SafetyError) -> Self {
        ApplicationError::Safety(e)
    }
}

fn load_error(error: BufferError) -> ApplicationError {
    match error {
        BufferError::FileNotFound(path) => ApplicationError::FileNotFound { path },
        other => ApplicationError::Load(other),
    }
}

/// Resolve the file a patch targets, before safety checks.
fn target_path(
    config: &PatchConfig,
    patch: &PatchDefinition,
    workspace_root: &Path,
    options: &RunOptions,
) -> Result<PathBuf, ApplicationError> {
    let raw = match &options.target_override {
        Some(path) => path.clone(),
        None => patch
            .target(&config.meta)
            .map(PathBuf::from)
            .ok_or_else(|| ApplicationError::MissingTarget {
                patch_id: patch.id.clone(),
            })?,
    };

    if raw.is_relative() && config.meta.workspace_relative {
        Ok(workspace_root.join(raw))
    } else {
        Ok(raw)
    }
}

/// Apply every patch in `config`, in order.
///
/// On a real run each patch reloads its target, so later patches see the
/// effects of earlier ones. On a dry run the same sequencing happens against
/// in-memory copies.
pub fn apply_patches(
    config: &PatchConfig,
    workspace_root: &Path,
    options: &RunOptions,
) -> Result<Vec<PatchReport>, ApplicationError> {
    let guard = WorkspaceGuard::new(workspace_root)?;
    let mut overlay: HashMap<PathBuf, SourceBuffer> = HashMap::new();
    let mut reports = Vec::with_capacity(config.patches.len());

    for definition in &config.patches {
        let path = target_path(config, definition, guard.workspace_root(), options)?;
        if !path.exists() {
            return Err(ApplicationError::FileNotFound { path });
        }
        let path = guard.validate_path(&path)?;

        let current = match overlay.get(&path) {
            Some(buffer) => buffer.clone(),
            None => buffer::load(&path).map_err(load_error)?,
        };

        let outcome = match patch::apply(&current, &definition.to_spec()) {
            Ok(PatchResult::Applied {
                buffer: patched,
                affected,
                replacements,
            }) => {
                let warnings =
                    check_balance(&current, &patched, &affected, options.balance_margin);
                for warning in &warnings {
                    tracing::info!(patch = %definition.id, %warning, "balance warning");
                }

                let first = current.line_of(affected.start) + 1;
                let last = patched.line_of(affected.new_end.saturating_sub(1).max(affected.start)) + 1;

                if !options.dry_run {
                    let path = guard.revalidate(&path)?;
                    buffer::save(&path, &patched).map_err(ApplicationError::Write)?;
                }

                let change = options.capture_text.then(|| TextChange {
                    before: current.as_str().to_string(),
                    after: patched.as_str().to_string(),
                });
                if options.dry_run {
                    overlay.insert(path.clone(), patched);
                }

                PatchOutcome::Applied {
                    replacements,
                    lines: (first, last.max(first)),
                    warnings,
                    change,
                }
            }
            Ok(PatchResult::AlreadyApplied) => PatchOutcome::AlreadyApplied,
            Ok(PatchResult::AnchorNotFound) => PatchOutcome::AnchorNotFound,
            Ok(PatchResult::AmbiguousMatch { count }) => PatchOutcome::AmbiguousMatch { count },
            Ok(PatchResult::TerminatorNotFound {
                start_line,
                lookahead,
            }) => PatchOutcome::TerminatorNotFound {
                line: start_line,
                lookahead,
            },
            Err(error) => PatchOutcome::Failed {
                reason: error.to_string(),
            },
        };

        tracing::info!(
            patch = %definition.id,
            file = %path.display(),
            %outcome,
            "patch processed"
        );

        reports.push(PatchReport {
            id: definition.id.clone(),
            file: path,
            outcome,
        });
    }

    Ok(reports)
}

/// Evaluate patch status without touching the workspace.
///
/// `Applied` means "would apply".
pub fn check_patches(
    config: &PatchConfig,
    workspace_root: &Path,
) -> Result<Vec<PatchReport>, ApplicationError> {
    apply_patches(
        config,
        workspace_root,
        &RunOptions {
            dry_run: true,
            ..RunOptions::default()
        },
    )
}
