//! Anchor Patcher: idempotent, anchor-based patching of large UI source files
//!
//! Patches are declarative: an anchor (literal, regex, or line predicate), an
//! idempotence signature, and a mutation (insert, replace span, replace
//! match, delete lines). No syntax tree is built; the target file is opaque
//! apart from the anchors a patch names.
//!
//! # Architecture
//!
//! Every mutation compiles down to [`Edit`], a verified byte-span
//! replacement over a [`SourceBuffer`]. Intelligence lives in span
//! acquisition (the [`anchor`] locator), not in application.
//!
//! Per patch: load, locate, guard, apply, balance check, save.
//!
//! # Safety
//!
//! - Already-applied patches are detected and never re-applied
//! - Ambiguous anchors are reported, never resolved by guessing
//! - Forward scans are bounded by an explicit lookahead
//! - Edits verify their expected before-text
//! - Atomic file writes (tempfile + fsync + rename)
//! - Workspace boundary enforcement
//!
//! # Example
//!
//! ```
//! use anchor_patcher::{apply, AfterPoint, AnchorSpec, Indent, Mutation, PatchResult, PatchSpec, Signature, SourceBuffer};
//!
//! let buffer = SourceBuffer::new("  </AnimatePresence>\n  </main>\n</div>");
//! let spec = PatchSpec::new(
//!     "modal",
//!     AnchorSpec::literal("</AnimatePresence>\n  </main>\n</div>"),
//!     Mutation::InsertAfter {
//!         text: "  <Modal/>".into(),
//!         at: AfterPoint::AfterMatchLine(2),
//!         indent: Indent::Verbatim,
//!     },
//! )
//! .with_signature(Signature::literal("<Modal/>"));
//!
//! match apply(&buffer, &spec).unwrap() {
//!     PatchResult::Applied { buffer, .. } => {
//!         assert_eq!(buffer.as_str(), "  </AnimatePresence>\n  </main>\n  <Modal/>\n</div>");
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

pub mod anchor;
pub mod balance;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod edit;
pub mod guard;
pub mod logging;
pub mod patch;
pub mod safety;

// Re-exports
pub use anchor::{locate, AnchorError, AnchorSpec, LineMatcher, Match, MatchResult, Selection};
pub use balance::{check_balance, BalanceWarning, Delimiter};
pub use buffer::{load, save, BufferError, SourceBuffer};
pub use config::{
    apply_patches, check_patches, load_from_path, load_from_str, ApplicationError, ConfigError,
    PatchConfig, PatchOutcome, PatchReport, RunOptions,
};
pub use edit::{Edit, EditError, EditVerification};
pub use guard::{already_applied, Guard, Signature};
pub use patch::{
    apply, AffectedRange, AfterPoint, BeforePoint, Indent, Mutation, PatchError, PatchResult,
    PatchSpec, Terminator,
};
pub use safety::{SafetyError, WorkspaceGuard};
