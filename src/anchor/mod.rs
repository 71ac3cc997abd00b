//! Anchor location over a [`SourceBuffer`](crate::buffer::SourceBuffer).
//!
//! Anchors are literal substrings, regular expressions, or line predicates.
//! The locator returns every candidate inside the declared scope; the
//! selection rule then decides whether the candidates satisfy the patch
//! (exactly one, first, nth, or all).

pub mod errors;
pub mod locator;
pub mod spec;

pub use errors::AnchorError;
pub use locator::{expand, locate, select, Match, MatchResult, Selected};
pub use spec::{AnchorSpec, LineMatcher, PairTake, Pattern, Scope, Selection};
