use crate::anchor::{AnchorSpec, Selection};
use crate::guard::{Guard, Signature};
use crate::patch::{AfterPoint, Indent, Mutation, PatchSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    id: patch.id.clone(),
                });
            }

            patch.validate_into(&self.meta, &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default target file for patches without their own `file`
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub workspace_relative: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signature_regex: Option<String>,
    /// Marker of the defect a repair removes; the repair is applied once it
    /// no longer occurs anywhere in the file
    #[serde(default)]
    pub repaired_when_absent: Option<String>,
    #[serde(default)]
    pub repaired_when_absent_regex: Option<String>,
    pub anchor: AnchorSpec,
    pub operation: Mutation,
}

impl PatchDefinition {
    pub fn signature(&self) -> Option<Signature> {
        match (&self.signature, &self.signature_regex) {
            (Some(text), _) => Some(Signature::literal(text.clone())),
            (None, Some(pattern)) => Some(Signature::regex(pattern.clone())),
            (None, None) => None,
        }
    }

    pub fn repair_marker(&self) -> Option<Signature> {
        match (&self.repaired_when_absent, &self.repaired_when_absent_regex) {
            (Some(text), _) => Some(Signature::literal(text.clone())),
            (None, Some(pattern)) => Some(Signature::regex(pattern.clone())),
            (None, None) => None,
        }
    }

    pub fn guard(&self) -> Option<Guard> {
        self.signature()
            .map(Guard::Present)
            .or_else(|| self.repair_marker().map(Guard::Absent))
    }

    /// The file this patch targets: its own `file`, else `meta.target`.
    pub fn target<'a>(&'a self, meta: &'a Metadata) -> Option<&'a str> {
        self.file
            .as_deref()
            .or(meta.target.as_deref())
            .filter(|target| !target.trim().is_empty())
    }

    pub fn to_spec(&self) -> PatchSpec {
        PatchSpec {
            id: self.id.clone(),
            guard: self.guard(),
            anchor: self.anchor.clone(),
            mutation: self.operation.clone(),
        }
    }

    fn validate_into(&self, meta: &Metadata, issues: &mut Vec<ValidationIssue>) {
        let patch_id = Some(self.id.clone());
        let combo = |message: &str| ValidationIssue::InvalidCombo {
            patch_id: patch_id.clone(),
            message: message.to_string(),
        };

        if self.target(meta).is_none() {
            issues.push(ValidationIssue::MissingField {
                patch_id: patch_id.clone(),
                field: "file",
            });
        }

        if let Err(error) = self.anchor.validate() {
            issues.push(ValidationIssue::InvalidPattern {
                patch_id: patch_id.clone(),
                field: "anchor",
                message: error.to_string(),
            });
        }

        if self.signature.is_some() && self.signature_regex.is_some() {
            issues.push(combo("signature and signature_regex are mutually exclusive"));
        }
        if self.repaired_when_absent.is_some() && self.repaired_when_absent_regex.is_some() {
            issues.push(combo(
                "repaired_when_absent and repaired_when_absent_regex are mutually exclusive",
            ));
        }
        let signature = self.signature();
        let marker = self.repair_marker();
        for (field, guard) in [("signature", &signature), ("repaired_when_absent", &marker)] {
            if let Some(Err(error)) = guard.as_ref().map(Signature::validate) {
                issues.push(ValidationIssue::InvalidPattern {
                    patch_id: patch_id.clone(),
                    field,
                    message: error.to_string(),
                });
            }
        }
        match (&signature, &marker) {
            (Some(_), Some(_)) => {
                issues.push(combo("signature and repaired_when_absent are mutually exclusive"));
            }
            (None, Some(_)) if !self.operation.is_repair() => {
                issues.push(combo(
                    "repaired_when_absent is only valid for replace-all and delete-lines",
                ));
            }
            (None, None) => {
                issues.push(ValidationIssue::MissingField {
                    patch_id: patch_id.clone(),
                    field: if self.operation.is_repair() {
                        "repaired_when_absent"
                    } else {
                        "signature"
                    },
                });
            }
            _ => {}
        }

        if let (Some(Signature::Literal(needle)), Some(payload)) =
            (&marker, self.operation.payload())
        {
            if !needle.is_empty() && payload.contains(needle.as_str()) {
                issues.push(combo(
                    "repaired_when_absent appears in the payload, so the repair would never look applied",
                ));
            }
        }

        if let Some(Signature::Literal(needle)) = &signature {
            if !needle.is_empty() {
                if self
                    .anchor
                    .literal_text()
                    .is_some_and(|anchor| anchor.contains(needle.as_str()))
                {
                    issues.push(combo(
                        "signature is part of the anchor text, so the patch would always look applied",
                    ));
                }
                if let Some(payload) = self.checkable_payload() {
                    if !payload.contains(needle.as_str()) {
                        issues.push(combo(
                            "signature does not appear in the payload, so a second run would not be detected",
                        ));
                    }
                }
            }
        }

        match &self.operation {
            Mutation::InsertAfter { text, at, .. } => {
                if text.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: patch_id.clone(),
                        field: "operation.text",
                    });
                }
                if *at == AfterPoint::AfterMatchLine(0) {
                    issues.push(combo("after-match-line is 1-based"));
                }
            }
            Mutation::InsertBefore { text, .. } | Mutation::ReplaceMatch { text, .. } => {
                if text.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: patch_id.clone(),
                        field: "operation.text",
                    });
                }
            }
            Mutation::ReplaceSpan {
                text,
                terminator,
                max_lookahead,
                ..
            } => {
                if text.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: patch_id.clone(),
                        field: "operation.text",
                    });
                }
                for matcher in std::iter::once(&terminator.line).chain(terminator.previous.as_ref())
                {
                    if let Err(error) = matcher.validate() {
                        issues.push(ValidationIssue::InvalidPattern {
                            patch_id: patch_id.clone(),
                            field: "operation.terminator",
                            message: error.to_string(),
                        });
                    }
                }
                if *max_lookahead == 0 {
                    issues.push(combo("replace-span max_lookahead must be at least 1"));
                }
            }
            Mutation::ReplaceAll { .. } => {}
            Mutation::DeleteLines => {
                if signature.is_some() {
                    issues.push(combo(
                        "delete-lines is guarded by repaired_when_absent and takes no signature",
                    ));
                }
            }
        }

        if self.anchor.select == Selection::All && !self.operation.is_repair() {
            issues.push(combo(
                "select = \"all\" is only valid for replace-all and delete-lines",
            ));
        }

        let expands = matches!(
            self.operation,
            Mutation::ReplaceMatch { expand: true, .. } | Mutation::ReplaceAll { expand: true, .. }
        );
        if expands && !self.anchor.is_regex() {
            issues.push(combo("expand requires a regex anchor"));
        }
        if matches!(self.operation.indent(), Some(Indent::Capture(_))) && !self.anchor.is_regex() {
            issues.push(combo("indent capture requires a regex anchor"));
        }
    }

    /// Payload text the signature must appear in verbatim, when that can be
    /// decided without a buffer.
    fn checkable_payload(&self) -> Option<&str> {
        match &self.operation {
            Mutation::ReplaceMatch { expand: true, .. } | Mutation::ReplaceAll { .. } => None,
            Mutation::DeleteLines => None,
            other => other.payload(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        id: String,
    },
    InvalidPattern {
        patch_id: Option<String>,
        field: &'static str,
        message: String,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { id } => write!(f, "duplicate patch id '{id}'"),
            ValidationIssue::InvalidPattern {
                patch_id,
                field,
                message,
            } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid {field}: {message}"),
                None => write!(f, "invalid {field}: {message}"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
