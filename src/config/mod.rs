pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_patches, check_patches, ApplicationError, PatchOutcome, PatchReport, RunOptions,
    TextChange, DEFAULT_BALANCE_MARGIN,
};
pub use loader::{discover_patch_files, load_from_path, load_from_str, ConfigError};
pub use schema::{Metadata, PatchConfig, PatchDefinition, ValidationError, ValidationIssue};
