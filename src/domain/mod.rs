//! Domain models - identifiers, labels and the check-in code
//!
//! This module contains the canonical data types used throughout the system:
//! - `code` - the check-in code codec (pure, stateless)
//! - `types` - identifiers, family members, labels and per-member results

pub mod code;
pub mod types;

// Re-export commonly used types at module level
pub use types::{
    CheckinRequest, CheckinResult, DecodedCode, FamilyMember, InstanceId, Label, LabelText,
    PersonId,
};
