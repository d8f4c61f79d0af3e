//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `checkin` - Batch check-in orchestrator (family code, fan-out, printing)
//! - `session` - Kiosk selection state and submission

pub mod checkin;
pub mod session;

// Re-export commonly used types
pub use checkin::{
    AttendanceService, BatchCheckin, BatchError, BatchOutcome, BatchRequest, LabelPrinter,
    PrintError, ServiceError,
};
pub use session::KioskSession;
