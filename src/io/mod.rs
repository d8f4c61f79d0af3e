//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `breeze` - HTTP client for the Breeze ChMS attendance API
//! - `printer` - Label printing through the CUPS `lp` spooler
//! - `http_api` - JSON API served to the kiosk front end
//! - `prometheus` - Prometheus text exposition of kiosk metrics

pub mod breeze;
pub mod http_api;
pub mod printer;
pub mod prometheus;

// Re-export commonly used types
pub use breeze::BreezeClient;
pub use http_api::start_api_server;
pub use printer::Printer;
