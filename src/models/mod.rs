//! Data Models
//!
//! Contains all data structures used throughout the application.

pub mod analysis;
pub mod analysis_result;
pub mod response;
pub mod settings;
pub mod stream_event;

pub use analysis::*;
pub use analysis_result::*;
pub use response::*;
pub use settings::*;
pub use stream_event::*;
