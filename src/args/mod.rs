//! Command-line argument parsing and handling.

pub mod apply;
pub mod definition;
pub mod utils;

pub use definition::Args;
pub use utils::determine_log_level;
