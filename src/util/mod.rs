//! Utility functions.

pub mod format;
pub mod text;

pub use format::{format_cost, format_reset_countdown, format_tokens};
pub use text::{normalize_query, truncate_for_display};
