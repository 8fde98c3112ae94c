pub mod format_conversion;
pub mod position;
