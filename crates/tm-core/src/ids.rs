//! Device and channel naming.

/// Logical device name, e.g. `LakeshoreModel224`.
pub type DeviceName = String;

/// Channel identifier as understood by the instrument, e.g. `C1` or `4pump`.
pub type ChannelId = String;

/// Names must be non-empty and free of whitespace so they survive
/// instrument command templates and JSONL records unchanged.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}
