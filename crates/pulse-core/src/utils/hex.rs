//! JSON-RPC hex quantity parsing.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("missing 0x prefix: {0}")]
    MissingPrefix(String),
    #[error("invalid hex quantity: {0}")]
    InvalidHex(String),
}

/// Parses an Ethereum JSON-RPC quantity (`"0x1b4"`) into a `u64`.
///
/// # Errors
///
/// Returns [`HexError`] if the prefix is missing, the digits are empty or not hexadecimal,
/// or the value overflows `u64`.
pub fn parse_quantity(value: &str) -> Result<u64, HexError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| HexError::MissingPrefix(value.to_string()))?;

    if digits.is_empty() {
        return Err(HexError::InvalidHex(value.to_string()));
    }

    u64::from_str_radix(digits, 16).map_err(|_| HexError::InvalidHex(value.to_string()))
}
