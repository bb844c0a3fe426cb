//! Constant-time comparison helpers.

use subtle::ConstantTimeEq;

/// Compares two byte strings without short-circuiting on content.
///
/// Length is not secret: inputs of different length return `false`
/// immediately.
pub fn fixed_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// [`fixed_time_eq`] over the bytes of two strings.
pub fn fixed_time_eq_str(a: &str, b: &str) -> bool {
    fixed_time_eq(a.as_bytes(), b.as_bytes())
}
