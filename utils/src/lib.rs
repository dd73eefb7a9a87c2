//! Leverage common functionality across the simulation crates.

/// Converts bytes to a hexadecimal string.
pub fn hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Compute the minimum number of signers `q` such that `q > floor(2n / 3)`.
///
/// For `n = 3f + 1` this is the canonical `2f + 1`. Unlike a strict `3f + 1`
/// sizing, the bound is defined for every committee size (including those that
/// cannot tolerate any fault).
pub fn quorum(n: u32) -> u32 {
    (2 * n) / 3 + 1
}

/// Returns true if `signers` is strictly more than two-thirds of a committee of size `n`.
pub fn is_quorum(signers: usize, n: usize) -> bool {
    signers > (2 * n) / 3
}
