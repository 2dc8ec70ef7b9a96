//! Byte-size constructors and formatting for device memory sizes.

/// `n` KiB in bytes.
#[inline]
pub const fn kb(n: u64) -> u64 {
    n << 10
}

/// `n` MiB in bytes.
#[inline]
pub const fn mb(n: u64) -> u64 {
    n << 20
}

/// `n` GiB in bytes.
#[inline]
pub const fn gb(n: u64) -> u64 {
    n << 30
}

/// Human-readable size, e.g. `"64.00 KB"`. Whole bytes below 1 KiB.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", gb(1)), ("MB", mb(1)), ("KB", kb(1))];

    UNITS
        .iter()
        .find(|(_, scale)| bytes >= *scale)
        .map(|(unit, scale)| format!("{:.2} {}", bytes as f64 / *scale as f64, unit))
        .unwrap_or_else(|| format!("{} B", bytes))
}
