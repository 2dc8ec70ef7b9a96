//! Alignment arithmetic for device addresses and offsets.
//!
//! All values are `u64` because device memory is addressed independently
//! of the host pointer width.

/// Align `value` up to `align`. `align` must be a power of two.
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to `align`. `align` must be a power of two.
#[inline]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

/// Padding needed to bring `value` up to `align`.
#[inline]
pub const fn padding_for(value: u64, align: u64) -> u64 {
    align_up(value, align) - value
}

/// Whether `align` is a usable alignment (non-zero power of two).
#[inline]
pub const fn is_valid_alignment(align: u64) -> bool {
    align.is_power_of_two()
}

/// Expand `[offset, offset + len)` to whole non-coherent atoms, clamped to
/// `limit` (the size of the underlying allocation).
///
/// Returns `(offset, len)` of the expanded range.
#[inline]
pub fn atom_range(offset: u64, len: u64, atom: u64, limit: u64) -> (u64, u64) {
    let atom = atom.max(1);
    let start = align_down(offset, atom);
    let end = align_up(offset + len, atom).min(limit);
    (start, end.saturating_sub(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 256), 256);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, 64), 0);
        assert_eq!(align_down(63, 64), 0);
        assert_eq!(align_down(130, 64), 128);
    }

    #[test]
    fn test_padding_for() {
        assert_eq!(padding_for(0, 8), 0);
        assert_eq!(padding_for(1, 8), 7);
        assert_eq!(padding_for(9, 8), 7);
    }

    #[test]
    fn test_atom_range() {
        assert_eq!(atom_range(0, 1, 64, 4096), (0, 64));
        assert_eq!(atom_range(70, 10, 64, 4096), (64, 64));
        assert_eq!(atom_range(60, 10, 64, 4096), (0, 128));
        // clamped to the end of the allocation
        assert_eq!(atom_range(4090, 6, 64, 4096), (4032, 64));
        assert_eq!(atom_range(100, 28, 1, 4096), (100, 28));
    }

    #[test]
    fn test_valid_alignment() {
        assert!(is_valid_alignment(1));
        assert!(is_valid_alignment(256));
        assert!(!is_valid_alignment(0));
        assert!(!is_valid_alignment(24));
    }
}
