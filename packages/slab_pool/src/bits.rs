/// Bit-scan operations used to locate free nodes in slab bitmaps and to map
/// requested lengths to power-of-two size classes.
///
/// Every operation is defined for every input, including zero:
///
/// * `leading_zero_count(0)` and `trailing_zero_count(0)` are the bit width of the type.
/// * `log2(0)` is treated as `log2(1)`, i.e. zero.
/// * `log2_ceiling(0)` is zero.
///
/// # Examples
///
/// ```
/// use slab_pool::BitScan;
///
/// assert_eq!(0b1011_u32.pop_count(), 3);
/// assert_eq!(0_u64.trailing_zero_count(), 64);
/// assert_eq!(1000_u32.log2(), 9);
/// assert_eq!(1000_u32.log2_ceiling(), 10);
/// ```
pub trait BitScan: Copy + Eq + private::Sealed {
    /// Number of bits in the type.
    const BITS: u32;

    /// Number of bits set to `1`.
    #[must_use]
    fn pop_count(self) -> u32;

    /// Number of `0` bits above the highest `1` bit. Returns [`Self::BITS`] for zero.
    #[must_use]
    fn leading_zero_count(self) -> u32;

    /// Number of `0` bits below the lowest `1` bit. Returns [`Self::BITS`] for zero.
    #[must_use]
    fn trailing_zero_count(self) -> u32;

    /// Index of the highest `1` bit (floor of the base-2 logarithm). Zero maps to zero.
    #[must_use]
    fn log2(self) -> u32;

    /// Smallest `k` such that `2^k >= self`. Zero and one map to zero.
    #[must_use]
    fn log2_ceiling(self) -> u32;
}

macro_rules! impl_bit_scan {
    ($($t:ty),*) => {
        $(
            impl BitScan for $t {
                const BITS: u32 = <$t>::BITS;

                #[inline]
                fn pop_count(self) -> u32 {
                    self.count_ones()
                }

                #[inline]
                fn leading_zero_count(self) -> u32 {
                    self.leading_zeros()
                }

                #[inline]
                fn trailing_zero_count(self) -> u32 {
                    self.trailing_zeros()
                }

                #[inline]
                fn log2(self) -> u32 {
                    // OR-ing in bit 0 makes zero behave as one, so ilog2 never sees zero.
                    (self | 1).ilog2()
                }

                #[inline]
                fn log2_ceiling(self) -> u32 {
                    let floor = self.log2();

                    if self.is_power_of_two() || self == 0 {
                        floor
                    } else {
                        // Cannot overflow: floor is at most BITS - 1.
                        floor.wrapping_add(1)
                    }
                }
            }

            impl private::Sealed for $t {}
        )*
    };
}

impl_bit_scan!(u32, u64, usize);

mod private {
    pub trait Sealed {}
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn pop_count_counts_set_bits() {
        assert_eq!(0_u32.pop_count(), 0);
        assert_eq!(u32::MAX.pop_count(), 32);
        assert_eq!(u64::MAX.pop_count(), 64);
        assert_eq!(0x8000_0000_0000_0001_u64.pop_count(), 2);
        assert_eq!(0b1011_0110_usize.pop_count(), 5);
    }

    #[test]
    fn zero_counts_use_bit_width() {
        assert_eq!(0_u32.leading_zero_count(), 32);
        assert_eq!(0_u32.trailing_zero_count(), 32);
        assert_eq!(0_u64.leading_zero_count(), 64);
        assert_eq!(0_u64.trailing_zero_count(), 64);
        assert_eq!(0_usize.leading_zero_count(), usize::BITS);
    }

    #[test]
    fn leading_and_trailing_zero_counts() {
        assert_eq!(1_u32.leading_zero_count(), 31);
        assert_eq!(1_u32.trailing_zero_count(), 0);
        assert_eq!(0x0001_0000_u32.trailing_zero_count(), 16);
        assert_eq!(0x0001_0000_u32.leading_zero_count(), 15);
        assert_eq!((1_u64 << 63).leading_zero_count(), 0);
        assert_eq!((1_u64 << 63).trailing_zero_count(), 63);
    }

    #[test]
    fn lowest_clear_bit_via_inverted_trailing_zeros() {
        assert_eq!((!0b0111_u32).trailing_zero_count(), 3);
        assert_eq!((!0_u64).trailing_zero_count(), 0);
        assert_eq!((!u64::MAX).trailing_zero_count(), 64);
    }

    #[test]
    fn log2_treats_zero_as_one() {
        assert_eq!(0_u32.log2(), 0);
        assert_eq!(1_u32.log2(), 0);
        assert_eq!(2_u32.log2(), 1);
        assert_eq!(3_u32.log2(), 1);
        assert_eq!(16_u64.log2(), 4);
        assert_eq!(u64::MAX.log2(), 63);
        assert_eq!(usize::MAX.log2(), usize::BITS - 1);
    }

    #[test]
    fn log2_ceiling_rounds_up() {
        assert_eq!(0_u32.log2_ceiling(), 0);
        assert_eq!(1_u32.log2_ceiling(), 0);
        assert_eq!(2_u32.log2_ceiling(), 1);
        assert_eq!(3_u32.log2_ceiling(), 2);
        assert_eq!(16_u64.log2_ceiling(), 4);
        assert_eq!(17_u64.log2_ceiling(), 5);
        assert_eq!(u32::MAX.log2_ceiling(), 32);
    }
}
