use core::num::NonZeroU64;

use easy_ext::ext;
use typenum::{NonZero, Unsigned};

#[ext(NonZeroExt)]
pub impl<N: Unsigned + NonZero> N {
    #[inline]
    #[must_use]
    fn non_zero() -> NonZeroU64 {
        NonZeroU64::new(Self::U64).unwrap_or(NonZeroU64::MIN)
    }
}

#[ext(U64Ext)]
pub impl u64 {
    // Named to avoid colliding with the inherent `u64::is_multiple_of`.
    #[inline]
    #[must_use]
    fn divisible_by(self, factor: NonZeroU64) -> bool {
        self % factor == 0
    }

    #[inline]
    #[must_use]
    fn prev_multiple_of(self, factor: NonZeroU64) -> Self {
        self - self % factor
    }

    #[inline]
    #[must_use]
    fn div_typenum<N: Unsigned + NonZero>(self) -> Self {
        self / N::U64
    }

    #[inline]
    #[must_use]
    fn mod_typenum<N: Unsigned + NonZero>(self) -> Self {
        self % N::U64
    }

    /// Largest `x` such that `x * x <= self`.
    #[inline]
    #[must_use]
    fn integer_sqrt(self) -> Self {
        num_integer::Roots::sqrt(&self)
    }
}

#[ext(UsizeExt)]
pub impl usize {
    #[inline]
    #[must_use]
    fn mod_typenum<N: Unsigned + NonZero>(self) -> Self {
        self % N::USIZE
    }
}

#[cfg(test)]
mod tests {
    use nonzero_ext::nonzero;
    use test_case::test_case;
    use typenum::{U32, U8};

    use super::*;

    #[test_case(0, 0)]
    #[test_case(1, 1)]
    #[test_case(3, 1)]
    #[test_case(4, 2)]
    #[test_case(1_024_000_000_000, 1_011_928)]
    #[test_case(u64::MAX, 4_294_967_295)]
    fn integer_sqrt_rounds_down(value: u64, expected: u64) {
        assert_eq!(value.integer_sqrt(), expected);
    }

    #[test]
    fn prev_multiple_of_rounds_down_to_increment() {
        let increment = nonzero!(1_000_000_000_u64);

        assert_eq!(31_999_999_999_u64.prev_multiple_of(increment), 31_000_000_000);
        assert_eq!(32_000_000_000_u64.prev_multiple_of(increment), 32_000_000_000);
    }

    #[test]
    fn typenum_division_and_remainder() {
        assert_eq!(70_u64.div_typenum::<U32>(), 2);
        assert_eq!(70_u64.mod_typenum::<U32>(), 6);
        assert_eq!(17_usize.mod_typenum::<U8>(), 1);
        assert!(64_u64.divisible_by(U32::non_zero()));
    }
}
