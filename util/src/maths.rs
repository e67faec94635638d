//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()` if `lhs` is much smaller than `rhs.abs()` in
/// magnitude and `lhs < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap an angle in degrees into the range [0, 360).
///
/// The round-off case of `rem_euclid` is folded back onto zero so the result
/// is always strictly less than 360.
pub fn wrap_deg_360<T>(value: T) -> T
where
    T: Float
{
    let full_turn = T::from(360.0).unwrap_or_else(T::zero);
    let wrapped = rem_euclid(value, full_turn);

    if wrapped >= full_turn {
        T::zero()
    }
    else {
        wrapped
    }
}

/// Return `true` if the value is a finite number strictly greater than zero.
pub fn is_finite_positive<T>(value: T) -> bool
where
    T: Float
{
    value.is_finite() && value > T::zero()
}
