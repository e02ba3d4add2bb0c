//! Arithmetic and bitwise operations.
//!
//! All operations are stateless and work on 32-bit register values with
//! wrapping semantics. The list-taking operations fold left over their
//! operands, so `sub(&[a, b, c])` is `a - b - c`.

use thiserror::Error;

/// Sum of all operands. Empty list gives 0.
pub fn add(args: &[u32]) -> u32 {
    args.iter().fold(0, |acc, v| acc.wrapping_add(*v))
}

/// First operand minus the rest. Empty list gives 0.
pub fn sub(args: &[u32]) -> u32 {
    match args.split_first() {
        Some((first, rest)) => rest.iter().fold(*first, |acc, v| acc.wrapping_sub(*v)),
        None => 0,
    }
}

/// Product of all operands. Empty list gives 0.
pub fn mul(args: &[u32]) -> u32 {
    match args.split_first() {
        Some((first, rest)) => rest.iter().fold(*first, |acc, v| acc.wrapping_mul(*v)),
        None => 0,
    }
}

/// Truncating division, folded left.
pub fn div(args: &[u32]) -> Result<u32, AluError> {
    fold_checked(args, u32::checked_div)
}

/// Remainder, folded left.
pub fn modulo(args: &[u32]) -> Result<u32, AluError> {
    fold_checked(args, u32::checked_rem)
}

fn fold_checked(args: &[u32], op: fn(u32, u32) -> Option<u32>) -> Result<u32, AluError> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(0);
    };
    rest.iter()
        .try_fold(*first, |acc, v| op(acc, *v).ok_or(AluError::DivisionByZero))
}

/// Shift left. Shifting by the word width or more gives 0.
#[inline]
pub fn shl(a: u32, b: u32) -> u32 {
    a.checked_shl(b).unwrap_or(0)
}

/// Logical shift right. Shifting by the word width or more gives 0.
#[inline]
pub fn shr(a: u32, b: u32) -> u32 {
    a.checked_shr(b).unwrap_or(0)
}

#[inline]
pub fn and(a: u32, b: u32) -> u32 {
    a & b
}

#[inline]
pub fn or(a: u32, b: u32) -> u32 {
    a | b
}

#[inline]
pub fn xor(a: u32, b: u32) -> u32 {
    a ^ b
}

#[inline]
pub fn not(a: u32) -> u32 {
    !a
}

/// Errors raised by the ALU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AluError {
    #[error("division by zero")]
    DivisionByZero,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add() {
        assert_eq!(add(&[]), 0);
        assert_eq!(add(&[1, 2]), 3);
        assert_eq!(add(&[10, 10, 5]), 25);
        assert_eq!(add(&[u32::MAX, 2]), 1);
    }

    #[test]
    fn test_sub() {
        assert_eq!(sub(&[]), 0);
        assert_eq!(sub(&[1]), 1);
        assert_eq!(sub(&[8, 5]), 3);
        assert_eq!(sub(&[1, 2]), u32::MAX);
    }

    #[test]
    fn test_mul() {
        assert_eq!(mul(&[]), 0);
        assert_eq!(mul(&[1, 2, 3]), 6);
        assert_eq!(mul(&[7]), 7);
    }

    #[test]
    fn test_div_truncates() {
        assert_eq!(div(&[1, 2]), Ok(0));
        assert_eq!(div(&[6, 2]), Ok(3));
        assert_eq!(div(&[100, 3, 2]), Ok(16));
        assert_eq!(div(&[]), Ok(0));
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(div(&[5, 0]), Err(AluError::DivisionByZero));
        assert_eq!(modulo(&[5, 0]), Err(AluError::DivisionByZero));
    }

    #[test]
    fn test_modulo() {
        assert_eq!(modulo(&[17, 5]), Ok(2));
        assert_eq!(modulo(&[17, 5, 2]), Ok(0));
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(shl(1, 4), 16);
        assert_eq!(shl(1, 32), 0);
        assert_eq!(shr(0x80, 7), 1);
        assert_eq!(shr(0x80, 40), 0);
        assert_eq!(and(0b1100, 0b1010), 0b1000);
        assert_eq!(or(0b1100, 0b1010), 0b1110);
        assert_eq!(xor(0b1100, 0b1010), 0b0110);
        assert_eq!(not(0), u32::MAX);
    }

    proptest! {
        #[test]
        fn prop_add_sub_inverse(a in any::<u32>(), b in any::<u32>()) {
            prop_assert_eq!(sub(&[add(&[a, b]), b]), a);
        }

        #[test]
        fn prop_div_mod_identity(a in any::<u32>(), b in 1u32..) {
            let q = div(&[a, b]).unwrap();
            let r = modulo(&[a, b]).unwrap();
            prop_assert_eq!(q * b + r, a);
        }
    }
}
