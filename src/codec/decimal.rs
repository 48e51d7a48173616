//! Arbitrary-precision decimal numbers.
//!
//! A [`Decimal`] is a sign, a sequence of base-10 digits (the coefficient) and
//! a power-of-ten exponent: `(-1)^sign * digits * 10^exponent`. Equality is
//! structural, so `0.75` and `0.750` are different values.
//!
//! # Example
//!
//! ```
//! use ampwire::codec::Decimal;
//!
//! let d: Decimal = "0.75".parse().unwrap();
//! assert_eq!(d.digits(), &[7, 5]);
//! assert_eq!(d.exponent(), -2);
//! assert_eq!(Decimal::exact_quotient(3, 4), Some(d));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{AmpError, Result};

/// Exact decimal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    digits: Vec<u8>,
    exponent: i32,
}

impl Decimal {
    /// Build a decimal from its parts.
    ///
    /// Every digit must be in `0..=9` and at least one digit is required.
    pub fn new(negative: bool, digits: Vec<u8>, exponent: i32) -> Result<Self> {
        if digits.is_empty() {
            return Err(AmpError::MalformedValue(
                "decimal needs at least one digit".to_string(),
            ));
        }
        if let Some(bad) = digits.iter().find(|&&d| d > 9) {
            return Err(AmpError::MalformedValue(format!(
                "invalid decimal digit {}",
                bad
            )));
        }
        Ok(Self {
            negative,
            digits,
            exponent,
        })
    }

    /// Exact decimal expansion of `numerator / denominator`.
    ///
    /// Returns `None` when the denominator is zero or the expansion does not
    /// terminate (denominator has a prime factor other than 2 or 5).
    pub fn exact_quotient(numerator: i64, denominator: i64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let negative = (numerator < 0) != (denominator < 0) && numerator != 0;
        let num = numerator.unsigned_abs() as u128;
        let den = denominator.unsigned_abs() as u128;

        let mut reduced = den / gcd(num, den);
        while reduced % 2 == 0 {
            reduced /= 2;
        }
        while reduced % 5 == 0 {
            reduced /= 5;
        }
        if reduced != 1 {
            return None;
        }

        let mut digits: Vec<u8> = (num / den).to_string().bytes().map(|b| b - b'0').collect();
        let mut remainder = num % den;
        let mut exponent = 0i32;
        while remainder != 0 {
            remainder *= 10;
            digits.push((remainder / den) as u8);
            remainder %= den;
            exponent -= 1;
        }

        let first_nonzero = digits
            .iter()
            .position(|&d| d != 0)
            .unwrap_or(digits.len() - 1);
        digits.drain(..first_nonzero);

        Some(Self {
            negative,
            digits,
            exponent,
        })
    }

    /// Whether the sign bit is set.
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Coefficient digits, most significant first.
    #[inline]
    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    /// Power-of-ten exponent applied to the coefficient.
    #[inline]
    pub fn exponent(&self) -> i32 {
        self.exponent
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl FromStr for Decimal {
    type Err = AmpError;

    /// Parse plain or scientific notation (`-12.50`, `3E-2`).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AmpError::MalformedValue(format!("invalid decimal literal {:?}", s));

        let (negative, rest) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let (mantissa, exp_part) = match rest.find(['e', 'E']) {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let mut digits = Vec::with_capacity(int_part.len() + frac_part.len());
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c.to_digit(10).ok_or_else(invalid)?;
            digits.push(d as u8);
        }

        let mut exponent = -(i32::try_from(frac_part.len()).map_err(|_| invalid())?);
        if let Some(exp) = exp_part {
            let exp: i32 = exp.parse().map_err(|_| invalid())?;
            exponent = exponent.checked_add(exp).ok_or_else(invalid)?;
        }

        let first_nonzero = digits
            .iter()
            .position(|&d| d != 0)
            .unwrap_or(digits.len() - 1);
        digits.drain(..first_nonzero);

        Self::new(negative, digits, exponent)
    }
}

/// Padding zeros beyond this switch Display to `<digits>E<exponent>`.
const MAX_PLAIN_ZEROS: usize = 32;

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        let coefficient: String = self.digits.iter().map(|d| char::from(b'0' + d)).collect();

        if self.exponent >= 0 {
            let zeros = self.exponent as usize;
            if zeros > MAX_PLAIN_ZEROS {
                return write!(f, "{}E{}", coefficient, self.exponent);
            }
            return write!(f, "{}{}", coefficient, "0".repeat(zeros));
        }

        let scale = self.exponent.unsigned_abs() as usize;
        if scale.saturating_sub(coefficient.len()) > MAX_PLAIN_ZEROS {
            return write!(f, "{}E{}", coefficient, self.exponent);
        }
        if coefficient.len() > scale {
            let (int, frac) = coefficient.split_at(coefficient.len() - scale);
            write!(f, "{}.{}", int, frac)
        } else {
            write!(f, "0.{}{}", "0".repeat(scale - coefficient.len()), coefficient)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let d: Decimal = "0.75".parse().unwrap();
        assert!(!d.is_negative());
        assert_eq!(d.digits(), &[7, 5]);
        assert_eq!(d.exponent(), -2);
    }

    #[test]
    fn test_parse_negative_and_scientific() {
        let d: Decimal = "-12.5".parse().unwrap();
        assert!(d.is_negative());
        assert_eq!(d.digits(), &[1, 2, 5]);
        assert_eq!(d.exponent(), -1);

        let e: Decimal = "3E-2".parse().unwrap();
        assert_eq!(e.digits(), &[3]);
        assert_eq!(e.exponent(), -2);
    }

    #[test]
    fn test_parse_zero_keeps_one_digit() {
        let d: Decimal = "0.00".parse().unwrap();
        assert_eq!(d.digits(), &[0]);
        assert_eq!(d.exponent(), -2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Decimal>().is_err());
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("abc".parse::<Decimal>().is_err());
        assert!("1e".parse::<Decimal>().is_err());
    }

    #[test]
    fn test_equality_is_structural() {
        let a: Decimal = "0.75".parse().unwrap();
        let b: Decimal = "0.750".parse().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_exact_quotient_three_quarters() {
        let d = Decimal::exact_quotient(3, 4).unwrap();
        assert_eq!(d, "0.75".parse().unwrap());
        assert_eq!(d.to_string(), "0.75");
    }

    #[test]
    fn test_exact_quotient_edge_cases() {
        assert_eq!(Decimal::exact_quotient(1, 3), None);
        assert_eq!(Decimal::exact_quotient(1, 0), None);
        assert_eq!(
            Decimal::exact_quotient(-1, 8).unwrap().to_string(),
            "-0.125"
        );
        assert_eq!(Decimal::exact_quotient(10, 2).unwrap().to_string(), "5");
        assert_eq!(Decimal::exact_quotient(0, 7).unwrap().to_string(), "0");
    }

    #[test]
    fn test_new_rejects_bad_digits() {
        assert!(Decimal::new(false, vec![], 0).is_err());
        assert!(Decimal::new(false, vec![1, 10], 0).is_err());
    }

    #[test]
    fn test_display_positive_exponent() {
        let d = Decimal::new(false, vec![1, 2], 3).unwrap();
        assert_eq!(d.to_string(), "12000");
        let small = Decimal::new(true, vec![5], -3).unwrap();
        assert_eq!(small.to_string(), "-0.005");
    }

    #[test]
    fn test_display_huge_exponent_uses_scientific_form() {
        let big = Decimal::new(false, vec![1], i32::MAX).unwrap();
        assert_eq!(big.to_string(), "1E2147483647");
        assert_eq!(big.to_string().parse::<Decimal>().unwrap(), big);

        let tiny = Decimal::new(true, vec![2, 5], i32::MIN).unwrap();
        assert_eq!(tiny.to_string(), "-25E-2147483648");
        assert_eq!(tiny.to_string().parse::<Decimal>().unwrap(), tiny);

        // Within the bound the plain form is kept
        let d = Decimal::new(false, vec![7], 32).unwrap();
        assert_eq!(d.to_string(), format!("7{}", "0".repeat(32)));
    }
}
