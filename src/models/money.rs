use std::{fmt, iter::Sum, ops::Add};

use serde::{Deserialize, Serialize};

/// A non-negative amount in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    /// Largest amount a form accepts: 99,999,999.99.
    pub const MAX: Money = Money(9_999_999_999);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn abs_diff(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).saturating_abs())
    }

    /// Parses user input such as `1500`, `1500.5`, `$1,500.00`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let cleaned: String = raw
            .trim()
            .trim_start_matches('$')
            .chars()
            .filter(|c| *c != ',')
            .collect();
        if cleaned.is_empty() {
            return Err("Enter an amount.".into());
        }
        if cleaned.starts_with('-') {
            return Err("Amount cannot be negative.".into());
        }
        let (whole, fraction) = match cleaned.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (cleaned.as_str(), ""),
        };
        if fraction.len() > 2 {
            return Err("Use at most two decimal places.".into());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
            || (whole.is_empty() && fraction.is_empty())
        {
            return Err(format!("`{}` is not a valid amount.", raw.trim()));
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| "Amount cannot exceed $99999999.99.".to_string())?
        };
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().unwrap_or(0) * 10,
            _ => fraction.parse::<i64>().unwrap_or(0),
        };
        whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction))
            .map(Money)
            .filter(|amount| *amount <= Money::MAX)
            .ok_or_else(|| "Amount cannot exceed $99999999.99.".to_string())
    }

    /// Value for an `<input type="number">`, without currency sign.
    pub fn input_value(self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

/// Parses an optional money field where blank means "not set".
pub fn parse_optional(raw: &str) -> Result<Option<Money>, String> {
    if raw.trim().is_empty() {
        Ok(None)
    } else {
        Money::parse(raw).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_inputs() {
        assert_eq!(Money::parse("1500").unwrap().cents(), 150_000);
        assert_eq!(Money::parse("1500.5").unwrap().cents(), 150_050);
        assert_eq!(Money::parse("$1,370.00").unwrap().cents(), 137_000);
        assert_eq!(Money::parse(".99").unwrap().cents(), 99);
    }

    #[test]
    fn rejects_bad_amounts() {
        assert!(Money::parse("-4").is_err());
        assert!(Money::parse("12.345").is_err());
        assert!(Money::parse("abc").is_err());
        assert!(Money::parse(".").is_err());
    }

    #[test]
    fn caps_amounts_at_ten_digits() {
        assert_eq!(Money::parse("99,999,999.99").unwrap(), Money::MAX);
        assert!(Money::parse("100000000").is_err());
        assert!(Money::parse("92233720368547758").is_err());
        assert!(Money::parse("99999999999999999999").is_err());
    }

    #[test]
    fn large_sums_saturate() {
        let huge = Money::from_cents(i64::MAX - 1);
        let total: Money = [huge, huge, Money::MAX].into_iter().sum();
        assert_eq!(total.cents(), i64::MAX);
        assert_eq!(Money::ZERO.abs_diff(Money::from_cents(i64::MAX)).cents(), i64::MAX);
        assert_eq!(Money::from_cents(500).abs_diff(Money::from_cents(1200)).cents(), 700);
    }

    #[test]
    fn displays_without_thousands_separator() {
        assert_eq!(Money::from_cents(137_000).to_string(), "$1370.00");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(45_000).input_value(), "450.00");
    }

    #[test]
    fn blank_optional_is_none() {
        assert_eq!(parse_optional("  ").unwrap(), None);
        assert_eq!(parse_optional("12").unwrap(), Some(Money::from_cents(1200)));
    }
}
