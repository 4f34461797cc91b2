use serde::{Deserialize, Serialize};

/// Signed money amount in integer cents.
///
/// Ledger entries are signed: debits are negative and credits positive, so
/// a balance is the plain sum of a player's entries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates an amount from whole currency units.
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    /// Zero.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// `None` when the result does not fit in `i64` cents.
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_neg(self) -> Option<Money> {
        self.0.checked_neg().map(Money)
    }

    /// Sums `amounts`, or `None` if any partial sum overflows.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), Money::checked_add)
    }

    /// Returns `percent`% of this amount, rounded half away from zero to
    /// whole cents.
    pub fn percent(&self, percent: u32) -> Self {
        let scaled = self.0 as i128 * percent as i128;
        let half = if scaled >= 0 { 50 } else { -50 };
        Self(((scaled + half) / 100) as i64)
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", cents / 100, cents % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_whole_amount() {
        assert_eq!(Money::from_units(100).percent(80), Money::from_units(80));
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        // 80% of 0.33 = 0.264 -> 0.26
        assert_eq!(Money::from_cents(33).percent(80), Money::from_cents(26));
        // 80% of 0.19 = 0.152 -> 0.15
        assert_eq!(Money::from_cents(19).percent(80), Money::from_cents(15));
        // 50% of 0.05 = 0.025 -> 0.03
        assert_eq!(Money::from_cents(5).percent(50), Money::from_cents(3));
        assert_eq!(Money::from_cents(-5).percent(50), Money::from_cents(-3));
    }

    #[test]
    fn sum_and_negation() {
        let total = Money::checked_sum([Money::from_cents(500), -Money::from_cents(200)]);
        assert_eq!(total, Some(Money::from_cents(300)));
    }

    #[test]
    fn overflowing_sum_is_none() {
        let max = Money::from_cents(i64::MAX);
        assert_eq!(max.checked_add(Money::from_cents(1)), None);
        assert_eq!(Money::checked_sum([max, Money::from_cents(1)]), None);
        assert_eq!(Money::from_cents(i64::MIN).checked_neg(), None);
        assert_eq!(Money::from_cents(i64::MIN).to_string(), "-92233720368547758.08");
    }

    #[test]
    fn display_formats_cents() {
        assert_eq!(Money::from_cents(12345).to_string(), "123.45");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
    }

    #[test]
    fn serializes_as_plain_cents() {
        let json = serde_json::to_string(&Money::from_cents(-10000)).unwrap();
        assert_eq!(json, "-10000");
    }
}
