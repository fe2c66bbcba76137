//! Per-action running totals and the averages derived from them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Running count and sum for one action.
///
/// An accumulator only comes into existence together with its first
/// sample, so `count` is always at least 1 and [`Accumulator::average`]
/// never divides by zero. There is deliberately no `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    count: u64,
    sum: u64,
}

impl Accumulator {
    /// Start an accumulator from its first sample.
    pub fn new(amount: u64) -> Self {
        Self {
            count: 1,
            sum: amount,
        }
    }

    /// Number of samples folded in.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Exact total of all sample amounts.
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// The accumulator after adding one more sample.
    ///
    /// Returns `None` when either the sum or the count would leave the u64
    /// range. `self` is never modified, so callers can check before they
    /// commit the result.
    pub fn checked_add(&self, amount: u64) -> Option<Self> {
        Some(Self {
            count: self.count.checked_add(1)?,
            sum: self.sum.checked_add(amount)?,
        })
    }

    /// Floor of `sum / count`.
    pub fn average(&self) -> Option<u64> {
        self.sum.checked_div(self.count)
    }
}

/// One entry of a snapshot: an action and its floored mean.
///
/// Serializes as `{"action": "...", "avg": N}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionAverage {
    /// The action name.
    pub action: String,
    /// `sum / count`, rounded down.
    #[serde(rename = "avg")]
    pub average: u64,
}

impl ActionAverage {
    /// Create a snapshot entry.
    pub fn new(action: impl Into<String>, average: u64) -> Self {
        Self {
            action: action.into(),
            average,
        }
    }

    /// Derive the entry for `action` from its accumulator.
    pub fn from_accumulator(action: &str, accumulator: &Accumulator) -> Result<Self> {
        let average = accumulator.average().ok_or_else(|| {
            TallyError::aggregation(format!("accumulator for action {action:?} has no samples"))
        })?;
        Ok(Self::new(action, average))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_one_sample() {
        let acc = Accumulator::new(100);
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.sum(), 100);
        assert_eq!(acc.average(), Some(100));
    }

    #[test]
    fn test_new_with_zero_amount() {
        let acc = Accumulator::new(0);
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.average(), Some(0));
    }

    #[test]
    fn test_checked_add() {
        let acc = Accumulator::new(100).checked_add(200).unwrap();
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.sum(), 300);
        assert_eq!(acc.average(), Some(150));
    }

    #[test]
    fn test_checked_add_leaves_original_untouched() {
        let acc = Accumulator::new(1);
        let _ = acc.checked_add(2);
        assert_eq!(acc, Accumulator::new(1));
    }

    #[test]
    fn test_checked_add_overflow() {
        let acc = Accumulator::new(u64::MAX);
        assert_eq!(acc.checked_add(1), None);
        assert_eq!(acc.checked_add(u64::MAX), None);
    }

    #[test]
    fn test_checked_add_up_to_max() {
        let acc = Accumulator::new(u64::MAX - 5).checked_add(5).unwrap();
        assert_eq!(acc.sum(), u64::MAX);
        assert_eq!(acc.average(), Some(u64::MAX / 2));
    }

    #[test]
    fn test_checked_add_zero_at_max() {
        let acc = Accumulator::new(u64::MAX).checked_add(0).unwrap();
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.sum(), u64::MAX);
    }

    #[test]
    fn test_average_floors() {
        let acc = Accumulator::new(1)
            .checked_add(2)
            .and_then(|a| a.checked_add(2))
            .unwrap();
        // 5 / 3
        assert_eq!(acc.average(), Some(1));
    }

    #[test]
    fn test_action_average_from_accumulator() {
        let acc = Accumulator::new(100).checked_add(200).unwrap();
        let entry = ActionAverage::from_accumulator("jump", &acc).unwrap();
        assert_eq!(entry, ActionAverage::new("jump", 150));
    }

    #[test]
    fn test_action_average_json_shape() {
        let json = serde_json::to_string(&ActionAverage::new("run", 75)).unwrap();
        assert_eq!(json, r#"{"action":"run","avg":75}"#);

        let parsed: ActionAverage = serde_json::from_str(r#"{"action":"jump","avg":150}"#).unwrap();
        assert_eq!(parsed, ActionAverage::new("jump", 150));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Property: folding amounts matches the exact u128 model, or
            // refuses exactly when the model leaves the u64 range
            #[test]
            fn prop_accumulation_matches_model(
                amounts in proptest::collection::vec(any::<u64>(), 1..20)
            ) {
                let mut acc = Accumulator::new(amounts[0]);
                let mut model: u128 = u128::from(amounts[0]);
                for &amount in &amounts[1..] {
                    let next = model + u128::from(amount);
                    match acc.checked_add(amount) {
                        Some(updated) => {
                            prop_assert!(next <= u128::from(u64::MAX));
                            acc = updated;
                            model = next;
                        }
                        None => prop_assert!(next > u128::from(u64::MAX)),
                    }
                }
                prop_assert_eq!(u128::from(acc.sum()), model);
                prop_assert_eq!(
                    acc.average(),
                    Some((model / u128::from(acc.count())) as u64)
                );
            }

            // Property: small amounts never overflow and count tracks samples
            #[test]
            fn prop_count_tracks_samples(
                amounts in proptest::collection::vec(0u64..1_000_000, 1..50)
            ) {
                let mut acc = Accumulator::new(amounts[0]);
                for &amount in &amounts[1..] {
                    acc = acc.checked_add(amount).unwrap();
                }
                prop_assert_eq!(acc.count(), amounts.len() as u64);
                prop_assert_eq!(acc.sum(), amounts.iter().sum::<u64>());
            }
        }
    }
}
