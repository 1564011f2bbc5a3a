//! Guild tax deducted from a recipient's share before recording

use crate::models::UserId;
use serde::{Deserialize, Serialize};

/// Guild-wide tax settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxConfig {
    pub enabled: bool,
    /// Fraction of each share withheld, 0.0–1.0
    pub guild_default_rate: f64,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            guild_default_rate: 0.10,
        }
    }
}

/// Per-member tax preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxPreference {
    /// Explicit personal rate; only a positive value overrides the guild default
    #[serde(default)]
    pub personal_rate: Option<f64>,
    #[serde(default)]
    pub opted_out: bool,
}

/// Tax settings as fetched for one computation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxSnapshot {
    pub config: TaxConfig,
    pub preferences: Vec<(UserId, TaxPreference)>,
}

impl TaxSnapshot {
    pub fn preference_for(&self, user: UserId) -> Option<&TaxPreference> {
        self.preferences
            .iter()
            .find(|(u, _)| *u == user)
            .map(|(_, p)| p)
    }
}

/// Recorded amount and withheld tax; the two always add back to the quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxOutcome {
    pub net_recorded: f64,
    pub tax_amount: f64,
}

/// Whole-unit variant of [`TaxOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxUnits {
    pub net_recorded: u64,
    pub tax_amount: u64,
}

/// Rate that applies to one recipient, or `None` when no tax is due
pub fn effective_rate(personal: Option<&TaxPreference>, config: &TaxConfig) -> Option<f64> {
    if !config.enabled {
        return None;
    }
    if personal.map_or(false, |p| p.opted_out) {
        return None;
    }
    let rate = personal
        .and_then(|p| p.personal_rate)
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(config.guild_default_rate);
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Some(rate.min(1.0))
}

/// Split `quantity` into recorded amount and tax
pub fn apply_tax(quantity: f64, personal: Option<&TaxPreference>, config: &TaxConfig) -> TaxOutcome {
    match effective_rate(personal, config) {
        Some(rate) => {
            let tax_amount = quantity * rate;
            TaxOutcome {
                net_recorded: quantity - tax_amount,
                tax_amount,
            }
        }
        None => TaxOutcome {
            net_recorded: quantity,
            tax_amount: 0.0,
        },
    }
}

/// Split a whole-unit share; tax is rounded down to whole units
pub fn apply_tax_units(quantity: u64, personal: Option<&TaxPreference>, config: &TaxConfig) -> TaxUnits {
    let tax_amount = match effective_rate(personal, config) {
        Some(rate) => ((quantity as f64 * rate).floor() as u64).min(quantity),
        None => 0,
    };
    TaxUnits {
        net_recorded: quantity - tax_amount,
        tax_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(rate: f64) -> TaxConfig {
        TaxConfig {
            enabled: true,
            guild_default_rate: rate,
        }
    }

    #[test]
    fn test_disabled_means_no_tax() {
        let config = TaxConfig {
            enabled: false,
            guild_default_rate: 0.25,
        };
        let outcome = apply_tax(400.0, None, &config);
        assert_eq!(outcome.tax_amount, 0.0);
        assert_eq!(outcome.net_recorded, 400.0);
    }

    #[test]
    fn test_opted_out_means_no_tax() {
        let pref = TaxPreference {
            personal_rate: Some(0.5),
            opted_out: true,
        };
        let outcome = apply_tax(400.0, Some(&pref), &enabled(0.1));
        assert_eq!(outcome.tax_amount, 0.0);
    }

    #[test]
    fn test_personal_rate_overrides_default() {
        let pref = TaxPreference {
            personal_rate: Some(0.25),
            opted_out: false,
        };
        let outcome = apply_tax(400.0, Some(&pref), &enabled(0.1));
        assert_eq!(outcome.tax_amount, 100.0);
        assert_eq!(outcome.net_recorded, 300.0);
    }

    #[test]
    fn test_zero_personal_rate_uses_default() {
        let pref = TaxPreference {
            personal_rate: Some(0.0),
            opted_out: false,
        };
        let outcome = apply_tax(400.0, Some(&pref), &enabled(0.1));
        assert!((outcome.tax_amount - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_conservation_when_enabled() {
        for quantity in [0.0, 1.0, 3.0, 199.0, 12_345.0] {
            for rate in [0.01, 0.1, 0.333, 0.5, 1.0] {
                let outcome = apply_tax(quantity, None, &enabled(rate));
                assert!((outcome.net_recorded + outcome.tax_amount - quantity).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_units_round_tax_down() {
        let units = apply_tax_units(199, None, &enabled(0.1));
        assert_eq!(units.tax_amount, 19);
        assert_eq!(units.net_recorded, 180);
        let units = apply_tax_units(5, None, &enabled(2.0));
        assert_eq!(units.tax_amount, 5);
        assert_eq!(units.net_recorded, 0);
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = TaxSnapshot {
            config: enabled(0.1),
            preferences: vec![(UserId(3), TaxPreference { personal_rate: None, opted_out: true })],
        };
        assert!(snapshot.preference_for(UserId(3)).unwrap().opted_out);
        assert!(snapshot.preference_for(UserId(4)).is_none());
    }
}
