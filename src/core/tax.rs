use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::types::EtfType;

/// Abgeltungsteuer on capital gains.
pub const CAPITAL_GAINS_RATE: f64 = 0.25;
/// Sparerpauschbetrag: capital gains that stay tax free each year.
pub const ANNUAL_ALLOWANCE: f64 = 1_000.0;
/// Base rate published for the Vorabpauschale.
pub const BASISZINS: f64 = 0.0253;
pub const VORABPAUSCHALE_FACTOR: f64 = 0.7;
/// Partial exemption for equity funds.
pub const TEILFREISTELLUNG_EQUITY: f64 = 0.30;
pub const DISTRIBUTION_YIELD_ANNUAL: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalGainsTax {
    pub tax: f64,
    pub taxable_after_allowance: f64,
}

/// Running record of how much of the annual allowance has been used.
///
/// Each simulation owns one and resets it at every tax-year boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxAllowance {
    annual_allowance: f64,
    used: f64,
}

impl Default for TaxAllowance {
    fn default() -> Self {
        Self::new()
    }
}

impl TaxAllowance {
    pub const fn new() -> Self {
        Self::with_allowance(ANNUAL_ALLOWANCE)
    }

    pub const fn with_allowance(annual_allowance: f64) -> Self {
        Self {
            annual_allowance,
            used: 0.0,
        }
    }

    pub fn used(&self) -> f64 {
        self.used
    }

    pub fn remaining(&self) -> f64 {
        (self.annual_allowance - self.used).max(0.0)
    }

    pub fn reset(&mut self) {
        self.used = 0.0;
    }

    /// Taxes `taxable_amount` after offsetting whatever allowance is left.
    pub fn apply(&mut self, taxable_amount: f64) -> CapitalGainsTax {
        let taxable = if taxable_amount.is_finite() {
            taxable_amount.max(0.0)
        } else {
            0.0
        };
        let remaining = self.remaining();
        let taxable_after_allowance = (taxable - remaining).max(0.0);
        self.used += remaining.min(taxable);
        CapitalGainsTax {
            tax: taxable_after_allowance * CAPITAL_GAINS_RATE,
            taxable_after_allowance,
        }
    }
}

static SHARED_ALLOWANCE: Mutex<TaxAllowance> = Mutex::new(TaxAllowance::new());

fn shared_allowance() -> MutexGuard<'static, TaxAllowance> {
    SHARED_ALLOWANCE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the process-wide allowance register used by
/// [`apply_capital_gains_tax`] and [`calculate_german_etf_tax`].
pub fn reset_etf_tax_allowance() {
    shared_allowance().reset();
}

/// Taxes `taxable_amount` against the process-wide allowance register.
///
/// The simulators never touch this register; callers that use it must
/// reset it before every independent calculation.
pub fn apply_capital_gains_tax(taxable_amount: f64) -> CapitalGainsTax {
    shared_allowance().apply(taxable_amount)
}

pub fn teilfreistellung_rate(enabled: bool) -> f64 {
    if enabled { TEILFREISTELLUNG_EQUITY } else { 0.0 }
}

/// Share of a gross gain that remains taxable after the partial exemption.
pub fn taxable_after_teilfreistellung(gross_gain: f64, exemption_rate: f64) -> f64 {
    gross_gain.max(0.0) * (1.0 - exemption_rate.clamp(0.0, 1.0))
}

/// Deemed gain of an accumulating fund for one year:
/// `clamp(0, start * BASISZINS * 0.7, actual gain)`.
pub fn vorabpauschale(year_start_capital: f64, year_end_balance: f64, year_deposits: f64) -> f64 {
    let basisertrag = year_start_capital.max(0.0) * BASISZINS * VORABPAUSCHALE_FACTOR;
    let actual_gain = (year_end_balance - (year_start_capital + year_deposits)).max(0.0);
    basisertrag.min(actual_gain).max(0.0)
}

/// One year of fund tax for a holding that moved from `start_value` to
/// `end_value`, charged against the process-wide allowance register.
pub fn calculate_german_etf_tax(
    start_value: f64,
    end_value: f64,
    teilfreistellung: bool,
    etf_type: EtfType,
) -> f64 {
    let mut allowance = shared_allowance();
    etf_year_tax(&mut allowance, start_value, end_value, teilfreistellung, etf_type)
}

/// Same as [`calculate_german_etf_tax`] but against a caller-owned allowance.
pub fn etf_year_tax(
    allowance: &mut TaxAllowance,
    start_value: f64,
    end_value: f64,
    teilfreistellung: bool,
    etf_type: EtfType,
) -> f64 {
    let gain = (end_value - start_value).max(0.0);
    if gain <= 0.0 {
        return 0.0;
    }

    let taxable_gain = match etf_type {
        EtfType::Thesaurierend => vorabpauschale(start_value, end_value, 0.0),
        EtfType::Ausschuettend => (start_value.max(0.0) * DISTRIBUTION_YIELD_ANNUAL).min(gain),
    };
    let taxable = taxable_after_teilfreistellung(taxable_gain, teilfreistellung_rate(teilfreistellung));
    allowance.apply(taxable).tax
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn allowance_absorbs_small_gains_entirely() {
        let mut allowance = TaxAllowance::new();
        let result = allowance.apply(600.0);
        assert_approx(result.tax, 0.0);
        assert_approx(result.taxable_after_allowance, 0.0);
        assert_approx(allowance.used(), 600.0);
        assert_approx(allowance.remaining(), 400.0);
    }

    #[test]
    fn allowance_consumption_is_capped_at_taxable_amount() {
        let mut allowance = TaxAllowance::new();
        let first = allowance.apply(1_500.0);
        assert_approx(first.taxable_after_allowance, 500.0);
        assert_approx(first.tax, 125.0);
        assert_approx(allowance.used(), 1_000.0);

        let second = allowance.apply(200.0);
        assert_approx(second.taxable_after_allowance, 200.0);
        assert_approx(second.tax, 50.0);
        assert_approx(allowance.used(), 1_000.0);
    }

    #[test]
    fn reset_restores_full_allowance() {
        let mut allowance = TaxAllowance::new();
        allowance.apply(5_000.0);
        allowance.reset();
        assert_approx(allowance.remaining(), ANNUAL_ALLOWANCE);
    }

    #[test]
    fn negative_and_nan_amounts_are_untaxed() {
        let mut allowance = TaxAllowance::new();
        assert_approx(allowance.apply(-250.0).tax, 0.0);
        assert_approx(allowance.apply(f64::NAN).tax, 0.0);
        assert_approx(allowance.used(), 0.0);
    }

    #[test]
    fn vorabpauschale_is_capped_by_actual_gain() {
        // basisertrag = 100_000 * 0.0253 * 0.7 = 1_771
        assert_approx(vorabpauschale(100_000.0, 110_000.0, 0.0), 1_771.0);
        assert_approx(vorabpauschale(100_000.0, 100_500.0, 0.0), 500.0);
        // deposits are not gains
        assert_approx(vorabpauschale(100_000.0, 105_000.0, 5_000.0), 0.0);
        assert_approx(vorabpauschale(100_000.0, 90_000.0, 0.0), 0.0);
    }

    #[test]
    fn teilfreistellung_removes_thirty_percent() {
        assert_approx(taxable_after_teilfreistellung(1_000.0, TEILFREISTELLUNG_EQUITY), 700.0);
        assert_approx(taxable_after_teilfreistellung(1_000.0, 0.0), 1_000.0);
        assert_approx(taxable_after_teilfreistellung(-10.0, 0.3), 0.0);
    }

    #[test]
    fn accumulating_fund_tax_shares_allowance_across_years() {
        let mut allowance = TaxAllowance::new();
        let year_one = etf_year_tax(&mut allowance, 100_000.0, 110_000.0, true, EtfType::Thesaurierend);
        assert_approx(year_one, 59.925);

        let year_two = etf_year_tax(&mut allowance, 110_000.0, 121_000.0, true, EtfType::Thesaurierend);
        assert_approx(year_two, 340.9175);
    }

    #[test]
    fn distributing_fund_without_gain_pays_nothing() {
        let mut allowance = TaxAllowance::new();
        let tax = etf_year_tax(&mut allowance, 50_000.0, 48_000.0, false, EtfType::Ausschuettend);
        assert_approx(tax, 0.0);
        assert_approx(allowance.used(), 0.0);
    }

    #[test]
    fn distributing_fund_taxes_distribution_yield() {
        let mut allowance = TaxAllowance::new();
        // 2% of 100_000 = 2_000, minus 1_000 allowance, at 25%
        let tax = etf_year_tax(&mut allowance, 100_000.0, 108_000.0, false, EtfType::Ausschuettend);
        assert_approx(tax, 250.0);
    }

    // The only test that touches the process-wide register.
    #[test]
    fn shared_register_persists_until_reset() {
        reset_etf_tax_allowance();
        assert_approx(apply_capital_gains_tax(800.0).tax, 0.0);
        let second = apply_capital_gains_tax(800.0);
        assert_approx(second.taxable_after_allowance, 600.0);
        assert_approx(second.tax, 150.0);

        reset_etf_tax_allowance();
        assert_approx(
            calculate_german_etf_tax(100_000.0, 110_000.0, true, EtfType::Thesaurierend),
            59.925,
        );
        assert_approx(
            calculate_german_etf_tax(110_000.0, 121_000.0, true, EtfType::Thesaurierend),
            340.9175,
        );
        reset_etf_tax_allowance();
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_tax_never_exceeds_rate_times_amount(amount in 0u32..200_000, used in 0u32..2_000) {
            let mut allowance = TaxAllowance::new();
            allowance.apply(used as f64);
            let result = allowance.apply(amount as f64);
            prop_assert!(result.tax >= 0.0);
            prop_assert!(result.tax <= amount as f64 * CAPITAL_GAINS_RATE + 1e-9);
            prop_assert!(allowance.used() <= ANNUAL_ALLOWANCE + 1e-9);
        }
    }
}
