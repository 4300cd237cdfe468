pub const MONTHS_PER_YEAR: u32 = 12;

const LINEAR_RATE_THRESHOLD: f64 = 1e-8;

/// Replaces non-finite input with 0.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Sanitized rate, floored at -100%.
pub fn sanitize_rate(rate: f64) -> f64 {
    sanitize(rate).max(-1.0)
}

/// Converts an annual rate into the equivalent monthly compounding rate.
/// Rates within 1e-8 of zero fall back to `annual / 12`.
pub fn monthly_rate(annual_rate: f64) -> f64 {
    let rate = sanitize_rate(annual_rate);
    if rate.abs() < LINEAR_RATE_THRESHOLD {
        return rate / MONTHS_PER_YEAR as f64;
    }
    (1.0 + rate).powf(1.0 / MONTHS_PER_YEAR as f64) - 1.0
}

/// Factor that deflates a nominal amount after `years` of inflation.
pub fn inflation_deflator(inflation_rate: f64, years: f64) -> f64 {
    let base = 1.0 + sanitize(inflation_rate);
    if base > 0.0 { base.powf(years) } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-12;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn near_zero_rate_uses_linear_split() {
        assert_approx(monthly_rate(0.0), 0.0);
        assert_approx(monthly_rate(6e-9), 6e-9 / 12.0);
        assert_approx(monthly_rate(-6e-9), -6e-9 / 12.0);
    }

    #[test]
    fn non_finite_rates_degrade_to_zero() {
        assert_approx(monthly_rate(f64::NAN), 0.0);
        assert_approx(monthly_rate(f64::INFINITY), 0.0);
    }

    #[test]
    fn rates_below_total_loss_are_floored() {
        assert_approx(monthly_rate(-3.0), -1.0);
        assert!(monthly_rate(-3.0).is_finite());
    }

    #[test]
    fn deflator_ignores_impossible_inflation() {
        assert_approx(inflation_deflator(-1.5, 10.0), 1.0);
        assert!((inflation_deflator(0.02, 2.0) - 1.0404).abs() < 1e-12);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_twelve_monthly_periods_compound_to_annual(rate_bp in -5_000i32..5_000) {
            let annual = rate_bp as f64 / 10_000.0;
            let compounded = (1.0 + monthly_rate(annual)).powi(12);
            prop_assert!((compounded - (1.0 + annual)).abs() < 1e-9);
        }
    }
}
