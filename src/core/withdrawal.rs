use serde::Serialize;
use tracing::{debug, warn};

use super::rates::{sanitize, sanitize_rate};
use super::solver::{RootFinder, RootSolution};
use super::tax::{TEILFREISTELLUNG_EQUITY, TaxAllowance, taxable_after_teilfreistellung};
use super::types::{MAX_HORIZON_YEARS, WithdrawalResult, WithdrawalYearRecord};

/// Rates closer to zero than this use the straight-line payment.
const ANNUITY_RATE_EPSILON: f64 = 1e-4;
/// A plan counts as depleting once the final balance is within a cent.
const DEPLETION_TOLERANCE: f64 = 0.01;

/// Constant year-end payment that amortizes `capital` over `years` at `rate`.
pub fn calculate_direct_annuity_payment(capital: f64, years: u32, rate: f64) -> f64 {
    let capital = sanitize(capital);
    if years == 0 {
        return capital;
    }
    let rate = sanitize_rate(rate);
    let years = years as f64;
    if rate.abs() < ANNUITY_RATE_EPSILON {
        return capital / years;
    }
    if rate <= -1.0 {
        return 0.0;
    }
    capital * rate / (1.0 - (1.0 + rate).powf(-years))
}

/// Year-by-year drawdown: returns accrue first, then the inflation-indexed
/// withdrawal is taken. Realized gains are taxed against a fresh allowance
/// each year after the equity-fund partial exemption. Runs for at most
/// `MAX_HORIZON_YEARS`.
pub fn simulate_withdrawal(
    initial_capital: f64,
    duration_years: u32,
    annual_return: f64,
    inflation_rate: f64,
    include_tax: bool,
    base_annual_withdrawal: f64,
    cost_basis: f64,
) -> WithdrawalResult {
    let annual_return = sanitize_rate(annual_return);
    let inflation_rate = sanitize(inflation_rate);
    let base_annual_withdrawal = sanitize(base_annual_withdrawal).max(0.0);
    let duration_years = duration_years.min(MAX_HORIZON_YEARS);

    let mut capital = sanitize(initial_capital);
    let mut remaining_cost_basis = sanitize(cost_basis).max(0.0);
    let mut allowance = TaxAllowance::new();
    let mut yearly_data = Vec::with_capacity(duration_years as usize);
    let mut total_gross_withdrawn = 0.0;
    let mut total_net_withdrawn = 0.0;
    let mut total_taxes_paid = 0.0;

    for year in 1..=duration_years {
        allowance.reset();

        let start_capital = capital;
        let capital_after_returns = start_capital * (1.0 + annual_return);
        let gross_withdrawal =
            base_annual_withdrawal * (1.0 + inflation_rate).powi(year as i32 - 1);

        let sold_share = if capital_after_returns > 0.0 {
            (gross_withdrawal / capital_after_returns).clamp(0.0, 1.0)
        } else if gross_withdrawal > 0.0 {
            1.0
        } else {
            0.0
        };
        let cost_basis_consumed = remaining_cost_basis * sold_share;
        let taxes_paid = if include_tax {
            let realized_gain = gross_withdrawal - cost_basis_consumed;
            allowance
                .apply(taxable_after_teilfreistellung(realized_gain, TEILFREISTELLUNG_EQUITY))
                .tax
        } else {
            0.0
        };
        let net_withdrawal = gross_withdrawal - taxes_paid;
        let end_capital = capital_after_returns - gross_withdrawal;
        remaining_cost_basis = (remaining_cost_basis - cost_basis_consumed).max(0.0);

        yearly_data.push(WithdrawalYearRecord {
            year,
            start_capital,
            capital_after_returns,
            gross_withdrawal,
            taxes_paid,
            net_withdrawal,
            end_capital,
            remaining_cost_basis,
        });

        total_gross_withdrawn += gross_withdrawal;
        total_net_withdrawn += net_withdrawal;
        total_taxes_paid += taxes_paid;
        capital = end_capital;
    }

    let (monthly_gross_withdrawal, monthly_net_withdrawal) = yearly_data
        .first()
        .map(|first| (first.gross_withdrawal / 12.0, first.net_withdrawal / 12.0))
        .unwrap_or((0.0, 0.0));

    WithdrawalResult {
        yearly_data,
        final_capital: capital,
        base_annual_withdrawal,
        monthly_gross_withdrawal,
        monthly_net_withdrawal,
        total_gross_withdrawn,
        total_net_withdrawn,
        total_taxes_paid,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPlan {
    #[serde(flatten)]
    pub withdrawal: WithdrawalResult,
    /// `None` when no depleting withdrawal was found and the result uses
    /// the closed-form estimate instead.
    pub solution: Option<RootSolution>,
}

/// Finds the first-year withdrawal that leaves the capital at zero after
/// `duration_years`, then simulates it.
pub fn calculate_withdrawal_plan(
    retirement_capital: f64,
    duration_years: u32,
    annual_return: f64,
    inflation_rate: f64,
    include_tax: bool,
    total_contributions: f64,
) -> WithdrawalPlan {
    let capital = sanitize(retirement_capital).max(0.0);
    let cost_basis = sanitize(total_contributions).max(0.0);
    let annual_return = sanitize_rate(annual_return);
    let inflation_rate = sanitize(inflation_rate);
    let duration_years = duration_years.min(MAX_HORIZON_YEARS);

    let simulate = |withdrawal: f64| {
        simulate_withdrawal(
            capital,
            duration_years,
            annual_return,
            inflation_rate,
            include_tax,
            withdrawal,
            cost_basis,
        )
    };

    if duration_years == 0 {
        return WithdrawalPlan {
            withdrawal: simulate(0.0),
            solution: None,
        };
    }

    let estimate = initial_withdrawal_estimate(capital, duration_years, annual_return, inflation_rate);
    let upper = withdrawal_upper_bound(capital, duration_years, annual_return, inflation_rate);
    let finder = RootFinder::new(0.0, upper, DEPLETION_TOLERANCE);
    let solution = finder.solve_numeric(estimate, (upper * 1e-6).max(1e-3), |withdrawal| {
        simulate(withdrawal).final_capital
    });

    let base_withdrawal = match solution {
        Some(solution) => {
            debug!(
                base_withdrawal = solution.root,
                iterations = solution.iterations,
                method = ?solution.method,
                "withdrawal plan solved"
            );
            solution.root
        }
        None => {
            warn!(capital, duration_years, estimate, "no depleting withdrawal found, using estimate");
            estimate
        }
    };

    WithdrawalPlan {
        withdrawal: simulate(base_withdrawal),
        solution,
    }
}

/// Annuity on the real return, lifted back to nominal terms for year one.
/// Exact when taxes are ignored.
fn initial_withdrawal_estimate(capital: f64, years: u32, annual_return: f64, inflation_rate: f64) -> f64 {
    let inflation_growth = 1.0 + inflation_rate;
    if inflation_growth <= 0.0 {
        return calculate_direct_annuity_payment(capital, years, annual_return);
    }
    let real_return = (1.0 + annual_return) / inflation_growth - 1.0;
    calculate_direct_annuity_payment(capital, years, real_return) * inflation_growth
}

/// A first-year withdrawal at which the final balance is certainly negative.
fn withdrawal_upper_bound(capital: f64, years: u32, annual_return: f64, inflation_rate: f64) -> f64 {
    let growth = (1.0 + annual_return.max(0.0)).powi(years as i32);
    let inflation_growth = 1.0 + inflation_rate;
    let slowest_indexation = if inflation_growth > 0.0 && inflation_growth < 1.0 {
        inflation_growth.powi(years as i32)
    } else {
        1.0
    };
    (capital * growth + 1.0) / slowest_indexation
}
