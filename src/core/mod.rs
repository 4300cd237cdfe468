mod engine;
mod rates;
mod salary;
mod scenario;
mod solver;
mod tax;
mod types;
mod withdrawal;

pub use engine::{
    calculate_multi_phase_wealth_development, calculate_wealth_development, simulate_accumulation,
    simulate_accumulation_with,
};
pub use rates::{MONTHS_PER_YEAR, inflation_deflator, monthly_rate};
pub use salary::{GermanPayroll, NetSalary, SalaryBreakdown, TaxClass, income_tax_tariff};
pub use scenario::{
    LifecyclePlan, SalaryIncreaseAnalysis, SavingsMode, Scenario, ScenarioInputs,
    ScenarioMetrics, ScenarioResults, WithdrawalSettings, plan_lifecycle, run_scenario,
    run_scenario_with,
};
pub use solver::{
    RootFinder, RootSolution, SolveMethod, compute_annualized_return, npv,
    solve_annualized_return,
};
pub use tax::{
    ANNUAL_ALLOWANCE, BASISZINS, CAPITAL_GAINS_RATE, CapitalGainsTax, TEILFREISTELLUNG_EQUITY,
    TaxAllowance, apply_capital_gains_tax, calculate_german_etf_tax, etf_year_tax,
    reset_etf_tax_allowance, vorabpauschale,
};
pub use types::{
    AccumulationResult, ConfigError, ContributionPhase, EtfType, MAX_HORIZON_YEARS, SimulationConfig,
    WithdrawalResult, WithdrawalYearRecord, YearlySnapshot, normalize_phases,
};
pub use withdrawal::{
    WithdrawalPlan, calculate_direct_annuity_payment, calculate_withdrawal_plan,
    simulate_withdrawal,
};
