use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::simulate_accumulation_with;
use super::rates::sanitize;
use super::salary::{GermanPayroll, NetSalary};
use super::types::{
    ConfigError, ContributionPhase, EtfType, MAX_HORIZON_YEARS, SimulationConfig, YearlySnapshot,
    normalize_phases,
};
use super::withdrawal::{WithdrawalPlan, calculate_withdrawal_plan};

/// Years simulated when a multi-phase scenario has no phases at all.
const EMPTY_MULTI_PHASE_DURATION: u32 = 25;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SavingsMode {
    #[default]
    Simple,
    MultiPhase,
}

/// A named savings plan. Rates are decimals (0.07 for 7 %).
///
/// [`run_scenario`] fills in `inputs`, `results`, `yearly_data` and
/// `salary_analysis`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub savings_mode: SavingsMode,
    pub initial_capital: f64,
    pub base_salary: f64,
    pub annual_return: f64,
    pub inflation_rate: f64,
    pub salary_growth: f64,
    pub salary_to_savings: f64,
    pub include_tax: bool,
    pub teilfreistellung: bool,
    pub etf_type: EtfType,
    /// Simple mode only.
    pub monthly_savings: f64,
    /// Simple mode only; multi-phase scenarios derive it from the phases.
    pub duration: u32,
    /// Multi-phase mode only.
    pub phases: Vec<ContributionPhase>,
    pub inputs: Option<ScenarioInputs>,
    pub results: Option<ScenarioResults>,
    pub yearly_data: Vec<YearlySnapshot>,
    pub salary_analysis: Option<SalaryIncreaseAnalysis>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            savings_mode: SavingsMode::Simple,
            initial_capital: 0.0,
            base_salary: 60_000.0,
            annual_return: 0.07,
            inflation_rate: 0.02,
            salary_growth: 0.0,
            salary_to_savings: 0.0,
            include_tax: false,
            teilfreistellung: false,
            etf_type: EtfType::Thesaurierend,
            monthly_savings: 0.0,
            duration: 25,
            phases: Vec::new(),
            inputs: None,
            results: None,
            yearly_data: Vec::new(),
            salary_analysis: None,
        }
    }
}

/// Effective savings figures the scenario was run with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioInputs {
    /// Multi-phase scenarios report the mean rate weighted by phase months.
    pub monthly_savings: f64,
    pub duration: u32,
    pub savings_mode: SavingsMode,
    pub phases: Option<Vec<ContributionPhase>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResults {
    pub final_nominal: f64,
    pub final_real: f64,
    pub total_invested: f64,
    pub total_return: f64,
    pub total_taxes_paid: f64,
    pub cost_basis: f64,
    pub annualized_return: Option<f64>,
    pub duration_years: u32,
    pub end_capital: f64,
    pub performance: ScenarioMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryIncreaseAnalysis {
    pub gross_increase: f64,
    pub net_increase: f64,
    pub tax_on_increase: f64,
    /// Share of the raise that is paid out, in percent; `None` without a raise.
    pub net_increase_rate: Option<f64>,
}

impl SalaryIncreaseAnalysis {
    pub fn compute<S>(base_salary: f64, salary_growth: f64, payroll: &S) -> Self
    where
        S: NetSalary + ?Sized,
    {
        let base_salary = sanitize(base_salary);
        let gross_increase = base_salary * sanitize(salary_growth);
        let net_increase =
            payroll.net_salary(base_salary + gross_increase) - payroll.net_salary(base_salary);
        let net_increase_rate =
            (gross_increase != 0.0).then(|| net_increase / gross_increase * 100.0);
        Self {
            gross_increase,
            net_increase,
            tax_on_increase: gross_increase - net_increase,
            net_increase_rate,
        }
    }
}

/// Comparison scores on a 0-10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMetrics {
    /// Higher is riskier.
    pub risk_score: f64,
    pub efficiency_score: f64,
    pub stability_score: f64,
    pub overall_score: f64,
}

impl ScenarioMetrics {
    pub fn evaluate(
        annual_return: f64,
        inflation_rate: f64,
        duration_years: u32,
        include_tax: bool,
        teilfreistellung: bool,
        annualized_return: Option<f64>,
    ) -> Self {
        let return_pct = sanitize(annual_return) * 100.0;
        let inflation_pct = sanitize(inflation_rate) * 100.0;

        let return_risk = ((return_pct - 5.0) * 1.5).max(0.0);
        let duration_risk = ((duration_years as f64 - 20.0) * 0.3).max(0.0);
        let inflation_risk = inflation_pct * 1.2;
        let risk_score = (return_risk + duration_risk + inflation_risk).clamp(0.0, 10.0);

        let return_efficiency = (annualized_return.unwrap_or(0.0) * 100.0 * 0.8).clamp(0.0, 10.0);
        let tax_efficiency = match (include_tax, teilfreistellung) {
            (false, _) => 10.0,
            (true, true) => 7.0,
            (true, false) => 5.0,
        };
        let efficiency_score = (return_efficiency + tax_efficiency) / 2.0;

        let return_stability = (10.0 - (return_pct - 7.0).abs()).max(0.0);
        let inflation_stability = (10.0 - inflation_pct * 2.0).max(0.0);
        let stability_score = (return_stability + inflation_stability) / 2.0;

        Self {
            risk_score,
            efficiency_score,
            stability_score,
            overall_score: efficiency_score * 0.4
                + stability_score * 0.35
                + (10.0 - risk_score) * 0.25,
        }
    }
}

pub fn run_scenario(scenario: Scenario) -> Result<Scenario, ConfigError> {
    run_scenario_with(scenario, &GermanPayroll::default())
}

/// Runs the accumulation the scenario describes and attaches its results.
pub fn run_scenario_with<S>(mut scenario: Scenario, payroll: &S) -> Result<Scenario, ConfigError>
where
    S: NetSalary + ?Sized,
{
    let (monthly_savings, duration, phases) = match scenario.savings_mode {
        SavingsMode::Simple => (
            sanitize(scenario.monthly_savings),
            scenario.duration.min(MAX_HORIZON_YEARS),
            Vec::new(),
        ),
        SavingsMode::MultiPhase => {
            let phases = normalize_phases(&scenario.phases)?;
            if phases.is_empty() {
                (0.0, EMPTY_MULTI_PHASE_DURATION, phases)
            } else {
                let duration = phases.iter().map(|p| p.end_year).max().unwrap_or(0);
                (weighted_monthly_savings(&phases), duration, phases)
            }
        }
    };

    let config = SimulationConfig {
        initial_capital: scenario.initial_capital,
        duration_years: duration as f64,
        default_annual_return: scenario.annual_return,
        inflation_rate: scenario.inflation_rate,
        initial_monthly_contribution: if phases.is_empty() { monthly_savings } else { 0.0 },
        salary_growth: scenario.salary_growth,
        salary_to_savings: scenario.salary_to_savings,
        include_tax: scenario.include_tax,
        base_salary: scenario.base_salary,
        teilfreistellung: scenario.teilfreistellung,
        etf_type: scenario.etf_type,
        phases: phases.clone(),
    };
    let result = simulate_accumulation_with(&config, payroll)?;

    let performance = ScenarioMetrics::evaluate(
        scenario.annual_return,
        scenario.inflation_rate,
        duration,
        scenario.include_tax,
        scenario.teilfreistellung,
        result.annualized_return,
    );
    debug!(
        scenario = %scenario.id,
        mode = ?scenario.savings_mode,
        duration,
        final_nominal = result.final_nominal,
        overall_score = performance.overall_score,
        "scenario calculated"
    );

    scenario.inputs = Some(ScenarioInputs {
        monthly_savings,
        duration,
        savings_mode: scenario.savings_mode,
        phases: (scenario.savings_mode == SavingsMode::MultiPhase).then_some(phases),
    });
    scenario.results = Some(ScenarioResults {
        final_nominal: result.final_nominal,
        final_real: result.final_real,
        total_invested: result.total_invested,
        total_return: result.total_return,
        total_taxes_paid: result.total_taxes_paid,
        cost_basis: result.cost_basis,
        annualized_return: result.annualized_return,
        duration_years: result.duration_years,
        end_capital: result.final_nominal,
        performance,
    });
    scenario.yearly_data = result.yearly_data;
    scenario.salary_analysis = Some(SalaryIncreaseAnalysis::compute(
        scenario.base_salary,
        scenario.salary_growth,
        payroll,
    ));
    Ok(scenario)
}

fn weighted_monthly_savings(phases: &[ContributionPhase]) -> f64 {
    let (contributions, months) = phases.iter().fold((0.0, 0.0), |(sum, months), phase| {
        let phase_months = (phase.end_year - phase.start_year + 1) as f64 * 12.0;
        (sum + phase_months * phase.monthly_savings_rate, months + phase_months)
    });
    if months > 0.0 { contributions / months } else { 0.0 }
}

/// Retirement parameters for the drawdown that follows a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WithdrawalSettings {
    pub duration_years: u32,
    pub annual_return: f64,
    pub inflation_rate: f64,
    pub include_tax: bool,
}

impl Default for WithdrawalSettings {
    fn default() -> Self {
        Self {
            duration_years: 25,
            annual_return: 0.05,
            inflation_rate: 0.02,
            include_tax: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclePlan {
    pub scenario: Scenario,
    pub withdrawal: WithdrawalPlan,
}

/// Runs the scenario, then draws its end capital down to zero, using the
/// total amount invested as the cost basis.
pub fn plan_lifecycle(
    scenario: Scenario,
    settings: &WithdrawalSettings,
) -> Result<LifecyclePlan, ConfigError> {
    let scenario = run_scenario(scenario)?;
    let (end_capital, total_invested) = scenario
        .results
        .as_ref()
        .map(|results| (results.end_capital, results.total_invested))
        .unwrap_or((0.0, 0.0));

    let withdrawal = calculate_withdrawal_plan(
        end_capital,
        settings.duration_years,
        settings.annual_return,
        settings.inflation_rate,
        settings.include_tax,
        total_invested,
    );
    Ok(LifecyclePlan {
        scenario,
        withdrawal,
    })
}
