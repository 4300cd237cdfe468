use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AccumulationResult, ContributionPhase, EtfType, GermanPayroll, LifecyclePlan, MAX_HORIZON_YEARS,
    SalaryBreakdown,
    SavingsMode, Scenario, SimulationConfig, TaxClass, WithdrawalPlan, WithdrawalSettings,
    calculate_withdrawal_plan, plan_lifecycle, run_scenario, simulate_accumulation,
};

const MAX_YEARS: u32 = MAX_HORIZON_YEARS;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliEtfType {
    #[value(alias = "accumulating")]
    Thesaurierend,
    #[value(alias = "distributing")]
    Ausschuettend,
}

impl From<CliEtfType> for EtfType {
    fn from(value: CliEtfType) -> Self {
        match value {
            CliEtfType::Thesaurierend => EtfType::Thesaurierend,
            CliEtfType::Ausschuettend => EtfType::Ausschuettend,
        }
    }
}

impl From<EtfType> for CliEtfType {
    fn from(value: EtfType) -> Self {
        match value {
            EtfType::Thesaurierend => CliEtfType::Thesaurierend,
            EtfType::Ausschuettend => CliEtfType::Ausschuettend,
        }
    }
}

/// Savings-plan flags. Rates are in percent.
#[derive(Debug, Clone, Args)]
pub struct AccumulationArgs {
    #[arg(long, default_value_t = 500.0)]
    monthly_savings: f64,
    #[arg(long, default_value_t = 0.0)]
    initial_capital: f64,
    #[arg(long, default_value_t = 7.0, help = "Expected annual return in percent, e.g. 7")]
    annual_return: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual salary growth in percent")]
    salary_growth: f64,
    #[arg(long, default_value_t = 25)]
    duration: u32,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Share of each net raise added to the monthly savings, in percent"
    )]
    salary_to_savings: f64,
    #[arg(long)]
    include_tax: bool,
    #[arg(long, default_value_t = 60_000.0, help = "Gross yearly salary")]
    base_salary: f64,
    #[arg(long, help = "Apply the 30% partial exemption for equity funds")]
    teilfreistellung: bool,
    #[arg(long, value_enum, default_value_t = CliEtfType::Thesaurierend)]
    etf_type: CliEtfType,
    #[arg(
        long = "phase",
        value_parser = parse_phase,
        help = "Contribution phase START:END:MONTHLY[:RETURN%]; repeat for several phases"
    )]
    phases: Vec<ContributionPhase>,
}

/// Drawdown flags. Rates are in percent.
#[derive(Debug, Clone, Args)]
pub struct WithdrawalArgs {
    #[arg(long, default_value_t = 500_000.0)]
    retirement_capital: f64,
    #[arg(long, default_value_t = 25)]
    duration_years: u32,
    #[arg(long, default_value_t = 5.0, help = "Expected annual return in percent")]
    annual_return: f64,
    #[arg(long, default_value_t = 2.0, help = "Annual inflation in percent")]
    inflation_rate: f64,
    #[arg(long)]
    include_tax: bool,
    #[arg(
        long,
        help = "Amount originally invested (cost basis); defaults to retirement-capital"
    )]
    total_contributions: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WithdrawalRequest {
    retirement_capital: f64,
    duration_years: u32,
    annual_return: f64,
    inflation_rate: f64,
    include_tax: bool,
    total_contributions: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PhasePayload {
    start_year: u32,
    end_year: u32,
    monthly_savings_rate: f64,
    annual_return: Option<f64>,
}

impl From<PhasePayload> for ContributionPhase {
    fn from(value: PhasePayload) -> Self {
        ContributionPhase {
            start_year: value.start_year,
            end_year: value.end_year,
            monthly_savings_rate: value.monthly_savings_rate,
            annual_return: value.annual_return.map(|r| r / 100.0),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AccumulationPayload {
    monthly_savings: Option<f64>,
    initial_capital: Option<f64>,
    annual_return: Option<f64>,
    inflation_rate: Option<f64>,
    salary_growth: Option<f64>,
    duration: Option<u32>,
    salary_to_savings: Option<f64>,
    include_tax: Option<bool>,
    base_salary: Option<f64>,
    teilfreistellung: Option<bool>,
    etf_type: Option<EtfType>,
    phases: Option<Vec<PhasePayload>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    id: Option<String>,
    name: Option<String>,
    savings_mode: Option<SavingsMode>,
    #[serde(flatten)]
    accumulation: AccumulationPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WithdrawalPayload {
    retirement_capital: Option<f64>,
    duration_years: Option<u32>,
    annual_return: Option<f64>,
    inflation_rate: Option<f64>,
    include_tax: Option<bool>,
    total_contributions: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LifecyclePayload {
    scenario: ScenarioPayload,
    withdrawal: WithdrawalPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SalaryPayload {
    gross_salary: Option<f64>,
    tax_class: Option<u8>,
    state: Option<String>,
    age: Option<u32>,
    children: Option<u32>,
    church_tax: Option<bool>,
    public_health_insurance: Option<bool>,
    health_additional_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_phase(raw: &str) -> Result<ContributionPhase, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    if !(3..=4).contains(&parts.len()) {
        return Err(format!("expected START:END:MONTHLY[:RETURN%], got '{raw}'"));
    }
    let start_year = parts[0]
        .parse::<u32>()
        .map_err(|e| format!("invalid phase start year '{}': {e}", parts[0]))?;
    let end_year = parts[1]
        .parse::<u32>()
        .map_err(|e| format!("invalid phase end year '{}': {e}", parts[1]))?;
    let monthly_savings_rate = parts[2]
        .parse::<f64>()
        .map_err(|e| format!("invalid phase savings rate '{}': {e}", parts[2]))?;
    let mut phase = ContributionPhase::new(start_year, end_year, monthly_savings_rate);
    if let Some(raw_return) = parts.get(3) {
        let annual_return = raw_return
            .parse::<f64>()
            .map_err(|e| format!("invalid phase return '{raw_return}': {e}"))?;
        phase = phase.with_return(annual_return / 100.0);
    }
    Ok(phase)
}

fn build_simulation_config(args: AccumulationArgs) -> Result<SimulationConfig, String> {
    if args.duration > MAX_YEARS {
        return Err(format!("--duration must be <= {MAX_YEARS}"));
    }
    if !args.monthly_savings.is_finite() || args.monthly_savings < 0.0 {
        return Err("--monthly-savings must be >= 0".to_string());
    }
    if !args.initial_capital.is_finite() || args.initial_capital < 0.0 {
        return Err("--initial-capital must be >= 0".to_string());
    }
    if !args.annual_return.is_finite() || args.annual_return <= -100.0 {
        return Err("--annual-return must be > -100".to_string());
    }
    if !args.inflation_rate.is_finite() || args.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }
    if !args.salary_growth.is_finite() || args.salary_growth <= -100.0 {
        return Err("--salary-growth must be > -100".to_string());
    }
    if !(0.0..=100.0).contains(&args.salary_to_savings) {
        return Err("--salary-to-savings must be between 0 and 100".to_string());
    }
    if !args.base_salary.is_finite() || args.base_salary < 0.0 {
        return Err("--base-salary must be >= 0".to_string());
    }
    for phase in &args.phases {
        if phase.end_year > MAX_YEARS {
            return Err(format!("--phase end year must be <= {MAX_YEARS}"));
        }
        if phase.end_year < phase.start_year {
            return Err(format!(
                "--phase end year {} is before start year {}",
                phase.end_year, phase.start_year
            ));
        }
    }

    let config = SimulationConfig {
        initial_capital: args.initial_capital,
        duration_years: args.duration as f64,
        default_annual_return: args.annual_return / 100.0,
        inflation_rate: args.inflation_rate / 100.0,
        initial_monthly_contribution: args.monthly_savings,
        salary_growth: args.salary_growth / 100.0,
        salary_to_savings: args.salary_to_savings / 100.0,
        include_tax: args.include_tax,
        base_salary: args.base_salary,
        teilfreistellung: args.teilfreistellung,
        etf_type: args.etf_type.into(),
        phases: args.phases,
    };
    config.validate().map_err(|e| format!("--phase: {e}"))?;
    Ok(config)
}

fn build_withdrawal_request(args: WithdrawalArgs) -> Result<WithdrawalRequest, String> {
    if !args.retirement_capital.is_finite() || args.retirement_capital < 0.0 {
        return Err("--retirement-capital must be >= 0".to_string());
    }
    if args.duration_years > MAX_YEARS {
        return Err(format!("--duration-years must be <= {MAX_YEARS}"));
    }
    if !args.annual_return.is_finite() || args.annual_return <= -100.0 {
        return Err("--annual-return must be > -100".to_string());
    }
    if !args.inflation_rate.is_finite() || args.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }
    let total_contributions = args.total_contributions.unwrap_or(args.retirement_capital);
    if !total_contributions.is_finite() || total_contributions < 0.0 {
        return Err("--total-contributions must be >= 0".to_string());
    }

    Ok(WithdrawalRequest {
        retirement_capital: args.retirement_capital,
        duration_years: args.duration_years,
        annual_return: args.annual_return / 100.0,
        inflation_rate: args.inflation_rate / 100.0,
        include_tax: args.include_tax,
        total_contributions,
    })
}

fn run_withdrawal_request(request: WithdrawalRequest) -> WithdrawalPlan {
    calculate_withdrawal_plan(
        request.retirement_capital,
        request.duration_years,
        request.annual_return,
        request.inflation_rate,
        request.include_tax,
        request.total_contributions,
    )
}

/// Runs one accumulation from command-line flags and renders it as JSON.
pub fn run_accumulation_command(args: AccumulationArgs) -> Result<String, String> {
    let config = build_simulation_config(args)?;
    let result = simulate_accumulation(&config).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&result).map_err(|e| format!("Failed to encode result: {e}"))
}

/// Runs one withdrawal plan from command-line flags and renders it as JSON.
pub fn run_withdrawal_command(args: WithdrawalArgs) -> Result<String, String> {
    let plan = run_withdrawal_request(build_withdrawal_request(args)?);
    serde_json::to_string_pretty(&plan).map_err(|e| format!("Failed to encode result: {e}"))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/accumulation",
            get(accumulation_get_handler).post(accumulation_post_handler),
        )
        .route("/api/scenario", post(scenario_handler))
        .route(
            "/api/withdrawal",
            get(withdrawal_get_handler).post(withdrawal_post_handler),
        )
        .route("/api/lifecycle", post(lifecycle_handler))
        .route("/api/salary", get(salary_get_handler).post(salary_post_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "savings plan HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/accumulation");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn accumulation_get_handler(Query(payload): Query<AccumulationPayload>) -> Response {
    respond(accumulation_from_payload(payload))
}

async fn accumulation_post_handler(Json(payload): Json<AccumulationPayload>) -> Response {
    respond(accumulation_from_payload(payload))
}

async fn scenario_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    respond(scenario_from_payload(payload).and_then(|s| run_scenario(s).map_err(|e| e.to_string())))
}

async fn withdrawal_get_handler(Query(payload): Query<WithdrawalPayload>) -> Response {
    respond(withdrawal_request_from_payload(payload).map(run_withdrawal_request))
}

async fn withdrawal_post_handler(Json(payload): Json<WithdrawalPayload>) -> Response {
    respond(withdrawal_request_from_payload(payload).map(run_withdrawal_request))
}

async fn lifecycle_handler(Json(payload): Json<LifecyclePayload>) -> Response {
    respond(lifecycle_from_payload(payload))
}

async fn salary_get_handler(Query(payload): Query<SalaryPayload>) -> Response {
    respond(salary_from_payload(payload))
}

async fn salary_post_handler(Json(payload): Json<SalaryPayload>) -> Response {
    respond(salary_from_payload(payload))
}

fn respond<T: Serialize>(result: Result<T, String>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(msg) => {
            warn!(error = %msg, "rejected request");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn default_accumulation_args() -> AccumulationArgs {
    AccumulationArgs {
        monthly_savings: 500.0,
        initial_capital: 0.0,
        annual_return: 7.0,
        inflation_rate: 2.0,
        salary_growth: 0.0,
        duration: 25,
        salary_to_savings: 0.0,
        include_tax: false,
        base_salary: 60_000.0,
        teilfreistellung: false,
        etf_type: CliEtfType::Thesaurierend,
        phases: Vec::new(),
    }
}

fn default_withdrawal_args() -> WithdrawalArgs {
    WithdrawalArgs {
        retirement_capital: 500_000.0,
        duration_years: 25,
        annual_return: 5.0,
        inflation_rate: 2.0,
        include_tax: false,
        total_contributions: None,
    }
}

fn accumulation_args_from_payload(payload: AccumulationPayload) -> AccumulationArgs {
    let mut args = default_accumulation_args();
    if let Some(v) = payload.monthly_savings {
        args.monthly_savings = v;
    }
    if let Some(v) = payload.initial_capital {
        args.initial_capital = v;
    }
    if let Some(v) = payload.annual_return {
        args.annual_return = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.salary_growth {
        args.salary_growth = v;
    }
    if let Some(v) = payload.duration {
        args.duration = v;
    }
    if let Some(v) = payload.salary_to_savings {
        args.salary_to_savings = v;
    }
    if let Some(v) = payload.include_tax {
        args.include_tax = v;
    }
    if let Some(v) = payload.base_salary {
        args.base_salary = v;
    }
    if let Some(v) = payload.teilfreistellung {
        args.teilfreistellung = v;
    }
    if let Some(v) = payload.etf_type {
        args.etf_type = v.into();
    }
    if let Some(phases) = payload.phases {
        args.phases = phases.into_iter().map(ContributionPhase::from).collect();
    }
    args
}

fn accumulation_from_payload(payload: AccumulationPayload) -> Result<AccumulationResult, String> {
    let config = build_simulation_config(accumulation_args_from_payload(payload))?;
    simulate_accumulation(&config).map_err(|e| e.to_string())
}

fn scenario_from_payload(payload: ScenarioPayload) -> Result<Scenario, String> {
    let savings_mode = payload.savings_mode.unwrap_or_else(|| {
        match payload.accumulation.phases.as_ref() {
            Some(phases) if !phases.is_empty() => SavingsMode::MultiPhase,
            _ => SavingsMode::Simple,
        }
    });
    let id = payload.id.unwrap_or_else(|| "1".to_string());
    let name = payload.name.unwrap_or_else(|| format!("Szenario {id}"));
    let config = build_simulation_config(accumulation_args_from_payload(payload.accumulation))?;

    let mut scenario = Scenario::new(id, name);
    scenario.savings_mode = savings_mode;
    scenario.initial_capital = config.initial_capital;
    scenario.base_salary = config.base_salary;
    scenario.annual_return = config.default_annual_return;
    scenario.inflation_rate = config.inflation_rate;
    scenario.salary_growth = config.salary_growth;
    scenario.salary_to_savings = config.salary_to_savings;
    scenario.include_tax = config.include_tax;
    scenario.teilfreistellung = config.teilfreistellung;
    scenario.etf_type = config.etf_type;
    scenario.monthly_savings = config.initial_monthly_contribution;
    scenario.duration = config.duration_years as u32;
    scenario.phases = config.phases;
    Ok(scenario)
}

fn withdrawal_args_from_payload(payload: WithdrawalPayload) -> WithdrawalArgs {
    let mut args = default_withdrawal_args();
    if let Some(v) = payload.retirement_capital {
        args.retirement_capital = v;
    }
    if let Some(v) = payload.duration_years {
        args.duration_years = v;
    }
    if let Some(v) = payload.annual_return {
        args.annual_return = v;
    }
    if let Some(v) = payload.inflation_rate {
        args.inflation_rate = v;
    }
    if let Some(v) = payload.include_tax {
        args.include_tax = v;
    }
    if payload.total_contributions.is_some() {
        args.total_contributions = payload.total_contributions;
    }
    args
}

fn withdrawal_request_from_payload(payload: WithdrawalPayload) -> Result<WithdrawalRequest, String> {
    build_withdrawal_request(withdrawal_args_from_payload(payload))
}

fn lifecycle_from_payload(payload: LifecyclePayload) -> Result<LifecyclePlan, String> {
    let scenario = scenario_from_payload(payload.scenario)?;
    // Capital and cost basis come from the accumulation.
    let request = withdrawal_request_from_payload(WithdrawalPayload {
        retirement_capital: Some(0.0),
        total_contributions: Some(0.0),
        ..payload.withdrawal
    })?;
    let settings = WithdrawalSettings {
        duration_years: request.duration_years,
        annual_return: request.annual_return,
        inflation_rate: request.inflation_rate,
        include_tax: request.include_tax,
    };
    plan_lifecycle(scenario, &settings).map_err(|e| e.to_string())
}

fn salary_from_payload(payload: SalaryPayload) -> Result<SalaryBreakdown, String> {
    let gross = payload.gross_salary.unwrap_or(60_000.0);
    if !gross.is_finite() || gross < 0.0 {
        return Err("grossSalary must be >= 0".to_string());
    }

    let mut payroll = GermanPayroll::default();
    if let Some(class) = payload.tax_class {
        payroll.tax_class = TaxClass::from_number(class)
            .ok_or_else(|| format!("taxClass must be between 1 and 6, got {class}"))?;
    }
    if let Some(state) = payload.state {
        payroll.state = state;
    }
    if let Some(v) = payload.age {
        payroll.age = v;
    }
    if let Some(v) = payload.children {
        payroll.children = v;
    }
    if let Some(v) = payload.church_tax {
        payroll.church_tax = v;
    }
    if let Some(v) = payload.public_health_insurance {
        payroll.public_health_insurance = v;
    }
    if let Some(v) = payload.health_additional_rate {
        if !(0.0..=10.0).contains(&v) {
            return Err("healthAdditionalRate must be between 0 and 10".to_string());
        }
        payroll.health_additional_rate = v;
    }
    Ok(payroll.calculate_taxes(gross))
}
