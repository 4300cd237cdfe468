use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fund type, which decides when capital-gains tax is levied.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtfType {
    /// Accumulating fund, taxed yearly through the Vorabpauschale.
    #[default]
    #[serde(alias = "accumulating")]
    Thesaurierend,
    /// Distributing fund, taxed on every distribution.
    #[serde(
        rename = "ausschüttend",
        alias = "ausschuettend",
        alias = "distributing"
    )]
    Ausschuettend,
}

/// Longest horizon a simulation runs; longer durations and phase ends are
/// clamped to it.
pub const MAX_HORIZON_YEARS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionPhase {
    pub start_year: u32,
    pub end_year: u32,
    pub monthly_savings_rate: f64,
    /// Overrides the scenario's default return while the phase is active.
    pub annual_return: Option<f64>,
}

impl ContributionPhase {
    pub fn new(start_year: u32, end_year: u32, monthly_savings_rate: f64) -> Self {
        Self {
            start_year,
            end_year,
            monthly_savings_rate,
            annual_return: None,
        }
    }

    pub fn with_return(mut self, annual_return: f64) -> Self {
        self.annual_return = Some(annual_return);
        self
    }

    pub fn covers(&self, year: u32) -> bool {
        self.start_year <= year && year <= self.end_year
    }

    /// Clamps both years into `1..=MAX_HORIZON_YEARS` with
    /// `end_year >= start_year`, a non-negative finite savings rate, and
    /// drops a non-finite return override.
    pub fn normalized(self) -> Self {
        let start_year = self.start_year.clamp(1, MAX_HORIZON_YEARS);
        let end_year = self.end_year.clamp(start_year, MAX_HORIZON_YEARS);
        let monthly_savings_rate = if self.monthly_savings_rate.is_finite() {
            self.monthly_savings_rate.max(0.0)
        } else {
            0.0
        };
        Self {
            start_year,
            end_year,
            monthly_savings_rate,
            annual_return: self.annual_return.filter(|r| r.is_finite()),
        }
    }

    fn overlaps(&self, other: &ContributionPhase) -> bool {
        self.start_year <= other.end_year && other.start_year <= self.end_year
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(
        "contribution phase {first} (years {first_start}-{first_end}) overlaps phase {second} (years {second_start}-{second_end})"
    )]
    OverlappingPhases {
        first: usize,
        first_start: u32,
        first_end: u32,
        second: usize,
        second_start: u32,
        second_end: u32,
    },
}

/// Normalizes every phase and rejects overlapping year ranges.
pub fn normalize_phases(phases: &[ContributionPhase]) -> Result<Vec<ContributionPhase>, ConfigError> {
    let normalized: Vec<ContributionPhase> = phases.iter().map(|p| p.normalized()).collect();
    for (i, a) in normalized.iter().enumerate() {
        for (j, b) in normalized.iter().enumerate().skip(i + 1) {
            if a.overlaps(b) {
                return Err(ConfigError::OverlappingPhases {
                    first: i + 1,
                    first_start: a.start_year,
                    first_end: a.end_year,
                    second: j + 1,
                    second_start: b.start_year,
                    second_end: b.end_year,
                });
            }
        }
    }
    Ok(normalized)
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    pub duration_years: f64,
    pub default_annual_return: f64,
    pub inflation_rate: f64,
    pub initial_monthly_contribution: f64,
    pub salary_growth: f64,
    pub salary_to_savings: f64,
    pub include_tax: bool,
    pub base_salary: f64,
    pub teilfreistellung: bool,
    pub etf_type: EtfType,
    pub phases: Vec<ContributionPhase>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: 0.0,
            duration_years: 0.0,
            default_annual_return: 0.0,
            inflation_rate: 0.0,
            initial_monthly_contribution: 0.0,
            salary_growth: 0.0,
            salary_to_savings: 0.0,
            include_tax: false,
            base_salary: 60_000.0,
            teilfreistellung: false,
            etf_type: EtfType::Thesaurierend,
            phases: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// `max(duration, last phase end)` with phases, `duration` without,
    /// never beyond `MAX_HORIZON_YEARS`.
    pub fn total_years(&self) -> f64 {
        let duration = if self.duration_years.is_finite() {
            self.duration_years.clamp(0.0, MAX_HORIZON_YEARS as f64)
        } else {
            0.0
        };
        self.phases
            .iter()
            .map(|p| p.normalized().end_year as f64)
            .fold(duration, f64::max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_phases(&self.phases).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlySnapshot {
    pub year: u32,
    pub capital: f64,
    pub real_capital: f64,
    pub total_invested: f64,
    pub monthly_savings: f64,
    pub yearly_salary: f64,
    pub net_salary: f64,
    pub taxes_paid: f64,
    pub cumulative_taxes_paid: f64,
    pub cost_basis: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationResult {
    pub final_nominal: f64,
    pub final_real: f64,
    pub total_invested: f64,
    pub total_return: f64,
    pub total_taxes_paid: f64,
    pub yearly_data: Vec<YearlySnapshot>,
    pub cost_basis: f64,
    /// `None` when the cash flows admit no internal rate of return.
    pub annualized_return: Option<f64>,
    pub phases: Vec<ContributionPhase>,
    pub duration_years: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalYearRecord {
    pub year: u32,
    pub start_capital: f64,
    pub capital_after_returns: f64,
    pub gross_withdrawal: f64,
    pub taxes_paid: f64,
    pub net_withdrawal: f64,
    pub end_capital: f64,
    pub remaining_cost_basis: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResult {
    pub yearly_data: Vec<WithdrawalYearRecord>,
    pub final_capital: f64,
    pub base_annual_withdrawal: f64,
    pub monthly_gross_withdrawal: f64,
    pub monthly_net_withdrawal: f64,
    pub total_gross_withdrawn: f64,
    pub total_net_withdrawn: f64,
    pub total_taxes_paid: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_phase_stays_within_horizon() {
        let phase = ContributionPhase::new(1, 400_000_000, 10.0).normalized();
        assert_eq!(phase.start_year, 1);
        assert_eq!(phase.end_year, MAX_HORIZON_YEARS);

        let late = ContributionPhase::new(u32::MAX, u32::MAX, 10.0).normalized();
        assert_eq!(late.start_year, MAX_HORIZON_YEARS);
        assert_eq!(late.end_year, MAX_HORIZON_YEARS);

        let inverted = ContributionPhase::new(0, 0, -5.0).normalized();
        assert_eq!((inverted.start_year, inverted.end_year), (1, 1));
        assert_eq!(inverted.monthly_savings_rate, 0.0);
    }

    #[test]
    fn total_years_is_capped() {
        let config = SimulationConfig {
            duration_years: 1e12,
            ..SimulationConfig::default()
        };
        assert_eq!(config.total_years(), MAX_HORIZON_YEARS as f64);

        let with_phase = SimulationConfig {
            duration_years: 5.0,
            phases: vec![ContributionPhase::new(1, u32::MAX, 10.0)],
            ..SimulationConfig::default()
        };
        assert_eq!(with_phase.total_years(), MAX_HORIZON_YEARS as f64);
        assert_eq!(SimulationConfig::default().total_years(), 0.0);
    }
}
