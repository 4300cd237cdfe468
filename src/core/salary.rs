use serde::{Deserialize, Serialize};

/// Converts a gross yearly salary into the yearly amount paid out.
pub trait NetSalary {
    fn net_salary(&self, gross_yearly: f64) -> f64;
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaxClass {
    #[default]
    I,
    II,
    III,
    IV,
    V,
    VI,
}

impl TaxClass {
    pub fn from_number(class: u8) -> Option<Self> {
        match class {
            1 => Some(TaxClass::I),
            2 => Some(TaxClass::II),
            3 => Some(TaxClass::III),
            4 => Some(TaxClass::IV),
            5 => Some(TaxClass::V),
            6 => Some(TaxClass::VI),
            _ => None,
        }
    }
}

// 2024 tariff and social insurance parameters.
const BASIC_ALLOWANCE: f64 = 11_604.0;
const EMPLOYEE_LUMP_SUM: f64 = 1_230.0;
const SPECIAL_EXPENSES_LUMP_SUM: f64 = 36.0;
const SINGLE_PARENT_RELIEF: f64 = 4_260.0;
const SOLIDARITY_EXEMPTION: f64 = 18_130.0;
const SOLIDARITY_RATE: f64 = 0.055;
const SOLIDARITY_PHASE_IN_RATE: f64 = 0.119;
const PENSION_CEILING: f64 = 90_600.0;
const HEALTH_CEILING: f64 = 62_100.0;
const PENSION_RATE: f64 = 0.093;
const UNEMPLOYMENT_RATE: f64 = 0.013;
const HEALTH_RATE: f64 = 0.073;
const CARE_RATE: f64 = 0.017;
const CARE_CHILDLESS_SURCHARGE: f64 = 0.006;
const CARE_CHILDLESS_MIN_AGE: u32 = 23;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryBreakdown {
    pub gross_yearly: f64,
    pub income_tax: f64,
    pub solidarity_surcharge: f64,
    pub church_tax: f64,
    pub pension_insurance: f64,
    pub unemployment_insurance: f64,
    pub health_insurance: f64,
    pub care_insurance: f64,
    pub total_taxes: f64,
    pub total_social_insurance: f64,
    pub net_yearly: f64,
    pub net_monthly: f64,
}

/// Employee payroll deductions under German wage tax and social insurance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GermanPayroll {
    pub tax_class: TaxClass,
    /// Two-letter federal state code, e.g. `by` or `nw`.
    pub state: String,
    pub age: u32,
    pub children: u32,
    pub church_tax: bool,
    pub public_health_insurance: bool,
    /// Health insurer's additional contribution in percent, split with the employer.
    pub health_additional_rate: f64,
}

impl Default for GermanPayroll {
    fn default() -> Self {
        Self {
            tax_class: TaxClass::I,
            state: "nw".to_string(),
            age: 30,
            children: 0,
            church_tax: false,
            public_health_insurance: true,
            health_additional_rate: 1.7,
        }
    }
}

impl GermanPayroll {
    pub fn calculate_taxes(&self, gross_yearly: f64) -> SalaryBreakdown {
        let gross = if gross_yearly.is_finite() {
            gross_yearly.max(0.0)
        } else {
            0.0
        };

        let pension_insurance = gross.min(PENSION_CEILING) * PENSION_RATE;
        let unemployment_insurance = gross.min(PENSION_CEILING) * UNEMPLOYMENT_RATE;
        let (health_insurance, care_insurance) = if self.public_health_insurance {
            let base = gross.min(HEALTH_CEILING);
            let additional = self.health_additional_rate.max(0.0) / 100.0 / 2.0;
            let care_rate = if self.children == 0 && self.age >= CARE_CHILDLESS_MIN_AGE {
                CARE_RATE + CARE_CHILDLESS_SURCHARGE
            } else {
                CARE_RATE
            };
            (base * (HEALTH_RATE + additional), base * care_rate)
        } else {
            (0.0, 0.0)
        };

        let provision_deduction = pension_insurance + health_insurance + care_insurance;
        let taxable_income =
            (gross - EMPLOYEE_LUMP_SUM - SPECIAL_EXPENSES_LUMP_SUM - provision_deduction).max(0.0);
        let income_tax = self.income_tax(taxable_income);
        let solidarity_surcharge = self.solidarity_surcharge(income_tax);
        let church_tax = if self.church_tax {
            income_tax * self.church_tax_rate()
        } else {
            0.0
        };

        let total_taxes = income_tax + solidarity_surcharge + church_tax;
        let total_social_insurance =
            pension_insurance + unemployment_insurance + health_insurance + care_insurance;
        let net_yearly = (gross - total_taxes - total_social_insurance).max(0.0);

        SalaryBreakdown {
            gross_yearly: gross,
            income_tax,
            solidarity_surcharge,
            church_tax,
            pension_insurance,
            unemployment_insurance,
            health_insurance,
            care_insurance,
            total_taxes,
            total_social_insurance,
            net_yearly,
            net_monthly: net_yearly / 12.0,
        }
    }

    fn income_tax(&self, taxable_income: f64) -> f64 {
        match self.tax_class {
            TaxClass::I | TaxClass::IV => income_tax_tariff(taxable_income),
            TaxClass::II => income_tax_tariff(taxable_income - SINGLE_PARENT_RELIEF),
            TaxClass::III => 2.0 * income_tax_tariff(taxable_income / 2.0),
            // No basic allowance on the second job / lower-earning spouse.
            TaxClass::V | TaxClass::VI => income_tax_tariff(taxable_income + BASIC_ALLOWANCE),
        }
    }

    fn solidarity_surcharge(&self, income_tax: f64) -> f64 {
        let exemption = if self.tax_class == TaxClass::III {
            2.0 * SOLIDARITY_EXEMPTION
        } else {
            SOLIDARITY_EXEMPTION
        };
        if income_tax <= exemption {
            return 0.0;
        }
        (income_tax * SOLIDARITY_RATE).min((income_tax - exemption) * SOLIDARITY_PHASE_IN_RATE)
    }

    fn church_tax_rate(&self) -> f64 {
        match self.state.trim().to_lowercase().as_str() {
            "by" | "bw" => 0.08,
            _ => 0.09,
        }
    }
}

impl NetSalary for GermanPayroll {
    fn net_salary(&self, gross_yearly: f64) -> f64 {
        self.calculate_taxes(gross_yearly).net_yearly
    }
}

/// Income tax on a taxable income under the 2024 tariff (§32a EStG).
pub fn income_tax_tariff(taxable_income: f64) -> f64 {
    let zve = taxable_income.max(0.0).floor();
    let tax = if zve <= BASIC_ALLOWANCE {
        0.0
    } else if zve <= 17_005.0 {
        let y = (zve - BASIC_ALLOWANCE) / 10_000.0;
        (922.98 * y + 1_400.0) * y
    } else if zve <= 66_760.0 {
        let z = (zve - 17_005.0) / 10_000.0;
        (181.19 * z + 2_397.0) * z + 1_025.38
    } else if zve <= 277_825.0 {
        0.42 * zve - 10_602.13
    } else {
        0.45 * zve - 18_936.88
    };
    tax.floor()
}
