//! Eligibility envelope ("plafond") calculator.
//!
//! Each product has its own closed-form policy. Monetary values are computed in `f64` and
//! floored to whole currency units only when the [`Plafond`] is built, so intermediate
//! ratios keep their precision. Every function here is pure and never fails: a product the
//! calculator does not know, or a customer the policy excludes, gets the zero envelope.

use serde::{Deserialize, Serialize};

/// Credit limit and tenor bounds for one product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plafond {
    pub min_limit: u64,
    pub max_limit: u64,
    pub min_tenor: u32,
    pub max_tenor: u32,
}

impl Plafond {
    pub const ZERO: Plafond = Plafond {
        min_limit: 0,
        max_limit: 0,
        min_tenor: 0,
        max_tenor: 0,
    };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Clamps the lower bounds to the upper bounds.
    fn clamped(self) -> Self {
        Self {
            min_limit: self.min_limit.min(self.max_limit),
            max_limit: self.max_limit,
            min_tenor: self.min_tenor.min(self.max_tenor),
            max_tenor: self.max_tenor,
        }
    }
}

/// Products with an eligibility policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductCode {
    Mitraguna,
    Pensiun,
    Prapensiun,
    Griya,
    Oto,
    HasanahCard,
}

impl ProductCode {
    pub const ALL: [ProductCode; 6] = [
        ProductCode::Mitraguna,
        ProductCode::Pensiun,
        ProductCode::Prapensiun,
        ProductCode::Griya,
        ProductCode::Oto,
        ProductCode::HasanahCard,
    ];

    /// Case-insensitive lookup of the code emitted by the prediction model.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "mitraguna" => Some(ProductCode::Mitraguna),
            "pensiun" => Some(ProductCode::Pensiun),
            "prapensiun" => Some(ProductCode::Prapensiun),
            "griya" => Some(ProductCode::Griya),
            "oto" => Some(ProductCode::Oto),
            "hasanahcard" => Some(ProductCode::HasanahCard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCode::Mitraguna => "mitraguna",
            ProductCode::Pensiun => "pensiun",
            ProductCode::Prapensiun => "prapensiun",
            ProductCode::Griya => "griya",
            ProductCode::Oto => "oto",
            ProductCode::HasanahCard => "hasanahcard",
        }
    }
}

// Shared tenor ceiling for retiree products: 15 years.
const MAX_TENOR_CEILING_MONTHS: i64 = 15 * 12;

// Mitraguna (payroll installment loan)
const MITRAGUNA_DBR: f64 = 0.40;
const MITRAGUNA_MAX_MULTIPLIER: f64 = 72.0;
const MITRAGUNA_MIN_MULTIPLIER: f64 = 12.0;
const MITRAGUNA_AGE_THRESHOLD: u32 = 50;
const MITRAGUNA_MULTIPLIER_STEP_PER_YEAR: f64 = 6.0;
const MITRAGUNA_PAYROLL_UPLIFT: f64 = 1.10;
const MITRAGUNA_CEILING: f64 = 1_500_000_000.0;
const MITRAGUNA_MIN_TENOR: u32 = 12;
const MITRAGUNA_MAX_TENOR: u32 = 72;

// Pensiun (retiree loan)
const PENSIUN_DBR: f64 = 0.80;
const PENSIUN_AVERAGE_END_PRICE: f64 = 90.0;
const PENSIUN_MAX_AGE: i64 = 75;
const PENSIUN_MIN_TENOR: u32 = 12;

// Prapensiun (pre-retirement loan)
const PRAPENSIUN_DBR: f64 = 0.75;
const PRAPENSIUN_AVERAGE_END_PRICE: f64 = 110.0;
const RETIREMENT_AGE: i64 = 58;
const PRAPENSIUN_MAX_AGE: i64 = 75;
const PRAPENSIUN_WINDOW_YEARS: i64 = 10;
const PRAPENSIUN_MIN_TENOR: u32 = 12;

// Hasanah Card (credit card)
const HASANAHCARD_MIN_FACTOR: f64 = 1.0;
const HASANAHCARD_CEILING: f64 = 80_000_000.0;

/// Parameters of the annuity-style secured loans.
#[derive(Debug, Clone, Copy)]
struct AnnuityPolicy {
    dbr: f64,
    /// Annual margin rate.
    margin: f64,
    min_tenor: u32,
    max_tenor: u32,
    /// The loan must mature before the customer reaches this age.
    max_age_at_maturity: u32,
    payroll_uplift: f64,
    ceiling: f64,
}

const GRIYA: AnnuityPolicy = AnnuityPolicy {
    dbr: 0.40,
    margin: 0.085,
    min_tenor: 12,
    max_tenor: 240,
    max_age_at_maturity: 70,
    payroll_uplift: 1.10,
    ceiling: 5_000_000_000.0,
};

const OTO: AnnuityPolicy = AnnuityPolicy {
    dbr: 0.35,
    margin: 0.065,
    min_tenor: 12,
    max_tenor: 60,
    max_age_at_maturity: 65,
    payroll_uplift: 1.05,
    ceiling: 1_000_000_000.0,
};

/// Computes the envelope for `product_code`. Unknown codes yield [`Plafond::ZERO`].
pub fn compute_envelope(
    product_code: &str,
    age: u32,
    monthly_income: i64,
    has_payroll: bool,
) -> Plafond {
    let income = monthly_income.max(0) as f64;

    let plafond = match ProductCode::parse(product_code) {
        Some(ProductCode::Mitraguna) => mitraguna(age, income, has_payroll),
        Some(ProductCode::Pensiun) => pensiun(age, income),
        Some(ProductCode::Prapensiun) => prapensiun(age, income),
        Some(ProductCode::Griya) => griya(age, income, has_payroll),
        Some(ProductCode::Oto) => oto(age, income, has_payroll),
        Some(ProductCode::HasanahCard) => hasanahcard(age, income),
        None => {
            tracing::debug!("No eligibility policy for product '{}'", product_code);
            Plafond::ZERO
        }
    };

    tracing::debug!(
        "Plafond for {} (age {}, income {}, payroll {}): limit {}..{}, tenor {}..{}",
        product_code,
        age,
        monthly_income,
        has_payroll,
        plafond.min_limit,
        plafond.max_limit,
        plafond.min_tenor,
        plafond.max_tenor
    );

    plafond
}

/// Payroll installment loan: multiplier of the affordable installment, shrinking after 50.
pub fn mitraguna(age: u32, income: f64, has_payroll: bool) -> Plafond {
    let installment = income * MITRAGUNA_DBR;

    let multiplier = if age > MITRAGUNA_AGE_THRESHOLD {
        let years_over = f64::from(age - MITRAGUNA_AGE_THRESHOLD);
        (MITRAGUNA_MAX_MULTIPLIER - years_over * MITRAGUNA_MULTIPLIER_STEP_PER_YEAR)
            .max(MITRAGUNA_MIN_MULTIPLIER)
    } else {
        MITRAGUNA_MAX_MULTIPLIER
    };

    let mut max_limit = installment * multiplier;
    if has_payroll {
        max_limit *= MITRAGUNA_PAYROLL_UPLIFT;
    }
    let max_limit = max_limit.min(MITRAGUNA_CEILING);
    let min_limit = installment * MITRAGUNA_MIN_MULTIPLIER;

    Plafond {
        min_limit: floor_money(min_limit),
        max_limit: floor_money(max_limit),
        min_tenor: MITRAGUNA_MIN_TENOR,
        max_tenor: MITRAGUNA_MAX_TENOR,
    }
    .clamped()
}

/// Retiree loan: no eligibility gate, but the tenor must end by age 75 and within 15 years.
pub fn pensiun(age: u32, income: f64) -> Plafond {
    let tenor_cap = ((PENSIUN_MAX_AGE - i64::from(age)) * 12).min(MAX_TENOR_CEILING_MONTHS);
    if tenor_cap <= 0 {
        return Plafond::ZERO;
    }

    let max_limit = PENSIUN_DBR * income * PENSIUN_AVERAGE_END_PRICE;

    Plafond {
        min_limit: 0,
        max_limit: floor_money(max_limit),
        min_tenor: PENSIUN_MIN_TENOR,
        max_tenor: months(tenor_cap),
    }
    .clamped()
}

/// Pre-retirement loan: only within ten years of retirement. The tenor spans a
/// before-retirement and an after-retirement segment, each capped at 15 years, and the
/// whole loan must end by age 75.
pub fn prapensiun(age: u32, income: f64) -> Plafond {
    let years_to_retirement = RETIREMENT_AGE - i64::from(age);
    if years_to_retirement <= 0 || years_to_retirement > PRAPENSIUN_WINDOW_YEARS {
        return Plafond::ZERO;
    }

    let before_retirement = (years_to_retirement * 12).min(MAX_TENOR_CEILING_MONTHS);
    let after_retirement =
        ((PRAPENSIUN_MAX_AGE - RETIREMENT_AGE) * 12).min(MAX_TENOR_CEILING_MONTHS);
    let age_cap = (PRAPENSIUN_MAX_AGE - i64::from(age)) * 12;
    let max_tenor = (before_retirement + after_retirement).min(age_cap);

    let max_limit = PRAPENSIUN_DBR * income * PRAPENSIUN_AVERAGE_END_PRICE;

    Plafond {
        min_limit: 0,
        max_limit: floor_money(max_limit),
        min_tenor: PRAPENSIUN_MIN_TENOR,
        max_tenor: months(max_tenor),
    }
    .clamped()
}

/// Mortgage.
pub fn griya(age: u32, income: f64, has_payroll: bool) -> Plafond {
    annuity_envelope(&GRIYA, age, income, has_payroll)
}

/// Auto loan.
pub fn oto(age: u32, income: f64, has_payroll: bool) -> Plafond {
    annuity_envelope(&OTO, age, income, has_payroll)
}

/// Credit card: income times an age-stepped factor. Tenor does not apply.
pub fn hasanahcard(age: u32, income: f64) -> Plafond {
    let factor = match age {
        0..=34 => 2.5,
        35..=44 => 2.0,
        45..=59 => 1.5,
        _ => 1.0,
    };

    let max_limit = (income * factor).min(HASANAHCARD_CEILING);
    let min_limit = income * HASANAHCARD_MIN_FACTOR;

    Plafond {
        min_limit: floor_money(min_limit),
        max_limit: floor_money(max_limit),
        min_tenor: 0,
        max_tenor: 0,
    }
    .clamped()
}

/// Principal affordable with `installment` per month over `tenor_months` at a flat margin.
pub fn annuity_limit(installment: f64, tenor_months: u32, annual_margin: f64) -> f64 {
    let tenor = f64::from(tenor_months);
    (installment * tenor) / (1.0 + annual_margin * tenor / 12.0)
}

fn annuity_envelope(policy: &AnnuityPolicy, age: u32, income: f64, has_payroll: bool) -> Plafond {
    if age >= policy.max_age_at_maturity {
        return Plafond::ZERO;
    }

    let age_cap = (policy.max_age_at_maturity - age).saturating_mul(12);
    let max_tenor = policy.max_tenor.min(age_cap);
    if max_tenor < policy.min_tenor {
        return Plafond::ZERO;
    }

    let installment = income * policy.dbr;
    let min_limit = annuity_limit(installment, policy.min_tenor, policy.margin);
    let mut max_limit = annuity_limit(installment, max_tenor, policy.margin);
    if has_payroll {
        max_limit *= policy.payroll_uplift;
    }
    let max_limit = max_limit.min(policy.ceiling);

    Plafond {
        min_limit: floor_money(min_limit),
        max_limit: floor_money(max_limit),
        min_tenor: policy.min_tenor,
        max_tenor,
    }
    .clamped()
}

fn floor_money(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}

fn months(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
