use serde::Serialize;

use super::config::TaxRules;
use super::error::{SimError, SimResult};

fn checked_amount(label: &str, value: f64) -> SimResult<f64> {
    if !value.is_finite() {
        return Err(SimError::numerical(format!("{label} must be finite, got {value}")));
    }
    if value < 0.0 {
        return Err(SimError::numerical(format!(
            "{label} must be >= 0, got {value}; net losses before taxing"
        )));
    }
    Ok(value)
}

pub fn personal_allowance(rules: &TaxRules, income: f64) -> SimResult<f64> {
    let income = checked_amount("income", income)?;
    let mut allowance = rules.personal_allowance.max(0.0);
    if income > rules.allowance_taper_threshold {
        let reduction = (income - rules.allowance_taper_threshold) * rules.allowance_taper_ratio;
        allowance = (allowance - reduction).max(0.0);
    }
    Ok(allowance)
}

pub fn income_tax(rules: &TaxRules, income: f64) -> SimResult<f64> {
    let income = checked_amount("income", income)?;
    let allowance = personal_allowance(rules, income)?;
    let taxable = (income - allowance).max(0.0);

    let basic_width = rules.basic_rate_band.max(0.0);
    let higher_width = (rules.additional_rate_threshold - basic_width).max(0.0);

    let basic_taxable = taxable.min(basic_width);
    let higher_taxable = (taxable - basic_taxable).min(higher_width).max(0.0);
    let additional_taxable = (taxable - basic_taxable - higher_taxable).max(0.0);

    Ok(basic_taxable * rules.basic_rate
        + higher_taxable * rules.higher_rate
        + additional_taxable * rules.additional_rate)
}

pub fn national_insurance(rules: &TaxRules, earned_income: f64) -> SimResult<f64> {
    let earned = checked_amount("earned income", earned_income)?;
    let main_band = (earned.min(rules.ni_upper_earnings_limit) - rules.ni_primary_threshold).max(0.0);
    let upper_band = (earned - rules.ni_upper_earnings_limit).max(0.0);
    Ok(main_band * rules.ni_main_rate + upper_band * rules.ni_upper_rate)
}

/// CGT on the year's realised gains. The taxable excess over the exempt amount
/// fills whatever basic-rate band `other_taxable_income` leaves unused at the
/// lower rate; the remainder is charged at the higher rate.
pub fn capital_gains_tax(rules: &TaxRules, gains: f64, other_taxable_income: f64) -> SimResult<f64> {
    let gains = checked_amount("capital gains", gains)?;
    let other = checked_amount("other taxable income", other_taxable_income)?;

    let taxable_gain = (gains - rules.cgt_exempt_amount.max(0.0)).max(0.0);
    if taxable_gain <= 0.0 {
        return Ok(0.0);
    }

    let other_taxable = (other - personal_allowance(rules, other)?).max(0.0);
    let unused_basic = (rules.basic_rate_band - other_taxable).max(0.0);
    let at_lower = taxable_gain.min(unused_basic);
    let at_higher = taxable_gain - at_lower;

    Ok(at_lower * rules.cgt_lower_rate + at_higher * rules.cgt_higher_rate)
}

pub fn annual_allowance_taper(
    rules: &TaxRules,
    adjusted_income: f64,
    threshold_income: f64,
) -> SimResult<f64> {
    let adjusted = checked_amount("adjusted income", adjusted_income)?;
    let threshold = checked_amount("threshold income", threshold_income)?;

    let full = rules.pension_annual_allowance;
    if threshold <= rules.pension_threshold_income
        || adjusted <= rules.pension_adjusted_income_threshold
    {
        return Ok(full);
    }

    let reduction = (adjusted - rules.pension_adjusted_income_threshold) * rules.pension_taper_ratio;
    Ok((full - reduction).max(rules.pension_minimum_allowance))
}

pub fn personal_savings_allowance(rules: &TaxRules, taxable_income: f64) -> SimResult<f64> {
    let income = checked_amount("taxable income", taxable_income)?;
    let allowance = if income <= rules.basic_rate_limit() {
        rules.savings_allowance_basic
    } else if income <= rules.additional_rate_threshold {
        rules.savings_allowance_higher
    } else {
        rules.savings_allowance_additional
    };
    Ok(allowance)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxYearInputs {
    pub gross_salary: f64,
    pub employee_pension_contribution: f64,
    pub employer_pension_contribution: f64,
    pub state_pension: f64,
    pub pension_income: f64,
    pub annual_allowance_excess: f64,
    pub savings_interest: f64,
    pub capital_gains: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxYearFigures {
    /// Income the banded rates apply to, before the personal allowance.
    pub total_income: f64,
    pub personal_allowance: f64,
    pub income_tax: f64,
    pub national_insurance: f64,
    pub capital_gains: f64,
    pub capital_gains_tax: f64,
    pub savings_allowance: f64,
    pub taxable_interest: f64,
    pub annual_allowance: f64,
    pub annual_allowance_excess: f64,
}

impl TaxYearFigures {
    pub fn total_tax(&self) -> f64 {
        self.income_tax + self.national_insurance + self.capital_gains_tax
    }
}

pub fn compute_tax_year(rules: &TaxRules, inputs: &TaxYearInputs) -> SimResult<TaxYearFigures> {
    let salary = checked_amount("gross salary", inputs.gross_salary)?;
    let employee = checked_amount("employee contribution", inputs.employee_pension_contribution)?;
    let employer = checked_amount("employer contribution", inputs.employer_pension_contribution)?;
    let state_pension = checked_amount("state pension", inputs.state_pension)?;
    let pension_income = checked_amount("pension income", inputs.pension_income)?;
    let excess = checked_amount("annual allowance excess", inputs.annual_allowance_excess)?;
    let interest = checked_amount("savings interest", inputs.savings_interest)?;
    let gains = checked_amount("capital gains", inputs.capital_gains)?;

    let non_savings_income =
        (salary - employee).max(0.0) + state_pension + pension_income + excess;
    let savings_allowance = personal_savings_allowance(rules, non_savings_income + interest)?;
    let taxable_interest = (interest - savings_allowance).max(0.0);
    let total_income = non_savings_income + taxable_interest;

    let threshold_income = non_savings_income - excess + interest;
    let adjusted_income = threshold_income + employee + employer;

    Ok(TaxYearFigures {
        total_income,
        personal_allowance: personal_allowance(rules, total_income)?,
        income_tax: income_tax(rules, total_income)?,
        national_insurance: national_insurance(rules, salary)?,
        capital_gains: gains,
        capital_gains_tax: capital_gains_tax(rules, gains, total_income)?,
        savings_allowance,
        taxable_interest,
        annual_allowance: annual_allowance_taper(rules, adjusted_income, threshold_income)?,
        annual_allowance_excess: excess,
    })
}

/// Running tax position for one year. Every addition recomputes the year from
/// its accumulated inputs, so later income re-prices gains realised earlier.
#[derive(Debug, Clone)]
pub struct TaxYear<'a> {
    rules: &'a TaxRules,
    inputs: TaxYearInputs,
    figures: TaxYearFigures,
}

impl<'a> TaxYear<'a> {
    pub fn open(rules: &'a TaxRules, inputs: &TaxYearInputs) -> SimResult<Self> {
        Ok(Self {
            rules,
            inputs: *inputs,
            figures: compute_tax_year(rules, inputs)?,
        })
    }

    pub fn figures(&self) -> &TaxYearFigures {
        &self.figures
    }

    pub fn rules(&self) -> &'a TaxRules {
        self.rules
    }

    fn extended(&self, income: f64, gains: f64, interest: f64) -> SimResult<TaxYearInputs> {
        let mut inputs = self.inputs;
        inputs.pension_income += checked_amount("additional income", income)?;
        inputs.capital_gains += checked_amount("additional gains", gains)?;
        inputs.savings_interest += checked_amount("additional interest", interest)?;
        Ok(inputs)
    }

    fn charged(figures: &TaxYearFigures) -> f64 {
        figures.income_tax + figures.capital_gains_tax
    }

    pub fn charge_on(&self, income: f64, gains: f64) -> SimResult<f64> {
        let after = compute_tax_year(self.rules, &self.extended(income, gains, 0.0)?)?;
        Ok(Self::charged(&after) - Self::charged(&self.figures))
    }

    fn add(&mut self, income: f64, gains: f64, interest: f64) -> SimResult<f64> {
        let inputs = self.extended(income, gains, interest)?;
        let after = compute_tax_year(self.rules, &inputs)?;
        let charge = Self::charged(&after) - Self::charged(&self.figures);
        self.inputs = inputs;
        self.figures = after;
        Ok(charge)
    }

    pub fn add_income(&mut self, extra: f64) -> SimResult<f64> {
        self.add(extra, 0.0, 0.0)
    }

    pub fn add_gains(&mut self, extra: f64) -> SimResult<f64> {
        self.add(0.0, extra, 0.0)
    }

    pub fn add_interest(&mut self, extra: f64) -> SimResult<f64> {
        self.add(0.0, 0.0, extra)
    }

    pub fn exempt_remaining(&self) -> f64 {
        (self.rules.cgt_exempt_amount - self.figures.capital_gains).max(0.0)
    }

    pub fn finish(self) -> TaxYearFigures {
        self.figures
    }
}
