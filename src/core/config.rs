use serde::{Deserialize, Serialize};

use super::error::{SimError, SimResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    #[serde(alias = "ISA")]
    Isa,
    #[serde(alias = "GIA")]
    Gia,
    #[serde(alias = "Pension")]
    Pension,
    #[serde(alias = "FixedInterest", alias = "fixedInterest", alias = "fixed_interest")]
    FixedInterest,
    #[serde(alias = "Cash")]
    Cash,
}

impl AccountKind {
    pub fn is_growth(self) -> bool {
        matches!(self, AccountKind::Isa | AccountKind::Gia | AccountKind::Pension)
    }

    pub fn label(self) -> &'static str {
        match self {
            AccountKind::Isa => "ISA",
            AccountKind::Gia => "GIA",
            AccountKind::Pension => "Pension",
            AccountKind::FixedInterest => "Fixed Interest",
            AccountKind::Cash => "Cash",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePenalty {
    Linear,
    Quadratic,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GainsStrategy {
    #[serde(alias = "harvest")]
    Harvest,
    #[serde(alias = "letGrow", alias = "let_grow")]
    LetGrow,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountConfig {
    pub kind: AccountKind,
    pub name: Option<String>,
    pub balance: f64,
    pub mean_return: f64,
    pub std_dev_return: f64,
    /// GIA only; defaults to the starting balance (no embedded gain).
    pub cost_basis: Option<f64>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            kind: AccountKind::Isa,
            name: None,
            balance: 0.0,
            mean_return: 0.0,
            std_dev_return: 0.0,
            cost_basis: None,
        }
    }
}

impl AccountConfig {
    pub fn new(kind: AccountKind, balance: f64, mean_return: f64, std_dev_return: f64) -> Self {
        Self {
            kind,
            name: None,
            balance,
            mean_return,
            std_dev_return,
            cost_basis: None,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.label().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SalarySchedule {
    pub base_salary: f64,
    pub growth_rate: f64,
    /// First age with no salary; `None` means salary runs to the horizon.
    pub retirement_age: Option<u32>,
    pub growth_stop_age: Option<u32>,
    pub post_plateau_growth_rate: f64,
}

impl Default for SalarySchedule {
    fn default() -> Self {
        Self {
            base_salary: 0.0,
            growth_rate: 0.0,
            retirement_age: None,
            growth_stop_age: None,
            post_plateau_growth_rate: 0.0,
        }
    }
}

impl SalarySchedule {
    pub fn gross_salary(&self, start_age: u32, age: u32) -> f64 {
        if age < start_age || self.base_salary <= 0.0 {
            return 0.0;
        }
        if let Some(retirement_age) = self.retirement_age {
            if age >= retirement_age {
                return 0.0;
            }
        }

        let years = age - start_age;
        let growth_years = match self.growth_stop_age {
            Some(stop) => years.min(stop.saturating_sub(start_age)),
            None => years,
        };
        let plateau_years = years - growth_years;

        self.base_salary
            * (1.0 + self.growth_rate).powi(growth_years as i32)
            * (1.0 + self.post_plateau_growth_rate).powi(plateau_years as i32)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LivingCostSchedule {
    pub base_cost: f64,
    #[serde(alias = "ratePreRetirement")]
    pub growth_rate: f64,
    /// Growth after the salary stops; `growth_rate` when unset.
    #[serde(alias = "ratePostRetirement")]
    pub post_retirement_rate: Option<f64>,
    /// Growth after the slow-down age; the post-retirement rate when unset.
    #[serde(alias = "ratePostSlowDown")]
    pub post_slow_down_rate: Option<f64>,
    pub slow_down_factor: f64,
}

impl Default for LivingCostSchedule {
    fn default() -> Self {
        Self {
            base_cost: 0.0,
            growth_rate: 0.0,
            post_retirement_rate: None,
            post_slow_down_rate: None,
            slow_down_factor: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneOffExpense {
    #[serde(alias = "year")]
    pub age: u32,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UtilityConfig {
    #[serde(alias = "utilityExponent")]
    pub exponent: f64,
    #[serde(alias = "utilityDiscountRate")]
    pub discount_rate: f64,
    #[serde(alias = "baselineUtility")]
    pub baseline_spend: f64,
    #[serde(alias = "utilityLinearRate")]
    pub linear_rate: f64,
    #[serde(alias = "utilityExpRate")]
    pub exp_rate: f64,
    #[serde(alias = "failurePenaltyExponent")]
    pub failure_penalty: FailurePenalty,
    pub penalty_scale: f64,
    /// Shortfall at which the quadratic penalty overtakes the linear one.
    pub penalty_reference: f64,
    pub volatility_weight: f64,
    /// Spend that is paid even when it overdraws cash.
    pub spend_floor: f64,
}

impl Default for UtilityConfig {
    fn default() -> Self {
        Self {
            exponent: 0.99,
            discount_rate: 0.001,
            baseline_spend: 0.0,
            linear_rate: 0.0,
            exp_rate: 0.0,
            failure_penalty: FailurePenalty::Quadratic,
            penalty_scale: 1.0,
            penalty_reference: 1.0,
            volatility_weight: 0.0,
            spend_floor: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PensionDrawdown {
    #[default]
    #[serde(alias = "onDemand", alias = "on_demand")]
    OnDemand,
    /// From retirement, draw `balance / years_left` every year, taking the
    /// tax-free lump sum in full in the first drawdown year.
    Linear,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BufferPolicy {
    /// Cash to hold beyond the year's committed spend before topping up.
    #[serde(alias = "bufferLowThreshold")]
    pub low: f64,
    #[serde(alias = "bufferHighThreshold")]
    pub high: f64,
    pub withdrawal_order: Vec<AccountKind>,
    pub sweep_order: Vec<AccountKind>,
    pub gains_strategy: GainsStrategy,
    pub pension_drawdown: PensionDrawdown,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            low: 0.0,
            high: f64::MAX,
            withdrawal_order: vec![
                AccountKind::FixedInterest,
                AccountKind::Gia,
                AccountKind::Isa,
                AccountKind::Pension,
            ],
            sweep_order: vec![AccountKind::Isa, AccountKind::Gia],
            gains_strategy: GainsStrategy::Harvest,
            pension_drawdown: PensionDrawdown::OnDemand,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxRules {
    pub personal_allowance: f64,
    pub allowance_taper_threshold: f64,
    pub allowance_taper_ratio: f64,
    pub basic_rate_band: f64,
    pub additional_rate_threshold: f64,
    pub basic_rate: f64,
    pub higher_rate: f64,
    pub additional_rate: f64,

    pub ni_primary_threshold: f64,
    pub ni_upper_earnings_limit: f64,
    pub ni_main_rate: f64,
    pub ni_upper_rate: f64,

    pub cgt_exempt_amount: f64,
    pub cgt_lower_rate: f64,
    pub cgt_higher_rate: f64,

    pub pension_annual_allowance: f64,
    pub pension_minimum_allowance: f64,
    pub pension_threshold_income: f64,
    pub pension_adjusted_income_threshold: f64,
    pub pension_taper_ratio: f64,
    pub pension_tax_free_fraction: f64,
    pub lump_sum_allowance: f64,
    pub relief_at_source_rate: f64,

    pub isa_allowance: f64,
    pub savings_allowance_basic: f64,
    pub savings_allowance_higher: f64,
    pub savings_allowance_additional: f64,
}

impl Default for TaxRules {
    fn default() -> Self {
        Self {
            personal_allowance: 12_570.0,
            allowance_taper_threshold: 100_000.0,
            allowance_taper_ratio: 0.5,
            basic_rate_band: 37_700.0,
            additional_rate_threshold: 125_140.0,
            basic_rate: 0.20,
            higher_rate: 0.40,
            additional_rate: 0.45,
            ni_primary_threshold: 12_570.0,
            ni_upper_earnings_limit: 50_270.0,
            ni_main_rate: 0.08,
            ni_upper_rate: 0.02,
            cgt_exempt_amount: 3_000.0,
            cgt_lower_rate: 0.18,
            cgt_higher_rate: 0.24,
            pension_annual_allowance: 60_000.0,
            pension_minimum_allowance: 10_000.0,
            pension_threshold_income: 200_000.0,
            pension_adjusted_income_threshold: 260_000.0,
            pension_taper_ratio: 0.5,
            pension_tax_free_fraction: 0.25,
            lump_sum_allowance: 268_275.0,
            relief_at_source_rate: 0.20,
            isa_allowance: 20_000.0,
            savings_allowance_basic: 1_000.0,
            savings_allowance_higher: 500.0,
            savings_allowance_additional: 0.0,
        }
    }
}

impl TaxRules {
    pub fn annual_allowance_floor_income(&self) -> f64 {
        let reducible = (self.pension_annual_allowance - self.pension_minimum_allowance).max(0.0);
        if self.pension_taper_ratio <= 0.0 {
            return f64::INFINITY;
        }
        self.pension_adjusted_income_threshold + reducible / self.pension_taper_ratio
    }

    pub fn basic_rate_limit(&self) -> f64 {
        self.personal_allowance + self.basic_rate_band
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    pub start_age: u32,
    pub end_age: u32,
    pub start_year: i32,

    #[serde(alias = "salary")]
    pub salary_schedule: SalarySchedule,
    pub employee_pension_pct: f64,
    pub employer_pension_pct: f64,

    pub living_cost_schedule: LivingCostSchedule,
    pub one_off_expenses: Vec<OneOffExpense>,
    #[serde(alias = "slowDownYear")]
    pub slow_down_age: Option<u32>,

    #[serde(alias = "statePensionStartYear")]
    pub state_pension_start_age: u32,
    pub state_pension_amount: f64,
    pub pension_access_age: u32,

    pub initial_accounts: Vec<AccountConfig>,
    pub utility: UtilityConfig,
    pub buffer: BufferPolicy,

    #[serde(alias = "crashYear")]
    pub crash_age: Option<u32>,
    pub crash_magnitude: f64,

    pub monte_carlo_sims: u32,
    pub random_seed: u64,

    pub tax_rules: TaxRules,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_age: 30,
            end_age: 90,
            start_year: 2025,
            salary_schedule: SalarySchedule {
                base_salary: 50_000.0,
                growth_rate: 0.01,
                retirement_age: Some(60),
                growth_stop_age: None,
                post_plateau_growth_rate: 0.0,
            },
            employee_pension_pct: 0.05,
            employer_pension_pct: 0.03,
            living_cost_schedule: LivingCostSchedule {
                base_cost: 20_000.0,
                slow_down_factor: 0.8,
                ..LivingCostSchedule::default()
            },
            one_off_expenses: Vec::new(),
            slow_down_age: Some(75),
            state_pension_start_age: 67,
            state_pension_amount: 11_502.0,
            pension_access_age: 57,
            initial_accounts: vec![
                AccountConfig::new(AccountKind::Cash, 10_000.0, 0.0, 0.0),
                AccountConfig::new(AccountKind::Isa, 50_000.0, 0.05, 0.12),
                AccountConfig {
                    cost_basis: Some(15_000.0),
                    ..AccountConfig::new(AccountKind::Gia, 20_000.0, 0.05, 0.12)
                },
                AccountConfig::new(AccountKind::Pension, 100_000.0, 0.05, 0.12),
                AccountConfig::new(AccountKind::FixedInterest, 5_000.0, 0.03, 0.0),
            ],
            utility: UtilityConfig {
                baseline_spend: 5_000.0,
                volatility_weight: 0.05,
                ..UtilityConfig::default()
            },
            buffer: BufferPolicy {
                low: 5_000.0,
                high: 20_000.0,
                ..BufferPolicy::default()
            },
            crash_age: None,
            crash_magnitude: 0.0,
            monte_carlo_sims: 500,
            random_seed: 42,
            tax_rules: TaxRules::default(),
        }
    }
}

impl SimulationConfig {
    pub fn horizon_years(&self) -> usize {
        (self.end_age.saturating_sub(self.start_age) + 1) as usize
    }

    pub fn calendar_year(&self, age: u32) -> i32 {
        self.start_year + (age as i32 - self.start_age as i32)
    }

    pub fn has_account(&self, kind: AccountKind) -> bool {
        self.initial_accounts.iter().any(|a| a.kind == kind)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.end_age <= self.start_age {
            return Err(SimError::config("endAge must be > startAge"));
        }

        if self.monte_carlo_sims == 0 {
            return Err(SimError::config("monteCarloSims must be >= 1"));
        }

        let in_horizon = |age: u32| (self.start_age..=self.end_age).contains(&age);

        for expense in &self.one_off_expenses {
            if !in_horizon(expense.age) {
                return Err(SimError::config(format!(
                    "one-off expense at age {} is outside [{}, {}]",
                    expense.age, self.start_age, self.end_age
                )));
            }
            if !expense.amount.is_finite() || expense.amount < 0.0 {
                return Err(SimError::config("one-off expense amounts must be >= 0"));
            }
        }

        for (name, age) in [
            ("slowDownAge", self.slow_down_age),
            ("crashAge", self.crash_age),
        ] {
            if let Some(age) = age {
                if !in_horizon(age) {
                    return Err(SimError::config(format!(
                        "{name} {age} is outside [{}, {}]",
                        self.start_age, self.end_age
                    )));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.crash_magnitude) {
            return Err(SimError::config("crashMagnitude must be between 0 and 1"));
        }

        for (name, pct) in [
            ("employeePensionPct", self.employee_pension_pct),
            ("employerPensionPct", self.employer_pension_pct),
        ] {
            if !(0.0..=1.0).contains(&pct) {
                return Err(SimError::config(format!("{name} must be between 0 and 1")));
            }
        }

        if (self.employee_pension_pct > 0.0 || self.employer_pension_pct > 0.0)
            && self.salary_schedule.base_salary > 0.0
            && !self.has_account(AccountKind::Pension)
        {
            return Err(SimError::config(
                "pension contributions need a Pension account in initialAccounts",
            ));
        }

        let salary = &self.salary_schedule;
        if !salary.base_salary.is_finite() || salary.base_salary < 0.0 {
            return Err(SimError::config("baseSalary must be >= 0"));
        }
        if !salary.growth_rate.is_finite() || salary.growth_rate <= -1.0 {
            return Err(SimError::config("salary growthRate must be > -1"));
        }
        if !salary.post_plateau_growth_rate.is_finite() || salary.post_plateau_growth_rate <= -1.0
        {
            return Err(SimError::config("postPlateauGrowthRate must be > -1"));
        }

        let costs = &self.living_cost_schedule;
        if !costs.base_cost.is_finite() || costs.base_cost < 0.0 {
            return Err(SimError::config("living baseCost must be >= 0"));
        }
        if !costs.growth_rate.is_finite() || costs.growth_rate <= -1.0 {
            return Err(SimError::config("living cost growthRate must be > -1"));
        }
        for (name, rate) in [
            ("postRetirementRate", costs.post_retirement_rate),
            ("postSlowDownRate", costs.post_slow_down_rate),
        ] {
            if let Some(rate) = rate {
                if !rate.is_finite() || rate <= -1.0 {
                    return Err(SimError::config(format!("living cost {name} must be > -1")));
                }
            }
        }
        if !costs.slow_down_factor.is_finite() || costs.slow_down_factor < 0.0 {
            return Err(SimError::config("slowDownFactor must be >= 0"));
        }

        if !self.state_pension_amount.is_finite() || self.state_pension_amount < 0.0 {
            return Err(SimError::config("statePensionAmount must be >= 0"));
        }

        for account in &self.initial_accounts {
            let name = account.display_name();
            if !account.balance.is_finite() || account.balance < 0.0 {
                return Err(SimError::config(format!("{name}: balance must be >= 0")));
            }
            if !account.mean_return.is_finite() || account.mean_return <= -1.0 {
                return Err(SimError::config(format!("{name}: meanReturn must be > -1")));
            }
            if !account.std_dev_return.is_finite() || account.std_dev_return < 0.0 {
                return Err(SimError::config(format!(
                    "{name}: stdDevReturn must be >= 0"
                )));
            }
            if let Some(basis) = account.cost_basis {
                if account.kind != AccountKind::Gia {
                    return Err(SimError::config(format!(
                        "{name}: costBasis only applies to GIA accounts"
                    )));
                }
                if !basis.is_finite() || basis < 0.0 {
                    return Err(SimError::config(format!("{name}: costBasis must be >= 0")));
                }
            }
        }

        let utility = &self.utility;
        if !(utility.exponent > 0.0 && utility.exponent <= 1.0) {
            return Err(SimError::config("utility exponent must be in (0, 1]"));
        }
        if !utility.discount_rate.is_finite() || utility.discount_rate <= -1.0 {
            return Err(SimError::config("utility discountRate must be > -1"));
        }
        for (name, value) in [
            ("penaltyScale", utility.penalty_scale),
            ("volatilityWeight", utility.volatility_weight),
            ("spendFloor", utility.spend_floor),
            ("baselineSpend", utility.baseline_spend),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::config(format!("utility {name} must be >= 0")));
            }
        }
        if !utility.penalty_reference.is_finite() || utility.penalty_reference <= 0.0 {
            return Err(SimError::config("utility penaltyReference must be > 0"));
        }
        if !utility.exp_rate.is_finite() || utility.exp_rate <= -1.0 {
            return Err(SimError::config("utility expRate must be > -1"));
        }
        if !utility.linear_rate.is_finite() {
            return Err(SimError::config("utility linearRate must be finite"));
        }

        let buffer = &self.buffer;
        if buffer.low.is_nan() || buffer.low < 0.0 {
            return Err(SimError::config("buffer low threshold must be >= 0"));
        }
        if buffer.high.is_nan() || buffer.high < buffer.low {
            return Err(SimError::config(
                "buffer high threshold must be >= low threshold",
            ));
        }
        if buffer.withdrawal_order.contains(&AccountKind::Cash)
            || buffer.sweep_order.contains(&AccountKind::Cash)
        {
            return Err(SimError::config(
                "Cash is the buffer itself and cannot appear in withdrawal or sweep order",
            ));
        }

        let rules = &self.tax_rules;
        for (name, rate) in [
            ("basicRate", rules.basic_rate),
            ("higherRate", rules.higher_rate),
            ("additionalRate", rules.additional_rate),
            ("niMainRate", rules.ni_main_rate),
            ("niUpperRate", rules.ni_upper_rate),
            ("cgtLowerRate", rules.cgt_lower_rate),
            ("cgtHigherRate", rules.cgt_higher_rate),
            ("pensionTaxFreeFraction", rules.pension_tax_free_fraction),
            ("reliefAtSourceRate", rules.relief_at_source_rate),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(SimError::config(format!("{name} must be in [0, 1)")));
            }
        }
        if rules.ni_upper_earnings_limit < rules.ni_primary_threshold {
            return Err(SimError::config(
                "NI upper earnings limit must be >= primary threshold",
            ));
        }
        if rules.additional_rate_threshold < rules.basic_rate_band {
            return Err(SimError::config(
                "additionalRateThreshold must be >= basicRateBand",
            ));
        }
        if rules.pension_minimum_allowance > rules.pension_annual_allowance {
            return Err(SimError::config(
                "pension minimum allowance cannot exceed the standard allowance",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SimulationConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn rejects_non_positive_horizon() {
        let mut config = SimulationConfig::default();
        config.end_age = config.start_age;
        let err = config.validate().expect_err("must reject empty horizon");
        assert!(matches!(err, SimError::Configuration(msg) if msg.contains("endAge")));
    }

    #[test]
    fn rejects_crash_outside_horizon() {
        let mut config = SimulationConfig::default();
        config.crash_age = Some(config.end_age + 1);
        config.crash_magnitude = 0.3;
        let err = config.validate().expect_err("must reject crash age");
        assert!(matches!(err, SimError::Configuration(msg) if msg.contains("crashAge")));
    }

    #[test]
    fn rejects_expense_outside_horizon() {
        let mut config = SimulationConfig::default();
        config.one_off_expenses.push(OneOffExpense {
            age: config.start_age - 1,
            amount: 1_000.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_simulations_and_inverted_buffer() {
        let mut config = SimulationConfig::default();
        config.monte_carlo_sims = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.buffer.low = 10.0;
        config.buffer.high = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_contributions_without_pension_pot() {
        let mut config = SimulationConfig::default();
        config
            .initial_accounts
            .retain(|a| a.kind != AccountKind::Pension);
        let err = config.validate().expect_err("needs pension pot");
        assert!(err.to_string().contains("Pension"));
    }

    #[test]
    fn salary_schedule_plateaus_and_stops_at_retirement() {
        let schedule = SalarySchedule {
            base_salary: 100.0,
            growth_rate: 0.10,
            retirement_age: Some(35),
            growth_stop_age: Some(32),
            post_plateau_growth_rate: 0.0,
        };
        assert_eq!(schedule.gross_salary(30, 30), 100.0);
        assert!((schedule.gross_salary(30, 32) - 121.0).abs() < 1e-9);
        assert!((schedule.gross_salary(30, 34) - 121.0).abs() < 1e-9);
        assert_eq!(schedule.gross_salary(30, 35), 0.0);
    }

    #[test]
    fn deserializes_camel_case_with_legacy_year_aliases() {
        let json = r#"{
            "startAge": 65,
            "endAge": 66,
            "crashYear": 66,
            "crashMagnitude": 0.25,
            "initialAccounts": [{"kind": "ISA", "balance": 1000.0, "meanReturn": 0.04}],
            "utility": {"failurePenalty": "linear", "utilityExponent": 0.9}
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).expect("parses");
        assert_eq!(config.crash_age, Some(66));
        assert_eq!(config.initial_accounts[0].kind, AccountKind::Isa);
        assert_eq!(config.utility.failure_penalty, FailurePenalty::Linear);
        assert_eq!(config.utility.exponent, 0.9);
        assert_eq!(config.tax_rules, TaxRules::default());
    }

    #[test]
    fn parses_phased_living_costs_and_drawdown_policy() {
        let json = r#"{
            "livingCostSchedule": {
                "baseCost": 18000.0,
                "ratePreRetirement": 0.02,
                "ratePostRetirement": 0.01,
                "ratePostSlowDown": -0.01
            },
            "buffer": {"pensionDrawdown": "linear"}
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).expect("parses");
        let costs = &config.living_cost_schedule;
        assert_eq!(costs.growth_rate, 0.02);
        assert_eq!(costs.post_retirement_rate, Some(0.01));
        assert_eq!(costs.post_slow_down_rate, Some(-0.01));
        assert_eq!(config.buffer.pension_drawdown, PensionDrawdown::Linear);
        assert_eq!(config.buffer.gains_strategy, GainsStrategy::Harvest);
        config.validate().expect("phased config validates");
    }

    #[test]
    fn rejects_phase_rates_at_or_below_minus_one() {
        let mut config = SimulationConfig::default();
        config.living_cost_schedule.post_slow_down_rate = Some(-1.0);
        let err = config.validate().expect_err("must reject rate");
        assert!(err.to_string().contains("postSlowDownRate"));
    }
}
