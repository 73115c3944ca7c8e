mod agent;
mod config;
mod engine;
mod error;
mod ledger;
mod monte_carlo;
mod tax;
mod types;

pub use agent::{
    AgentState, UtilityOutcome, accrue, desired_discretionary_spend, desired_spend, living_cost,
    target_spend, utility,
};
pub use config::{
    AccountConfig, AccountKind, BufferPolicy, FailurePenalty, GainsStrategy, LivingCostSchedule,
    OneOffExpense, PensionDrawdown, SalarySchedule, SimulationConfig, TaxRules, UtilityConfig,
};
pub use engine::{ReturnPath, StressInjector, YearContext, simulate_life, step_year};
pub use error::{SimError, SimResult};
pub use ledger::{
    Account, AssetLedger, CashSeed, ContributionContext, ContributionReceipt, PensionTally,
    Withdrawal,
};
pub use monte_carlo::{
    CancelFlag, DEFAULT_PERCENTILES, MonteCarloOptions, compare_scenarios, derive_seed,
    percentile, run_deterministic, run_monte_carlo, shock_matrix,
};
pub use tax::{
    TaxYear, TaxYearFigures, TaxYearInputs, annual_allowance_taper, capital_gains_tax,
    compute_tax_year, income_tax, national_insurance, personal_allowance,
    personal_savings_allowance,
};
pub use types::{
    AccountBalance, BandDelta, DrawMode, LifePath, MonteCarloResult, ScenarioComparison,
    YearBand, YearResult,
};
