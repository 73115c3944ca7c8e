use serde::{Deserialize, Serialize};

use super::config::AccountKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub name: String,
    pub kind: AccountKind,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub year: i32,
    pub age: u32,
    pub gross_income: f64,
    pub salary: f64,
    pub state_pension: f64,
    pub pension_drawdown_taxable: f64,
    pub taxable_interest: f64,
    pub income_tax: f64,
    pub national_insurance: f64,
    pub capital_gains_tax: f64,
    pub capital_gains_realised: f64,
    pub pension_contributions: f64,
    pub annual_allowance_excess: f64,
    pub scheduled_drawdown: f64,
    pub withdrawn_net: f64,
    pub swept: f64,
    pub living_cost: f64,
    pub target_spend: f64,
    pub realised_spend: f64,
    pub utility: f64,
    pub failure_penalty: f64,
    pub volatility_penalty: f64,
    pub cumulative_utility: f64,
    pub cash: f64,
    pub accounts: Vec<AccountBalance>,
    pub total_assets: f64,
    pub bankrupt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifePath {
    pub years: Vec<YearResult>,
    pub lifetime_utility: f64,
    pub ever_bankrupt: bool,
    pub terminal_assets: f64,
}

impl LifePath {
    pub fn from_years(years: Vec<YearResult>) -> Self {
        let lifetime_utility = years.last().map_or(0.0, |y| y.cumulative_utility);
        let terminal_assets = years.last().map_or(0.0, |y| y.total_assets);
        let ever_bankrupt = years.iter().any(|y| y.bankrupt);
        Self {
            years,
            lifetime_utility,
            ever_bankrupt,
            terminal_assets,
        }
    }
}

/// Percentile values across replicas for one year, in the order of
/// `MonteCarloResult::percentiles`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBand {
    pub year: i32,
    pub age: u32,
    pub total_assets: Vec<f64>,
    pub cumulative_utility: Vec<f64>,
    pub ruin_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub replicas: u32,
    pub percentiles: Vec<f64>,
    pub bands: Vec<YearBand>,
    pub mean_lifetime_utility: f64,
    pub median_terminal_assets: f64,
    pub probability_of_ruin: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<LifePath>>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrawMode {
    #[default]
    Matched,
    Independent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandDelta {
    pub age: u32,
    pub total_assets: Vec<f64>,
    pub cumulative_utility: Vec<f64>,
    pub ruin_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioComparison {
    pub mode: DrawMode,
    pub a: MonteCarloResult,
    pub b: MonteCarloResult,
    pub band_deltas: Vec<BandDelta>,
    pub mean_lifetime_utility_delta: f64,
    pub median_terminal_assets_delta: f64,
    pub probability_of_ruin_delta: f64,
    /// Mean over replicas of B's lifetime utility minus A's on the same draws.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_utility_difference: Option<f64>,
}
