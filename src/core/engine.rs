use tracing::{debug, info, warn};

use super::agent::{self, AgentState};
use super::config::{AccountConfig, AccountKind, GainsStrategy, PensionDrawdown, SimulationConfig};
use super::error::{SimError, SimResult};
use super::ledger::{Account, AssetLedger, ContributionContext};
use super::tax::{TaxYear, TaxYearInputs};
use super::types::{LifePath, YearResult};

const EPS: f64 = 1e-9;
const BISECTION_STEPS: usize = 60;

/// Annual return for every ledger slot in every simulated year, `[year][slot]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnPath {
    rates: Vec<Vec<f64>>,
}

impl ReturnPath {
    pub fn from_rates(rates: Vec<Vec<f64>>) -> Self {
        Self { rates }
    }

    pub fn mean(config: &SimulationConfig) -> Self {
        let means: Vec<f64> = invested_accounts(config).map(|a| a.mean_return).collect();
        Self {
            rates: vec![means; config.horizon_years()],
        }
    }

    /// `mean + std_dev * z` per slot, reading standard-normal shocks from
    /// `shocks[year][slot]`. Extra rows or columns are ignored.
    pub fn from_shocks(config: &SimulationConfig, shocks: &[Vec<f64>]) -> SimResult<Self> {
        let accounts: Vec<_> = invested_accounts(config).collect();
        let horizon = config.horizon_years();
        if shocks.len() < horizon {
            return Err(SimError::config(format!(
                "shock matrix covers {} years, horizon needs {horizon}",
                shocks.len()
            )));
        }

        let mut rates = Vec::with_capacity(horizon);
        for row in &shocks[..horizon] {
            if row.len() < accounts.len() {
                return Err(SimError::config(format!(
                    "shock matrix has {} slots, ledger needs {}",
                    row.len(),
                    accounts.len()
                )));
            }
            rates.push(
                accounts
                    .iter()
                    .zip(row)
                    .map(|(account, z)| account.mean_return + account.std_dev_return * z)
                    .collect(),
            );
        }
        Ok(Self { rates })
    }

    pub fn years(&self) -> usize {
        self.rates.len()
    }

    pub fn year(&self, index: usize) -> Option<&[f64]> {
        self.rates.get(index).map(Vec::as_slice)
    }
}

fn invested_accounts(config: &SimulationConfig) -> impl Iterator<Item = &AccountConfig> {
    config
        .initial_accounts
        .iter()
        .filter(|account| account.kind != AccountKind::Cash)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressInjector {
    pub crash_age: Option<u32>,
    pub magnitude: f64,
}

impl StressInjector {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            crash_age: config.crash_age,
            magnitude: config.crash_magnitude,
        }
    }

    pub fn apply(&self, age: u32, ledger: &AssetLedger, rates: &mut [f64]) -> bool {
        if self.crash_age != Some(age) {
            return false;
        }
        for (account, rate) in ledger.accounts().iter().zip(rates.iter_mut()) {
            if account.kind.is_growth() {
                *rate = -self.magnitude;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct YearContext<'a> {
    pub config: &'a SimulationConfig,
    pub stress: StressInjector,
    pub cash_interest_rate: f64,
}

impl<'a> YearContext<'a> {
    pub fn new(config: &'a SimulationConfig, cash_interest_rate: f64) -> Self {
        Self {
            config,
            stress: StressInjector::from_config(config),
            cash_interest_rate,
        }
    }
}

pub fn simulate_life(config: &SimulationConfig, returns: &ReturnPath) -> SimResult<LifePath> {
    config.validate()?;
    simulate_validated(config, returns)
}

pub(crate) fn simulate_validated(
    config: &SimulationConfig,
    returns: &ReturnPath,
) -> SimResult<LifePath> {
    let (mut ledger, cash) = AssetLedger::from_configs(&config.initial_accounts);
    let horizon = config.horizon_years();
    if returns.years() < horizon {
        return Err(SimError::config(format!(
            "return path covers {} years, horizon needs {horizon}",
            returns.years()
        )));
    }

    let ctx = YearContext::new(config, cash.interest_rate);
    let mut state = AgentState::new(config, cash.balance);
    let mut years = Vec::with_capacity(horizon);

    for index in 0..horizon {
        let rates = returns
            .year(index)
            .ok_or_else(|| SimError::config(format!("return path is missing year {index}")))?;
        years.push(step_year(&ctx, &mut state, &mut ledger, rates)?);
    }

    Ok(LifePath::from_years(years))
}

#[derive(Debug, Clone, Copy)]
struct YearAllowances {
    isa_remaining: f64,
    pension_remaining: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BufferOutcome {
    withdrawn_net: f64,
    swept: f64,
    pension_drawdown_taxable: f64,
    pension_contributions: f64,
}

/// Advances `state` and `ledger` through one year and reports it.
pub fn step_year(
    ctx: &YearContext<'_>,
    state: &mut AgentState,
    ledger: &mut AssetLedger,
    returns: &[f64],
) -> SimResult<YearResult> {
    let config = ctx.config;
    let rules = &config.tax_rules;
    let age = state.age;

    if returns.len() != ledger.slot_count() {
        return Err(SimError::config(format!(
            "age {age}: {} returns supplied for {} accounts",
            returns.len(),
            ledger.slot_count()
        )));
    }

    // Income and payroll pension contributions.
    let salary = config.salary_schedule.gross_salary(config.start_age, age);
    let state_pension = if age >= config.state_pension_start_age {
        config.state_pension_amount
    } else {
        0.0
    };
    let employee = salary * config.employee_pension_pct;
    let employer = salary * config.employer_pension_pct;
    let savings_interest = std::mem::take(&mut state.pending_interest) + ledger.take_accrued_interest();

    let mut inputs = TaxYearInputs {
        gross_salary: salary,
        employee_pension_contribution: employee,
        employer_pension_contribution: employer,
        state_pension,
        savings_interest,
        ..TaxYearInputs::default()
    };
    let annual_allowance = TaxYear::open(rules, &inputs)?.figures().annual_allowance;

    let mut allowances = YearAllowances {
        isa_remaining: rules.isa_allowance,
        pension_remaining: annual_allowance,
    };
    let mut payroll_contributions = 0.0;
    if employee + employer > 0.0 {
        let slot = ledger.slots_of(AccountKind::Pension).first().copied().ok_or_else(|| {
            SimError::config("pension contributions need a Pension account")
        })?;
        let pension = ledger
            .account_mut(slot)
            .ok_or_else(|| SimError::config("pension slot out of range"))?;
        let receipt = pension.contribute(ContributionContext {
            employee,
            employer,
            tax_relief: 0.0,
            allowance_remaining: allowances.pension_remaining,
        })?;
        allowances.pension_remaining -= receipt.allowance_used;
        inputs.annual_allowance_excess = receipt.allowance_excess;
        payroll_contributions = employee + employer;
    }

    let mut tax_year = TaxYear::open(rules, &inputs)?;
    let opening = *tax_year.figures();
    state.cash +=
        salary - employee + state_pension - opening.income_tax - opening.national_insurance;

    let scheduled = scheduled_pension_drawdown(config, state, ledger, &mut tax_year)?;

    // Committed spend, then the buffer policy on what is left over.
    let desired = agent::desired_spend(age, config);
    let target = agent::target_spend(state, config);
    let mut buffer = apply_buffer_policy(ctx, state, ledger, &mut tax_year, target, &mut allowances)?;

    // Growth, with the crash year overriding market-linked returns.
    let mut rates = returns.to_vec();
    if ctx.stress.apply(age, ledger, &mut rates) {
        info!(age, magnitude = ctx.stress.magnitude, "market crash applied");
    }
    for (slot, rate) in rates.iter().enumerate() {
        if let Some(account) = ledger.account_mut(slot) {
            account.apply_annual_return(*rate);
        }
    }
    if state.cash > 0.0 && ctx.cash_interest_rate > 0.0 {
        let interest = state.cash * ctx.cash_interest_rate;
        state.cash += interest;
        state.pending_interest += interest;
    }

    // No later year exists to tax this year's interest in.
    let mut final_interest = 0.0;
    if age >= config.end_age {
        final_interest = std::mem::take(&mut state.pending_interest) + ledger.take_accrued_interest();
        let charge = tax_year.add_interest(final_interest)?;
        state.cash -= charge;
        if charge > 0.0 && state.cash < target - EPS {
            let shortfall = target - state.cash;
            let (net, taxable) = draw_down(ctx, state, ledger, &mut tax_year, shortfall)?;
            buffer.withdrawn_net += net;
            buffer.pension_drawdown_taxable += taxable;
        }
    }

    // Spending and utility. Cash still empty after the buffer step means no
    // account could fund the year.
    let unfunded = state.cash <= EPS && target > EPS;
    let realised = target
        .min(state.cash.max(0.0))
        .max(config.utility.spend_floor);
    state.cash -= realised;
    if (unfunded || state.cash < -EPS) && !state.bankrupt {
        state.bankrupt = true;
        warn!(age, cash = state.cash, "cash exhausted; agent is bankrupt");
    }

    let outcome = agent::utility(realised, state.prior_spend, desired, &config.utility);
    let discounted = agent::accrue(state, &outcome, realised, &config.utility);

    let figures = tax_year.finish();
    let accounts = ledger.snapshot();
    let total_assets = ledger.total() + state.cash;

    debug!(
        age,
        cash = state.cash,
        total_assets,
        spend = realised,
        utility = discounted,
        "simulated year"
    );

    let result = YearResult {
        year: config.calendar_year(age),
        age,
        gross_income: salary
            + state_pension
            + scheduled.taxable_income
            + buffer.pension_drawdown_taxable
            + savings_interest
            + final_interest,
        salary,
        state_pension,
        pension_drawdown_taxable: scheduled.taxable_income + buffer.pension_drawdown_taxable,
        taxable_interest: figures.taxable_interest,
        income_tax: figures.income_tax,
        national_insurance: figures.national_insurance,
        capital_gains_tax: figures.capital_gains_tax,
        capital_gains_realised: figures.capital_gains,
        pension_contributions: payroll_contributions + buffer.pension_contributions,
        annual_allowance_excess: figures.annual_allowance_excess,
        scheduled_drawdown: scheduled.net,
        withdrawn_net: buffer.withdrawn_net,
        swept: buffer.swept,
        living_cost: agent::living_cost(age, config),
        target_spend: target,
        realised_spend: realised,
        utility: discounted,
        failure_penalty: outcome.failure_penalty,
        volatility_penalty: outcome.volatility_penalty,
        cumulative_utility: state.cumulative_utility,
        cash: state.cash,
        accounts,
        total_assets,
        bankrupt: state.bankrupt,
    };

    state.advance();
    Ok(result)
}

/// Keeps free cash (cash beyond this year's committed spend) inside the
/// configured band by drawing from or sweeping into accounts, then harvests
/// gains if the strategy asks for it.
fn apply_buffer_policy(
    ctx: &YearContext<'_>,
    state: &mut AgentState,
    ledger: &mut AssetLedger,
    tax_year: &mut TaxYear<'_>,
    target: f64,
    allowances: &mut YearAllowances,
) -> SimResult<BufferOutcome> {
    let config = ctx.config;
    let rules = &config.tax_rules;
    let policy = &config.buffer;
    let mut outcome = BufferOutcome::default();

    let free = state.cash - target;
    if free < policy.low {
        let (net, taxable) = draw_down(ctx, state, ledger, tax_year, policy.low - free)?;
        outcome.withdrawn_net += net;
        outcome.pension_drawdown_taxable += taxable;
    } else if free > policy.high {
        let mut excess = free - policy.high;
        for &kind in &policy.sweep_order {
            if excess <= EPS {
                break;
            }
            let Some(slot) = ledger.slots_of(kind).first().copied() else {
                continue;
            };
            let Some(account) = ledger.account_mut(slot) else {
                continue;
            };

            let (amount, context) = match kind {
                AccountKind::Isa => {
                    let amount = excess.min(allowances.isa_remaining);
                    (amount, ContributionContext::personal(amount))
                }
                AccountKind::Pension => {
                    let relief_rate = rules.relief_at_source_rate;
                    let amount = excess.min(allowances.pension_remaining * (1.0 - relief_rate));
                    let relief = amount * relief_rate / (1.0 - relief_rate);
                    (
                        amount,
                        ContributionContext {
                            employee: amount,
                            employer: 0.0,
                            tax_relief: relief,
                            allowance_remaining: allowances.pension_remaining,
                        },
                    )
                }
                AccountKind::Gia | AccountKind::FixedInterest => {
                    (excess, ContributionContext::personal(excess))
                }
                AccountKind::Cash => continue,
            };
            if amount <= EPS {
                continue;
            }

            let receipt = account.contribute(context)?;
            match kind {
                AccountKind::Isa => allowances.isa_remaining -= amount,
                AccountKind::Pension => {
                    allowances.pension_remaining -= receipt.allowance_used;
                    outcome.pension_contributions += context.total();
                }
                _ => {}
            }
            state.cash -= amount;
            excess -= amount;
            outcome.swept += amount;
        }
    }

    if policy.gains_strategy == GainsStrategy::Harvest {
        for slot in ledger.slots_of(AccountKind::Gia) {
            let exempt = tax_year.exempt_remaining();
            if exempt <= EPS {
                break;
            }
            let Some(account) = ledger.account_mut(slot) else {
                continue;
            };
            let realised = account.harvest_gains(exempt)?;
            state.cash -= tax_year.add_gains(realised)?;
        }
    }

    Ok(outcome)
}

fn draw_down(
    ctx: &YearContext<'_>,
    state: &mut AgentState,
    ledger: &mut AssetLedger,
    tax_year: &mut TaxYear<'_>,
    shortfall: f64,
) -> SimResult<(f64, f64)> {
    let config = ctx.config;
    let mut remaining = shortfall;
    let mut raised = 0.0;
    let mut taxable = 0.0;

    'orders: for &kind in &config.buffer.withdrawal_order {
        if kind == AccountKind::Pension && state.age < config.pension_access_age {
            continue;
        }
        for slot in ledger.slots_of(kind) {
            if remaining <= EPS {
                break 'orders;
            }
            let Some(account) = ledger.account_mut(slot) else {
                continue;
            };
            let draw = withdraw_for_net(account, remaining, tax_year)?;
            state.cash += draw.net;
            remaining -= draw.net;
            raised += draw.net;
            taxable += draw.taxable_income;
        }
    }
    if remaining > EPS {
        debug!(age = state.age, shortfall = remaining, "accounts could not refill the cash buffer");
    }
    Ok((raised, taxable))
}

#[derive(Debug, Clone, Copy, Default)]
struct Drawdown {
    net: f64,
    taxable_income: f64,
}

fn net_from_gross(account: &Account, gross: f64, tax_year: &TaxYear<'_>) -> SimResult<f64> {
    let preview = account.preview_withdrawal(gross, tax_year.rules())?;
    let tax = tax_year.charge_on(preview.taxable_income, preview.taxable_gain)?;
    Ok((preview.cash - tax).max(0.0))
}

fn withdraw_for_net(
    account: &mut Account,
    target_net: f64,
    tax_year: &mut TaxYear<'_>,
) -> SimResult<Drawdown> {
    let balance = account.balance();
    if target_net <= 0.0 || balance <= 0.0 {
        return Ok(Drawdown::default());
    }

    let gross = if net_from_gross(account, balance, tax_year)? <= target_net {
        balance
    } else {
        let mut lo = 0.0;
        let mut hi = balance;
        for _ in 0..BISECTION_STEPS {
            let mid = (lo + hi) * 0.5;
            if net_from_gross(account, mid, tax_year)? < target_net {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi.min(balance)
    };

    let withdrawal = account.withdraw(gross, tax_year.rules())?;
    let income_tax = tax_year.add_income(withdrawal.taxable_income)?;
    let cgt = tax_year.add_gains(withdrawal.taxable_gain)?;

    Ok(Drawdown {
        net: (withdrawal.cash - income_tax - cgt).max(0.0),
        taxable_income: withdrawal.taxable_income,
    })
}

/// Linear drawdown: from retirement (never before the access age) each pot pays
/// `balance / years_left`, plus the whole tax-free lump sum in the first year.
fn scheduled_pension_drawdown(
    config: &SimulationConfig,
    state: &mut AgentState,
    ledger: &mut AssetLedger,
    tax_year: &mut TaxYear<'_>,
) -> SimResult<Drawdown> {
    if config.buffer.pension_drawdown != PensionDrawdown::Linear {
        return Ok(Drawdown::default());
    }
    let start_age = config
        .salary_schedule
        .retirement_age
        .unwrap_or(config.pension_access_age)
        .max(config.pension_access_age);
    if state.age < start_age {
        return Ok(Drawdown::default());
    }

    let years_left = (config.end_age.saturating_sub(state.age) + 1) as f64;
    let mut total = Drawdown::default();
    for slot in ledger.slots_of(AccountKind::Pension) {
        let Some(account) = ledger.account_mut(slot) else {
            continue;
        };
        let balance = account.balance();
        if balance <= EPS {
            continue;
        }
        let lump_sum = match account.tax_free_remaining() {
            None => account.preview_withdrawal(balance, tax_year.rules())?.tax_free,
            Some(_) => 0.0,
        };
        let gross = (lump_sum + (balance - lump_sum) / years_left).min(balance);

        let withdrawal = account.withdraw(gross, tax_year.rules())?;
        let tax = tax_year.add_income(withdrawal.taxable_income)?;
        let net = withdrawal.cash - tax;
        state.cash += net;
        total.net += net;
        total.taxable_income += withdrawal.taxable_income;
    }

    if total.net > 0.0 {
        debug!(age = state.age, net = total.net, "scheduled pension drawdown");
    }
    Ok(total)
}
