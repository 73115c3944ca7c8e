use super::config::{FailurePenalty, SimulationConfig, UtilityConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    pub age: u32,
    pub year_index: u32,
    pub cash: f64,
    pub cumulative_utility: f64,
    pub prior_spend: Option<f64>,
    pub bankrupt: bool,
    /// Interest earned on cash this year, taxed next year.
    pub pending_interest: f64,
}

impl AgentState {
    pub fn new(config: &SimulationConfig, cash: f64) -> Self {
        Self {
            age: config.start_age,
            year_index: 0,
            cash,
            cumulative_utility: 0.0,
            prior_spend: None,
            bankrupt: false,
            pending_interest: 0.0,
        }
    }

    pub fn advance(&mut self) {
        self.age += 1;
        self.year_index += 1;
    }
}

/// Base cost compounded through three phases: working years at `growth_rate`,
/// retirement up to the slow-down age at the post-retirement rate, then the
/// post-slow-down rate. A slow-down before retirement does not start a phase.
pub fn living_cost(age: u32, config: &SimulationConfig) -> f64 {
    let schedule = &config.living_cost_schedule;
    let t = age.saturating_sub(config.start_age);
    let slow_t = config
        .slow_down_age
        .map(|slow| slow.saturating_sub(config.start_age));
    let retire_t = config
        .salary_schedule
        .retirement_age
        .map(|retire| retire.saturating_sub(config.start_age))
        .or(slow_t)
        .unwrap_or(u32::MAX);
    let active_end = match slow_t {
        Some(slow) if slow >= retire_t => slow,
        _ => u32::MAX,
    };

    let working = t.min(retire_t);
    let retired = t.min(active_end).saturating_sub(retire_t);
    let slowed = t.saturating_sub(active_end);

    let post_retirement = schedule.post_retirement_rate.unwrap_or(schedule.growth_rate);
    let post_slow_down = schedule.post_slow_down_rate.unwrap_or(post_retirement);

    let mut cost = schedule.base_cost
        * (1.0 + schedule.growth_rate).powi(working as i32)
        * (1.0 + post_retirement).powi(retired as i32)
        * (1.0 + post_slow_down).powi(slowed as i32);

    if let Some(slow_down_age) = config.slow_down_age {
        if age >= slow_down_age {
            cost *= schedule.slow_down_factor;
        }
    }

    let one_offs: f64 = config
        .one_off_expenses
        .iter()
        .filter(|expense| expense.age == age)
        .map(|expense| expense.amount)
        .sum();

    cost + one_offs
}

/// Spend wanted on top of living costs: `(baseline + linear * t) * (1 + exp)^t`.
pub fn desired_discretionary_spend(age: u32, config: &SimulationConfig) -> f64 {
    let utility = &config.utility;
    let t = age.saturating_sub(config.start_age) as f64;
    let linear = utility.baseline_spend + utility.linear_rate * t;
    (linear * (1.0 + utility.exp_rate).powf(t)).max(0.0)
}

pub fn desired_spend(age: u32, config: &SimulationConfig) -> f64 {
    living_cost(age, config) + desired_discretionary_spend(age, config)
}

pub fn target_spend(state: &AgentState, config: &SimulationConfig) -> f64 {
    if state.bankrupt {
        config.utility.spend_floor
    } else {
        desired_spend(state.age, config).max(config.utility.spend_floor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UtilityOutcome {
    pub raw: f64,
    pub failure_penalty: f64,
    pub volatility_penalty: f64,
    pub net: f64,
}

pub fn failure_penalty(shortfall: f64, config: &UtilityConfig) -> f64 {
    let shortfall = shortfall.max(0.0);
    match config.failure_penalty {
        FailurePenalty::Linear => config.penalty_scale * shortfall,
        FailurePenalty::Quadratic => {
            config.penalty_scale * shortfall * shortfall / config.penalty_reference
        }
    }
}

/// Undiscounted utility of one year's spend. `desired` is what the agent
/// wanted to spend; a year with nothing spent is penalised by that shortfall.
pub fn utility(
    spend: f64,
    prior_spend: Option<f64>,
    desired: f64,
    config: &UtilityConfig,
) -> UtilityOutcome {
    let (raw, failure) = if spend > 0.0 {
        (spend.powf(config.exponent), 0.0)
    } else {
        (0.0, failure_penalty(desired - spend, config))
    };

    let volatility = prior_spend.map_or(0.0, |prior| config.volatility_weight * (spend - prior).abs());

    UtilityOutcome {
        raw,
        failure_penalty: failure,
        volatility_penalty: volatility,
        net: raw - failure - volatility,
    }
}

pub fn accrue(
    state: &mut AgentState,
    outcome: &UtilityOutcome,
    spend: f64,
    config: &UtilityConfig,
) -> f64 {
    let discount = (1.0 / (1.0 + config.discount_rate)).powi(state.year_index as i32);
    let discounted = outcome.net * discount;
    state.cumulative_utility += discounted;
    state.prior_spend = Some(spend);
    discounted
}
