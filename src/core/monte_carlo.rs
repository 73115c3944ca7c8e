use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use super::config::{AccountKind, SimulationConfig};
use super::engine::{ReturnPath, simulate_life, simulate_validated};
use super::error::{SimError, SimResult};
use super::types::{
    BandDelta, DrawMode, LifePath, MonteCarloResult, ScenarioComparison, YearBand,
};

pub const DEFAULT_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct MonteCarloOptions {
    /// Worker threads; `None` uses every available core.
    pub workers: Option<usize>,
    pub percentiles: Vec<f64>,
    pub keep_paths: bool,
    pub cancel: CancelFlag,
}

impl Default for MonteCarloOptions {
    fn default() -> Self {
        Self {
            workers: None,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            keep_paths: false,
            cancel: CancelFlag::new(),
        }
    }
}

impl MonteCarloOptions {
    fn validate(&self) -> SimResult<()> {
        if self.workers == Some(0) {
            return Err(SimError::config("workers must be >= 1"));
        }
        if self.percentiles.is_empty() {
            return Err(SimError::config("at least one percentile is required"));
        }
        if self
            .percentiles
            .iter()
            .any(|p| !p.is_finite() || *p < 0.0 || *p > 100.0)
        {
            return Err(SimError::config("percentiles must be between 0 and 100"));
        }
        Ok(())
    }

    fn build_pool(&self) -> SimResult<ThreadPool> {
        ThreadPoolBuilder::new()
            .num_threads(self.workers.unwrap_or(0))
            .build()
            .map_err(|e| SimError::config(format!("failed to start worker pool: {e}")))
    }
}

pub fn run_deterministic(config: &SimulationConfig) -> SimResult<LifePath> {
    simulate_life(config, &ReturnPath::mean(config))
}

pub fn run_monte_carlo(
    config: &SimulationConfig,
    options: &MonteCarloOptions,
) -> SimResult<MonteCarloResult> {
    config.validate()?;
    options.validate()?;

    let pool = options.build_pool()?;
    let slots = slot_count(config);
    let horizon = config.horizon_years();
    info!(
        sims = config.monte_carlo_sims,
        workers = pool.current_num_threads(),
        seed = config.random_seed,
        "starting monte carlo batch"
    );

    let paths = replicate(&pool, config.monte_carlo_sims, &options.cancel, |replica| {
        let shocks = shock_matrix(derive_seed(config.random_seed, replica), horizon, slots);
        simulate_validated(config, &ReturnPath::from_shocks(config, &shocks)?)
    })?;

    let result = aggregate(config, paths, options);
    info!(
        mean_lifetime_utility = result.mean_lifetime_utility,
        probability_of_ruin = result.probability_of_ruin,
        "monte carlo batch finished"
    );
    Ok(result)
}

pub fn compare_scenarios(
    a: &SimulationConfig,
    b: &SimulationConfig,
    mode: DrawMode,
    options: &MonteCarloOptions,
) -> SimResult<ScenarioComparison> {
    a.validate()?;
    b.validate()?;
    options.validate()?;

    let (result_a, result_b, paired) = match mode {
        DrawMode::Matched => {
            if a.monte_carlo_sims != b.monte_carlo_sims {
                return Err(SimError::config(format!(
                    "matched comparison needs equal monteCarloSims, got {} and {}",
                    a.monte_carlo_sims, b.monte_carlo_sims
                )));
            }

            let pool = options.build_pool()?;
            let slots = slot_count(a).max(slot_count(b));
            let horizon = a.horizon_years().max(b.horizon_years());
            info!(sims = a.monte_carlo_sims, "starting matched scenario comparison");

            let pairs = replicate(&pool, a.monte_carlo_sims, &options.cancel, |replica| {
                let shocks = shock_matrix(derive_seed(a.random_seed, replica), horizon, slots);
                let path_a = simulate_validated(a, &ReturnPath::from_shocks(a, &shocks)?)?;
                let path_b = simulate_validated(b, &ReturnPath::from_shocks(b, &shocks)?)?;
                Ok((path_a, path_b))
            })?;

            let paired = pairs
                .iter()
                .map(|(pa, pb)| pb.lifetime_utility - pa.lifetime_utility)
                .sum::<f64>()
                / pairs.len() as f64;
            let (paths_a, paths_b): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
            (
                aggregate(a, paths_a, options),
                aggregate(b, paths_b, options),
                Some(paired),
            )
        }
        DrawMode::Independent => (
            run_monte_carlo(a, options)?,
            run_monte_carlo(b, options)?,
            None,
        ),
    };

    let band_deltas = result_a
        .bands
        .iter()
        .filter_map(|band_a| {
            let band_b = result_b.bands.iter().find(|band| band.age == band_a.age)?;
            Some(BandDelta {
                age: band_a.age,
                total_assets: elementwise_delta(&band_a.total_assets, &band_b.total_assets),
                cumulative_utility: elementwise_delta(
                    &band_a.cumulative_utility,
                    &band_b.cumulative_utility,
                ),
                ruin_fraction: band_b.ruin_fraction - band_a.ruin_fraction,
            })
        })
        .collect();

    Ok(ScenarioComparison {
        mode,
        mean_lifetime_utility_delta: result_b.mean_lifetime_utility
            - result_a.mean_lifetime_utility,
        median_terminal_assets_delta: result_b.median_terminal_assets
            - result_a.median_terminal_assets,
        probability_of_ruin_delta: result_b.probability_of_ruin - result_a.probability_of_ruin,
        paired_utility_difference: paired,
        band_deltas,
        a: result_a,
        b: result_b,
    })
}

fn elementwise_delta(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| y - x).collect()
}

/// Runs `replica` for every index on `pool`. Any failure, or a cancel
/// observed by any replica, fails the whole batch.
fn replicate<T, F>(pool: &ThreadPool, sims: u32, cancel: &CancelFlag, replica: F) -> SimResult<Vec<T>>
where
    T: Send,
    F: Fn(u64) -> SimResult<T> + Sync,
{
    let results = pool.install(|| {
        (0..sims as u64)
            .into_par_iter()
            .map(|index| {
                if cancel.is_cancelled() {
                    return Err(SimError::Cancelled);
                }
                replica(index)
            })
            .collect::<SimResult<Vec<T>>>()
    });

    if cancel.is_cancelled() {
        debug!("monte carlo batch cancelled; discarding replicas");
        return Err(SimError::Cancelled);
    }
    results
}

fn slot_count(config: &SimulationConfig) -> usize {
    config
        .initial_accounts
        .iter()
        .filter(|account| account.kind != AccountKind::Cash)
        .count()
}

pub fn shock_matrix(seed: u64, years: usize, slots: usize) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..years)
        .map(|_| {
            (0..slots)
                .map(|_| {
                    let z: f64 = rng.sample(StandardNormal);
                    z
                })
                .collect()
        })
        .collect()
}

fn aggregate(
    config: &SimulationConfig,
    paths: Vec<LifePath>,
    options: &MonteCarloOptions,
) -> MonteCarloResult {
    let replicas = paths.len();
    let horizon = config.horizon_years();
    let n = replicas.max(1) as f64;

    let mut bands = Vec::with_capacity(horizon);
    let mut assets = Vec::with_capacity(replicas);
    let mut utility = Vec::with_capacity(replicas);

    for index in 0..horizon {
        assets.clear();
        utility.clear();
        let mut ruined = 0usize;
        for path in &paths {
            if let Some(year) = path.years.get(index) {
                assets.push(year.total_assets);
                utility.push(year.cumulative_utility);
                if year.bankrupt {
                    ruined += 1;
                }
            }
        }

        let age = config.start_age + index as u32;
        bands.push(YearBand {
            year: config.calendar_year(age),
            age,
            total_assets: options
                .percentiles
                .iter()
                .map(|p| percentile(&mut assets, *p))
                .collect(),
            cumulative_utility: options
                .percentiles
                .iter()
                .map(|p| percentile(&mut utility, *p))
                .collect(),
            ruin_fraction: ruined as f64 / n,
        });
    }

    let mean_lifetime_utility = paths.iter().map(|p| p.lifetime_utility).sum::<f64>() / n;
    let probability_of_ruin = paths.iter().filter(|p| p.ever_bankrupt).count() as f64 / n;
    let mut terminal: Vec<f64> = paths.iter().map(|p| p.terminal_assets).collect();
    let median_terminal_assets = percentile(&mut terminal, 50.0);

    MonteCarloResult {
        replicas: replicas as u32,
        percentiles: options.percentiles.clone(),
        bands,
        mean_lifetime_utility,
        median_terminal_assets,
        probability_of_ruin,
        paths: options.keep_paths.then_some(paths),
    }
}

pub fn derive_seed(base_seed: u64, replica: u64) -> u64 {
    let mixed = base_seed ^ replica.rotate_left(32) ^ replica;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Linear-interpolated percentile; sorts `values` in place.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper || values[lower] == values[upper] {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AccountConfig, OneOffExpense};
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.end_age = 50;
        config.monte_carlo_sims = 24;
        config.random_seed = 7;
        config
    }

    fn options(workers: usize) -> MonteCarloOptions {
        MonteCarloOptions {
            workers: Some(workers),
            ..MonteCarloOptions::default()
        }
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let mut values = vec![40.0, 10.0, 30.0, 20.0];
        assert_approx(percentile(&mut values, 0.0), 10.0);
        assert_approx(percentile(&mut values, 50.0), 25.0);
        assert_approx(percentile(&mut values, 100.0), 40.0);
        assert_approx(percentile(&mut [], 50.0), 0.0);
    }

    #[test]
    fn seeds_differ_per_replica_and_repeat_per_base() {
        let seeds: Vec<u64> = (0..64).map(|i| derive_seed(42, i)).collect();
        let mut unique = seeds.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seeds.len());
        assert_eq!(derive_seed(42, 5), seeds[5]);
        assert_ne!(derive_seed(43, 5), seeds[5]);
    }

    #[test]
    fn shock_matrix_is_reproducible() {
        let a = shock_matrix(9, 5, 3);
        let b = shock_matrix(9, 5, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.iter().all(|row| row.len() == 3));
        assert_ne!(shock_matrix(10, 5, 3), a);
    }

    #[test]
    fn zero_volatility_collapses_every_band_to_the_deterministic_run() {
        let mut config = sample_config();
        for account in &mut config.initial_accounts {
            account.std_dev_return = 0.0;
        }

        let deterministic = run_deterministic(&config).unwrap();
        let result = run_monte_carlo(&config, &options(3)).unwrap();

        assert_eq!(result.replicas, config.monte_carlo_sims);
        assert_eq!(result.bands.len(), deterministic.years.len());
        for (band, year) in result.bands.iter().zip(&deterministic.years) {
            assert_eq!(band.age, year.age);
            assert!(band.total_assets.iter().all(|v| *v == year.total_assets));
            assert!(band.cumulative_utility.iter().all(|v| *v == year.cumulative_utility));
        }
        assert_approx(result.mean_lifetime_utility, deterministic.lifetime_utility);
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let config = sample_config();
        let single = run_monte_carlo(&config, &options(1)).unwrap();
        let many = run_monte_carlo(&config, &options(4)).unwrap();
        assert_eq!(single, many);
    }

    #[test]
    fn bands_are_ordered_by_percentile() {
        let result = run_monte_carlo(&sample_config(), &options(2)).unwrap();
        for band in &result.bands {
            assert!(band.total_assets.windows(2).all(|w| w[0] <= w[1]));
            assert!(band.cumulative_utility.windows(2).all(|w| w[0] <= w[1]));
        }
        assert!((0.0..=1.0).contains(&result.probability_of_ruin));
    }

    #[test]
    fn keeps_paths_only_when_asked() {
        let config = sample_config();
        let without = run_monte_carlo(&config, &options(2)).unwrap();
        assert!(without.paths.is_none());

        let with = run_monte_carlo(
            &config,
            &MonteCarloOptions {
                keep_paths: true,
                ..options(2)
            },
        )
        .unwrap();
        let paths = with.paths.expect("paths kept");
        assert_eq!(paths.len(), config.monte_carlo_sims as usize);
        assert!(paths.iter().all(|p| p.years.len() == config.horizon_years()));
    }

    #[test]
    fn cancelled_batch_returns_nothing() {
        let opts = options(2);
        opts.cancel.cancel();
        assert_eq!(
            run_monte_carlo(&sample_config(), &opts),
            Err(SimError::Cancelled)
        );
    }

    #[test]
    fn invalid_options_are_configuration_errors() {
        let config = sample_config();
        let bad_percentile = MonteCarloOptions {
            percentiles: vec![50.0, 101.0],
            ..options(1)
        };
        assert!(matches!(
            run_monte_carlo(&config, &bad_percentile),
            Err(SimError::Configuration(_))
        ));
        assert!(matches!(
            run_monte_carlo(&config, &options(0)),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn ruin_probability_is_one_when_every_replica_runs_out() {
        let mut config = sample_config();
        config.salary_schedule.base_salary = 0.0;
        config.initial_accounts = vec![AccountConfig::new(AccountKind::Isa, 1_000.0, 0.05, 0.2)];
        config.utility.spend_floor = 10_000.0;
        let result = run_monte_carlo(&config, &options(2)).unwrap();
        assert_approx(result.probability_of_ruin, 1.0);
        assert!(result.bands.iter().all(|b| b.ruin_fraction == 1.0));
    }

    #[test]
    fn ruin_is_counted_without_a_spend_floor() {
        let mut config = sample_config();
        config.salary_schedule.base_salary = 0.0;
        config.initial_accounts = vec![AccountConfig::new(AccountKind::Isa, 1_000.0, 0.05, 0.2)];
        assert_eq!(config.utility.spend_floor, 0.0);
        let result = run_monte_carlo(&config, &options(2)).unwrap();
        assert_approx(result.probability_of_ruin, 1.0);
        assert_approx(result.bands[0].ruin_fraction, 0.0);
        assert!(result.bands[1..].iter().all(|b| b.ruin_fraction == 1.0));
    }

    #[test]
    fn matched_comparison_only_differs_downstream_of_the_change() {
        let a = sample_config();
        let mut b = a.clone();
        b.one_off_expenses.push(OneOffExpense {
            age: 40,
            amount: 25_000.0,
        });

        let comparison = compare_scenarios(&a, &b, DrawMode::Matched, &options(2)).unwrap();
        assert_eq!(comparison.band_deltas.len(), a.horizon_years());
        for delta in comparison.band_deltas.iter().filter(|d| d.age < 40) {
            assert!(delta.total_assets.iter().all(|v| *v == 0.0));
            assert!(delta.cumulative_utility.iter().all(|v| *v == 0.0));
        }
        let at_change = comparison
            .band_deltas
            .iter()
            .find(|d| d.age == 40)
            .expect("age 40 band");
        assert!(at_change.total_assets.iter().any(|v| *v != 0.0));
        assert!(comparison.paired_utility_difference.is_some());
    }

    #[test]
    fn matched_comparison_of_identical_scenarios_is_zero() {
        let a = sample_config();
        let comparison = compare_scenarios(&a, &a, DrawMode::Matched, &options(2)).unwrap();
        assert_eq!(comparison.paired_utility_difference, Some(0.0));
        assert_eq!(comparison.mean_lifetime_utility_delta, 0.0);
        assert_eq!(comparison.a, comparison.b);
    }

    #[test]
    fn matched_comparison_requires_equal_replica_counts() {
        let a = sample_config();
        let mut b = a.clone();
        b.monte_carlo_sims += 1;
        assert!(matches!(
            compare_scenarios(&a, &b, DrawMode::Matched, &options(1)),
            Err(SimError::Configuration(_))
        ));
        assert!(compare_scenarios(&a, &b, DrawMode::Independent, &options(1)).is_ok());
    }

    #[test]
    fn independent_comparison_uses_each_scenarios_own_seed() {
        let a = sample_config();
        let mut b = a.clone();
        b.random_seed = 8;
        let comparison = compare_scenarios(&a, &b, DrawMode::Independent, &options(2)).unwrap();
        assert_eq!(comparison.paired_utility_difference, None);
        assert_ne!(comparison.a.bands, comparison.b.bands);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_percentile_is_monotone_and_within_range(
            values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..40),
            p1 in 0u32..101,
            p2 in 0u32..101
        ) {
            let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
            let mut data = values.clone();
            let a = percentile(&mut data, lo as f64);
            let b = percentile(&mut data, hi as f64);
            prop_assert!(a <= b + 1e-9);
            prop_assert!(a >= data[0] - 1e-9);
            prop_assert!(b <= data[data.len() - 1] + 1e-9);
        }

        #[test]
        fn prop_derive_seed_is_a_pure_function(base in any::<u64>(), replica in 0u64..10_000) {
            prop_assert_eq!(derive_seed(base, replica), derive_seed(base, replica));
        }
    }
}
