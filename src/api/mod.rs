use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    DEFAULT_PERCENTILES, DrawMode, LifePath, MonteCarloOptions, MonteCarloResult,
    ScenarioComparison, SimError, SimulationConfig, compare_scenarios, run_deterministic,
    run_monte_carlo,
};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sim(#[from] SimError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Deterministic,
    #[serde(alias = "monteCarlo", alias = "monte_carlo")]
    MonteCarlo,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliDrawMode {
    Matched,
    Independent,
}

impl From<CliDrawMode> for DrawMode {
    fn from(value: CliDrawMode) -> Self {
        match value {
            CliDrawMode::Matched => DrawMode::Matched,
            CliDrawMode::Independent => DrawMode::Independent,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "lifeplan",
    about = "UK personal-finance life simulator (tax-aware ledger, lifetime utility, Monte Carlo)"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Log every simulated year")]
    pub verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate one config, deterministically or as a Monte Carlo batch.
    Run {
        #[arg(long, help = "JSON SimulationConfig; built-in defaults when omitted")]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = RunMode::MonteCarlo)]
        mode: RunMode,
        #[arg(long, help = "Override monteCarloSims")]
        sims: Option<u32>,
        #[arg(long, help = "Override randomSeed")]
        seed: Option<u64>,
        #[arg(long, help = "Worker threads; defaults to every core")]
        workers: Option<usize>,
        #[arg(long, value_delimiter = ',', help = "Percentile bands, e.g. 5,50,95")]
        percentiles: Option<Vec<f64>>,
        #[arg(long, help = "Include every replica path in the output")]
        keep_paths: bool,
        #[arg(long, help = "Write JSON here instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Run scenario A and scenario B and report B minus A.
    Compare {
        #[arg(long)]
        a: PathBuf,
        #[arg(long)]
        b: PathBuf,
        #[arg(long, value_enum, default_value_t = CliDrawMode::Matched)]
        draw_mode: CliDrawMode,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

pub async fn execute(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run {
            config,
            mode,
            sims,
            seed,
            workers,
            percentiles,
            keep_paths,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(sims) = sims {
                config.monte_carlo_sims = sims;
            }
            if let Some(seed) = seed {
                config.random_seed = seed;
            }
            let request = SimulateRequest {
                config,
                mode,
                workers,
                percentiles,
                keep_paths,
            };
            let response = tokio::task::spawn_blocking(move || simulate(&request))
                .await
                .map_err(|e| SimError::numerical(format!("simulation task failed: {e}")))??;
            write_output(output.as_deref(), &response)
        }
        Command::Compare {
            a,
            b,
            draw_mode,
            workers,
            output,
        } => {
            let request = CompareRequest {
                a: load_config(Some(&a))?,
                b: load_config(Some(&b))?,
                draw_mode: draw_mode.into(),
                workers,
                percentiles: None,
            };
            let comparison = tokio::task::spawn_blocking(move || compare(&request))
                .await
                .map_err(|e| SimError::numerical(format!("comparison task failed: {e}")))??;
            write_output(output.as_deref(), &comparison)
        }
        Command::Serve { port } => run_http_server(port).await.map_err(|source| CliError::Io {
            path: format!("0.0.0.0:{port}"),
            source,
        }),
    }
}

pub fn load_config(path: Option<&Path>) -> Result<SimulationConfig, CliError> {
    let Some(path) = path else {
        return Ok(SimulationConfig::default());
    };
    let raw = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_output<T: Serialize>(path: Option<&Path>, body: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(body)?;
    match path {
        Some(path) => fs::write(path, json).map_err(|source| CliError::Io {
            path: path.display().to_string(),
            source,
        }),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    #[serde(default)]
    pub config: SimulationConfig,
    #[serde(default = "default_run_mode")]
    pub mode: RunMode,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub percentiles: Option<Vec<f64>>,
    #[serde(default)]
    pub keep_paths: bool,
}

fn default_run_mode() -> RunMode {
    RunMode::MonteCarlo
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    pub a: SimulationConfig,
    pub b: SimulationConfig,
    #[serde(default)]
    pub draw_mode: DrawMode,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub percentiles: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SimulateResponse {
    Deterministic { path: LifePath },
    MonteCarlo { result: MonteCarloResult },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn options_for(
    workers: Option<usize>,
    percentiles: Option<Vec<f64>>,
    keep_paths: bool,
) -> MonteCarloOptions {
    MonteCarloOptions {
        workers,
        percentiles: percentiles.unwrap_or_else(|| DEFAULT_PERCENTILES.to_vec()),
        keep_paths,
        ..MonteCarloOptions::default()
    }
}

pub fn simulate(request: &SimulateRequest) -> Result<SimulateResponse, SimError> {
    match request.mode {
        RunMode::Deterministic => Ok(SimulateResponse::Deterministic {
            path: run_deterministic(&request.config)?,
        }),
        RunMode::MonteCarlo => {
            let options = options_for(
                request.workers,
                request.percentiles.clone(),
                request.keep_paths,
            );
            Ok(SimulateResponse::MonteCarlo {
                result: run_monte_carlo(&request.config, &options)?,
            })
        }
    }
}

pub fn compare(request: &CompareRequest) -> Result<ScenarioComparison, SimError> {
    let options = options_for(request.workers, request.percentiles.clone(), false);
    compare_scenarios(&request.a, &request.b, request.draw_mode, &options)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "lifeplan HTTP API listening");
    axum::serve(listener, router()).await
}

pub fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/compare", post(compare_handler))
        .fallback(not_found_handler)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(request): Json<SimulateRequest>) -> Response {
    match tokio::task::spawn_blocking(move || simulate(&request)).await {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(e)) => sim_error_response(&e),
        Err(e) => {
            error!(error = %e, "simulation task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation failed")
        }
    }
}

async fn compare_handler(Json(request): Json<CompareRequest>) -> Response {
    match tokio::task::spawn_blocking(move || compare(&request)).await {
        Ok(Ok(comparison)) => json_response(StatusCode::OK, comparison),
        Ok(Err(e)) => sim_error_response(&e),
        Err(e) => {
            error!(error = %e, "comparison task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "comparison failed")
        }
    }
}

fn status_for(err: &SimError) -> StatusCode {
    match err {
        SimError::Configuration(_) => StatusCode::BAD_REQUEST,
        SimError::Numerical(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SimError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn sim_error_response(err: &SimError) -> Response {
    error_response(status_for(err), &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccountConfig, AccountKind};

    fn small_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.end_age = 35;
        config.monte_carlo_sims = 8;
        config
    }

    #[test]
    fn simulate_request_parses_with_defaults() {
        let request: SimulateRequest = serde_json::from_str(
            r#"{"config": {"startAge": 40, "endAge": 45}, "percentiles": [10, 90]}"#,
        )
        .expect("json should parse");
        assert_eq!(request.mode, RunMode::MonteCarlo);
        assert_eq!(request.config.start_age, 40);
        assert_eq!(request.percentiles, Some(vec![10.0, 90.0]));
        assert!(!request.keep_paths);
    }

    #[test]
    fn deterministic_request_returns_one_row_per_year() {
        let request = SimulateRequest {
            config: small_config(),
            mode: RunMode::Deterministic,
            workers: None,
            percentiles: None,
            keep_paths: false,
        };
        match simulate(&request).expect("simulates") {
            SimulateResponse::Deterministic { path } => assert_eq!(path.years.len(), 6),
            SimulateResponse::MonteCarlo { .. } => panic!("expected a deterministic path"),
        }
    }

    #[test]
    fn monte_carlo_response_serializes_with_mode_tag() {
        let request = SimulateRequest {
            config: small_config(),
            mode: RunMode::MonteCarlo,
            workers: Some(2),
            percentiles: Some(vec![50.0]),
            keep_paths: false,
        };
        let response = simulate(&request).expect("simulates");
        let json = serde_json::to_value(&response).expect("serializes");
        assert_eq!(json["mode"], "monte-carlo");
        assert_eq!(json["result"]["replicas"], 8);
        assert_eq!(json["result"]["bands"].as_array().map(Vec::len), Some(6));
        assert!(json["result"].get("paths").is_none());
    }

    #[test]
    fn compare_request_defaults_to_matched_draws() {
        let request: CompareRequest =
            serde_json::from_str(r#"{"a": {"endAge": 35}, "b": {"endAge": 35}}"#)
                .expect("json should parse");
        assert_eq!(request.draw_mode, DrawMode::Matched);
    }

    #[test]
    fn configuration_errors_map_to_bad_request() {
        assert_eq!(
            status_for(&SimError::config("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SimError::numerical("nan")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn simulate_handler_rejects_invalid_config() {
        let mut config = small_config();
        config.end_age = config.start_age;
        let request = SimulateRequest {
            config,
            mode: RunMode::Deterministic,
            workers: None,
            percentiles: None,
            keep_paths: false,
        };
        let response = simulate_handler(Json(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn compare_handler_returns_ok_for_valid_scenarios() {
        let a = small_config();
        let mut b = a.clone();
        b.initial_accounts
            .push(AccountConfig::new(AccountKind::Isa, 10_000.0, 0.04, 0.1));
        let request = CompareRequest {
            a,
            b,
            draw_mode: DrawMode::Matched,
            workers: Some(1),
            percentiles: None,
        };
        let response = compare_handler(Json(request)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn cli_parses_run_and_compare_subcommands() {
        let cli = Cli::try_parse_from([
            "lifeplan",
            "run",
            "--mode",
            "deterministic",
            "--percentiles",
            "5,50,95",
            "--verbose",
        ])
        .expect("run parses");
        assert!(cli.verbose);
        match cli.command {
            Command::Run {
                mode, percentiles, ..
            } => {
                assert_eq!(mode, RunMode::Deterministic);
                assert_eq!(percentiles, Some(vec![5.0, 50.0, 95.0]));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "lifeplan",
            "compare",
            "--a",
            "a.json",
            "--b",
            "b.json",
            "--draw-mode",
            "independent",
        ])
        .expect("compare parses");
        assert!(matches!(
            cli.command,
            Command::Compare {
                draw_mode: CliDrawMode::Independent,
                ..
            }
        ));
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.json")))
            .expect_err("missing file");
        assert!(matches!(err, CliError::Io { .. }));
        assert_eq!(
            load_config(None).expect("defaults"),
            SimulationConfig::default()
        );
    }
}
