use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::core::{
    GlidepathEngine, LedgerRow, LedgerSummary, PriceSeries, load_price_series, summarize,
};

const MAX_MONTHLY_CONTRIBUTION: u32 = 5_000;
const MAX_DERISK_YEARS: u32 = 50;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[derive(Parser, Debug)]
#[command(
    name = "glidepath",
    about = "Pension accumulation under a linear de-risking glidepath (growth + defensive fund)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one scenario and print the ledger.
    Simulate {
        #[arg(long, help = "CSV with date, ety_open_price and bnd_open_price columns")]
        prices: PathBuf,
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Serve /api/simulate over HTTP.
    Serve {
        #[arg(long, help = "CSV with date, ety_open_price and bnd_open_price columns")]
        prices: PathBuf,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ScenarioArgs {
    #[arg(long, default_value = "1990-01-01")]
    pub start_date: NaiveDate,
    #[arg(long, default_value = "2023-01-01")]
    pub retirement_date: NaiveDate,
    #[arg(long, default_value_t = 500)]
    pub monthly_contribution: u32,
    #[arg(long, default_value_t = 15, help = "Years before retirement that de-risking begins")]
    pub derisk_years: u32,
    #[arg(
        long,
        default_value_t = 0.2,
        help = "Growth weight left at the end of the glidepath, between 0 and 1"
    )]
    pub equity_floor: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    start_date: Option<NaiveDate>,
    retirement_date: Option<NaiveDate>,
    monthly_contribution: Option<u32>,
    derisk_years: Option<u32>,
    equity_floor: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    start_date: NaiveDate,
    retirement_date: NaiveDate,
    monthly_contribution: u32,
    derisk_years: u32,
    equity_floor: f64,
    summary: LedgerSummary,
    ledger: Vec<LedgerRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    first_price_date: NaiveDate,
    last_price_date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
struct AppState {
    prices: Arc<PriceSeries>,
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Simulate {
            prices,
            scenario,
            format,
        } => {
            let series = load_prices(&prices)?;
            let response = simulate(&scenario, &series)?;
            write_response(&response, format, std::io::stdout().lock())
        }
        Command::Serve { prices, port } => {
            let series = load_prices(&prices)?;
            run_http_server(port, series)
                .await
                .map_err(|e| format!("Server error: {e}"))
        }
    }
}

fn load_prices(path: &Path) -> Result<PriceSeries, String> {
    load_price_series(path).map_err(|e| format!("Failed to load {}: {e}", path.display()))
}

fn build_engine(args: &ScenarioArgs) -> Result<GlidepathEngine, String> {
    if args.start_date >= args.retirement_date {
        return Err("--retirement-date must be after --start-date".to_string());
    }

    if args.monthly_contribution > MAX_MONTHLY_CONTRIBUTION {
        return Err(format!(
            "--monthly-contribution must be between 0 and {MAX_MONTHLY_CONTRIBUTION}"
        ));
    }

    if args.derisk_years > MAX_DERISK_YEARS {
        return Err(format!(
            "--derisk-years must be between 0 and {MAX_DERISK_YEARS}"
        ));
    }

    if !(0.0..=1.0).contains(&args.equity_floor) {
        return Err("--equity-floor must be between 0 and 1".to_string());
    }

    GlidepathEngine::new(
        args.start_date,
        args.retirement_date,
        args.monthly_contribution as f64,
    )
    .and_then(|engine| engine.with_derisk_strategy(args.equity_floor, args.derisk_years))
    .map_err(|e| e.to_string())
}

pub fn simulate(args: &ScenarioArgs, prices: &PriceSeries) -> Result<SimulateResponse, String> {
    let engine = build_engine(args)?;
    let ledger = engine.accumulate(prices);
    Ok(SimulateResponse {
        start_date: args.start_date,
        retirement_date: args.retirement_date,
        monthly_contribution: args.monthly_contribution,
        derisk_years: args.derisk_years,
        equity_floor: args.equity_floor,
        summary: summarize(&ledger),
        ledger,
    })
}

fn write_response<W: Write>(
    response: &SimulateResponse,
    format: OutputFormat,
    mut out: W,
) -> Result<(), String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, response)
                .map_err(|e| format!("Failed to write JSON: {e}"))?;
            writeln!(out).map_err(|e| format!("Failed to write JSON: {e}"))
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for row in &response.ledger {
                writer
                    .serialize(row)
                    .map_err(|e| format!("Failed to write CSV: {e}"))?;
            }
            writer.flush().map_err(|e| format!("Failed to write CSV: {e}"))?;
            let summary = response.summary;
            tracing::info!(
                ending_value = summary.ending_value,
                total_contributions = summary.total_contributions,
                return_pct = summary.return_pct,
                "summary"
            );
            Ok(())
        }
    }
}

fn router(prices: PriceSeries) -> Router {
    let state = AppState {
        prices: Arc::new(prices),
    };
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, prices: PriceSeries) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(prices);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "glidepath HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            first_price_date: state.prices.first_date(),
            last_price_date: state.prices.last_date(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload)
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, payload)
}

fn simulate_handler_impl(state: &AppState, payload: SimulatePayload) -> Response {
    let args = scenario_from_payload(payload);
    match simulate(&args, &state.prices) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => {
            tracing::warn!(error = %msg, "rejected simulation request");
            error_response(StatusCode::BAD_REQUEST, &msg)
        }
    }
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
fn scenario_from_json(json: &str) -> Result<ScenarioArgs, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(scenario_from_payload(payload))
}

fn scenario_from_payload(payload: SimulatePayload) -> ScenarioArgs {
    let mut args = default_scenario();
    if let Some(v) = payload.start_date {
        args.start_date = v;
    }
    if let Some(v) = payload.retirement_date {
        args.retirement_date = v;
    }
    if let Some(v) = payload.monthly_contribution {
        args.monthly_contribution = v;
    }
    if let Some(v) = payload.derisk_years {
        args.derisk_years = v;
    }
    if let Some(v) = payload.equity_floor {
        args.equity_floor = v;
    }
    args
}

fn default_scenario() -> ScenarioArgs {
    ScenarioArgs {
        start_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
        retirement_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
        monthly_contribution: 500,
        derisk_years: 15,
        equity_floor: 0.2,
    }
}
