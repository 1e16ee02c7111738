use std::{
    net::{SocketAddr, TcpStream},
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chartscan::{
    evaluate::{DetectorSettings, Evaluator},
    output::{self, ErrorEnvelope, StdoutSink},
    screener::{default_workers, parse_periods, AnalyzeRequest, Paths, Screener, ScreenerBuilder},
    ScreenError,
};

const LOG_FILE: &str = "chartscan.log";
const CONNECTIVITY_PROBE: ([u8; 4], u16) = ([8, 8, 8, 8], 53);
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(version, about = "Daily-bar chart pattern screener")]
struct Cli {
    /// Working directory holding data/, cache/ and log/
    #[arg(long, global = true, env = "CHARTSCAN_HOME", default_value = ".")]
    base_dir: PathBuf,
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true)]
    skip_connectivity_check: bool,
    /// JSON file overriding detector thresholds and windows
    #[arg(long, global = true, env = "CHARTSCAN_DETECTORS")]
    detector_config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Screen the symbol universe
    Analyze(AnalyzeCmd),
    /// Export chart data for one symbol
    Chart(ChartCmd),
}

#[derive(Args)]
struct AnalyzeCmd {
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, default_value = "20,50,200")]
    ma_periods: String,
    #[arg(long)]
    analyze_patterns: bool,
    /// Filter identifier, e.g. double_bottom, goldencross, regime:2
    #[arg(long)]
    pattern_type: Option<String>,
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    top_n: i64,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    symbol: Option<String>,
}

#[derive(Args)]
struct ChartCmd {
    #[arg(long)]
    symbol: String,
    #[arg(long, default_value = "20,50,200")]
    ma_periods: String,
    #[arg(long, default_value_t = 250)]
    chart_period: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.skip_connectivity_check && !is_online() {
        output::emit(
            &ErrorEnvelope::new("CRITICAL_ERROR")
                .with("reason", "network connectivity check failed")
                .with("mode", "initial_check"),
        );
        return ExitCode::FAILURE;
    }

    let paths = Paths::from_base(&cli.base_dir);
    let _guard = match init_logging(&paths, cli.debug) {
        Ok(guard) => guard,
        Err(e) => {
            output::emit(
                &ErrorEnvelope::new("CRITICAL_ERROR")
                    .with("reason", format!("{e:#}"))
                    .with("mode", "setup"),
            );
            return ExitCode::FAILURE;
        }
    };

    let detector_config = cli.detector_config.as_deref();
    match cli.cmd {
        Cmd::Analyze(cmd) => run_analyze(&cli.base_dir, detector_config, cmd),
        Cmd::Chart(cmd) => run_chart(&cli.base_dir, detector_config, cmd),
    }
}

fn is_online() -> bool {
    TcpStream::connect_timeout(&SocketAddr::from(CONNECTIVITY_PROBE), CONNECTIVITY_TIMEOUT).is_ok()
}

// Console layer on stderr, stdout carries the JSON envelopes
fn init_logging(paths: &Paths, debug: bool) -> Result<WorkerGuard> {
    paths.ensure().context("creating working directories")?;

    let file_appender = tracing_appender::rolling::never(&paths.log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

fn fail(e: &ScreenError) -> ExitCode {
    output::emit(&ErrorEnvelope::new(e.code()).with("reason", e.to_string()));
    ExitCode::FAILURE
}

fn build_screener(base_dir: &Path, detector_config: Option<&Path>, workers: usize) -> chartscan::Result<Screener> {
    let mut builder = ScreenerBuilder::new(base_dir).workers(workers);
    if let Some(path) = detector_config {
        let evaluator = Evaluator::from_settings(&DetectorSettings::from_path(path)?)?;
        info!(path = %path.display(), "detector settings loaded");
        builder = builder.evaluator(evaluator);
    }
    builder.build()
}

fn run_analyze(base_dir: &Path, detector_config: Option<&Path>, cmd: AnalyzeCmd) -> ExitCode {
    let workers = cmd.workers.unwrap_or_else(default_workers);
    let screener = match build_screener(base_dir, detector_config, workers) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    let request = AnalyzeRequest {
        ma_periods: parse_periods(&cmd.ma_periods),
        analyze_patterns: cmd.analyze_patterns,
        filter: cmd.pattern_type,
        top_n: cmd.top_n,
        force: cmd.force,
        symbol: cmd.symbol,
    };

    match screener.analyze(&request, &StdoutSink) {
        Ok(outcome) => {
            info!(cached = outcome.is_cached(), "analyze complete");
            output::emit_raw(outcome.body());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "analyze failed");
            fail(&e)
        }
    }
}

fn run_chart(base_dir: &Path, detector_config: Option<&Path>, cmd: ChartCmd) -> ExitCode {
    let screener = match build_screener(base_dir, detector_config, 1) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    match screener.chart(&cmd.symbol, &parse_periods(&cmd.ma_periods), cmd.chart_period) {
        Ok(chart) => {
            output::emit(&chart);
            ExitCode::SUCCESS
        }
        Err(e @ ScreenError::FileNotFound(_)) => fail(&e),
        Err(e) => {
            error!(symbol = %cmd.symbol, error = %e, "chart export failed");
            output::emit(&ErrorEnvelope::new("CHART_FAIL").with("reason", e.to_string()));
            ExitCode::FAILURE
        }
    }
}
