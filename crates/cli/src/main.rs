use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use gpw_advisor_core::{ConfigLoader, ConfigWatcher, EngineError};
use gpw_advisor_data::DatabaseClient;
use gpw_advisor_engine::{default_schedules, Engine, Scheduler};
use gpw_advisor_indicators::{
    bollinger, evaluate_votes, macd, rsi, sma, IndicatorValue, DEFAULT_LONG_SMA,
    DEFAULT_RSI_PERIOD, DEFAULT_SHORT_SMA,
};

#[derive(Parser)]
#[command(name = "gpw-advisor")]
#[command(about = "Intraday trading-signal engine for the Warsaw Stock Exchange", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full engine under the scheduler
    Run,
    /// Run the price and news collectors once
    Collect {
        /// Collect prices only
        #[arg(long)]
        prices_only: bool,
        /// Collect news only
        #[arg(long)]
        news_only: bool,
    },
    /// Compute and print the indicator set for a symbol
    ComputeIndicators {
        /// Stock symbol (e.g. CDR)
        #[arg(long)]
        symbol: String,
    },
    /// Run one signal-generation cycle
    GenerateSignals {
        /// Evaluate every monitored stock
        #[arg(long, conflicts_with = "symbol")]
        all_monitored: bool,
        /// Restrict to one symbol
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Deliver pending signals
    Dispatch,
    /// Resolve open signals against later bars
    ResolveOutcomes,
    /// Show recent executions and open work
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<EngineError>() {
        Some(engine_error) => u8::try_from(engine_error.exit_code()).unwrap_or(4),
        // Anything unclassified is an internal failure; supervision
        // restarts the process.
        None => 4,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(&cli.config)?;
    let db = DatabaseClient::new(&config.database.url, config.database.max_connections).await?;

    match cli.command {
        Commands::Run => run_engine(cli.config, config, db).await,
        Commands::Collect {
            prices_only,
            news_only,
        } => {
            let engine = Engine::from_config(config, &db)?;
            if !news_only {
                let report = engine.run_price_cycle().await?;
                println!(
                    "prices: {} symbols processed, {} failed",
                    report.items_processed, report.items_failed
                );
            }
            if !prices_only {
                let report = engine.run_news_cycle().await?;
                println!(
                    "news: {} articles stored, {} feed failures",
                    report.items_processed, report.items_failed
                );
            }
            Ok(())
        }
        Commands::ComputeIndicators { symbol } => {
            let engine = Engine::from_config(config, &db)?;
            compute_indicators(&engine, &symbol).await
        }
        Commands::GenerateSignals {
            all_monitored: _,
            symbol,
        } => {
            let engine = Engine::from_config(config, &db)?;
            let report = match symbol {
                Some(symbol) => engine.run_signal_cycle_for_symbol(&symbol).await?,
                None => engine.run_signal_cycle().await?,
            };
            println!(
                "signals: {} pairs evaluated, {} failed",
                report.items_processed, report.items_failed
            );
            Ok(())
        }
        Commands::Dispatch => {
            let engine = Engine::from_config(config, &db)?;
            let report = engine.run_dispatch().await?;
            println!(
                "dispatch: {} sent, {} failed permanently, {} left queued",
                report.deliveries_sent, report.deliveries_failed, report.left_queued
            );
            Ok(())
        }
        Commands::ResolveOutcomes => {
            let engine = Engine::from_config(config, &db)?;
            let report = engine.run_outcome_cycle().await?;
            println!(
                "outcomes: {} resolved, {} failed",
                report.items_processed, report.items_failed
            );
            Ok(())
        }
        Commands::Status => {
            let engine = Engine::from_config(config, &db)?;
            print_status(&engine).await
        }
    }
}

async fn run_engine(
    config_path: String,
    config: gpw_advisor_core::AppConfig,
    db: DatabaseClient,
) -> anyhow::Result<()> {
    tracing::info!("Starting GPW advisor engine");

    let tick = Duration::from_secs(config.scheduler.tick_interval_seconds);

    // Reload configuration every five minutes; the engine applies each
    // broadcast at its next cycle boundary, and a failed reload keeps
    // the previous configuration running.
    let (watcher, config_rx) = ConfigWatcher::new(config.clone(), config_path);
    let engine =
        Arc::new(Engine::from_config(config, &db)?.with_config_updates(config_rx));
    tokio::spawn(watcher.run());

    let scheduler = Scheduler::new(
        default_schedules(),
        engine.calendar().await,
        Arc::new(gpw_advisor_core::SystemClock),
        engine.clone(),
        Some(engine.repositories().executions.clone()),
        tick,
    );

    scheduler.run().await;
    Ok(())
}

async fn compute_indicators(engine: &Engine, symbol: &str) -> anyhow::Result<()> {
    let bars = engine.repositories().ohlcv.latest_bars(symbol, 80).await?;
    if bars.is_empty() {
        anyhow::bail!(EngineError::MalformedInput(format!(
            "no bars stored for {symbol}"
        )));
    }
    let closes: Vec<rust_decimal::Decimal> = bars.iter().map(|b| b.close).collect();

    println!("{symbol}: {} bars, last close {}", bars.len(), closes.last().unwrap());
    print_value("RSI(14)", &rsi(&closes, DEFAULT_RSI_PERIOD));
    print_value(&format!("SMA({DEFAULT_SHORT_SMA})"), &sma(&closes, DEFAULT_SHORT_SMA));
    print_value(&format!("SMA({DEFAULT_LONG_SMA})"), &sma(&closes, DEFAULT_LONG_SMA));

    match macd(&closes, 12, 26, 9) {
        IndicatorValue::Available(m) => println!(
            "MACD(12,26,9): macd {} signal {} histogram {}",
            m.macd, m.signal, m.histogram
        ),
        IndicatorValue::Unavailable => println!("MACD(12,26,9): unavailable"),
    }
    match bollinger(&closes, 20, 2.0) {
        IndicatorValue::Available(b) => {
            println!("Bollinger(20,2): lower {} mid {} upper {}", b.lower, b.middle, b.upper);
        }
        IndicatorValue::Unavailable => println!("Bollinger(20,2): unavailable"),
    }
    match evaluate_votes(&closes) {
        IndicatorValue::Available(votes) => println!(
            "votes: bullish {:?}, bearish {:?}",
            votes.bullish_labels(),
            votes.bearish_labels()
        ),
        IndicatorValue::Unavailable => println!("votes: unavailable (insufficient data)"),
    }

    Ok(())
}

fn print_value(label: &str, value: &IndicatorValue) {
    match value {
        IndicatorValue::Available(v) => println!("{label}: {v}"),
        IndicatorValue::Unavailable => println!("{label}: unavailable"),
    }
}

async fn print_status(engine: &Engine) -> anyhow::Result<()> {
    let repos = engine.repositories();

    let open = repos.signals.open_unresolved().await?;
    let pending = repos.signals.undispatched().await?;
    println!("open signals: {}", open.len());
    println!("undispatched signals: {}", pending.len());

    let executions = repos.executions.recent(20).await?;
    println!("recent executions:");
    for execution in executions {
        let status = match &execution.error {
            None => "ok".to_string(),
            Some(e) => format!("error: {e}"),
        };
        println!(
            "  {} {} {}ms {} items ({})",
            execution.started_at,
            execution.kind.as_str(),
            execution.duration_ms,
            execution.items_processed,
            status
        );
    }

    Ok(())
}
