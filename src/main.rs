mod advisor;
mod app;
mod catalog;
mod chart;
mod config;
mod error;
mod quotes;
mod recommend;
mod selection;
mod series;
mod session;
mod storage;
mod tracker;
mod tui;
mod ui;

use anyhow::{Context, bail};
use app::App;
use catalog::{CoinGeckoClient, filter_entries, normalize_ticker};
use clap::Parser;
use config::Settings;
use quotes::CryptoCompareClient;
use session::{SessionUpdate, TrackingSession};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use storage::FileStore;
use tracker::TickOutcome;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "CoinPulse-TUI: pick up to five coins and watch their live prices",
    after_help = "EXAMPLES:
    # Launch the terminal UI
    cargo run --release

    # Print the top coins matching a search term
    cargo run --release -- --list --search bit

    # Poll BTC and ETH ten times and print each tick
    cargo run --release -- --watch BTC,ETH --ticks 10

    # Ask for a buy/hold recommendation (needs OPENAI_API_KEY)
    cargo run --release -- --recommend bitcoin"
)]
struct Args {
    /// Print the coin listing and exit
    #[arg(long)]
    list: bool,

    /// Filter the listing by name or symbol (with --list)
    #[arg(long)]
    search: Option<String>,

    /// Poll prices for comma-separated symbols without the UI (e.g. BTC,ETH)
    #[arg(long)]
    watch: Option<String>,

    /// Number of applied ticks before --watch exits (0 = until Ctrl+C)
    #[arg(long, default_value_t = 0)]
    ticks: usize,

    /// Print a recommendation for a coin id (e.g. bitcoin)
    #[arg(long)]
    recommend: Option<String>,

    /// Poll period in milliseconds (250..=60000)
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Directory for the persisted selection and the UI log file
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

impl Args {
    fn is_headless(&self) -> bool {
        self.list || self.watch.is_some() || self.recommend.is_some()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut settings = Settings::from_env();
    if let Some(ms) = args.poll_ms {
        settings = settings.with_poll_interval_ms(ms);
    }
    if let Some(dir) = &args.state_dir {
        settings.state_dir = dir.clone();
    }

    init_logging(&settings, args.is_headless())?;

    if args.list {
        return list_coins(&settings, args.search.as_deref()).await;
    }

    if let Some(symbols) = &args.watch {
        let tickers = parse_watch_list(symbols)?;
        return watch_prices(&settings, &tickers, args.ticks).await;
    }

    if let Some(coin_id) = &args.recommend {
        return print_recommendation(&settings, coin_id).await;
    }

    let store = Arc::new(FileStore::new(settings.state_dir.clone()));
    info!("Selection is stored under {}", store.dir().display());
    let mut app = App::new(&settings, store)?;
    let mut terminal = tui::init()?;
    let res = app.run(&mut terminal).await;

    tui::restore()?;

    if let Err(e) = &res {
        error!("Error: {:?}", e);
    }
    res
}

/// Headless modes log to stderr. The UI owns the terminal, so it logs to a file.
fn init_logging(settings: &Settings, headless: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coinpulse_tui=info"));

    if headless {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    std::fs::create_dir_all(&settings.state_dir)
        .with_context(|| format!("creating {}", settings.state_dir.display()))?;
    let log_path = settings.log_file_path();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

async fn list_coins(settings: &Settings, search: Option<&str>) -> anyhow::Result<()> {
    let client = CoinGeckoClient::new(settings)?;
    let entries = client.fetch_markets().await?;
    let visible = filter_entries(&entries, search.unwrap_or(""));

    println!("{:<24} {:<8} {:<28} {:>16} {:>9}", "ID", "SYMBOL", "NAME", "PRICE (USD)", "24H");
    for entry in visible {
        let price = entry
            .current_price
            .map_or("-".to_string(), |p| format!("{:.4}", p));
        let change = entry
            .price_change_percentage_24h
            .map_or("-".to_string(), |c| format!("{:+.2}%", c));
        println!(
            "{:<24} {:<8} {:<28} {:>16} {:>9}",
            entry.instrument.id,
            entry.instrument.ticker(),
            entry.instrument.name,
            price,
            change
        );
    }
    Ok(())
}

fn parse_watch_list(symbols: &str) -> anyhow::Result<Vec<String>> {
    let tickers: Vec<String> = symbols
        .split(',')
        .map(normalize_ticker)
        .filter(|s| !s.is_empty())
        .collect();
    if tickers.is_empty() {
        bail!("--watch needs at least one symbol, e.g. --watch BTC,ETH");
    }
    Ok(tickers)
}

async fn watch_prices(settings: &Settings, tickers: &[String], ticks: usize) -> anyhow::Result<()> {
    let source = Arc::new(CryptoCompareClient::new(settings)?);
    let mut session = TrackingSession::new(source, settings.poll_interval);
    info!(
        "Watching {} every {} ms",
        tickers.join(","),
        settings.poll_interval.as_millis()
    );
    session.set_selection(tickers);

    let mut applied = 0usize;
    loop {
        let update = tokio::select! {
            update = session.next_update() => update,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        };

        match update {
            Some(SessionUpdate::Outcome(TickOutcome::Applied { .. })) => {
                applied += 1;
                let snapshot = session.snapshot();
                let line = session
                    .tickers()
                    .iter()
                    .map(|t| match snapshot.latest(t) {
                        Some(p) => format!("{}={:.4}", t, p),
                        None => format!("{}=-", t),
                    })
                    .collect::<Vec<_>>()
                    .join("  ");
                println!("{} {}", chrono::Local::now().format("%H:%M:%S"), line);
                if ticks > 0 && applied >= ticks {
                    break;
                }
            }
            Some(_) => {}
            None => break,
        }
    }

    session.teardown();
    Ok(())
}

async fn print_recommendation(settings: &Settings, coin_id: &str) -> anyhow::Result<()> {
    let details = Arc::new(CoinGeckoClient::new(settings)?);
    let recommender = Arc::new(recommend::OpenAiClient::new(settings)?);
    let advisor = advisor::Advisor::new(details, recommender);

    let rec = advisor.recommend(coin_id).await?;
    println!(
        "{}: {}",
        rec.coin_id,
        if rec.decision { "BUY" } else { "DO NOT BUY" }
    );
    println!("{}", rec.rationale);
    Ok(())
}
