use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use history_client::{
    HistoryProvider, ReadingRecord,
    providers::{gateway::GatewayProvider, memory::InMemoryHistory},
};
use meter_history::{
    DesiredWindow, HistoryInputs, MeterHistory,
    clock::SystemClock,
    config::{EngineConfig, from_env_or_default, load_config_path},
    export::CsvFileSink,
    window::MAX_SPANS,
};
use shared_utils::duration::parse_duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Meter history CLI")]
struct Cli {
    /// Engine config (TOML). Defaults to $METER_HISTORY_CONFIG, then built-ins.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Gateway base URL; overrides the config file.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Serve history from a JSON file (`{"<name>": [records...]}`) instead of the gateway.
    #[arg(long, value_name = "FILE", global = true)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Fetch once and print the rate series as JSON.
    Series(WindowArgs),
    /// Fetch once and write the CSV projection.
    Export {
        #[command(flatten)]
        window: WindowArgs,
        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// File name (".csv" is appended when missing).
        #[arg(long, default_value = "meter-history")]
        file: String,
    },
    /// Keep refreshing and print every finished cycle until Ctrl-C.
    Watch(WindowArgs),
}

#[derive(Args)]
struct WindowArgs {
    /// Meter resource name.
    #[arg(long)]
    name: String,
    /// Period start (RFC 3339). Defaults to 24h before the end.
    #[arg(long, value_parser = parse_instant)]
    start: Option<DateTime<Utc>>,
    /// Period end (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_instant)]
    end: Option<DateTime<Utc>>,
    /// Span size, e.g. "15m", "1h"; "0" for change-driven output.
    #[arg(long, default_value = "1h", value_parser = parse_span)]
    span: Duration,
}

impl WindowArgs {
    fn inputs(&self) -> Result<HistoryInputs> {
        let end = self.end.unwrap_or_else(Utc::now);
        let start = self.start.unwrap_or(end - Duration::hours(24));
        let inputs = HistoryInputs::new(self.name.clone(), DesiredWindow::new(start, end, self.span));
        if !inputs.has_name() {
            bail!("--name cannot be empty");
        }
        if start >= end || self.span < Duration::zero() {
            bail!("need start < end and a non-negative span");
        }
        if inputs.window.exceeds_span_limit() {
            bail!(
                "--span cuts the period into {} spans, at most {MAX_SPANS} allowed",
                inputs.window.span_count()
            );
        }
        Ok(inputs)
    }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

fn parse_span(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meter_history=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let mut cfg = load_config_path(path)?;
            cfg.apply_env()?;
            cfg
        }
        None => from_env_or_default()?,
    };
    if let Some(endpoint) = &cli.endpoint {
        cfg.endpoint = Some(endpoint.clone());
    }
    Ok(cfg)
}

fn build_provider(cli: &Cli, cfg: &EngineConfig) -> Result<Arc<dyn HistoryProvider>> {
    if let Some(path) = &cli.fixture {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read fixture {}", path.display()))?;
        let series: BTreeMap<String, Vec<ReadingRecord>> =
            serde_json::from_str(&text).context("failed to parse fixture JSON")?;
        let history = InMemoryHistory::new();
        for (name, records) in series {
            history.insert(&name, records);
        }
        info!(fixture = %path.display(), "serving history from fixture");
        return Ok(Arc::new(history));
    }

    let provider = match &cfg.endpoint {
        Some(endpoint) => GatewayProvider::new(endpoint)?,
        None => GatewayProvider::from_env()?,
    };
    info!(endpoint = %provider.base_url(), "serving history from gateway");
    Ok(Arc::new(provider))
}

async fn settled(engine: &mut MeterHistory) -> Result<()> {
    let snap = engine.wait_until(|s| s.is_settled()).await?;
    if snap.failed_cycles > 0 {
        bail!("fetch failed; see log for details");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let provider = build_provider(&cli, &cfg)?;
    let export = cfg.export.options()?;

    match &cli.cmd {
        Cmd::Series(window) => {
            let mut engine = MeterHistory::spawn(provider, Arc::new(SystemClock), &cfg, window.inputs()?);
            settled(&mut engine).await?;
            println!("{}", serde_json::to_string_pretty(&*engine.series())?);
            engine.shutdown().await;
        }
        Cmd::Export { window, out, file } => {
            let sink = CsvFileSink::new(out);
            let path = sink.path_for(file)?;
            let mut engine = MeterHistory::spawn(provider, Arc::new(SystemClock), &cfg, window.inputs()?)
                .with_sink(Arc::new(sink))
                .with_export_options(export);
            settled(&mut engine).await?;
            let rows = engine.export_data(file).await?;
            println!("wrote {rows} row(s) to {}", path.display());
            engine.shutdown().await;
        }
        Cmd::Watch(window) => {
            let mut engine = MeterHistory::spawn(provider, Arc::new(SystemClock), &cfg, window.inputs()?);
            let mut seen = 0;
            loop {
                tokio::select! {
                    snap = engine.changed() => {
                        let snap = snap?;
                        if snap.completed_cycles != seen && !snap.fetching {
                            seen = snap.completed_cycles;
                            println!("{}", serde_json::to_string(&*snap.series)?);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            engine.shutdown().await;
        }
    }
    Ok(())
}
