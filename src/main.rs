use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;

use clap::{Parser, ValueEnum};
use comfy_table::Table;
use log::{error, info};
use strum_macros::{Display, EnumString};
use tlsbatch::config::Config;
use tlsbatch::{Pipeline, RunSummary};

mod metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum SummaryFormat {
    /// Table on stderr
    Text,
    /// JSON object on stderr
    Json,
    /// No summary
    #[strum(serialize = "none")]
    #[value(name = "none")]
    Off,
}

#[derive(Parser, Debug)]
#[command(name = "tlsbatch", version, about, long_about = None)]
struct Args {
    /// File with one host or URL per line ("-" for stdin) [default: input.txt]
    #[arg(short, long)]
    input: Option<String>,

    /// Semicolon-separated result table ("-" for stdout) [default: output.csv]
    #[arg(short, long)]
    output: Option<String>,

    /// Number of concurrent workers [default: 10]
    #[arg(short, long)]
    workers: Option<usize>,

    /// Pending hosts buffered before reading pauses [default: 100]
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Per-host deadline in seconds [default: 5]
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Output flush cadence in milliseconds [default: 1000]
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Run summary format [default: text]
    #[arg(long, value_enum)]
    summary: Option<SummaryFormat>,

    /// Exit code to use when at least one host is BAD [default: 0]
    #[arg(long)]
    exit_code: Option<i32>,

    /// Push run metrics to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address [default: http://localhost:9091]
    #[arg(long)]
    prometheus_address: Option<String>,

    /// Configuration file [default: ./tlsbatch.toml when present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

impl Args {
    fn overrides(&self) -> Config {
        let prometheus = if self.prometheus || self.prometheus_address.is_some() {
            Some(tlsbatch::config::PrometheusConfig {
                enabled: self.prometheus.then_some(true),
                address: self.prometheus_address.clone(),
            })
        } else {
            None
        };
        let mut overrides = Config::empty();
        overrides.input = self.input.clone();
        overrides.output = self.output.clone();
        overrides.workers = self.workers;
        overrides.queue_capacity = self.queue_capacity;
        overrides.timeout_secs = self.timeout;
        overrides.flush_interval_ms = self.flush_interval_ms;
        overrides.summary = self.summary.map(|s| s.to_string());
        overrides.exit_code = self.exit_code;
        overrides.prometheus = prometheus;
        overrides
    }
}

fn init_logger(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);
    env_logger::init_from_env(env);
}

fn open_input(path: &str) -> io::Result<Box<dyn BufRead>> {
    if path == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    Ok(Box::new(BufReader::new(File::open(path)?)))
}

fn create_output(path: &str) -> io::Result<Box<dyn Write + Send>> {
    if path == "-" {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(File::create(path)?))
}

/// Resolves the configured summary format; `text` when unset.
fn summary_format(config: &Config) -> Result<SummaryFormat, String> {
    match config.summary.as_deref() {
        Some(value) => <SummaryFormat as FromStr>::from_str(value)
            .map_err(|_| format!("Unknown summary format: {}", value)),
        None => Ok(SummaryFormat::Text),
    }
}

fn print_summary(summary: &RunSummary, format: SummaryFormat) -> Result<(), Box<dyn Error>> {
    match format {
        SummaryFormat::Text => {
            let mut table = Table::new();
            table.set_header(vec!["Checked", "OK", "BAD", "Rows written", "Elapsed (ms)"]);
            table.add_row(vec![
                summary.dispatched.to_string(),
                summary.ok.to_string(),
                summary.bad.to_string(),
                summary.rows_written.to_string(),
                summary.elapsed_ms.to_string(),
            ]);
            eprintln!("{}", table);
        }
        SummaryFormat::Json => eprintln!("{}", serde_json::to_string_pretty(summary)?),
        SummaryFormat::Off => {}
    }
    Ok(())
}

fn run(config: &Config) -> Result<RunSummary, Box<dyn Error>> {
    let pipeline = Pipeline::new(config.pipeline()?)?;
    let format = summary_format(config)?;

    let input_path = config.input.as_deref().unwrap_or("input.txt");
    let output_path = config.output.as_deref().unwrap_or("output.csv");
    let input =
        open_input(input_path).map_err(|e| format!("Cannot open input file: {}", e))?;
    let output =
        create_output(output_path).map_err(|e| format!("Cannot open output file: {}", e))?;

    info!("Checking hosts from {} into {}", input_path, output_path);
    let summary = pipeline.run(input, output)?;
    print_summary(&summary, format)?;

    if let Some(address) = config.prometheus_address() {
        metrics::prom::prometheus_metrics(&summary, address);
    }
    Ok(summary)
}

fn main() {
    init_logger("info");
    let args = Args::parse();

    if args.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let file_config = match Config::discover(args.config.as_deref()) {
        Ok(file_config) => file_config,
        Err(e) => {
            error!("Cannot load configuration: {}", e);
            exit(1);
        }
    };
    let mut config = Config::default();
    if let Some(file_config) = file_config {
        config = config.merge_with(file_config);
    }
    let config = config.merge_with(args.overrides());

    match run(&config) {
        Ok(summary) if summary.has_failures() => exit(config.exit_code.unwrap_or(0)),
        Ok(_) => exit(0),
        Err(e) => {
            error!("Check error: {}", e);
            exit(1);
        }
    }
}
