#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use ndarray::Array1;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::process;

use proxcausal::bootstrap::{BootstrapInterval, bootstrap_interval};
use proxcausal::config::RestorationConfig;
use proxcausal::data::load_observations;
use proxcausal::effect::{
    EffectRestoration, average_causal_effect, naive_effect, restore_effect,
};
use proxcausal::probability::JointTable;
use proxcausal::single_proxy::{ErrorMatrix, restore_joint};
use proxcausal::two_proxy::{LabelRule, Roles, TwoProxyEstimate, estimate_two_proxy};
use proxcausal::ObservationTable;

#[derive(Clone, Copy, ValueEnum)]
pub enum LabelRuleCli {
    ProxyAgreement,
    OutcomeAgreement,
    AsComputed,
}

impl From<LabelRuleCli> for LabelRule {
    fn from(rule: LabelRuleCli) -> Self {
        match rule {
            LabelRuleCli::ProxyAgreement => LabelRule::ProxyAgreement,
            LabelRuleCli::OutcomeAgreement => LabelRule::OutcomeAgreement,
            LabelRuleCli::AsComputed => LabelRule::AsComputed,
        }
    }
}

#[derive(Args)]
pub struct CommonArgs {
    /// Path to a TSV file of binary observations with a header row
    pub data: String,

    /// Path to a TOML configuration file; flags below override its values
    #[arg(long)]
    pub config: Option<String>,

    /// Column holding the treatment
    #[arg(long)]
    pub treatment: Option<String>,

    /// Column holding the outcome
    #[arg(long)]
    pub outcome: Option<String>,

    /// Column holding the proxy that indexes the rows of the moment matrix
    #[arg(long)]
    pub row_proxy: Option<String>,

    /// Column holding the proxy that indexes the columns of the moment matrix
    #[arg(long)]
    pub column_proxy: Option<String>,

    /// Convention used to name the two latent states
    #[arg(long, value_enum)]
    pub label_rule: Option<LabelRuleCli>,

    /// Number of bootstrap resamples
    #[arg(long, value_name = "N")]
    pub bootstraps: Option<usize>,

    /// Two-sided miscoverage of the bootstrap interval
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Seed of the bootstrap resampler
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the TOML report here instead of standard output
    #[arg(long)]
    pub output: Option<String>,
}

#[derive(Args)]
pub struct SingleProxyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// p(proxy = 0 | U = 0) for the column proxy
    #[arg(long)]
    pub proxy_zero_given_u0: f64,

    /// p(proxy = 0 | U = 1) for the column proxy
    #[arg(long)]
    pub proxy_zero_given_u1: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the latent-state rates from two proxies, with a bootstrap interval
    TwoProxy(CommonArgs),
    /// Restore the joint over the confounder from two proxies and report the causal effect
    Restore(CommonArgs),
    /// Restore the joint over the confounder from one proxy with a known error matrix
    SingleProxy(SingleProxyArgs),
}

#[derive(Parser)]
#[command(
    name = "proxcausal",
    version,
    about = "Proxy-based restoration of causal effects under a latent binary confounder."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Serialize)]
struct IntervalReport {
    alpha: f64,
    successes: usize,
    failures: usize,
    coordinates: Vec<String>,
    estimate: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl IntervalReport {
    fn new(coordinates: &[&str], estimate: Array1<f64>, interval: &BootstrapInterval) -> Self {
        Self {
            alpha: interval.alpha,
            successes: interval.successes(),
            failures: interval.failures,
            coordinates: coordinates.iter().map(|c| c.to_string()).collect(),
            estimate: estimate.to_vec(),
            lower: interval.lower.to_vec(),
            upper: interval.upper.to_vec(),
        }
    }
}

#[derive(Serialize)]
struct TwoProxyReport {
    rows: usize,
    label_rule: LabelRule,
    estimate: TwoProxyEstimate,
    interval: IntervalReport,
}

#[derive(Serialize)]
struct RestoreReport {
    rows: usize,
    label_rule: LabelRule,
    ace: f64,
    naive: f64,
    error_matrix_zero_rates: [f64; 2],
    /// Cells in (treatment, outcome, proxy) order.
    observed: Vec<f64>,
    /// Cells in (treatment, outcome, confounder) order.
    restored: Vec<f64>,
    two_proxy: TwoProxyEstimate,
    interval: IntervalReport,
}

#[derive(Serialize)]
struct SingleProxyReport {
    rows: usize,
    ace: f64,
    naive: f64,
    error_matrix_zero_rates: [f64; 2],
    observed: Vec<f64>,
    restored: Vec<f64>,
}

/// Merges the configuration file (if any) with command-line overrides.
fn resolve_config(args: &CommonArgs) -> Result<RestorationConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RestorationConfig::load(path)?,
        None => RestorationConfig::default(),
    };
    if let Some(name) = &args.treatment {
        config.fields.treatment = name.clone();
    }
    if let Some(name) = &args.outcome {
        config.fields.outcome = name.clone();
    }
    if let Some(name) = &args.row_proxy {
        config.fields.row_proxy = name.clone();
    }
    if let Some(name) = &args.column_proxy {
        config.fields.column_proxy = name.clone();
    }
    if let Some(rule) = args.label_rule {
        config.label_rule = rule.into();
    }
    if let Some(n) = args.bootstraps {
        config.bootstrap.num_bootstraps = n;
    }
    if let Some(alpha) = args.alpha {
        config.bootstrap.alpha = alpha;
    }
    if let Some(seed) = args.seed {
        config.bootstrap.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

fn load(
    args: &CommonArgs,
) -> Result<(RestorationConfig, ObservationTable, Roles), Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    let table = load_observations(&args.data, &config.fields.as_slice())?;
    let roles = Roles::resolve(&table, &config.fields)?;
    Ok((config, table, roles))
}

fn write_report<T: Serialize>(
    report: &T,
    output: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let toml_string = toml::to_string_pretty(report)?;
    match output {
        Some(path) => {
            let mut file = BufWriter::new(fs::File::create(path)?);
            file.write_all(toml_string.as_bytes())?;
            file.flush()?;
            log::info!("Report written to '{path}'");
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(toml_string.as_bytes())?;
            handle.flush()?;
        }
    }
    Ok(())
}

fn run_two_proxy(args: CommonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (config, table, roles) = load(&args)?;
    let options = config.estimator_options();

    let estimate = estimate_two_proxy(&table, &roles, &options)?;
    log::info!(
        "Column proxy rates p(0|U): [{:.4}, {:.4}], outcome rates p(Y=0|X=1,U): [{:.4}, {:.4}]",
        estimate.alpha[0],
        estimate.alpha[1],
        estimate.outcome_zero[0],
        estimate.outcome_zero[1]
    );

    let interval = bootstrap_interval(&table, &config.bootstrap, |resample| {
        estimate_two_proxy(resample, &roles, &options).map(|e| e.as_vector())
    })?;

    let report = TwoProxyReport {
        rows: table.n_rows(),
        label_rule: config.label_rule,
        interval: IntervalReport::new(&TwoProxyEstimate::COORDINATES, estimate.as_vector(), &interval),
        estimate,
    };
    write_report(&report, args.output.as_deref())
}

fn run_restore(args: CommonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (config, table, roles) = load(&args)?;
    let options = config.estimator_options();

    let restoration = restore_effect(&table, &roles, &options)?;
    let interval = bootstrap_interval(&table, &config.bootstrap, |resample| {
        restore_effect(resample, &roles, &options).and_then(|r: EffectRestoration| r.as_vector())
    })?;

    let report = RestoreReport {
        rows: table.n_rows(),
        label_rule: config.label_rule,
        ace: restoration.ace,
        naive: restoration.naive,
        error_matrix_zero_rates: restoration.error_matrix.zero_rates(),
        observed: restoration.observed.to_flat(),
        restored: restoration.restored.to_flat(),
        interval: IntervalReport::new(
            &EffectRestoration::COORDINATES,
            restoration.as_vector()?,
            &interval,
        ),
        two_proxy: restoration.two_proxy,
    };
    write_report(&report, args.output.as_deref())
}

fn run_single_proxy(args: SingleProxyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (_, table, roles) = load(&args.common)?;
    let error = ErrorMatrix::from_zero_rates(args.proxy_zero_given_u0, args.proxy_zero_given_u1)?;

    let observed =
        JointTable::empirical(&table, roles.treatment, roles.outcome, roles.column_proxy)?;
    let restored = restore_joint(&observed, &error)?;
    let ace = average_causal_effect(&restored)?;
    let naive = naive_effect(&observed)?;
    log::info!("Restored average causal effect {ace:.4} (unadjusted contrast {naive:.4})");

    let report = SingleProxyReport {
        rows: table.n_rows(),
        ace,
        naive,
        error_matrix_zero_rates: error.zero_rates(),
        observed: observed.to_flat(),
        restored: restored.to_flat(),
    };
    write_report(&report, args.common.output.as_deref())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Commands::TwoProxy(args) => run_two_proxy(args),
        Commands::Restore(args) => run_restore(args),
        Commands::SingleProxy(args) => run_single_proxy(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
