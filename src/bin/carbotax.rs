use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use carbotax::clock::{Clock, SystemClock};
use carbotax::config::{ConfigLoader, Settings};
use carbotax::database::CompoundHttpClient;
use carbotax::domain::KindSelector;
use carbotax::error::CarbotaxError;
use carbotax::ontology::OntologyHttpClient;
use carbotax::output::{CacheClearReport, JsonOutput};
use carbotax::pipeline::{Interrupt, Pipeline};
use carbotax::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "carbotax")]
#[command(about = "Classify compounds into the ChEBI carbohydrate taxonomy via PubChem")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve and classify a batch of identifiers")]
    Classify(ClassifyArgs),
    #[command(about = "Inspect or clear the ontology caches")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct ClassifyArgs {
    identifiers: Vec<String>,

    /// Read identifiers from a file, one per line.
    #[arg(long)]
    file: Option<Utf8PathBuf>,

    #[arg(long, value_enum, default_value_t = KindSelector::Auto)]
    kind: KindSelector,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Show entry counts per cache")]
    Stats,
    #[command(about = "Remove cached ontology lookups")]
    Clear,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CarbotaxError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CarbotaxError) -> u8 {
    match error {
        CarbotaxError::InvalidIdentifier { .. }
        | CarbotaxError::InvalidIdentifierKind(_)
        | CarbotaxError::InvalidKeyPrefix { .. }
        | CarbotaxError::ConfigRead(_)
        | CarbotaxError::ConfigParse(_) => 2,
        CarbotaxError::Timeout(_)
        | CarbotaxError::Http(_)
        | CarbotaxError::Status { .. }
        | CarbotaxError::Parse(_) => 3,
        CarbotaxError::Interrupted => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        settings.cache.dir = dir;
    }

    match cli.command {
        Commands::Classify(args) => run_classify(args, &settings),
        Commands::Cache(args) => run_cache(args.command, &settings),
    }
}

fn run_classify(args: ClassifyArgs, settings: &Settings) -> miette::Result<()> {
    let mut identifiers = args.identifiers;
    if let Some(path) = &args.file {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CarbotaxError::Filesystem(format!("{path}: {err}")))?;
        identifiers.extend(read_identifiers(&content));
    }
    if identifiers.is_empty() {
        return Err(miette::Report::msg(
            "no identifiers given (pass them as arguments or with --file)",
        ));
    }
    let kind = args.kind.resolve(&identifiers)?;

    let interrupt = Interrupt::new();
    let handler_flag = interrupt.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if handler_flag.is_triggered() {
            std::process::exit(130);
        }
        warn!("interrupt received; saving progress (press Ctrl-C again to exit now)");
        handler_flag.trigger();
    }) {
        warn!(%err, "could not install Ctrl-C handler");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::interruptible(interrupt.clone()));
    let compounds = CompoundHttpClient::new(
        HttpTransport::new(settings.request_timeout())?,
        settings,
        clock.clone(),
    );
    let ontology = OntologyHttpClient::new(
        HttpTransport::new(settings.request_timeout())?,
        settings,
        clock,
    );

    let mut pipeline = Pipeline::new(compounds, ontology, settings)?.with_interrupt(interrupt);
    let result = pipeline.run(&identifiers, kind)?;
    JsonOutput::print_batch(&result).into_diagnostic()?;
    Ok(())
}

fn run_cache(command: CacheCommand, settings: &Settings) -> miette::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mut ontology = OntologyHttpClient::new(
        HttpTransport::new(settings.request_timeout())?,
        settings,
        clock,
    );
    match command {
        CacheCommand::Stats => {
            JsonOutput::print_stats(&ontology.cache_stats()).into_diagnostic()?;
        }
        CacheCommand::Clear => {
            ontology.clear_caches()?;
            info!(dir = %settings.cache.dir, "ontology caches cleared");
            JsonOutput::print_clear(&CacheClearReport {
                cleared: ontology.cache_stats().iter().map(|stats| stats.name).collect(),
            })
            .into_diagnostic()?;
        }
    }
    ontology.close()?;
    Ok(())
}

// Blank lines and `#` comments are skipped.
fn read_identifiers(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}
