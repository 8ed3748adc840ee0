use clap::{Parser, Subcommand};
use img_fanout::event::{ObjectRef, StorageEvent};
use img_fanout::handler::{Engine, HandleError};
use img_fanout::imaging::RustBackend;
use img_fanout::rules::RuleSet;
use img_fanout::storage::FsObjectStore;
use img_fanout::{config, output};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("IMG_FANOUT_ON_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("IMG_FANOUT_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "img-fanout")]
#[command(about = "Resize stored images into derived outputs when they are uploaded")]
#[command(long_about = "\
Resize stored images into derived outputs when they are uploaded

Each storage event names one object. Every rule whose bucket equals the
object's bucket and whose key_regexp matches the start of its key produces
its outputs: the source is downloaded once, resized per output, optimized and
uploaded with retries.

Rule file:

  [[rules]]
  bucket = \"photos\"
  key_regexp = '^uploads/(\\w+)\\.jpg$'

  [[rules.outputs]]
  key = \"thumbs/{0}.jpg\"        # {N} = capture group N
  width = 200
  policy = \"ONLY_SHRINK\"        # or DEFAULT

The bundled store maps buckets to directories under --store:

  <store>/photos/uploads/cat.jpg

Set RUST_LOG (e.g. RUST_LOG=img_fanout=debug) to control log output.

Run 'img-fanout gen-config' to generate a documented rule file.")]
#[command(version = version_string())]
struct Cli {
    /// Rule file
    #[arg(long, default_value = "img-fanout.toml", global = true)]
    config: PathBuf,

    /// Root directory of the object store (one subdirectory per bucket)
    #[arg(long, default_value = "store", global = true)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a storage event (JSON file, or '-' for stdin)
    Handle {
        /// Event document path
        event: PathBuf,
    },
    /// Process one stored object as if an event for it had arrived
    Trigger {
        /// Source bucket
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
    },
    /// Show which rules and outputs an object would trigger, without running them
    Match {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
    },
    /// Validate the rule file without processing anything
    Check,
    /// Print a stock rule file with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Handle { event } => {
            let json = read_event(&event)?;
            let event = StorageEvent::from_json(&json)?;
            let engine = build_engine(&cli.config, &cli.store)?;
            report(engine.handle(&event))?;
        }
        Command::Trigger { bucket, key } => {
            let engine = build_engine(&cli.config, &cli.store)?;
            report(engine.handle_object(ObjectRef { bucket, key }))?;
        }
        Command::Match { bucket, key } => {
            let config = config::load_config(&cli.config)?;
            let rules = RuleSet::compile(&config.rules)?;
            let matches = rules.matches(&bucket, &key)?;
            output::print_matches(&ObjectRef { bucket, key }, &matches);
        }
        Command::Check => {
            println!("==> Checking {}", cli.config.display());
            let config = config::load_config(&cli.config)?;
            let rules = RuleSet::compile(&config.rules)?;
            output::print_check(&config, &rules);
            println!("==> Configuration is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_event(path: &Path) -> std::io::Result<String> {
    if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(path)
    }
}

fn build_engine(
    config_path: &Path,
    store_root: &Path,
) -> Result<Engine<RustBackend, FsObjectStore>, Box<dyn std::error::Error>> {
    let config = config::load_config(config_path)?;
    if config.processing.parallel_outputs {
        init_thread_pool(&config.processing);
    }
    Ok(Engine::from_config(
        &config,
        RustBackend::new(),
        FsObjectStore::new(store_root),
    )?)
}

/// Print the outcome of an invocation; failed outputs make the command fail.
fn report(
    result: Result<img_fanout::handler::HandleReport, HandleError>,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(report) => {
            output::print_report(&report);
            Ok(())
        }
        Err(HandleError::OutputsFailed(aggregate)) => {
            output::print_failure(&aggregate);
            Err(aggregate.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down,
/// not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
