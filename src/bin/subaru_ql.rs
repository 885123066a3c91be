use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use subaru_ql::app::App;
use subaru_ql::config::{ConfigLoader, ResolvedConfig};
use subaru_ql::domain::DataId;
use subaru_ql::error::QlError;
use subaru_ql::output::{JsonOutput, LogSink};
use subaru_ql::store::Store;

#[derive(Parser)]
#[command(name = "subaru-ql")]
#[command(about = "Fetch, cache and decode Subaru Suprime-Cam frames for quick-look viewing")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the quick-look page for a dataset")]
    Render(DatasetArgs),
    #[command(about = "Fetch a dataset and print a JSON summary")]
    Fetch(FetchArgs),
    #[command(about = "Show cache file locations for a dataset")]
    Paths(PathsArgs),
}

#[derive(Args)]
struct DatasetArgs {
    data_id: String,

    #[arg(long)]
    votable: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    /// Seconds to wait for the image to be decoded before printing.
    #[arg(long, default_value_t = 0)]
    wait: u64,
}

#[derive(Args)]
struct PathsArgs {
    data_id: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<QlError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &QlError) -> u8 {
    match error {
        QlError::InvalidRequest(_) | QlError::Unknown(_) => 2,
        err if err.is_network() => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Render(args) => run_render(args, &config),
        Commands::Fetch(args) => run_fetch(args, &config),
        Commands::Paths(args) => run_paths(args, &config),
    }
}

fn run_render(args: DatasetArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let app = App::from_config(config, Arc::new(LogSink))?;
    let page = app.render_dataset(&args.data_id, args.votable.as_deref())?;
    print!("{page}");
    Ok(())
}

fn run_fetch(args: FetchArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let app = App::from_config(config, Arc::new(LogSink))?;
    let mut dataset = app.launch(&args.dataset.data_id, args.dataset.votable.as_deref())?;
    if args.wait > 0 {
        dataset.image = app
            .registry()
            .wait_for_image(&dataset.data_id, Duration::from_secs(args.wait))?;
    }
    JsonOutput::print_summary(&app.summary(&dataset)).into_diagnostic()?;
    Ok(())
}

fn run_paths(args: PathsArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let id: DataId = args.data_id.parse()?;
    let store = Store::new(config);
    for path in [store.metadata_path(&id), store.image_path(&id)] {
        let state = if Store::exists(&path) { "cached" } else { "missing" };
        println!("{state}\t{path}");
    }
    Ok(())
}
