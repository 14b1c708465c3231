use clap::Parser;
use env_logger::Env;
use log::{error, info};
use qnpcore::orchestrator::{RunMode, StepName};
use std::path::PathBuf;
use std::process::ExitCode;
use workflow::config::WorkflowConfig;
use workflow::report;
use workflow::runner::Runner;

mod workflow {
    pub mod config;
    pub mod report;
    pub mod runner;
}

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Per-subject QNP-to-voxel pipeline driver")]
struct Args {
    /// Pipeline configuration (key=value lines)
    #[arg(long, default_value = "config/pipeline_config.txt")]
    config: PathBuf,
    /// Steps to run, in any order (default: upsample through smooth)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    steps: Vec<StepName>,
    /// Subjects to process instead of the configured subject_list
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    subjects: Vec<String>,
    /// Re-run steps whose outputs already exist
    #[arg(long, default_value_t = false, conflicts_with = "dry_run")]
    force: bool,
    /// Report what would run without writing anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Worker pool size, overriding the configured value
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
    /// Also write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
    /// Show how many subjects have each step materialized, then exit
    #[arg(long, default_value_t = false)]
    info: bool,
    /// Only check that raw inputs exist
    #[arg(long, default_value_t = false)]
    validate_only: bool,
}

impl Args {
    fn mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else if self.force {
            RunMode::Force
        } else {
            RunMode::Normal
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let config = match WorkflowConfig::load(&args.config, &args.steps, &args.subjects) {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {:#}", err);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let runner = Runner::new(config, args.workers);

    match run(&args, &runner) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: &Args, runner: &Runner) -> anyhow::Result<ExitCode> {
    if args.info {
        let subjects = runner.config().subjects.len();
        println!("{}", report::format_info(&runner.info(), subjects));
        return Ok(ExitCode::SUCCESS);
    }

    if args.validate_only {
        let missing = runner.missing_inputs();
        if missing.is_empty() {
            info!("all raw inputs present");
            return Ok(ExitCode::SUCCESS);
        }
        println!("{}", report::format_missing(&missing));
        return Ok(ExitCode::from(EXIT_FAILURE));
    }

    let mode = args.mode();
    let summary = runner.execute(mode)?;
    println!("{}", report::format_summary(&summary));
    if let Some(path) = &args.summary_json {
        report::write_json(path, &summary)?;
        info!("summary written to {}", path.display());
    }
    if mode == RunMode::DryRun {
        info!("dry run: nothing was written");
    }

    Ok(if summary.has_failures() {
        ExitCode::from(EXIT_FAILURE)
    } else {
        ExitCode::SUCCESS
    })
}
