mod pipelines;
mod utils;
mod config;
mod cli;
mod reference;

use std::time::Instant;
use std::{env, fs};
use std::path::PathBuf;
use std::sync::Arc;
use std::io::Write;

use anyhow::Result;
use log::{self, LevelFilter, debug, info, error};
use env_logger::Builder;
use tokio::sync::Semaphore;

use crate::cli::parse;
use crate::config::defs::{
    PipelineError, RunConfig, PREPROCESS_SUB_DIR, QUALITY_SUB_DIR, REGISTRY_FILE_NAME,
    STAGE_SUB_DIRS,
};
use crate::utils::system::effective_jobs;
use pipelines::preprocess;
use pipelines::quality_report;
use reference::registry;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    #[cfg(not(unix))]
    anyhow::bail!("The external sequencing tools require a Unix-like system.");

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n VCSeek\n-------------\n");

    let cwd = env::current_dir()?;
    info!("The current directory is {:?}\n", cwd);

    let base_dir = absolute_from(&cwd, &args.base_dir);
    setup_stage_dirs(&base_dir)?;

    let registry_path = match &args.registry {
        Some(path) => absolute_from(&cwd, path),
        None => base_dir.join(REGISTRY_FILE_NAME),
    };

    let input_dir = match &args.input {
        Some(input) => {
            let path = absolute_from(&cwd, input);
            if !path.is_dir() {
                return Err(anyhow::anyhow!("Input directory {} does not exist", path.display()));
            }
            Some(path)
        }
        None => None,
    };

    // -o redirects the selected module's outputs; otherwise each module
    // writes into its stage directory under the base directory.
    let preprocess_dir = match &args.out_dir {
        Some(out) => absolute_from(&cwd, out),
        None => base_dir.join(PREPROCESS_SUB_DIR),
    };
    let quality_dir = match &args.out_dir {
        Some(out) => absolute_from(&cwd, out),
        None => base_dir.join(QUALITY_SUB_DIR),
    };
    fs::create_dir_all(&preprocess_dir)?;
    fs::create_dir_all(&quality_dir)?;

    let jobs = effective_jobs(args.jobs);
    debug!("Running up to {} sample(s) at once", jobs);

    let module = args.module.clone();
    let run_config = Arc::new(RunConfig {
        cwd,
        input_dir,
        preprocess_dir,
        quality_dir,
        registry_path,
        sample_semaphore: Arc::new(Semaphore::new(jobs)),
        args,
    });

    if let Err(e) = match module.as_str() {
        "preprocess" => preprocess_run(run_config).await,
        "quality_report" => quality_report_run(run_config).await,
        "register_reference" => registry::register_reference(&run_config),
        "list_references" => registry::list_references(&run_config),
        _ => Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}



async fn preprocess_run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    preprocess::run(run_config).await
}

async fn quality_report_run(run_config: Arc<RunConfig>) -> Result<(), PipelineError> {
    quality_report::run(run_config).await
}

/// Resolves a CLI path against the current working directory.
fn absolute_from(cwd: &PathBuf, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

/// Creates the numbered stage directories under the base directory.
///
/// # Arguments
/// * `base_dir` - Root directory of the pipeline outputs.
/// # Returns
/// Ok(()) once every stage directory exists.
fn setup_stage_dirs(base_dir: &PathBuf) -> Result<()> {
    for sub in STAGE_SUB_DIRS {
        fs::create_dir_all(base_dir.join(sub))?;
    }
    Ok(())
}
