use std::sync::Arc;

use anyhow::anyhow;
use log::{error, warn};

use crate::config::defs::{PipelineError, RunConfig, Stage, FASTQC_TAG, MULTIQC_TAG};
use crate::utils::command::fastqc::FastqcConfig;
use crate::utils::command::multiqc::MultiqcConfig;
use crate::utils::command::{fastqc, log_tool_versions, multiqc, run_tool};
use crate::utils::fastq::scan_fastq_dir;

/// Runs FastQC over every FASTQ file in the input directory, then rolls the
/// reports up with MultiQC. A file FastQC cannot handle is logged and
/// skipped; MultiQC failing fails the module.
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    println!("\n-------------\n Quality Report\n-------------\n");

    let input_dir = config.input_dir.clone().ok_or_else(|| {
        PipelineError::InvalidConfig(
            "--input <dir> is required for the quality_report module".to_string(),
        )
    })?;

    log_tool_versions(&[FASTQC_TAG, MULTIQC_TAG]).await;

    let file_set = scan_fastq_dir(&input_dir)?;
    if file_set.files.is_empty() {
        warn!("No FASTQ files in {}", input_dir.display());
        return Ok(());
    }

    let out_dir = config.quality_dir.as_path();
    let mut reported = 0usize;
    let mut failed = 0usize;
    for name in &file_set.files {
        let input = file_set.dir.join(name);
        let fastqc_config = FastqcConfig {
            input: &input,
            out_dir,
        };
        match run_tool(
            Stage::QualityReport,
            FASTQC_TAG,
            fastqc::arg_generator(&fastqc_config),
            config.args.tool_timeout,
        )
        .await
        {
            Ok(()) => reported += 1,
            Err(e) => {
                failed += 1;
                error!("FastQC failed for {}: {}", name, e);
            }
        }
    }

    if reported == 0 {
        return Err(PipelineError::Other(anyhow!(
            "FastQC reported on none of the {} file(s)",
            file_set.files.len()
        )));
    }

    let multiqc_config = MultiqcConfig { report_dir: out_dir };
    run_tool(
        Stage::QualityReport,
        MULTIQC_TAG,
        multiqc::arg_generator(&multiqc_config),
        config.args.tool_timeout,
    )
    .await?;

    println!(
        "\nQuality reports for {} file(s) in {} ({} FastQC failure(s)).",
        reported,
        out_dir.display(),
        failed
    );
    Ok(())
}
