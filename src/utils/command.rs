/// Functions and structs for building and running external tool command lines

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use tokio::process::Command;

use crate::config::defs::{
    PipelineError, Stage, BBSPLIT_TAG, FASTP_TAG, FASTQC_TAG, MULTIQC_TAG, REFORMAT_TAG,
    STDERR_TAIL_LINES, TOOL_VERSIONS,
};

pub mod fastp {
    use std::path::Path;
    use std::process::Stdio;

    use anyhow::{anyhow, Result};
    use tokio::process::Command;

    use crate::config::defs::{FASTP_STATIC_ARGS, FASTP_TAG};

    pub struct FastpConfig<'a> {
        pub in1: &'a Path,
        pub in2: &'a Path,
        pub out1: &'a Path,
        pub out2: &'a Path,
    }

    pub async fn fastp_presence_check() -> Result<String> {
        let output = Command::new(FASTP_TAG)
            .arg("-v")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is fastp installed?", FASTP_TAG, e))?;

        // fastp prints its version line on stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stderr
            .lines()
            .chain(stdout.lines())
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow!("No output from fastp -v"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid fastp -v output: {}", first_line))?
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number in fastp -v output: {}", first_line));
        }
        Ok(version)
    }

    pub fn arg_generator(config: &FastpConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        for arg in FASTP_STATIC_ARGS {
            args_vec.push(arg.to_string());
        }
        args_vec.push("-i".to_string());
        args_vec.push(config.in1.to_string_lossy().to_string());
        args_vec.push("-I".to_string());
        args_vec.push(config.in2.to_string_lossy().to_string());
        args_vec.push("-o".to_string());
        args_vec.push(config.out1.to_string_lossy().to_string());
        args_vec.push("-O".to_string());
        args_vec.push(config.out2.to_string_lossy().to_string());
        args_vec.push("--html".to_string());
        args_vec.push("/dev/null".to_string());
        args_vec.push("--json".to_string());
        args_vec.push("/dev/null".to_string());

        args_vec
    }
}

pub mod bbsplit {
    use std::path::{Path, PathBuf};
    use std::process::Stdio;

    use anyhow::{anyhow, Result};
    use tokio::process::Command;

    use crate::cli::AmbiguousPolicy;
    use crate::config::defs::BBSPLIT_TAG;

    pub struct BbsplitConfig<'a> {
        pub in1: &'a Path,
        pub in2: &'a Path,
        pub refs: &'a [PathBuf],
        pub basename_pattern: &'a str,
        pub ambiguous: &'a AmbiguousPolicy,
        pub unmapped: Option<(PathBuf, PathBuf)>,
    }

    pub async fn bbsplit_presence_check() -> Result<String> {
        let output = Command::new(BBSPLIT_TAG)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is BBTools installed?", BBSPLIT_TAG, e))?;

        // BBTools banners go to stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version_line = stderr
            .lines()
            .chain(stdout.lines())
            .find(|l| l.to_lowercase().contains("version"))
            .ok_or_else(|| anyhow!("No version line from {} --version", BBSPLIT_TAG))?;
        let version = version_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("Invalid {} --version output: {}", BBSPLIT_TAG, version_line))?
            .to_string();
        Ok(version)
    }

    pub fn arg_generator(config: &BbsplitConfig) -> Vec<String> {
        let refs: Vec<String> = config
            .refs
            .iter()
            .map(|r| r.to_string_lossy().to_string())
            .collect();

        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(format!("in1={}", config.in1.to_string_lossy()));
        args_vec.push(format!("in2={}", config.in2.to_string_lossy()));
        args_vec.push(format!("ambig2={}", config.ambiguous.as_str()));
        args_vec.push(format!("ref={}", refs.join(",")));
        args_vec.push(format!("basename={}", config.basename_pattern));
        if let Some((outu1, outu2)) = &config.unmapped {
            args_vec.push(format!("outu1={}", outu1.to_string_lossy()));
            args_vec.push(format!("outu2={}", outu2.to_string_lossy()));
        }

        args_vec
    }
}

pub mod reformat {
    use std::path::Path;
    use std::process::Stdio;

    use anyhow::{anyhow, Result};
    use tokio::process::Command;

    use crate::config::defs::REFORMAT_TAG;

    pub struct ReformatConfig<'a> {
        pub input: &'a Path,
        pub out1: &'a Path,
        pub out2: &'a Path,
    }

    pub async fn reformat_presence_check() -> Result<String> {
        let output = Command::new(REFORMAT_TAG)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is BBTools installed?", REFORMAT_TAG, e))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version_line = stderr
            .lines()
            .chain(stdout.lines())
            .find(|l| l.to_lowercase().contains("version"))
            .ok_or_else(|| anyhow!("No version line from {} --version", REFORMAT_TAG))?;
        let version = version_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("Invalid {} --version output: {}", REFORMAT_TAG, version_line))?
            .to_string();
        Ok(version)
    }

    pub fn arg_generator(config: &ReformatConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(format!("in={}", config.input.to_string_lossy()));
        args_vec.push(format!("out1={}", config.out1.to_string_lossy()));
        args_vec.push(format!("out2={}", config.out2.to_string_lossy()));

        args_vec
    }
}

pub mod fastqc {
    use std::path::Path;
    use std::process::Stdio;

    use anyhow::{anyhow, Result};
    use tokio::process::Command;

    use crate::config::defs::FASTQC_TAG;

    pub struct FastqcConfig<'a> {
        pub input: &'a Path,
        pub out_dir: &'a Path,
    }

    pub async fn fastqc_presence_check() -> Result<String> {
        let output = Command::new(FASTQC_TAG)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is FastQC installed?", FASTQC_TAG, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow!("No output from fastqc --version"))?;
        let version = first_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("Invalid fastqc --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }

    pub fn arg_generator(config: &FastqcConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--noextract".to_string());
        args_vec.push(config.input.to_string_lossy().to_string());
        args_vec.push("-o".to_string());
        args_vec.push(config.out_dir.to_string_lossy().to_string());

        args_vec
    }
}

pub mod multiqc {
    use std::path::Path;
    use std::process::Stdio;

    use anyhow::{anyhow, Result};
    use tokio::process::Command;

    use crate::config::defs::MULTIQC_TAG;

    pub struct MultiqcConfig<'a> {
        pub report_dir: &'a Path,
    }

    pub async fn multiqc_presence_check() -> Result<String> {
        let output = Command::new(MULTIQC_TAG)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is MultiQC installed?", MULTIQC_TAG, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow!("No output from multiqc --version"))?;
        let version = first_line
            .split_whitespace()
            .last()
            .ok_or_else(|| anyhow!("Invalid multiqc --version output: {}", first_line))?
            .to_string();
        Ok(version)
    }

    pub fn arg_generator(config: &MultiqcConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(config.report_dir.to_string_lossy().to_string());
        args_vec.push("-o".to_string());
        args_vec.push(config.report_dir.to_string_lossy().to_string());

        args_vec
    }
}

/// Runs one external tool to completion.
///
/// stdout is discarded (every tool here writes its results to files), stderr
/// is captured so a failure can surface the tool's own diagnostics.
///
/// # Arguments
///
/// * `stage` - Pipeline stage the invocation belongs to.
/// * `tool` - Executable name.
/// * `args` - Arguments from one of the arg_generator functions.
/// * `timeout_secs` - Kill the tool after this many seconds; 0 disables it.
///
/// # Returns
/// Ok(()) on zero exit status.
pub async fn run_tool(
    stage: Stage,
    tool: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<(), PipelineError> {
    debug!("Running: {} {}", tool, args.join(" "));

    let mut cmd = Command::new(tool);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| PipelineError::ToolSpawn {
        tool: tool.to_string(),
        source: e,
    })?;

    let output = if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("{} exceeded {}s in the {} stage, killing it", tool, timeout_secs, stage);
                return Err(PipelineError::StageTimeout {
                    stage,
                    tool: tool.to_string(),
                    secs: timeout_secs,
                });
            }
        }
    } else {
        child.wait_with_output().await?
    };

    if !output.status.success() {
        let tail = stderr_tail(&output.stderr);
        if !tail.is_empty() {
            warn!("{} stderr: {}", tool, tail);
        }
        return Err(PipelineError::StageFailure {
            stage,
            tool: tool.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr_tail: tail,
        });
    }

    Ok(())
}

/// Last non-empty stderr lines of a failed tool, joined for single-line logs.
fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

pub async fn check_version(tool: &str) -> Result<String> {
    let version = match tool {
        FASTP_TAG => fastp::fastp_presence_check().await,
        BBSPLIT_TAG => bbsplit::bbsplit_presence_check().await,
        REFORMAT_TAG => reformat::reformat_presence_check().await,
        FASTQC_TAG => fastqc::fastqc_presence_check().await,
        MULTIQC_TAG => multiqc::multiqc_presence_check().await,
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };
    Ok(version?)
}

/// Major and minor components of a reported version string,
/// e.g. "v0.12.1" -> (0, 12). Compared as integers so "0.9" sorts
/// before "0.23".
fn version_number(version: &str) -> Option<(u32, u32)> {
    let digits = version.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() {
        return None;
    }
    let mut parts = digits.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Logs the version of each tool, warning when one is older than the
/// version the pipeline was tested with. Detection problems are left to
/// surface when a stage actually runs the tool.
pub async fn log_tool_versions(tools: &[&str]) {
    for tool in tools {
        match check_version(tool).await {
            Ok(version) => {
                info!("{} version {}", tool, version);
                if let Some(expected) = TOOL_VERSIONS.get(tool) {
                    if let (Some(min), Some(found)) =
                        (version_number(expected), version_number(&version))
                    {
                        if found < min {
                            warn!("{} {} is older than the tested {}", tool, version, expected);
                        }
                    }
                }
            }
            Err(e) => warn!("Could not determine {} version: {}", tool, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::bbsplit::BbsplitConfig;
    use super::fastp::FastpConfig;
    use super::reformat::ReformatConfig;
    use super::*;
    use crate::cli::AmbiguousPolicy;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_fastp_args_keep_fixed_settings_and_file_order() {
        let config = FastpConfig {
            in1: Path::new("/in/S1_R1.fastq.gz"),
            in2: Path::new("/in/S1_R2.fastq.gz"),
            out1: Path::new("/out/processed_S1_R1.fastq.gz"),
            out2: Path::new("/out/processed_S1_R2.fastq.gz"),
        };
        let args = fastp::arg_generator(&config);

        assert_eq!(args[0], "-q");
        assert_eq!(args[1], "20");
        assert!(args.contains(&"--detect_adapter_for_pe".to_string()));
        assert!(args.contains(&"--dedup".to_string()));

        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/in/S1_R1.fastq.gz");
        let o_big = args.iter().position(|a| a == "-O").unwrap();
        assert_eq!(args[o_big + 1], "/out/processed_S1_R2.fastq.gz");

        // Reports are thrown away
        assert!(args.windows(2).any(|w| w[0] == "--html" && w[1] == "/dev/null"));
        assert!(args.windows(2).any(|w| w[0] == "--json" && w[1] == "/dev/null"));
    }

    #[test]
    fn test_bbsplit_args_join_refs_and_keep_pattern() {
        let refs = vec![PathBuf::from("/refs/A.gb"), PathBuf::from("/refs/B.gbk")];
        let config = BbsplitConfig {
            in1: Path::new("/out/processed_S1_R1.fastq.gz"),
            in2: Path::new("/out/processed_S1_R2.fastq.gz"),
            refs: &refs,
            basename_pattern: "/out/S1%.fq.gz",
            ambiguous: &AmbiguousPolicy::Best,
            unmapped: None,
        };
        let args = bbsplit::arg_generator(&config);

        assert!(args.contains(&"ambig2=best".to_string()));
        assert!(args.contains(&"ref=/refs/A.gb,/refs/B.gbk".to_string()));
        assert!(args.contains(&"basename=/out/S1%.fq.gz".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("outu1=")));
    }

    #[test]
    fn test_bbsplit_args_with_unmapped_sinks() {
        let refs = vec![PathBuf::from("/refs/A.gb")];
        let config = BbsplitConfig {
            in1: Path::new("in1.fq.gz"),
            in2: Path::new("in2.fq.gz"),
            refs: &refs,
            basename_pattern: "S1%.fq.gz",
            ambiguous: &AmbiguousPolicy::Toss,
            unmapped: Some((
                PathBuf::from("/out/unmapped_S1_R1.fastq.gz"),
                PathBuf::from("/out/unmapped_S1_R2.fastq.gz"),
            )),
        };
        let args = bbsplit::arg_generator(&config);

        assert!(args.contains(&"ambig2=toss".to_string()));
        assert!(args.contains(&"outu1=/out/unmapped_S1_R1.fastq.gz".to_string()));
        assert!(args.contains(&"outu2=/out/unmapped_S1_R2.fastq.gz".to_string()));
    }

    #[test]
    fn test_reformat_args() {
        let config = ReformatConfig {
            input: Path::new("/out/S1A.fq.gz"),
            out1: Path::new("/out/A_S1_R1.fastq.gz"),
            out2: Path::new("/out/A_S1_R2.fastq.gz"),
        };
        let args = reformat::arg_generator(&config);
        assert_eq!(
            args,
            vec![
                "in=/out/S1A.fq.gz".to_string(),
                "out1=/out/A_S1_R1.fastq.gz".to_string(),
                "out2=/out/A_S1_R2.fastq.gz".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_tool_nonzero_exit_is_stage_failure() {
        let err = run_tool(Stage::Split, "false", vec![], 0).await.unwrap_err();
        match err {
            PipelineError::StageFailure { stage, status, .. } => {
                assert_eq!(stage, Stage::Split);
                assert_eq!(status, 1);
            }
            other => panic!("Expected StageFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary_is_spawn_error() {
        let err = run_tool(Stage::Trim, "definitely-not-a-real-tool", vec![], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolSpawn { .. }));
    }

    #[tokio::test]
    async fn test_run_tool_timeout() {
        let err = run_tool(Stage::Trim, "sleep", vec!["5".to_string()], 1)
            .await
            .unwrap_err();
        match err {
            PipelineError::StageTimeout { tool, secs, .. } => {
                assert_eq!(tool, "sleep");
                assert_eq!(secs, 1);
            }
            other => panic!("Expected StageTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_version_number_takes_major_minor() {
        assert_eq!(version_number("0.23.4"), Some((0, 23)));
        assert_eq!(version_number("v0.12.1"), Some((0, 12)));
        assert_eq!(version_number("39.01"), Some((39, 1)));
        assert_eq!(version_number("garbage"), None);
    }

    #[test]
    fn test_version_number_orders_numerically() {
        // Cases a decimal parse would invert
        assert!(version_number("fastp 0.9").unwrap() < version_number("0.23").unwrap());
        assert!(version_number("1.2").unwrap() < version_number("1.14").unwrap());
        assert!(version_number("39.01").unwrap() >= version_number("39.01").unwrap());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let raw = (0..20).map(|i| format!("line {}\n", i)).collect::<String>();
        let tail = stderr_tail(raw.as_bytes());
        assert!(tail.ends_with("line 19"));
        assert!(!tail.contains("line 5"));
    }
}
