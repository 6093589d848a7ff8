use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::error::*;
use crate::lifecycle::Workdir;
use crate::style;
use crate::testing::{
    Capture, CancelToken, JudgeCode, Orchestrator, RunSummary, StageCommand, StageResult, TestCase,
};

#[derive(Debug, Clone, Default)]
pub struct JudgeOptions {
    /// Keep only testcases whose name starts with one of these.
    pub filters: Vec<String>,
    /// Where to write the JSON report, if anywhere.
    pub report_file: Option<PathBuf>,
    pub skip_prebuild: bool,
}

pub fn init_config(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let path = dir.as_ref().join(Config::FILENAME);
    ensure!(!path.exists(), "'{}' already exists", path.to_string_lossy());
    fsutil::write_with_mkdir(&path, Config::example_toml())
        .context("Failed to write example config")?;
    Ok(path)
}

pub fn list_testcases(cfg: &Config, filters: &[String]) -> Result<Vec<TestCase>> {
    TestCase::discover_filtered(cfg.testcase_dir(), filters).context("Failed to find testcases")
}

/// Runs the configured prebuild command in the config dir. Fails on non-zero exit.
/// Returns `false` if `cancel` tripped before the command finished.
pub async fn do_prebuild(cfg: &Config, argv: &[String], mut cancel: CancelToken) -> Result<bool> {
    let cmd = StageCommand::new(argv.iter().map(Into::into).collect())
        .current_dir(cfg.base_dir())
        .stderr(Capture::Memory);
    log::info!("Prebuild: {}", cmd.display());

    let res = tokio::select! {
        res = cmd.run() => res.require_success(),
        _ = cancel.cancelled() => {
            log::warn!("Interrupted while running prebuild");
            return Ok(false);
        }
    };
    match res {
        StageResult::Success(_) => Ok(true),
        StageResult::Failed(diag) => Err(anyhow!("{}", diag.trim_end()))
            .with_context(|| format!("Prebuild failed: {}", cmd.display())),
        StageResult::TimedOut(limit) => bail!("Prebuild timed out after {:?}", limit),
    }
}

pub async fn do_judge(
    cfg: &Config,
    opts: &JudgeOptions,
    cancel: CancelToken,
) -> Result<RunSummary> {
    if let Some(argv) = cfg.command.prebuild.as_ref().filter(|_| !opts.skip_prebuild) {
        if !self::do_prebuild(cfg, argv, cancel.clone()).await? {
            let mut summary = RunSummary::new(0);
            summary.interrupted = true;
            self::finish(&summary, opts)?;
            return Ok(summary);
        }
    }

    let testcase_dir = cfg.testcase_dir();
    let base_dir = cfg.base_dir();
    let workdir = Workdir::prepare(
        cfg.scratch_dir(),
        cfg.failure_dir(),
        &[&testcase_dir, &base_dir],
    )
    .context("Failed to prepare work dirs")?;

    let testcases = TestCase::discover_filtered(&testcase_dir, &opts.filters)
        .context("Failed to find testcases")?;

    let pipeline = cfg.pipeline(workdir.scratch_dir(), workdir.failure_dir());
    let orch = Orchestrator::new(pipeline.clone(), cfg.judge.jobs());
    println!(
        "{}",
        format!(
            "Judging {} testcases in {} ({} jobs)",
            testcases.len(),
            testcase_dir.to_string_lossy(),
            orch.jobs(),
        )
        .cyan()
    );

    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .context("Invalid progress bar template")?,
    );
    bar.enable_steady_tick(Duration::from_millis(80));

    let mut summary = orch
        .run(testcases.clone(), cancel, |report, summary| {
            bar.suspend(|| println!("{}", style::verdict_line(report, summary.total)));
            bar.set_message(style::tally(summary));
        })
        .await;
    bar.finish_and_clear();
    summary.sort_reports();

    summary.failures().for_each(style::print_failure_detail);
    if summary.failed() > 0 {
        println!("\n{}", "Failed testcases:".bright_red().bold());
        for report in summary.failures() {
            println!(
                "  {} {}",
                style::judge_icon(report.verdict.code()),
                report.name
            );
            let Some(testcase) = testcases.get(report.index - 1) else {
                continue;
            };
            let paths = pipeline.paths_for(report.index, testcase);
            let artifact = match report.verdict.code() {
                JudgeCode::WA => Some(&paths.diff_script),
                JudgeCode::RE => Some(&paths.diagnostic),
                _ => None,
            };
            if let Some(path) = artifact.filter(|p| p.exists()) {
                println!("      {}", path.to_string_lossy().dimmed());
            }
        }
        println!();
    }
    self::finish(&summary, opts)?;

    workdir
        .close()
        .context("Failed to clean up scratch dir")?;
    Ok(summary)
}

fn finish(summary: &RunSummary, opts: &JudgeOptions) -> Result<()> {
    style::print_summary(summary);

    if let Some(path) = &opts.report_file {
        fsutil::write_json_with_mkdir(path, summary).context("Failed to write report")?;
        log::info!("Wrote report to {:?}", path);
    }
    Ok(())
}
