use std::path::PathBuf;

use syjudge_core::{action, testing::cancel_pair, Config};

use super::{GlobalArgs, SubcmdResult};
use crate::util;

/// Compile, link, run and judge every testcase
#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(short = 'd', long)]
    pub testcase_dir: Option<PathBuf>,

    /// Time limit of the compile stage
    #[arg(long, value_name = "MS")]
    pub compile_timeout: Option<u64>,

    /// Time limit of the produced executable
    #[arg(long, value_name = "MS")]
    pub exec_timeout: Option<u64>,

    /// Number of testcases judged at once (default: number of CPUs)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Only testcases whose name starts with PREFIX (repeatable)
    #[arg(short = 'f', long = "filter", value_name = "PREFIX")]
    pub filters: Vec<String>,

    /// Write a JSON report to FILE
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Do not run `command.prebuild`
    #[arg(long)]
    pub no_prebuild: bool,
}

impl Args {
    fn apply_to(&self, cfg: &mut Config) {
        if let Some(dir) = &self.testcase_dir {
            cfg.judge.testcase_dir = util::absolute(dir);
        }
        if let Some(ms) = self.compile_timeout {
            cfg.judge.compile_timeout_ms = ms;
        }
        if let Some(ms) = self.exec_timeout {
            cfg.judge.exec_timeout_ms = ms;
        }
        if let Some(jobs) = self.jobs {
            cfg.judge.jobs = jobs;
        }
    }
}

pub async fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let mut cfg = Config::load_or_example(util::current_dir())?;
    args.apply_to(&mut cfg);

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Received Ctrl-C, stopping");
            handle.cancel();
        }
    });

    let opts = action::JudgeOptions {
        filters: args.filters.clone(),
        report_file: args.report.as_ref().map(|p| util::absolute(p)),
        skip_prebuild: args.no_prebuild,
    };
    let summary = action::do_judge(&cfg, &opts, token).await?;

    if !summary.all_accepted() {
        std::process::exit(1);
    }
    Ok(())
}
