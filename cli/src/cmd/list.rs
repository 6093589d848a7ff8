use std::path::PathBuf;

use syjudge_core::{action, Config};

use super::{GlobalArgs, SubcmdResult};
use crate::util;

/// Print the names of discovered testcases
#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(short = 'd', long)]
    pub testcase_dir: Option<PathBuf>,

    /// Only testcases whose name starts with PREFIX (repeatable)
    #[arg(short = 'f', long = "filter", value_name = "PREFIX")]
    pub filters: Vec<String>,

    /// Also print the files of each testcase
    #[arg(short, long)]
    pub long: bool,
}

pub fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let mut cfg = Config::load_or_example(util::current_dir())?;
    if let Some(dir) = &args.testcase_dir {
        cfg.judge.testcase_dir = util::absolute(dir);
    }

    for t in action::list_testcases(&cfg, &args.filters)? {
        if !args.long {
            println!("{}", t.name());
            continue;
        }
        let input = t
            .input_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "-".to_owned());
        println!(
            "{}\t{}\t{}\t{}",
            t.name(),
            t.source_path().to_string_lossy(),
            input,
            t.expected_path().to_string_lossy()
        );
    }
    Ok(())
}
