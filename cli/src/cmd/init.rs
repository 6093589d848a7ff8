use std::path::PathBuf;

use syjudge_core::{action, print_success};

use super::{GlobalArgs, SubcmdResult};

/// Write an example syjudge.toml
#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(default_value = "./")]
    dir: PathBuf,
}

pub fn exec(args: &Args, _: &GlobalArgs) -> SubcmdResult {
    let path = action::init_config(&args.dir)?;
    print_success!("Created {}", path.to_string_lossy());
    Ok(())
}
