pub mod init;
pub mod list;
pub mod run;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,

    /// Log more (-v: info, -vv: debug, -vvv: trace). `RUST_LOG` is used otherwise.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    Init(init::Args),
    List(list::Args),

    #[command(alias("r"))]
    Run(run::Args),
}

pub type SubcmdResult = anyhow::Result<()>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Init(args) => init::exec(args, self),
            List(args) => list::exec(args, self),
            Run(args) => run::exec(args, self).await,
        }
    }
}
