mod cmds;

pub use self::cmds::*;
use anyhow::Result;
use structopt::StructOpt;

/// nsmeta, a namespace metadata engine with asynchronously maintained
/// directory quotas
#[derive(Debug, StructOpt)]
enum Cmd {
    Check(CheckCmd),
    Inspect(InspectCmd),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    match Cmd::from_args() {
        Cmd::Check(cmd) => cmd.run(),
        Cmd::Inspect(cmd) => cmd.run(),
    }
}
