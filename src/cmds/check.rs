use anyhow::{anyhow, Result};
use std::path::PathBuf;
use structopt::StructOpt;

/// Replays the edit log and verifies that quota usage is consistent
#[derive(Debug, StructOpt)]
pub struct CheckCmd {
    /// Path to the edit log (*.toml)
    src: PathBuf,

    /// Path to the namespace config (*.toml)
    #[structopt(short, long)]
    config: Option<PathBuf>,
}

impl CheckCmd {
    pub fn run(self) -> Result<()> {
        let ns = super::load(&self.src, self.config.as_ref())?;

        // replaying has recomputed everything once already, so a second
        // pass must find nothing to fix
        let report = ns
            .update_count_for_quota()
            .map_err(|err| anyhow!("couldn't recompute quota: {}", err))?;

        println!(
            "{} inode(s), {} quota director(ies), {} inconsistent, {} in violation",
            ns.inode_count(),
            report.directories,
            report.inconsistencies,
            report.violations
        );

        if report.inconsistencies > 0 || report.violations > 0 {
            return Err(anyhow!("namespace is not consistent"));
        }

        println!("ok");

        Ok(())
    }
}
