mod check;
mod inspect;

pub use self::check::*;
pub use self::inspect::*;

use anyhow::{anyhow, Context, Result};
use nsmeta::{EditLog, Namespace, NamespaceConfig};
use std::path::{Path, PathBuf};

/// Builds a namespace out of the edit log at `src`.
fn load(src: &Path, config: Option<&PathBuf>) -> Result<Namespace> {
    let config = match config {
        Some(path) => NamespaceConfig::load(path)?,
        None => NamespaceConfig::default(),
    };

    let log = EditLog::load(src)?;
    let ns = Namespace::new(config);

    ns.replay(&log)
        .map_err(|err| {
            let msg = err.to_string();

            anyhow!("{} (errno {})", msg, err.log_and_convert())
        })
        .with_context(|| format!("couldn't replay {}", src.display()))?;

    Ok(ns)
}
