use anyhow::Result;
use nsmeta::{FileType, Namespace};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
pub struct InspectCmd {
    /// Path to the edit log (*.toml)
    src: PathBuf,

    /// Path to the namespace config (*.toml)
    #[structopt(short, long)]
    config: Option<PathBuf>,

    /// When set, shows just this subtree
    #[structopt(short, long, default_value = "/")]
    path: String,
}

impl InspectCmd {
    pub fn run(self) -> Result<()> {
        let ns = super::load(&self.src, self.config.as_ref())?;

        print(&ns, &self.path, 0)?;

        Ok(())
    }
}

fn print(ns: &Namespace, path: &str, depth: usize) -> Result<()> {
    let status = ns.get_file_link_info(path)?;
    let indent = "  ".repeat(depth);

    let name = if depth == 0 { path.to_string() } else { status.name.clone() };

    match status.file_type {
        FileType::Directory => {
            print!("{}{}/", indent, name);

            if let Some(usage) = ns.get_quota_usage(path)? {
                print!("  quota={:?} consumed={:?}", usage.quota, usage.consumed);
            }

            println!();

            for child in ns.get_listing(path)? {
                let child_path = format!("{}/{}", path.trim_end_matches('/'), child.name);

                print(ns, &child_path, depth + 1)?;
            }
        }

        FileType::RegularFile => {
            println!(
                "{}{}  len={} repl={} blocks={} policy={}",
                indent,
                name,
                status.length,
                status.replication,
                status.blocks,
                status.storage_policy.unwrap_or_default()
            );
        }

        FileType::Symlink => {
            println!("{}{} -> {}", indent, name, status.symlink.unwrap_or_default());
        }
    }

    Ok(())
}
