use anyhow::{Context, bail};
use clap::Args;
use std::path::PathBuf;

/// Where the query text comes from: the positional argument or `--file`.
#[derive(Args, Debug, Clone)]
pub struct QuerySource {
    #[arg(value_name = "QUERY", required_unless_present = "file", conflicts_with = "file")]
    pub query: Option<String>,
    /// Read the query from a file instead.
    #[arg(long, short = 'f', value_name = "PATH")]
    pub file: Option<PathBuf>,
}

impl QuerySource {
    pub fn read(&self) -> anyhow::Result<String> {
        match (&self.query, &self.file) {
            (Some(query), None) => Ok(query.clone()),
            (None, Some(path)) => {
                std::fs::read_to_string(path).with_context(|| format!("cannot read query file {}", path.display()))
            }
            _ => bail!("give either a query or --file"),
        }
    }
}

/// Split `name=value`. The name may carry a leading `$`.
pub fn parse_binding(binding: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = binding.split_once('=') else {
        bail!("expected name=value, got '{binding}'");
    };
    let name = name.trim().trim_start_matches('$');
    if name.is_empty() {
        bail!("missing variable name in '{binding}'");
    }
    Ok((name.to_string(), value.to_string()))
}
