use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use diagram_protocol::DocumentRef;

use crate::config::{absolute, HostConfig};

#[derive(Debug, Parser)]
#[command(
    name = "diagram-host",
    author,
    version,
    about = "Headless host for diagram views backed by a language server"
)]
pub struct Cli {
    /// Configuration file layered under DIAGRAM_HOST__* variables.
    #[arg(long, env = "DIAGRAM_HOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Language server executable, spoken to over stdio.
    #[arg(long)]
    pub server_command: Option<String>,

    /// Argument passed to the language server. Repeatable.
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    pub server_args: Vec<String>,

    /// Connect to a language server listening on host:port instead of spawning one.
    #[arg(long)]
    pub connect: Option<String>,

    /// Document to open as a diagram, as a URI or a local path. Repeatable.
    #[arg(long = "open")]
    pub documents: Vec<String>,

    /// Directory exported SVGs are written to.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,
}

#[derive(Debug)]
pub struct HostSettings {
    pub config: HostConfig,
    pub documents: Vec<DocumentRef>,
}

impl TryFrom<Cli> for HostSettings {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let mut config = HostConfig::load(cli.config.as_deref())?;
        if let Some(command) = cli.server_command {
            config.server.command = Some(command);
            config.server.args = cli.server_args;
        }
        if cli.connect.is_some() {
            config.server.tcp = cli.connect;
        }
        if let Some(dir) = cli.export_dir {
            config.export_dir = Some(absolute(&dir)?);
        }
        if let Some(filter) = cli.log_filter {
            config.log_filter = filter;
        }
        let documents = cli
            .documents
            .iter()
            .map(|raw| document_ref(raw))
            .collect::<anyhow::Result<_>>()?;
        Ok(Self { config, documents })
    }
}

/// Accepts a URI as-is and turns anything else into a `file://` reference.
pub fn document_ref(raw: &str) -> anyhow::Result<DocumentRef> {
    if raw.contains("://") {
        return DocumentRef::parse(raw).with_context(|| format!("invalid document uri: {raw}"));
    }
    let path = absolute(Path::new(raw))?;
    DocumentRef::parse(format!("file://{}", path.display()))
        .with_context(|| format!("invalid document path: {raw}"))
}
