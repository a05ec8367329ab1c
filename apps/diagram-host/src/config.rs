use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use diagram_bridge::{
    ConnectorConfig, DiagramConfiguration, DiagramConfigurationRegistry, RegistryConfig,
};
use lsp_transport::{
    ConnectionProvider, ProcessProvider, TcpProvider, DEFAULT_SUBSCRIPTION_CAPACITY,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const ENV_PREFIX: &str = "DIAGRAM_HOST";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub log_filter: String,
    pub registry: RegistryConfig,
    pub connector: ConnectorConfig,
    /// Directory exported SVGs are written to. Unset disables export.
    pub export_dir: Option<PathBuf>,
    pub flush_timeout_ms: u64,
    pub server: ServerConfig,
    pub diagrams: Vec<DiagramConfiguration>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            registry: RegistryConfig::default(),
            connector: ConnectorConfig::default(),
            export_dir: None,
            flush_timeout_ms: 2_000,
            server: ServerConfig::default(),
            diagrams: vec![DiagramConfiguration::new("yang").with_extension(".yang")],
        }
    }
}

fn default_log_filter() -> String {
    "info,diagram=debug".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    /// `host:port` of a language server that is already listening.
    pub tcp: Option<String>,
    pub handshake: bool,
    pub root_uri: Option<String>,
    /// Buffered inbound notifications per method on the server connection.
    pub subscription_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            tcp: None,
            handshake: true,
            root_uri: None,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }
}

impl ServerConfig {
    fn initialize_params(&self) -> Value {
        json!({
            "processId": std::process::id(),
            "rootUri": self.root_uri,
            "capabilities": {},
        })
    }

    /// TCP wins over a spawned command when both are configured.
    pub fn provider(&self) -> anyhow::Result<Arc<dyn ConnectionProvider>> {
        let capacity = self.subscription_capacity;
        if let Some(addr) = &self.tcp {
            let mut provider = TcpProvider::new(addr.clone()).with_capacity(capacity);
            if self.handshake {
                provider = provider.with_handshake(self.initialize_params());
            }
            return Ok(Arc::new(provider));
        }
        if let Some(command) = &self.command {
            let mut provider =
                ProcessProvider::new(command.clone(), self.args.clone()).with_capacity(capacity);
            if self.handshake {
                provider = provider.with_handshake(self.initialize_params());
            }
            return Ok(Arc::new(provider));
        }
        bail!("no language server configured: set server.command or server.tcp")
    }
}

impl HostConfig {
    /// Layers an optional file under `DIAGRAM_HOST__*` environment variables.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let mut config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .context("failed to load host configuration")?;
        if let Some(dir) = config.export_dir.take() {
            config.export_dir = Some(absolute(&dir)?);
        }
        Ok(config)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn configurations(&self) -> DiagramConfigurationRegistry {
        self.diagrams.iter().cloned().collect()
    }
}

/// Resolves `path` against the working directory when it is relative.
pub fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagram_protocol::DiagramKind;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test_timeout::timeout]
    fn defaults_register_yang_diagrams() {
        let config = HostConfig::default();
        let configurations = config.configurations();
        let yang = configurations.get(&DiagramKind::from("yang")).unwrap();
        assert_eq!(yang.file_extensions, vec![".yang".to_string()]);
        assert_eq!(config.registry.client_id_prefix, "diagram-");
        assert_eq!(config.flush_timeout(), Duration::from_secs(2));
    }

    #[test_timeout::timeout]
    fn file_overrides_nested_sections() {
        let file = write_config(
            r#"
            export_dir = "/tmp/diagrams"

            [registry]
            client_id_prefix = "view-"

            [connector]
            inbound_capacity = 4

            [server]
            command = "yang-language-server"
            args = ["--stdio"]

            [[diagrams]]
            kind = "uml"
            file_extensions = ["puml"]
            open_priority = 20
            "#,
        );
        let config = HostConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.registry.client_id_prefix, "view-");
        assert_eq!(config.connector.inbound_capacity, 4);
        assert_eq!(config.export_dir, Some(PathBuf::from("/tmp/diagrams")));
        assert_eq!(config.server.args, vec!["--stdio".to_string()]);
        assert!(config.server.handshake);
        assert_eq!(config.server.subscription_capacity, DEFAULT_SUBSCRIPTION_CAPACITY);
        assert_eq!(config.diagrams.len(), 1);
        assert_eq!(config.diagrams[0].open_priority, 20);
        assert!(config.diagrams[0].recognizes("exportSvg"));
    }

    #[test_timeout::timeout]
    fn relative_export_dir_is_resolved_on_load() {
        let file = write_config(r#"export_dir = "out""#);
        let config = HostConfig::load(Some(file.path())).unwrap();

        let expected = std::env::current_dir().unwrap().join("out");
        assert_eq!(config.export_dir, Some(expected));
    }

    #[test_timeout::timeout]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HostConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test_timeout::timeout]
    fn provider_requires_a_server() {
        assert!(ServerConfig::default().provider().is_err());
        let tcp = ServerConfig {
            tcp: Some("127.0.0.1:5007".into()),
            ..ServerConfig::default()
        };
        assert!(tcp.provider().is_ok());
    }
}
