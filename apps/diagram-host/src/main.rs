mod cli;
mod config;
mod headless;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use diagram_bridge::{
    Connector, DiagramManagers, DiagramView, ExportedArtifact, SessionRegistry,
};
use diagram_protocol::{Action, KnownAction};
use serde_json::json;
use tokio::{signal, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::cli::{Cli, HostSettings};
use crate::headless::{export_uri, FsArtifactStore, FsEditor, HeadlessShell};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = HostSettings::try_from(Cli::parse())?;
    telemetry::init_tracing(&settings.config.log_filter)?;
    let config = settings.config;

    let provider = config
        .server
        .provider()
        .context("failed to configure language server")?;
    let connector = Connector::new(
        provider,
        Arc::new(FsEditor),
        Arc::new(FsArtifactStore),
        config.connector.clone(),
    );
    let registry = Arc::new(SessionRegistry::new(connector.clone(), config.registry.clone()));
    let managers = DiagramManagers::new(&config.configurations(), registry, connector.clone());
    let shell = Arc::new(HeadlessShell::default());
    managers.on_start(shell.clone());
    info!(
        target: "diagram.host",
        kinds = managers.len(),
        documents = settings.documents.len(),
        "diagram host started"
    );

    let mut consumers = Vec::new();
    for document in &settings.documents {
        match managers.open(document).await {
            Ok(view) => {
                if let Some(consumer) =
                    spawn_consumer(Arc::clone(&view), connector.clone(), config.export_dir.clone())
                {
                    consumers.push(consumer);
                }
                view.dispatch(request_model(&view));
            }
            Err(err) => warn!(
                target: "diagram.host",
                document = %document,
                error = %err,
                "failed to open diagram"
            ),
        }
    }

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    let closed = managers.close_all();
    info!(target: "diagram.host", closed, "shutting down");
    if timeout(config.flush_timeout(), connector.flush()).await.is_err() {
        warn!(
            target: "diagram.host",
            link = ?connector.link_state(),
            "outbound queue not drained before shutdown"
        );
    }
    for consumer in consumers {
        consumer.abort();
    }
    debug!(target: "diagram.host", live = shell.live_views().len(), "views after shutdown");
    Ok(())
}

fn request_model(view: &DiagramView) -> Action {
    Action::new("requestModel").with(
        "options",
        json!({
            "sourceUri": view.document(),
            "diagramType": view.kind(),
            "needsClientLayout": true,
            "needsServerLayout": false,
        }),
    )
}

/// Drains inbound actions for `view`, writing exported SVGs under `export_dir`.
fn spawn_consumer(
    view: Arc<DiagramView>,
    connector: Connector,
    export_dir: Option<PathBuf>,
) -> Option<JoinHandle<()>> {
    let mut inbound = view.take_inbound()?;
    Some(tokio::spawn(async move {
        while let Some(action) = inbound.recv().await {
            match action.decode() {
                Ok(Some(KnownAction::ExportSvg { svg })) => {
                    let Some(dir) = &export_dir else {
                        debug!(target: "diagram.host", view_id = view.id(), "export ignored");
                        continue;
                    };
                    let uri = match export_uri(dir, view.document()) {
                        Ok(uri) => uri,
                        Err(err) => {
                            warn!(target: "diagram.host", view_id = view.id(), error = %err, "no export target");
                            continue;
                        }
                    };
                    match connector.export_artifact(&uri, ExportedArtifact::svg(svg)).await {
                        Ok(()) => info!(target: "diagram.host", uri, "diagram exported"),
                        Err(err) => warn!(target: "diagram.host", uri, error = %err, "export failed"),
                    }
                }
                Ok(Some(known)) => {
                    debug!(target: "diagram.host", view_id = view.id(), kind = known.kind(), "action received")
                }
                Ok(None) => {
                    debug!(target: "diagram.host", view_id = view.id(), kind = %action.kind, "unhandled action")
                }
                Err(err) => {
                    warn!(target: "diagram.host", view_id = view.id(), error = %err, "malformed action")
                }
            }
        }
    }))
}
