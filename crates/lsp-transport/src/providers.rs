use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    ConnectionProvider, LanguageConnection, Notification, StreamConnection, TransportError,
    TransportResult, DEFAULT_SUBSCRIPTION_CAPACITY,
};

/// Runs the `initialize`/`initialized` exchange when handshake params are set.
async fn establish(
    connection: StreamConnection,
    handshake: Option<&Value>,
) -> TransportResult<StreamConnection> {
    if let Some(params) = handshake {
        let capabilities = connection.request("initialize", params.clone()).await?;
        debug!(target: "lsp.transport", %capabilities, "initialize acknowledged");
        connection.send_notification("initialized", json!({}))?;
    }
    Ok(connection)
}

/// Spawns the language server and talks to it over stdio.
#[derive(Debug, Clone)]
pub struct ProcessProvider {
    program: String,
    args: Vec<String>,
    handshake: Option<Value>,
    capacity: usize,
}

impl ProcessProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            handshake: None,
            capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }

    /// Send `initialize` with these params before handing out the connection.
    pub fn with_handshake(mut self, params: Value) -> Self {
        self.handshake = Some(params);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl ConnectionProvider for ProcessProvider {
    async fn connect(&self) -> TransportResult<Arc<dyn LanguageConnection>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TransportError::Unavailable(format!("spawn {}: {err}", self.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Unavailable("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Unavailable("child stdout not captured".into()))?;
        info!(
            target: "lsp.transport",
            program = %self.program,
            pid = child.id(),
            "language server spawned"
        );

        let stream = StreamConnection::with_capacity(stdout, stdin, self.capacity);
        let stream = establish(stream, self.handshake.as_ref()).await?;
        Ok(Arc::new(ProcessConnection {
            stream,
            _child: Mutex::new(child),
        }))
    }
}

/// Keeps the child alive for as long as the connection is in use.
struct ProcessConnection {
    stream: StreamConnection,
    _child: Mutex<Child>,
}

#[async_trait]
impl LanguageConnection for ProcessConnection {
    fn send_notification(&self, method: &str, params: Value) -> TransportResult<()> {
        self.stream.send_notification(method, params)
    }

    fn subscribe(&self, method: &str) -> broadcast::Receiver<Notification> {
        self.stream.subscribe(method)
    }

    async fn drain(&self) {
        self.stream.drain().await;
    }
}

/// Connects to a language server already listening on a TCP socket.
#[derive(Debug, Clone)]
pub struct TcpProvider {
    addr: String,
    handshake: Option<Value>,
    capacity: usize,
}

impl TcpProvider {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            handshake: None,
            capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }

    pub fn with_handshake(mut self, params: Value) -> Self {
        self.handshake = Some(params);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl ConnectionProvider for TcpProvider {
    async fn connect(&self) -> TransportResult<Arc<dyn LanguageConnection>> {
        let socket = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| TransportError::Unavailable(format!("connect {}: {err}", self.addr)))?;
        socket.set_nodelay(true)?;
        info!(target: "lsp.transport", addr = %self.addr, "connected to language server");

        let (reader, writer) = socket.into_split();
        let stream = StreamConnection::with_capacity(reader, writer, self.capacity);
        Ok(Arc::new(establish(stream, self.handshake.as_ref()).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Incoming, LspCodec};
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test_timeout::tokio_timeout_test]
    async fn tcp_provider_performs_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, writer) = socket.into_split();
            let mut frames = FramedRead::new(reader, LspCodec::new());
            let mut sink = FramedWrite::new(writer, LspCodec::new());

            let body = frames.next().await.unwrap().unwrap();
            let Incoming::Request { id, method, .. } = Incoming::parse(&body).unwrap() else {
                panic!("expected initialize request");
            };
            assert_eq!(method, "initialize");
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"capabilities": {}}});
            sink.send(Bytes::from(serde_json::to_vec(&reply).unwrap()))
                .await
                .unwrap();

            let mut methods = Vec::new();
            for _ in 0..2 {
                let body = frames.next().await.unwrap().unwrap();
                if let Incoming::Notification(notification) = Incoming::parse(&body).unwrap() {
                    methods.push(notification.method);
                }
            }
            methods
        });

        let provider = TcpProvider::new(addr).with_handshake(json!({"processId": null}));
        let connection = provider.connect().await.unwrap();
        connection
            .send_notification("diagram/didClose", json!("s1"))
            .unwrap();

        assert_eq!(
            server.await.unwrap(),
            vec!["initialized".to_string(), "diagram/didClose".to_string()]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn unreachable_tcp_server_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(matches!(
            TcpProvider::new(addr).connect().await,
            Err(TransportError::Unavailable(_))
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn missing_program_is_unavailable() {
        let provider = ProcessProvider::new("definitely-not-a-language-server-binary", Vec::new());
        assert!(matches!(
            provider.connect().await,
            Err(TransportError::Unavailable(_))
        ));
    }
}
