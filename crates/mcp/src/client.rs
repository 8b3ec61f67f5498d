use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::mem;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use aligner_core::tool::{ToolServer, ToolServerError, ToolSpec};
use aligner_model::Arguments;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter,
};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};

use crate::result::{self, CallToolResult};
use crate::{McpError, McpServerConfig};

const PROTOCOL_VERSION: &str = "2025-06-18";
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);
const METHOD_NOT_FOUND: i64 = -32601;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Responder = oneshot::Sender<Result<Value, McpError>>;

/// What a server told about itself during the handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// The server's self-reported name.
    pub name: String,
    /// The server's self-reported version.
    pub version: String,
    /// The protocol revision the server agreed on.
    pub protocol_version: String,
    /// Usage hints the server wants clients to pass on to the model.
    pub instructions: Option<String>,
}

/// A connected MCP server.
///
/// Requests may be issued concurrently from any number of tasks; responses
/// are matched back to their callers by JSON-RPC id.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<Inner>,
    info: ServerInfo,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    responders: HashMap<u64, Responder>,
}

struct Inner {
    name: String,
    writer: AsyncMutex<BufWriter<Writer>>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    // Killed on drop.
    child: Mutex<Option<Child>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    protocol_version: String,
    #[serde(default)]
    server_info: Implementation,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Default, Deserialize)]
struct Implementation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<Tool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

impl McpClient {
    /// Spawns the server process described by `config` and performs the
    /// initialize handshake over its stdio.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            server: config.name.clone(),
            source,
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take())
        else {
            return Err(McpError::Transport {
                server: config.name.clone(),
                message: "server stdio is not piped".to_owned(),
            });
        };
        if let Some(stderr) = child.stderr.take() {
            let name = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "{line}");
                }
            });
        }
        debug!(server = %config.name, "spawned `{}`", config.command);

        Self::start(
            config.name.clone(),
            BufReader::new(stdout),
            Box::new(stdin),
            Some(child),
        )
        .await
    }

    /// Performs the initialize handshake over an already established
    /// transport, reading newline-delimited messages from `reader` and
    /// writing them to `writer`.
    pub async fn with_transport<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
    ) -> Result<Self, McpError>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(name.into(), reader, Box::new(writer), None).await
    }

    async fn start<R>(
        name: String,
        reader: R,
        writer: Writer,
        child: Option<Child>,
    ) -> Result<Self, McpError>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let inner = Arc::new(Inner {
            name,
            writer: AsyncMutex::new(BufWriter::new(writer)),
            pending: Default::default(),
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
        });
        tokio::spawn(read_loop(Arc::downgrade(&inner), reader));

        let info =
            match tokio::time::timeout(INITIALIZE_TIMEOUT, inner.initialize())
                .await
            {
                Ok(info) => info?,
                Err(_) => {
                    return Err(McpError::Transport {
                        server: inner.name.clone(),
                        message: "no response to the initialize request"
                            .to_owned(),
                    });
                }
            };
        info!(
            server = %inner.name,
            "connected to {} {}",
            info.name,
            info.version
        );
        Ok(Self { inner, info })
    }

    /// Returns the logical name this client was configured with.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns what the server reported during the handshake.
    #[inline]
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Lists every tool of the server, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let mut specs = vec![];
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page: ListToolsResult = self
                .inner
                .parse(self.inner.request("tools/list", params).await?)?;
            specs.extend(page.tools.into_iter().map(|tool| ToolSpec {
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                input_schema: tool
                    .input_schema
                    .unwrap_or_else(|| json!({ "type": "object" })),
            }));

            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) if cursor.as_ref() != Some(&next) => {
                    cursor = Some(next)
                }
                Some(next) => {
                    warn!(
                        server = %self.inner.name,
                        "server repeated cursor {next}, stopping"
                    );
                    break;
                }
                None => break,
            }
        }
        debug!(server = %self.inner.name, "listed {} tools", specs.len());
        Ok(specs)
    }

    /// Calls the tool `name` and converts its content into a plain value.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<Value, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result: CallToolResult = self
            .inner
            .parse(self.inner.request("tools/call", params).await?)?;
        result::into_value(&self.inner.name, name, result)
    }

    /// Kills the server process and fails all requests still in flight.
    ///
    /// Dropping the last clone of a client has the same effect.
    pub fn shutdown(&self) {
        let child = self
            .inner
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            if let Err(err) = child.start_kill() {
                debug!(server = %self.inner.name, "failed to kill: {err}");
            }
        }
        self.inner.close();
    }
}

impl Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.inner.name)
            .field("info", &self.info)
            .finish()
    }
}

#[async_trait]
impl ToolServer for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolServerError> {
        Ok(McpClient::list_tools(self).await?)
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
    ) -> Result<Value, ToolServerError> {
        Ok(self.call_tool(name, arguments).await?)
    }
}

struct Withdraw<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        self.inner.lock_pending().responders.remove(&self.id);
    }
}

impl Inner {
    async fn initialize(&self) -> Result<ServerInfo, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result: InitializeResult =
            self.parse(self.request("initialize", params).await?)?;
        if result.protocol_version != PROTOCOL_VERSION {
            debug!(
                server = %self.name,
                "server speaks protocol {}",
                result.protocol_version
            );
        }

        self.write(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .await?;

        Ok(ServerInfo {
            name: result.server_info.name,
            version: result.server_info.version,
            protocol_version: result.protocol_version,
            instructions: result.instructions,
        })
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(self.terminated());
            }
            pending.responders.insert(id, tx);
        }

        // Withdraws the request if the caller gives up or the write fails.
        let _withdraw = Withdraw { inner: self, id };

        trace!(server = %self.name, "-> #{id} {method}");
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write(&message).await?;

        rx.await.unwrap_or_else(|_| Err(self.terminated()))
    }

    async fn write(&self, message: &Value) -> Result<(), McpError> {
        let mut line = message.to_string();
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let mut result = writer.write_all(line.as_bytes()).await;
        if result.is_ok() {
            result = writer.flush().await;
        }
        result.map_err(|err| McpError::Transport {
            server: self.name.clone(),
            message: err.to_string(),
        })
    }

    async fn dispatch(&self, mut message: Map<String, Value>) {
        let id = message.remove("id");
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_owned);
        match (id, method) {
            (Some(id), Some(method)) => self.answer(id, &method).await,
            (Some(id), None) => self.complete(&id, message),
            (None, Some(method)) => {
                debug!(server = %self.name, "notification {method}");
            }
            (None, None) => {
                debug!(server = %self.name, "ignoring message without id");
            }
        }
    }

    /// Answers a request the server sent to us.
    async fn answer(&self, id: Value, method: &str) {
        let reply = if method == "ping" {
            json!({ "jsonrpc": "2.0", "id": id, "result": {} })
        } else {
            warn!(server = %self.name, "unsupported server request {method}");
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("method '{method}' is not supported"),
                },
            })
        };
        if let Err(err) = self.write(&reply).await {
            warn!(server = %self.name, "failed to answer {method}: {err}");
        }
    }

    fn complete(&self, id: &Value, mut message: Map<String, Value>) {
        let Some(id) = id
            .as_u64()
            .or_else(|| id.as_str().and_then(|id| id.parse().ok()))
        else {
            debug!(server = %self.name, "response with foreign id {id}");
            return;
        };
        let Some(responder) = self.lock_pending().responders.remove(&id) else {
            debug!(server = %self.name, "response to unknown request #{id}");
            return;
        };

        trace!(server = %self.name, "<- #{id}");
        let outcome = match message.remove("error") {
            Some(error) => Err(McpError::Rpc {
                server: self.name.clone(),
                code: error
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_owned(),
            }),
            None => Ok(message.remove("result").unwrap_or(Value::Null)),
        };
        responder.send(outcome).ok();
    }

    /// Fails every request in flight and refuses new ones.
    fn close(&self) {
        let responders = {
            let mut pending = self.lock_pending();
            pending.closed = true;
            mem::take(&mut pending.responders)
        };
        for (_, responder) in responders {
            responder.send(Err(self.terminated())).ok();
        }
    }

    fn parse<T: DeserializeOwned>(&self, value: Value) -> Result<T, McpError> {
        serde_json::from_value(value).map_err(|source| McpError::InvalidJson {
            server: self.name.clone(),
            source,
        })
    }

    #[inline]
    fn terminated(&self) -> McpError {
        McpError::Terminated {
            server: self.name.clone(),
        }
    }

    #[inline]
    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn read_loop<R>(inner: Weak<Inner>, reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!("MCP transport read failed: {err}");
                break;
            }
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(message)) => inner.dispatch(message).await,
            _ => warn!(server = %inner.name, "skipping non-JSON-RPC line: {line}"),
        }
    }

    if let Some(inner) = inner.upgrade() {
        debug!(server = %inner.name, "transport closed");
        inner.close();
    }
}
