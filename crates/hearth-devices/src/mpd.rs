//! Music Player Daemon client.
//!
//! Just enough of the text protocol to pass commands through: connect, read
//! the `OK MPD <version>` greeting, send one command line, read `key: value`
//! lines until `OK` or `ACK ...`.
//!
//! The connection is opened on first use. Before each command an existing
//! connection is checked with `ping` and replaced if it went away. Command
//! names are checked against the daemon's own `commands` list.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hearth_core::MpdConfig;

const GREETING_PREFIX: &str = "OK MPD ";

#[derive(Debug, thiserror::Error)]
pub enum MpdError {
    #[error("cannot connect to {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("connection lost: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("unexpected greeting '{0}'")]
    Greeting(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon rejected the command.
    #[error("[{code}@{index}] {{{command}}} {message}")]
    Ack {
        code: u32,
        index: u32,
        command: String,
        message: String,
    },

    /// Not in the daemon's `commands` list.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl MpdError {
    /// Whether the request itself is at fault rather than the daemon link.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MpdError::UnknownCommand(_) | MpdError::InvalidArgument(_) | MpdError::Ack { .. }
        )
    }

    fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MpdError::Io(_) | MpdError::Timeout(_) | MpdError::Protocol(_)
        )
    }

    fn parse_ack(line: &str) -> Self {
        // ACK [50@0] {play} No such song
        let rest = line.trim_start_matches("ACK").trim_start();
        let parsed = (|| {
            let rest = rest.strip_prefix('[')?;
            let (codes, rest) = rest.split_once(']')?;
            let (code, index) = codes.split_once('@')?;
            let rest = rest.trim_start().strip_prefix('{')?;
            let (command, message) = rest.split_once('}')?;
            Some(MpdError::Ack {
                code: code.parse().ok()?,
                index: index.parse().ok()?,
                command: command.to_string(),
                message: message.trim().to_string(),
            })
        })();
        parsed.unwrap_or_else(|| MpdError::Protocol(format!("malformed ACK: {}", line)))
    }
}

/// Key/value pairs returned by one command, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MpdResponse {
    pub pairs: Vec<(String, String)>,
}

impl MpdResponse {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// JSON rendering.
    ///
    /// - no pairs: `null`
    /// - one key repeated (`commands`, `listplaylists`): array of values
    /// - unique keys (`status`, `currentsong`): object
    /// - otherwise an array of objects, a new one starting whenever the
    ///   first key reappears (`playlistinfo`)
    pub fn to_json(&self) -> Value {
        let Some((first_key, _)) = self.pairs.first() else {
            return Value::Null;
        };

        if self.pairs.len() > 1 && self.pairs.iter().all(|(k, _)| k == first_key) {
            return Value::Array(
                self.pairs
                    .iter()
                    .map(|(_, v)| Value::String(v.clone()))
                    .collect(),
            );
        }

        let mut seen = HashSet::new();
        if self.pairs.iter().all(|(k, _)| seen.insert(k.as_str())) {
            return Value::Object(
                self.pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            );
        }

        let mut records = Vec::new();
        let mut current = Map::new();
        for (k, v) in &self.pairs {
            if k == first_key && !current.is_empty() {
                records.push(Value::Object(std::mem::take(&mut current)));
            }
            current.insert(k.clone(), Value::String(v.clone()));
        }
        if !current.is_empty() {
            records.push(Value::Object(current));
        }
        Value::Array(records)
    }
}

/// Quote one argument for the command line.
fn quote_arg(arg: &str) -> Result<String, MpdError> {
    if arg.contains('\n') || arg.contains('\r') {
        return Err(MpdError::InvalidArgument(
            "arguments must not contain line breaks".to_string(),
        ));
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Ok(quoted)
}

fn check_command_name(name: &str) -> Result<(), MpdError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MpdError::UnknownCommand(name.to_string()))
    }
}

/// Build the wire line for `name` with `args`.
pub fn format_command(name: &str, args: &[&str]) -> Result<String, MpdError> {
    check_command_name(name)?;
    let mut line = name.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg)?);
    }
    line.push('\n');
    Ok(line)
}

struct Connection {
    stream: BufStream<TcpStream>,
    version: String,
    commands: HashSet<String>,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, MpdError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MpdError::Connect {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        let mut stream = BufStream::new(stream);

        let mut greeting = String::new();
        stream.read_line(&mut greeting).await?;
        let greeting = greeting.trim_end();
        let version = greeting
            .strip_prefix(GREETING_PREFIX)
            .ok_or_else(|| MpdError::Greeting(greeting.to_string()))?
            .to_string();

        let mut conn = Self {
            stream,
            version,
            commands: HashSet::new(),
        };
        let available = conn.roundtrip("commands\n").await?;
        conn.commands = available
            .pairs
            .into_iter()
            .filter(|(k, _)| k == "command")
            .map(|(_, v)| v)
            .collect();
        Ok(conn)
    }

    async fn roundtrip(&mut self, line: &str) -> Result<MpdResponse, MpdError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;

        let mut response = MpdResponse::default();
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.stream.read_line(&mut buf).await? == 0 {
                return Err(MpdError::Protocol("connection closed mid-response".to_string()));
            }
            let line = buf.trim_end_matches(['\r', '\n']);
            if line == "OK" {
                return Ok(response);
            }
            if line.starts_with("ACK") {
                return Err(MpdError::parse_ack(line));
            }
            match line.split_once(": ") {
                Some((key, value)) => response.pairs.push((key.to_string(), value.to_string())),
                None => {
                    return Err(MpdError::Protocol(format!("unexpected line '{}'", line)));
                }
            }
        }
    }
}

pub struct MpdClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl MpdClient {
    pub fn new(config: &MpdConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            timeout: config.timeout(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, MpdError>>,
    ) -> Result<T, MpdError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| MpdError::Timeout(self.timeout))?
    }

    /// Ping an existing connection, reconnecting if it is gone.
    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Connection>,
    ) -> Result<&'a mut Connection, MpdError> {
        if let Some(conn) = slot.as_mut() {
            match self.deadline(conn.roundtrip("ping\n")).await {
                Ok(_) => {}
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "MPD connection lost, reconnecting");
                    *slot = None;
                }
            }
        }

        if slot.is_none() {
            let conn = self.deadline(Connection::open(&self.addr)).await?;
            info!(addr = %self.addr, version = %conn.version, commands = conn.commands.len(), "Connected to MPD");
            *slot = Some(conn);
        }

        slot.as_mut()
            .ok_or_else(|| MpdError::Protocol("no connection".to_string()))
    }

    /// Run one command.
    pub async fn command(&self, name: &str, args: &[&str]) -> Result<MpdResponse, MpdError> {
        let line = format_command(name, args)?;

        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        if !conn.commands.contains(name) {
            return Err(MpdError::UnknownCommand(name.to_string()));
        }

        let result = self.deadline(conn.roundtrip(&line)).await;
        if let Err(e) = &result {
            if e.is_connection_error() {
                warn!(addr = %self.addr, command = %name, error = %e, "MPD command failed, dropping connection");
                *slot = None;
            }
        }
        result
    }

    /// Server protocol version, connecting if needed.
    pub async fn version(&self) -> Result<String, MpdError> {
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        Ok(conn.version.clone())
    }

    /// Commands the daemon accepts, sorted.
    pub async fn commands(&self) -> Result<Vec<String>, MpdError> {
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        let mut commands: Vec<_> = conn.commands.iter().cloned().collect();
        commands.sort();
        Ok(commands)
    }
}

impl std::fmt::Debug for MpdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpdClient")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish()
    }
}
