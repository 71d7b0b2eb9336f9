//! TCP Server for KeelDB
//!
//! A line-oriented protocol: each line is either a SQL text or a dot
//! command (`.mode json|table`, `.tables`, `.quit`). Every connection gets
//! its own [`Session`], so BEGIN ... COMMIT spans lines of one connection.

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::database::Database;
use crate::error::Result;
use crate::executor::QueryResult;
use crate::session::Session;
use crate::storage::Value;

/// Default server port
pub const DEFAULT_PORT: u16 = 7171;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Settings of the database the server opens
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connections: 100,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host address
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection limit
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the engine configuration
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Get the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// KeelDB TCP Server
pub struct Server {
    config: ServerConfig,
    db: Database,
}

impl Server {
    /// Open the database described by `config.engine`
    pub fn new(config: ServerConfig) -> Result<Self> {
        let db = Database::open(config.engine.clone())?;
        Ok(Self { config, db })
    }

    /// Serve an existing database
    pub fn with_database(config: ServerConfig, db: Database) -> Self {
        Self { config, db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Accept connections until the task is cancelled
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        info!(address = %self.config.bind_address(), "KeelDB server listening");
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                warn!(%peer, "Connection limit reached; refusing client");
                let mut stream = stream;
                let _ = stream.write_all(b"Too many connections\n").await;
                continue;
            };
            let session = self.db.session();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, session).await {
                    error!(%peer, error = %e, "Connection error");
                }
                drop(permit);
            });
        }
    }
}

/// Output format for query results
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Handle a client connection
async fn handle_connection(stream: TcpStream, session: Session) -> Result<()> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(%peer, "Client connected");

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut session = Some(session);
    let mut format = OutputFormat::Table;

    writer
        .write_all(b"KeelDB Server v0.1.0\nReady for queries.\n")
        .await?;

    while let Some(line) = lines.next_line().await? {
        let query = line.trim().to_string();
        if query.is_empty() {
            continue;
        }

        let response = if query.starts_with('.') {
            match query.as_str() {
                ".quit" | ".exit" => {
                    writer.write_all(b"Goodbye!\n").await?;
                    break;
                }
                ".mode json" => {
                    format = OutputFormat::Json;
                    "Output mode set to JSON\n".to_string()
                }
                ".mode table" => {
                    format = OutputFormat::Table;
                    "Output mode set to Table\n".to_string()
                }
                ".tables" => {
                    let tables = session
                        .as_ref()
                        .map(|s| s.database().catalog().list_tables())
                        .unwrap_or_default();
                    format_tables(&tables)
                }
                _ => format!("Unknown command: {}\n", query),
            }
        } else {
            let Some(mut current) = session.take() else {
                break;
            };
            // Statements may block on row locks; keep them off the reactor
            let (current, result) = tokio::task::spawn_blocking(move || {
                let result = current.execute(&query);
                (current, result)
            })
            .await
            .map_err(|e| crate::error::Error::Internal(format!("statement task failed: {}", e)))?;
            session = Some(current);
            match result {
                Ok(result) => format_result(&result, format),
                Err(e) => format_error(&e, format),
            }
        };
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
    }

    info!(%peer, "Client disconnected");
    Ok(())
}

fn format_tables(tables: &[String]) -> String {
    if tables.is_empty() {
        return "No tables found.\n".to_string();
    }
    format!(
        "Tables:\n{}\n",
        tables
            .iter()
            .map(|t| format!("  {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

pub fn format_error(e: &crate::error::Error, format: OutputFormat) -> String {
    debug!(error = %e, "Statement failed");
    match format {
        OutputFormat::Json => {
            json!({
                "status": "error",
                "kind": e.kind().to_string(),
                "retryable": e.is_retryable(),
                "message": e.to_string(),
            })
            .to_string()
                + "\n"
        }
        OutputFormat::Table => format!("Error: {}\n", e),
    }
}

/// JSON rendering of a value: numbers and booleans natively, exact
/// decimals and temporal values as strings
fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => json!(b),
        Value::Integer(i) => json!(i),
        Value::Float(f) => json!(f),
        other => json!(other.to_string()),
    }
}

/// Format query result for sending to client
pub fn format_result(result: &QueryResult, format: OutputFormat) -> String {
    if let Some(ref msg) = result.message {
        // If JSON mode, wrap message in JSON object
        if format == OutputFormat::Json {
            return json!({
                "status": "success",
                "message": msg,
                "affected_rows": result.affected_rows
            })
            .to_string()
                + "\n";
        }
        return format!("{}\n", msg);
    }

    if format == OutputFormat::Json {
        let rows: Vec<serde_json::Value> = result
            .rows
            .iter()
            .map(|row| serde_json::Value::Array(row.values().iter().map(json_value).collect()))
            .collect();
        return json!({
            "status": "success",
            "columns": result.columns,
            "rows": rows,
        })
        .to_string()
            + "\n";
    }

    if result.columns.is_empty() {
        return "OK\n".to_string();
    }

    // Table Format (Default)
    let mut output = String::new();

    // Calculate column widths
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.len()).collect();
    for row in &result.rows {
        for (i, value) in row.values().iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(value.to_string().len());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<String>>()
        .join("+");
    output.push_str(&format!("+{}+\n", separator));

    let header: String = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<String>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&format!("+{}+\n", separator));

    for row in &result.rows {
        let row_str: String = row
            .values()
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v.to_string(), width = *w))
            .collect::<Vec<String>>()
            .join("|");
        output.push_str(&format!("|{}|\n", row_str));
    }

    if !result.rows.is_empty() {
        output.push_str(&format!("+{}+\n", separator));
    }

    output.push_str(&format!("{} row(s) returned\n", result.rows.len()));
    output
}
