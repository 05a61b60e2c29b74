//! JSON-RPC client for the Codex app-server.
//!
//! # Protocol
//!
//! The app-server speaks newline-delimited JSON-RPC 2.0 over stdio:
//!
//! ```bash
//! codex -s read-only -a untrusted app-server
//! ```
//!
//! The client sends `initialize`, then the `initialized` notification, then
//! `account/rateLimits/read` and `account/read`. Server notifications and
//! replies to other ids are skipped while waiting for a response.

use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, trace, warn};
use usagebar_fetch::{ProbeContext, ProbeError};

use super::CODEX_BINARY;
use super::error::CodexError;

// ============================================================================
// Constants
// ============================================================================

/// Arguments for app-server mode.
const APP_SERVER_ARGS: &[&str] = &["-s", "read-only", "-a", "untrusted", "app-server"];

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// Client version sent in `initialize`.
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Serialize)]
struct RpcNotification<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    client_info: ClientInfo,
}

#[derive(Debug, Serialize)]
struct ClientInfo {
    name: &'static str,
    version: &'static str,
}

/// Result of `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Server identification, when reported.
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    /// User agent string, reported by newer servers instead of `serverInfo`.
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Server identification.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: Option<String>,
    /// Server version.
    pub version: Option<String>,
}

// ============================================================================
// Rate Limits
// ============================================================================

/// Result of `account/rateLimits/read`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitsResult {
    /// Rate limit data.
    pub rate_limits: RateLimits,
}

/// Rate limit windows and credits.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    /// Session (5-hour) window.
    #[serde(default)]
    pub primary: Option<RateLimitWindow>,
    /// Weekly window.
    #[serde(default)]
    pub secondary: Option<RateLimitWindow>,
    /// Prepaid credits.
    #[serde(default)]
    pub credits: Option<CreditsInfo>,
}

/// One rate limit window.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    /// Percent used (0-100).
    pub used_percent: f64,
    /// Window length in minutes.
    #[serde(default)]
    pub window_duration_mins: Option<u32>,
    /// Reset time, epoch seconds.
    #[serde(default)]
    pub resets_at: Option<i64>,
}

/// Credits as reported by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsInfo {
    /// Whether the account has credits.
    #[serde(default)]
    pub has_credits: Option<bool>,
    /// Whether credits are unlimited.
    #[serde(default)]
    pub unlimited: Option<bool>,
    /// Balance as a string, to keep precision.
    #[serde(default)]
    pub balance: Option<String>,
}

// ============================================================================
// Account
// ============================================================================

/// Result of `account/read`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResult {
    /// The signed-in account, if any.
    #[serde(default)]
    pub account: Option<RpcAccount>,
    /// True when the server needs an OpenAI login.
    #[serde(default)]
    pub requires_openai_auth: Option<bool>,
}

/// Account details.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccount {
    /// `chatgpt` or `apiKey`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Account email.
    #[serde(default)]
    pub email: Option<String>,
    /// ChatGPT plan.
    #[serde(default)]
    pub plan_type: Option<String>,
}

/// Everything one RPC session reads.
#[derive(Debug, Clone)]
pub struct RpcUsage {
    /// Rate limits.
    pub rate_limits: RateLimits,
    /// Account, when `account/read` answered.
    pub account: Option<RpcAccount>,
    /// Server version, when reported.
    pub server_version: Option<String>,
}

// ============================================================================
// RPC Client
// ============================================================================

/// JSON-RPC client over any line-oriented byte stream.
pub struct RpcClient<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
    timeout: Duration,
}

impl<R, W> RpcClient<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a client. Each call waits at most `timeout` for its reply.
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            timeout,
        }
    }

    /// Sends a request and waits for the matching response.
    pub async fn call<P, T>(&mut self, method: &str, params: P) -> Result<T, CodexError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        self.write_line(&serde_json::to_string(&request)?).await?;

        let timeout = self.timeout;
        let result = tokio::time::timeout(timeout, self.read_response(id, method))
            .await
            .map_err(|_| CodexError::Timeout(timeout))??;
        serde_json::from_value(result)
            .map_err(|e| CodexError::Parse(format!("{method}: unexpected response shape: {e}")))
    }

    /// Sends a notification (no response).
    pub async fn notify<P: Serialize>(&mut self, method: &str, params: P) -> Result<(), CodexError> {
        let notification = RpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        };
        self.write_line(&serde_json::to_string(&notification)?).await
    }

    async fn write_line(&mut self, json: &str) -> Result<(), CodexError> {
        trace!(len = json.len(), "Sending RPC message");
        let mut line = String::with_capacity(json.len() + 1);
        line.push_str(json);
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CodexError::RpcUnavailable(format!("write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| CodexError::RpcUnavailable(format!("flush failed: {e}")))
    }

    async fn read_response(&mut self, id: u64, method: &str) -> Result<Value, CodexError> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| CodexError::RpcUnavailable(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(CodexError::RpcUnavailable(format!(
                    "stream closed before {method} replied"
                )));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message: RpcMessage = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(e) => {
                    trace!(error = %e, "Skipping non-JSON line");
                    continue;
                }
            };
            if message.id.as_ref().and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = message.error {
                return Err(classify_rpc_error(method, error));
            }
            return Ok(message.result.unwrap_or(Value::Null));
        }
    }
}

fn classify_rpc_error(method: &str, error: RpcErrorObject) -> CodexError {
    if error.code == METHOD_NOT_FOUND {
        return CodexError::RpcUnavailable(format!("{method} not supported: {}", error.message));
    }
    let lower = error.message.to_lowercase();
    if ["login", "log in", "sign in", "not authenticated", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return CodexError::LoginRequired(error.message);
    }
    CodexError::Rpc {
        code: error.code,
        message: error.message,
    }
}

/// Runs the full read sequence on an open client.
pub async fn read_usage<R, W>(client: &mut RpcClient<R, W>) -> Result<RpcUsage, CodexError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let init: InitializeResult = client
        .call(
            "initialize",
            InitializeParams {
                client_info: ClientInfo {
                    name: "usagebar",
                    version: CLIENT_VERSION,
                },
            },
        )
        .await?;
    client.notify("initialized", serde_json::json!({})).await?;

    let server_version = init
        .server_info
        .and_then(|info| info.version)
        .or_else(|| init.user_agent.as_deref().and_then(version_from_user_agent));

    let limits: RateLimitsResult = client
        .call("account/rateLimits/read", serde_json::json!({}))
        .await?;

    let account = match client.call::<_, AccountResult>("account/read", serde_json::json!({})).await {
        Ok(result) => {
            if result.account.is_none() && result.requires_openai_auth == Some(true) {
                return Err(CodexError::LoginRequired("run `codex login`".to_string()));
            }
            result.account
        }
        Err(CodexError::Rpc { code, message }) => {
            debug!(code, message = %message, "account/read failed, continuing without identity");
            None
        }
        Err(CodexError::RpcUnavailable(detail)) => {
            debug!(detail = %detail, "account/read unavailable");
            None
        }
        Err(e) => return Err(e),
    };

    Ok(RpcUsage {
        rate_limits: limits.rate_limits,
        account,
        server_version,
    })
}

/// `codex_cli_rs/0.46.0 (Mac OS 15.0; arm64)` → `0.46.0`.
fn version_from_user_agent(agent: &str) -> Option<String> {
    let (_, rest) = agent.split_once('/')?;
    let version = rest.split_whitespace().next()?;
    Some(version.to_string())
}

// ============================================================================
// App Server Process
// ============================================================================

/// A running `codex app-server` child and its client.
pub struct CodexAppServer {
    child: Child,
    client: RpcClient<BufReader<ChildStdout>, ChildStdin>,
}

impl CodexAppServer {
    /// Spawns the app-server.
    ///
    /// A missing binary is [`ProbeError::NotInstalled`]; any other spawn
    /// failure is [`CodexError::RpcUnavailable`].
    #[instrument(skip(ctx))]
    pub fn spawn(ctx: &ProbeContext) -> Result<Self, CodexError> {
        let binary = ctx
            .resolver
            .resolve(CODEX_BINARY)
            .ok_or_else(|| ProbeError::NotInstalled(CODEX_BINARY.to_string()))?;

        debug!(path = %binary.display(), "Spawning Codex app-server");
        let mut child = Command::new(&binary)
            .args(APP_SERVER_ARGS)
            .env("PATH", ctx.resolver.search_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CodexError::RpcUnavailable(format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CodexError::RpcUnavailable("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CodexError::RpcUnavailable("no stdout".to_string()))?;

        Ok(Self {
            child,
            client: RpcClient::new(BufReader::new(stdout), stdin, ctx.timeout()),
        })
    }

    /// Reads usage, then stops the server.
    pub async fn read_usage(mut self) -> Result<RpcUsage, CodexError> {
        let result = read_usage(&mut self.client).await;
        self.shutdown().await;
        result
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "app-server already exited");
        }
        if let Err(e) = self.child.wait().await {
            warn!(error = %e, "Failed to reap app-server");
        }
    }
}

/// Spawns the app-server and reads usage.
pub async fn fetch_rpc(ctx: &ProbeContext) -> Result<RpcUsage, CodexError> {
    CodexAppServer::spawn(ctx)?.read_usage().await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type TestClient = RpcClient<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>;

    /// Starts a fake server answering each request by method name.
    fn fake_server(answer: fn(&str, u64) -> Option<String>) -> TestClient {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (server_read, mut server_write) = tokio::io::split(server_end);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let Some(id) = request["id"].as_u64() else {
                    continue;
                };
                let method = request["method"].as_str().unwrap_or_default().to_string();
                match answer(&method, id) {
                    Some(reply) => {
                        server_write.write_all(reply.as_bytes()).await.unwrap();
                        server_write.write_all(b"\n").await.unwrap();
                    }
                    None => return,
                }
            }
        });

        let (read, write) = tokio::io::split(client_end);
        RpcClient::new(BufReader::new(read), write, Duration::from_secs(2))
    }

    fn happy(method: &str, id: u64) -> Option<String> {
        let result = match method {
            "initialize" => r#"{"userAgent":"codex_cli_rs/0.46.0 (Mac OS 15.0; arm64)"}"#,
            "account/rateLimits/read" => {
                r#"{"rateLimits":{
                    "primary":{"usedPercent":28.5,"windowDurationMins":300,"resetsAt":1735000000},
                    "secondary":{"usedPercent":59,"windowDurationMins":10080,"resetsAt":1735100000},
                    "credits":{"hasCredits":true,"unlimited":false,"balance":"112.45"}}}"#
            }
            "account/read" => {
                r#"{"account":{"type":"chatgpt","email":"dev@example.com","planType":"pro"},"requiresOpenaiAuth":true}"#
            }
            _ => return None,
        };
        let notice = r#"{"jsonrpc":"2.0","method":"codex/event","params":{}}"#;
        Some(format!(
            "{notice}\n{{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{}}}",
            result.replace('\n', "")
        ))
    }

    #[tokio::test]
    async fn test_read_usage() {
        let mut client = fake_server(happy);
        let usage = read_usage(&mut client).await.unwrap();

        let primary = usage.rate_limits.primary.unwrap();
        assert!((primary.used_percent - 28.5).abs() < f64::EPSILON);
        assert_eq!(primary.window_duration_mins, Some(300));
        assert_eq!(usage.rate_limits.credits.unwrap().balance.as_deref(), Some("112.45"));
        assert_eq!(usage.account.unwrap().email.as_deref(), Some("dev@example.com"));
        assert_eq!(usage.server_version.as_deref(), Some("0.46.0"));
    }

    #[tokio::test]
    async fn test_method_not_found_is_unavailable() {
        fn answer(method: &str, id: u64) -> Option<String> {
            if method == "initialize" {
                return Some(format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{}}}}"#));
            }
            Some(format!(
                r#"{{"jsonrpc":"2.0","id":{id},"error":{{"code":-32601,"message":"unknown method"}}}}"#
            ))
        }
        let mut client = fake_server(answer);
        let err = read_usage(&mut client).await.unwrap_err();
        assert!(err.is_rpc_unavailable());
    }

    #[tokio::test]
    async fn test_closed_stream_is_unavailable() {
        let mut client = fake_server(|_, _| None);
        let err = read_usage(&mut client).await.unwrap_err();
        assert!(err.is_rpc_unavailable(), "{err}");
    }

    #[tokio::test]
    async fn test_logged_out_account_is_login_required() {
        fn answer(method: &str, id: u64) -> Option<String> {
            let result = match method {
                "initialize" => "{}",
                "account/rateLimits/read" => r#"{"rateLimits":{}}"#,
                "account/read" => r#"{"account":null,"requiresOpenaiAuth":true}"#,
                _ => return None,
            };
            Some(format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{result}}}"#))
        }
        let mut client = fake_server(answer);
        let err = read_usage(&mut client).await.unwrap_err();
        assert!(matches!(err, CodexError::LoginRequired(_)));
        assert!(!err.is_rpc_unavailable());
    }

    #[test]
    fn test_rpc_error_classification() {
        let err = classify_rpc_error(
            "account/rateLimits/read",
            RpcErrorObject {
                code: -32000,
                message: "Please log in to continue".to_string(),
            },
        );
        assert!(matches!(err, CodexError::LoginRequired(_)));

        let err = classify_rpc_error(
            "account/rateLimits/read",
            RpcErrorObject {
                code: -32000,
                message: "internal".to_string(),
            },
        );
        assert!(matches!(err, CodexError::Rpc { code: -32000, .. }));
    }
}
