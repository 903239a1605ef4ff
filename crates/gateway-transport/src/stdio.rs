//! Stdio MCP transport (§4.8.3): spawns the real MCP server as a child
//! process and runs three cooperating pumps between the gateway's own
//! stdio and the child's.

use crate::core::{Interceptor, RequestOutcome};
use gateway_core::auth::Credentials;
use gateway_core::error::GatewayError;
use gateway_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use gateway_session::Session;
use futures::{SinkExt, StreamExt};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{error, trace, warn};

type StdoutWriter<W> = FramedWrite<W, LinesCodec>;

/// Convenience entry point for the CLI: bridges against the process's real
/// stdout/stderr.
pub async fn run_default(
    exec: &[String],
    interceptor: Arc<Interceptor>,
    session: Arc<Session>,
    credentials: Credentials,
    header_policy: Option<String>,
) -> Result<(), GatewayError> {
    run(
        exec,
        interceptor,
        session,
        credentials,
        header_policy,
        tokio::io::stdout(),
        tokio::io::stderr(),
    )
    .await
}

/// Runs the stdio bridge until the child exits or a pump hits an
/// unrecoverable I/O error. The upstream server is never restarted; a
/// bridge is scoped to exactly one MCP session.
pub async fn run<W>(
    exec: &[String],
    interceptor: Arc<Interceptor>,
    session: Arc<Session>,
    credentials: Credentials,
    header_policy: Option<String>,
    gateway_stdout: W,
    stderr_sink: impl AsyncWrite + Unpin + Send + 'static,
) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Some((program, args)) = exec.split_first() else {
        return Err(GatewayError::UpstreamTransport("empty --exec command".to_string()));
    };

    let mut child: Child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GatewayError::UpstreamTransport(format!("failed to spawn MCP server: {e}")))?;

    let child_stdin = child.stdin.take().expect("piped stdin");
    let child_stdout = child.stdout.take().expect("piped stdout");
    let child_stderr = child.stderr.take().expect("piped stderr");

    let gateway_out = Arc::new(Mutex::new(FramedWrite::new(gateway_stdout, LinesCodec::new())));
    let gateway_in = FramedRead::new(BufReader::new(tokio::io::stdin()), LinesCodec::new());
    let child_in = FramedWrite::new(child_stdin, LinesCodec::new());
    let child_out = FramedRead::new(BufReader::new(child_stdout), LinesCodec::new());

    let stdin_pump = tokio::spawn(run_stdin_pump(
        gateway_in,
        child_in,
        gateway_out.clone(),
        interceptor.clone(),
        session.clone(),
        credentials.clone(),
        header_policy.clone(),
    ));
    let stdout_pump = tokio::spawn(run_stdout_pump(
        child_out,
        gateway_out,
        interceptor,
        session,
        credentials,
        header_policy,
    ));
    let stderr_pump = tokio::spawn(run_stderr_pump(child_stderr, stderr_sink));

    let status = child
        .wait()
        .await
        .map_err(|e| GatewayError::UpstreamTransport(format!("waiting on MCP server failed: {e}")))?;
    trace!(?status, "MCP server child process exited");

    stdin_pump.abort();
    stdout_pump.abort();
    stderr_pump.abort();
    Ok(())
}

/// Reads one JSON-framed client request at a time; blocked tool calls get
/// their error written straight back to the gateway's own stdout without
/// ever reaching the child.
async fn run_stdin_pump<W: AsyncWrite + Unpin + Send>(
    mut gateway_in: FramedRead<BufReader<tokio::io::Stdin>, LinesCodec>,
    mut child_in: FramedWrite<tokio::process::ChildStdin, LinesCodec>,
    gateway_out: Arc<Mutex<StdoutWriter<W>>>,
    interceptor: Arc<Interceptor>,
    session: Arc<Session>,
    credentials: Credentials,
    header_policy: Option<String>,
) {
    while let Some(line) = gateway_in.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to read from gateway stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, excerpt = %bounded_excerpt(&line), "malformed JSON-RPC request from client; skipping");
                continue;
            }
        };

        match interceptor
            .process_outgoing_request(&session, request, header_policy.as_deref(), &credentials)
            .await
        {
            RequestOutcome::Forward(request) => {
                let payload = match serde_json::to_string(&request) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = %e, "failed to serialize outgoing request");
                        continue;
                    }
                };
                if let Err(e) = child_in.send(payload).await {
                    error!(error = %e, "failed to write to child stdin");
                    break;
                }
            }
            RequestOutcome::Blocked(response) => {
                write_response(&gateway_out, &response).await;
            }
        }
    }
}

/// Reads framed JSON from the child's stdout, runs the response hook, and
/// writes the (possibly rewritten) payload back to the gateway's stdout.
async fn run_stdout_pump<W: AsyncWrite + Unpin + Send>(
    mut child_out: FramedRead<BufReader<tokio::process::ChildStdout>, LinesCodec>,
    gateway_out: Arc<Mutex<StdoutWriter<W>>>,
    interceptor: Arc<Interceptor>,
    session: Arc<Session>,
    credentials: Credentials,
    header_policy: Option<String>,
) {
    while let Some(line) = child_out.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to read from child stdout");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response: JsonRpcResponse = match serde_json::from_str(&line) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, excerpt = %bounded_excerpt(&line), "malformed JSON-RPC response from MCP server; skipping");
                continue;
            }
        };

        let outcome = interceptor
            .process_incoming_response(&session, response, header_policy.as_deref(), &credentials)
            .await;
        write_response(&gateway_out, &outcome.into_response()).await;
    }
}

async fn write_response<W: AsyncWrite + Unpin + Send>(
    gateway_out: &Arc<Mutex<StdoutWriter<W>>>,
    response: &JsonRpcResponse,
) {
    let payload = match serde_json::to_string(response) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to serialize response to client");
            return;
        }
    };
    let mut writer = gateway_out.lock().await;
    if let Err(e) = writer.send(payload).await {
        error!(error = %e, "failed to write response to gateway stdout");
    }
}

/// Copies the child's stderr unchanged into the gateway's own log sink, per
/// spec: stderr carries the upstream server's own logging and must not be
/// interleaved with the JSON-RPC frames on stdout.
async fn run_stderr_pump(child_stderr: tokio::process::ChildStderr, mut sink: impl AsyncWrite + Unpin) {
    if let Err(e) = tokio::io::copy(&mut BufReader::new(child_stderr), &mut sink).await {
        error!(error = %e, "stderr pump terminated with an I/O error");
    }
}

/// Bounded-length excerpt for log lines, so a malformed multi-megabyte frame
/// never floods the log file.
fn bounded_excerpt(line: &str) -> String {
    const MAX: usize = 200;
    let truncated: String = line.chars().take(MAX).collect();
    if truncated.len() < line.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
