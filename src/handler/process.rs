//! Subprocess handler: runs an endpoint's code as a child process.
//!
//! The runtime command is spawned in the handler's working directory (never
//! through a shell). The invocation payload `{"event": ..., "context": ...}` is
//! written to stdin as one JSON document; the last non-empty stdout line must
//! be the handler result JSON. Earlier stdout lines and stderr are logged.
//!
//! [`PYTHON_BOOTSTRAP`] adapts an unmodified `lambda_handler(event, context)`
//! module to that protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::context::InvocationContext;
use crate::error::SpaError;
use crate::event::InvocationEvent;
use crate::handler::Handler;
use crate::response::HandlerResult;

/// Dotted module path the bootstrap imports, e.g. `src.lambdas.ping.lambda_function`.
pub const HANDLER_MODULE_ENV: &str = "SPA_HANDLER_MODULE";
/// Attribute of the module called with `(event, context)`.
pub const HANDLER_FUNCTION_ENV: &str = "SPA_HANDLER_FUNCTION";
/// Name of the endpoint being invoked.
pub const ENDPOINT_ENV: &str = "SPA_ENDPOINT";

/// Python program run with `-c` from the project root.
///
/// The context arrives as attributes (`context.aws_request_id`), and the
/// result is printed on its own line after anything the handler printed.
pub const PYTHON_BOOTSTRAP: &str = r#"import importlib, json, os, sys, types
sys.path.insert(0, os.getcwd())
payload = json.load(sys.stdin)
module = importlib.import_module(os.environ["SPA_HANDLER_MODULE"])
handler = getattr(module, os.environ.get("SPA_HANDLER_FUNCTION", "lambda_handler"))
result = handler(payload["event"], types.SimpleNamespace(**payload["context"]))
sys.stdout.write("\n" + json.dumps({} if result is None else result, default=str) + "\n")
sys.stdout.flush()
"#;

/// Handler backed by a command run per invocation.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    /// Working directory: the project root for the Python bootstrap, the
    /// endpoint directory for a custom command.
    pub dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// The child is killed once this elapses.
    pub timeout: Duration,
}

#[derive(Serialize)]
struct InvocationPayload<'a> {
    event: &'a InvocationEvent,
    context: &'a InvocationContext,
}

impl ProcessHandler {
    /// Build from a runtime command line (`program arg...`).
    pub fn new(dir: PathBuf, command_line: &[String], timeout: Duration) -> crate::Result<Self> {
        let (command, args) = command_line.split_first().ok_or_else(|| {
            SpaError::InvalidConfig(
                "runtime.command".to_string(),
                "must name an executable".to_string(),
            )
        })?;
        Ok(Self {
            dir,
            command: command.clone(),
            args: args.to_vec(),
            env: HashMap::new(),
            timeout,
        })
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    async fn run(
        self,
        name: String,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> crate::Result<HandlerResult> {
        let start = Instant::now();
        let payload = serde_json::to_vec(&InvocationPayload {
            event: &event,
            context: &context,
        })
        .map_err(|e| SpaError::HandlerFailed(name.clone(), format!("payload encoding: {}", e)))?;

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SpaError::HandlerFailed(
                name.clone(),
                format!("failed to spawn '{}': {}", self.command, e),
            )
        })?;

        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Feed stdin and drain both output pipes together so neither side can
        // block on a full pipe.
        let output = tokio::select! {
            result = async {
                let write = async {
                    if let Some(mut stdin) = stdin_pipe {
                        // A child that never reads stdin closes it early; that is not an error.
                        let _ = stdin.write_all(&payload).await;
                        let _ = stdin.shutdown().await;
                    }
                };
                let read_out = async {
                    let mut buf = Vec::new();
                    if let Some(mut out) = stdout_pipe {
                        let _ = out.read_to_end(&mut buf).await;
                    }
                    buf
                };
                let read_err = async {
                    let mut buf = Vec::new();
                    if let Some(mut err) = stderr_pipe {
                        let _ = err.read_to_end(&mut buf).await;
                    }
                    buf
                };
                let ((), stdout, stderr) = tokio::join!(write, read_out, read_err);
                let status = child.wait().await.map_err(|e| {
                    SpaError::HandlerFailed(name.clone(), format!("process wait error: {}", e))
                })?;
                Ok::<std::process::Output, SpaError>(std::process::Output { status, stdout, stderr })
            } => result?,
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.kill().await;
                return Err(SpaError::HandlerTimeout(name));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        tracing::debug!(
            endpoint = %name,
            command = %self.command,
            exit_code = %exit_code,
            duration_ms = %start.elapsed().as_millis(),
            "handler process finished"
        );
        if !stderr.trim().is_empty() {
            tracing::debug!(endpoint = %name, stderr = %stderr.trim(), "handler stderr");
        }

        if !output.status.success() {
            let reason = if stderr.trim().is_empty() {
                format!("exit code {}", exit_code)
            } else {
                format!("exit code {}: {}", exit_code, stderr.trim())
            };
            return Err(SpaError::HandlerFailed(name, reason));
        }

        let mut lines = stdout.lines().filter(|l| !l.trim().is_empty()).collect::<Vec<_>>();
        let last = lines.pop().ok_or_else(|| {
            SpaError::HandlerFailed(name.clone(), "handler produced no output".to_string())
        })?;
        for line in lines {
            tracing::info!(endpoint = %name, "{}", line);
        }

        serde_json::from_str::<HandlerResult>(last.trim()).map_err(|e| {
            SpaError::HandlerFailed(name, format!("invalid handler result: {}", e))
        })
    }
}

impl Handler for ProcessHandler {
    fn invoke(
        &self,
        name: &str,
        event: InvocationEvent,
        context: InvocationContext,
    ) -> BoxFuture<'static, crate::Result<HandlerResult>> {
        self.clone().run(name.to_string(), event, context).boxed()
    }
}
