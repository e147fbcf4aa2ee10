//! A running function: its extracted code, the `bootstrap` process and the
//! [Runtime API](https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html) it polls for invocations.

use crate::handlers::{full, ResponseBody};
use crate::model::FunctionConfiguration;
use crate::Error;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(crate) mod invocation_error;
pub(crate) mod invocation_response;
pub(crate) mod next_invocation;

/// Linux returns ETXTBSY if another thread forked while the file was still open for writing.
const TEXT_FILE_BUSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

/// What came back for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InvocationOutcome {
    /// The body the function posted to `/response`
    Response(Bytes),
    /// The body the function posted to `/error`, or a generated one if the runtime died
    FunctionError(Bytes),
    TimedOut,
}

/// An invocation waiting in the queue for `/invocation/next`.
pub(crate) struct PendingInvocation {
    pub request_id: String,
    pub payload: Bytes,
    /// Unix epoch, milliseconds
    pub deadline_ms: i64,
    pub reply: oneshot::Sender<InvocationOutcome>,
}

/// The state shared by the Runtime API handlers of one function instance.
pub(crate) struct RuntimeApi {
    pub function_arn: String,
    /// Invocations are handed out one at a time, in order.
    pub queue: Mutex<mpsc::Receiver<PendingInvocation>>,
    /// Request ID → where the outcome goes. Entries are added by `/invocation/next`.
    pub in_flight: std::sync::Mutex<HashMap<String, oneshot::Sender<InvocationOutcome>>>,
    /// Whatever the function posted to `/init/error`
    pub init_error: std::sync::Mutex<Option<Bytes>>,
}

impl RuntimeApi {
    /// Delivers the outcome to the waiting invoker. Returns false for unknown request IDs.
    pub fn complete(&self, request_id: &str, outcome: InvocationOutcome) -> bool {
        let reply = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);

        match reply {
            Some(reply) => {
                // the invoker may have timed out already
                let _ = reply.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// One `bootstrap` process with its Runtime API listener.
/// Dropping it kills the process, stops the listener and removes the extracted code.
pub(crate) struct RuntimeInstance {
    function_name: String,
    invocations: mpsc::Sender<PendingInvocation>,
    /// Set to the exit description once the process is gone
    exit: watch::Receiver<Option<String>>,
    api: Arc<RuntimeApi>,
    runtime_api_addr: SocketAddr,
    timeout: Duration,
    server: JoinHandle<()>,
    /// Tells the supervisor to kill the process
    kill: Option<oneshot::Sender<()>>,
    task_dir: PathBuf,
}

impl RuntimeInstance {
    /// Extracts the code, starts the Runtime API on a free local port and launches `bootstrap`.
    pub async fn start(
        configuration: &FunctionConfiguration,
        code: &Bytes,
        work_dir: &Path,
        region: &str,
    ) -> Result<Self, Error> {
        let task_dir = work_dir.join(format!(
            "{}-{}",
            configuration.function_name,
            uuid::Uuid::new_v4().simple()
        ));
        extract_code(code.clone(), task_dir.clone()).await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let runtime_api_addr = listener.local_addr()?;

        let (invocations, queue) = mpsc::channel(16);
        let api = Arc::new(RuntimeApi {
            function_arn: configuration.function_arn.clone(),
            queue: Mutex::new(queue),
            in_flight: std::sync::Mutex::new(HashMap::new()),
            init_error: std::sync::Mutex::new(None),
        });

        let server = tokio::spawn(serve_runtime_api(listener, api.clone()));

        let mut command = Command::new(task_dir.join("bootstrap"));
        command
            .current_dir(&task_dir)
            .env_clear()
            .envs(function_env(configuration, &task_dir, region, &runtime_api_addr.to_string()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match spawn_with_retry(&mut command).await {
            Ok(v) => v,
            Err(e) => {
                server.abort();
                remove_task_dir(&task_dir);
                return Err(format!("Failed to start bootstrap of {}: {e}", configuration.function_name).into());
            }
        };

        info!(
            "Started {} as pid {:?}, Runtime API on {runtime_api_addr}",
            configuration.function_name,
            child.id()
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(configuration.function_name.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(configuration.function_name.clone(), stderr));
        }

        let (exit_tx, exit) = watch::channel(None);
        let (kill, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(child, configuration.function_name.clone(), exit_tx, kill_rx));

        Ok(Self {
            function_name: configuration.function_name.clone(),
            invocations,
            exit,
            api,
            runtime_api_addr,
            timeout: Duration::from_secs(u64::from(configuration.timeout)),
            server,
            kill: Some(kill),
            task_dir,
        })
    }

    /// What `bootstrap` gets in AWS_LAMBDA_RUNTIME_API.
    pub fn runtime_api_addr(&self) -> SocketAddr {
        self.runtime_api_addr
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Queues the payload and waits for the function to respond, fail, exit or time out.
    pub async fn invoke(&self, request_id: &str, payload: Bytes) -> InvocationOutcome {
        let (reply, outcome) = oneshot::channel();
        let deadline_ms = chrono::Utc::now().timestamp_millis() + self.timeout.as_millis() as i64;

        let pending = PendingInvocation {
            request_id: request_id.to_owned(),
            payload,
            deadline_ms,
            reply,
        };

        if self.invocations.send(pending).await.is_err() {
            return self.exited_outcome(request_id, "the Runtime API is gone");
        }

        let mut exit = self.exit.clone();

        tokio::select! {
            outcome = outcome => match outcome {
                Ok(v) => v,
                Err(_) => self.exited_outcome(request_id, "the invocation was dropped"),
            },
            _ = tokio::time::sleep(self.timeout) => {
                // a late response for this ID gets a 400
                self.api.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(request_id);
                warn!("{} timed out after {:?}, request ID {request_id}", self.function_name, self.timeout);
                InvocationOutcome::TimedOut
            },
            exited = exit.wait_for(Option::is_some) => {
                let reason = match exited {
                    Ok(v) => (*v).clone().unwrap_or_default(),
                    Err(_) => "unknown".to_owned(),
                };
                self.exited_outcome(request_id, &reason)
            },
        }
    }

    /// The init error the function reported, if any, or a generic Runtime.ExitError.
    fn exited_outcome(&self, request_id: &str, reason: &str) -> InvocationOutcome {
        let init_error = self.api.init_error.lock().unwrap_or_else(PoisonError::into_inner).clone();

        let body = init_error.unwrap_or_else(|| {
            Bytes::from(
                serde_json::json!({
                    "errorType": "Runtime.ExitError",
                    "errorMessage": format!("RequestId: {request_id} Error: Runtime exited: {reason}"),
                })
                .to_string(),
            )
        });

        InvocationOutcome::FunctionError(body)
    }
}

impl Drop for RuntimeInstance {
    fn drop(&mut self) {
        if let Some(kill) = self.kill.take() {
            // the supervisor is gone if the process has exited already
            let _ = kill.send(());
        }
        self.server.abort();
        remove_task_dir(&self.task_dir);
        debug!("Stopped {}, Runtime API on {}", self.function_name, self.runtime_api_addr);
    }
}

/// Environment of `bootstrap`. Only these variables are set, plus the user ones.
fn function_env(
    configuration: &FunctionConfiguration,
    task_dir: &Path,
    region: &str,
    runtime_api: &str,
) -> HashMap<String, String> {
    let task_root = task_dir.to_string_lossy().into_owned();
    let lib_dir = task_dir.join("lib").to_string_lossy().into_owned();

    let mut env = HashMap::from([
        ("AWS_LAMBDA_RUNTIME_API".to_owned(), runtime_api.to_owned()),
        ("AWS_LAMBDA_FUNCTION_NAME".to_owned(), configuration.function_name.clone()),
        ("AWS_LAMBDA_FUNCTION_VERSION".to_owned(), "$LATEST".to_owned()),
        (
            "AWS_LAMBDA_FUNCTION_MEMORY_SIZE".to_owned(),
            configuration.memory_size.to_string(),
        ),
        (
            "AWS_LAMBDA_LOG_GROUP_NAME".to_owned(),
            format!("/aws/lambda/{}", configuration.function_name),
        ),
        (
            "AWS_LAMBDA_LOG_STREAM_NAME".to_owned(),
            format!(
                "{}/[$LATEST]{}",
                chrono::Utc::now().format("%Y/%m/%d"),
                uuid::Uuid::new_v4().simple()
            ),
        ),
        ("AWS_REGION".to_owned(), region.to_owned()),
        ("AWS_DEFAULT_REGION".to_owned(), region.to_owned()),
        ("AWS_EXECUTION_ENV".to_owned(), format!("AWS_Lambda_{}", configuration.runtime)),
        ("_HANDLER".to_owned(), configuration.handler.clone()),
        ("LAMBDA_TASK_ROOT".to_owned(), task_root.clone()),
        ("LD_LIBRARY_PATH".to_owned(), format!("{lib_dir}:{task_root}")),
    ]);

    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_owned(), path);
    }

    if let Some(environment) = &configuration.environment {
        env.extend(environment.variables.clone());
    }

    env
}

/// Unzips the code into `task_dir` and makes `bootstrap` executable.
async fn extract_code(code: Bytes, task_dir: PathBuf) -> Result<(), Error> {
    tokio::task::spawn_blocking(move || -> Result<(), Error> {
        std::fs::create_dir_all(&task_dir)?;
        let mut archive = zip::ZipArchive::new(Cursor::new(code))?;
        archive.extract(&task_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(task_dir.join("bootstrap"), std::fs::Permissions::from_mode(0o755))?;
        }

        debug!("Extracted {} files into {}", archive.len(), task_dir.display());
        Ok(())
    })
    .await?
}

async fn spawn_with_retry(command: &mut Command) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_ATTEMPTS => {
                debug!("bootstrap is busy, attempt {attempt}");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            result => return result,
        }
    }
}

/// Waits for the process to exit and publishes how it exited.
/// A kill signal, or the instance dropping the sender, kills the process and reaps it.
async fn supervise(
    mut child: Child,
    function_name: String,
    exit_tx: watch::Sender<Option<String>>,
    kill: oneshot::Receiver<()>,
) {
    let reason = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => status.to_string(),
            Err(e) => format!("failed to wait for the process: {e}"),
        },
        _ = kill => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {function_name}: {e}");
            }
            debug!("{function_name} killed");
            let _ = exit_tx.send(Some("killed".to_owned()));
            return;
        },
    };
    warn!("{function_name} exited: {reason}");
    let _ = exit_tx.send(Some(reason));
}

/// Logs the function's output line by line, the way CloudWatch would show it.
async fn forward_output(function_name: String, output: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(output).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!("[{function_name}] {line}"),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read the output of {function_name}: {e}");
                break;
            }
        }
    }
}

fn remove_task_dir(task_dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(task_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", task_dir.display());
        }
    }
}

async fn serve_runtime_api(listener: TcpListener, api: Arc<RuntimeApi>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to accept a Runtime API connection: {e}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let api = api.clone();

        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(move |req| runtime_api_handler(req, api.clone())))
                .await
            {
                error!("Error serving Runtime API connection: {:?}", err);
            }
        });
    }
}

/// Routes `/2018-06-01/runtime/...` requests from `bootstrap`.
async fn runtime_api_handler(
    req: Request<Incoming>,
    api: Arc<RuntimeApi>,
) -> Result<Response<ResponseBody>, hyper::Error> {
    debug!("Runtime API: {} {}", req.method(), req.uri());

    let path = req.uri().path();

    if req.method() == Method::GET && path.ends_with("/invocation/next") {
        return Ok(next_invocation::handler(api).await);
    }

    if req.method() == Method::POST {
        if path.ends_with("/init/error") {
            return Ok(invocation_error::init_error(req, api).await);
        }
        if path.ends_with("/response") {
            return Ok(invocation_response::handler(req, api).await);
        }
        if path.ends_with("/error") {
            return Ok(invocation_error::handler(req, api).await);
        }
    }

    warn!("Unknown Runtime API request: {} {}", req.method(), req.uri());
    Ok(runtime_api_error(StatusCode::NOT_FOUND, "UnknownRequest", "Unknown Runtime API request"))
}

/// The error document of the Runtime API.
pub(crate) fn runtime_api_error(status: StatusCode, error_type: &str, message: &str) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full(
            serde_json::json!({ "errorType": error_type, "errorMessage": message }).to_string(),
        ))
        .expect("Failed to create a response")
}
