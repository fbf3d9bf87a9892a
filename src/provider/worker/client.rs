//! Async NDJSON client for a database worker child process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use super::protocol::{ErrorInfo, RequestEnvelope, ResponseEnvelope};
use crate::provider::{ProviderError, ProviderResult};

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ResponseEnvelope>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops a request's pending entry when its caller stops waiting, whether
/// it got a reply, timed out or was cancelled.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Client for one worker process.
///
/// Each request gets a UUID; a background task reads stdout and routes each
/// response line to the waiting caller. When the worker exits, every pending
/// caller receives a `WORKER_EXITED` error.
pub struct WorkerClient {
    stdin: Arc<AsyncMutex<BufWriter<ChildStdin>>>,
    pending: Pending,
    _child: Child,
    reader_task: tokio::task::JoinHandle<()>,
    timeout: Duration,
}

impl WorkerClient {
    /// Spawn the worker binary with `args`.
    pub async fn spawn<P: AsRef<Path>>(
        worker_path: P,
        args: &[String],
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::Unreachable(format!(
                    "failed to spawn worker {}: {}",
                    worker_path.as_ref().display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Protocol("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Protocol("worker stdout not captured".into()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        Ok(Self {
            stdin: Arc::new(AsyncMutex::new(BufWriter::new(stdin))),
            pending,
            _child: child,
            reader_task,
            timeout,
        })
    }

    fn spawn_reader_task(stdout: ChildStdout, pending: Pending) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let waiter = lock(&pending).remove(&resp.id);
                            if let Some(tx) = waiter {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "worker: unparseable response line");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "worker: read error");
                        break;
                    }
                }
            }

            let waiters: Vec<_> = lock(&pending).drain().collect();
            for (id, tx) in waiters {
                let _ = tx.send(ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: "WORKER_EXITED".to_string(),
                        message: "worker process exited unexpectedly".to_string(),
                    }),
                });
            }
        })
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` overrides the client default for this call.
    pub async fn request<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> ProviderResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let request = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params)
                .map_err(|e| ProviderError::Protocol(format!("serialize request: {}", e)))?,
        };
        let line = serde_json::to_string(&request)
            .map_err(|e| ProviderError::Protocol(format!("serialize request: {}", e)))?
            + "\n";

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);
        let _registered = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        {
            let mut stdin = self.stdin.lock().await;
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                return Err(ProviderError::ConnectionReset(format!("write to worker: {}", e)));
            }
        }

        let timeout = timeout.unwrap_or(self.timeout);
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(ProviderError::ConnectionReset("worker response channel closed".into()))
            }
            Err(_) => return Err(ProviderError::Timeout(timeout)),
        };

        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result)
                .map_err(|e| ProviderError::Protocol(format!("deserialize {} response: {}", method, e)))
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "unknown error".to_string(),
            });
            Err(Self::classify_error(&error.code, &error.message))
        }
    }

    /// Map a worker error code onto the provider taxonomy.
    fn classify_error(code: &str, message: &str) -> ProviderError {
        match code {
            "WORKER_EXITED" => ProviderError::ConnectionReset(message.to_string()),
            "CONNECTION_FAILED" | "DRIVER_NOT_FOUND" => ProviderError::Unreachable(message.to_string()),
            "TIMEOUT" => ProviderError::Timeout(Duration::ZERO),
            "NOT_FOUND" => ProviderError::NotFound(message.to_string()),
            "METHOD_NOT_FOUND" | "INVALID_REQUEST" => ProviderError::Protocol(message.to_string()),
            _ => ProviderError::rejected(code, message),
        }
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// False once the reader task has finished, i.e. the worker exited.
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            WorkerClient::classify_error("CONNECTION_FAILED", "refused"),
            ProviderError::Unreachable(_)
        ));
        assert!(matches!(
            WorkerClient::classify_error("WORKER_EXITED", "gone"),
            ProviderError::ConnectionReset(_)
        ));
        assert!(matches!(
            WorkerClient::classify_error("NOT_FOUND", "shop.nope"),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            WorkerClient::classify_error("QUERY_FAILED", "Unknown column"),
            ProviderError::Rejected { .. }
        ));
    }

    #[test]
    fn test_transient_codes_are_retriable() {
        assert!(WorkerClient::classify_error("TIMEOUT", "slow").is_transient());
        assert!(!WorkerClient::classify_error("SYNTAX_ERROR", "near FROM").is_transient());
    }

    /// A child that reads nothing and never answers.
    #[cfg(unix)]
    async fn silent_worker(timeout: Duration) -> WorkerClient {
        WorkerClient::spawn("sleep", &["30".to_string()], timeout)
            .await
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_request_releases_pending_entry() {
        let client = silent_worker(Duration::from_secs(30)).await;
        let call = client.request::<_, serde_json::Value>("health_check", serde_json::json!({}), None);
        let outcome = tokio::time::timeout(Duration::from_millis(50), call).await;

        assert!(outcome.is_err());
        assert_eq!(client.pending_requests(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_request_releases_pending_entry() {
        let client = silent_worker(Duration::from_millis(50)).await;
        let result = client
            .request::<_, serde_json::Value>("health_check", serde_json::json!({}), None)
            .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_unreachable() {
        let result = WorkerClient::spawn(
            "/nonexistent/schemata-worker",
            &[],
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProviderError::Unreachable(_))));
    }
}
