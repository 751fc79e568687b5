//! Lifecycle of the real-time validation server.
//!
//! The server is the build tool in serve mode, talking JSON-RPC over stdio.
//! The manager starts it for the open workspace, forwards the diagnostics it
//! publishes to the [`DiagnosticSink`] and answers its credential requests
//! through the [`CredentialExpiryHandler`].

use std::path::PathBuf;
use std::sync::Arc;

use docs_build_domain::{
    Diagnostic, DocsError, DocsEvent, DocsResult, EventStream, MessageSeverity, Range,
    SignInReason, DIAGNOSTIC_SOURCE,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Child;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::credential_expiry::{
    CredentialExpiryHandler, CredentialSource, GetCredentialParams, GET_CREDENTIAL_METHOD,
};
use super::rpc::{self, RpcMessage, METHOD_NOT_FOUND};
use crate::build::{select_workspace_folder, BuildExecutor};
use crate::config::EnvironmentController;
use crate::host::{DiagnosticSink, WorkspaceProvider};
use crate::repository::RepositoryInspector;

const INITIALIZE_REQUEST_ID: i64 = 0;
pub const PUBLISH_DIAGNOSTICS_METHOD: &str = "textDocument/publishDiagnostics";

/// Diagnostic as published by the server (LSP shape).
#[derive(Debug, Deserialize)]
struct PublishedDiagnostic {
    range: Range,
    #[serde(default)]
    severity: Option<u8>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    source: Option<String>,
}

impl PublishedDiagnostic {
    fn into_diagnostic(self) -> Diagnostic {
        let severity = match self.severity {
            Some(1) => MessageSeverity::Error,
            Some(2) => MessageSeverity::Warning,
            Some(3) => MessageSeverity::Info,
            _ => MessageSeverity::Suggestion,
        };
        let code = match self.code {
            Some(Value::String(code)) => code,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Diagnostic {
            range: self.range,
            severity,
            code,
            message: self.message,
            source: self.source.unwrap_or_else(|| DIAGNOSTIC_SOURCE.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishDiagnosticsParams {
    uri: String,
    #[serde(default)]
    diagnostics: Vec<PublishedDiagnostic>,
}

/// Shared pieces the protocol loop needs.
#[derive(Clone)]
pub struct ProtocolContext {
    pub sink: Arc<dyn DiagnosticSink>,
    pub expiry: Arc<CredentialExpiryHandler>,
}

/// Serve one server connection until its output ends.
pub async fn run_protocol<R, W>(
    mut reader: R,
    writer: Arc<Mutex<W>>,
    context: ProtocolContext,
) -> DocsResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(value) = rpc::read_message(&mut reader).await? {
        let Some(message) = RpcMessage::from_value(value) else {
            warn!("ignoring malformed message from the validation server");
            continue;
        };
        match message {
            RpcMessage::Response { id, error, .. } => {
                if id == json!(INITIALIZE_REQUEST_ID) {
                    if let Some(error) = error {
                        return Err(DocsError::LanguageServer {
                            message: format!("initialize failed: {error}"),
                        });
                    }
                    let initialized = rpc::notification("initialized", json!({}));
                    rpc::write_message(&mut *writer.lock().await, &initialized).await?;
                    debug!("validation server initialized");
                }
            }
            RpcMessage::Notification { method, params } => {
                if method == PUBLISH_DIAGNOSTICS_METHOD {
                    publish_diagnostics(context.sink.as_ref(), params);
                }
            }
            RpcMessage::Request { id, method, params } if method == GET_CREDENTIAL_METHOD => {
                // Answering may wait for the user to sign in; keep reading meanwhile.
                let writer = Arc::clone(&writer);
                let expiry = Arc::clone(&context.expiry);
                tokio::spawn(async move {
                    let reply = match serde_json::from_value::<GetCredentialParams>(params) {
                        Ok(params) => {
                            let response = expiry.get_credential(&params).await;
                            rpc::response(&id, json!(response))
                        }
                        Err(e) => rpc::error_response(&id, -32602, &e.to_string()),
                    };
                    if let Err(e) = rpc::write_message(&mut *writer.lock().await, &reply).await {
                        warn!(error = %e, "failed to answer credential request");
                    }
                });
            }
            RpcMessage::Request { id, method, .. } => {
                let reply =
                    rpc::error_response(&id, METHOD_NOT_FOUND, &format!("unknown method {method}"));
                rpc::write_message(&mut *writer.lock().await, &reply).await?;
            }
        }
    }
    Ok(())
}

fn publish_diagnostics(sink: &dyn DiagnosticSink, params: Value) {
    let params = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "ignoring malformed diagnostics");
            return;
        }
    };
    let path = Url::parse(&params.uri)
        .ok()
        .and_then(|uri| uri.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(&params.uri));
    let diagnostics = params
        .diagnostics
        .into_iter()
        .map(PublishedDiagnostic::into_diagnostic)
        .collect();
    sink.set(&path, diagnostics);
}

struct Session {
    child: Child,
    protocol: JoinHandle<()>,
    stderr: Option<JoinHandle<()>>,
}

impl Session {
    /// The server exited or its connection ended.
    fn has_ended(&mut self) -> bool {
        self.protocol.is_finished() || matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    fn abort_tasks(&mut self) {
        self.protocol.abort();
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}

/// Drop a session whose server already went away on its own. The protocol
/// task has posted `LanguageServerStopped` for it.
fn reap_ended(session: &mut Option<Session>) {
    if !session.as_mut().is_some_and(Session::has_ended) {
        return;
    }
    if let Some(mut ended) = session.take() {
        debug!("validation server exited on its own");
        ended.abort_tasks();
        if let Err(e) = ended.child.start_kill() {
            debug!(error = %e, "validation server already gone");
        }
    }
}

/// Collaborators of a [`LanguageServerManager`].
pub struct LanguageServerDeps {
    pub executor: Arc<BuildExecutor>,
    pub credentials: Arc<dyn CredentialSource>,
    pub inspector: Arc<dyn RepositoryInspector>,
    pub workspace: Arc<dyn WorkspaceProvider>,
    pub sink: Arc<dyn DiagnosticSink>,
}

pub struct LanguageServerManager {
    events: EventStream,
    environment: Arc<EnvironmentController>,
    executor: Arc<BuildExecutor>,
    credentials: Arc<dyn CredentialSource>,
    inspector: Arc<dyn RepositoryInspector>,
    workspace: Arc<dyn WorkspaceProvider>,
    context: ProtocolContext,
    session: Mutex<Option<Session>>,
}

impl LanguageServerManager {
    pub fn new(
        events: EventStream,
        environment: Arc<EnvironmentController>,
        deps: LanguageServerDeps,
    ) -> Self {
        let expiry = Arc::new(CredentialExpiryHandler::new(
            events.clone(),
            Arc::clone(&environment),
            Arc::clone(&deps.credentials),
        ));
        Self {
            events,
            environment,
            executor: deps.executor,
            credentials: deps.credentials,
            inspector: deps.inspector,
            workspace: deps.workspace,
            context: ProtocolContext {
                sink: deps.sink,
                expiry,
            },
            session: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut session = self.session.lock().await;
        reap_ended(&mut session);
        session.is_some()
    }

    /// Start the server unless real-time validation is disabled or it is
    /// already running. Posts `StartLanguageServerCompleted`.
    #[instrument(skip(self))]
    pub async fn start(&self, correlation_id: &str) -> DocsResult<()> {
        if !self.environment.enable_real_time_validation() {
            debug!("real-time validation disabled");
            return Ok(());
        }
        let mut session = self.session.lock().await;
        reap_ended(&mut session);
        if session.is_some() {
            return Ok(());
        }

        match self.launch(correlation_id).await {
            Ok(started) => {
                *session = Some(started);
                info!("validation server started");
                self.events.post(DocsEvent::StartLanguageServerCompleted {
                    succeeded: true,
                    error: None,
                });
                Ok(())
            }
            Err(error) => {
                self.events.post(DocsEvent::StartLanguageServerCompleted {
                    succeeded: false,
                    error: Some(error.clone()),
                });
                Err(error)
            }
        }
    }

    /// Kill the server if it runs.
    pub async fn stop(&self) {
        let mut current = self.session.lock().await;
        reap_ended(&mut current);
        let Some(mut session) = current.take() else {
            return;
        };
        drop(current);
        session.abort_tasks();
        if let Err(e) = session.child.start_kill() {
            debug!(error = %e, "validation server already gone");
        }
        let _ = session.child.wait().await;
        self.events.post(DocsEvent::LanguageServerStopped);
    }

    pub async fn restart(&self, correlation_id: &str) -> DocsResult<()> {
        self.stop().await;
        self.start(correlation_id).await
    }

    /// Restart the server when the environment or the signed-in user changes.
    pub fn spawn_event_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "language server manager lagged behind the event stream");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !restarts_server(&event) || !manager.environment.enable_real_time_validation() {
                    continue;
                }
                let correlation_id = event
                    .correlation_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                if let Err(e) = manager.restart(&correlation_id).await {
                    warn!(error = %e, "failed to restart the validation server");
                }
            }
        })
    }

    async fn launch(&self, correlation_id: &str) -> DocsResult<Session> {
        let folder = select_workspace_folder(self.workspace.workspace_folders(), None)?;
        let root = self.inspector.repository_root(&folder.path).await?;
        let repository_url = self.inspector.remote_url(&root).await?;
        let credential = self.credentials.current_credential();

        let mut child = self.executor.spawn_language_server(
            correlation_id,
            &root,
            &repository_url,
            credential.user_token(),
        )?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(DocsError::LanguageServer {
                message: "validation server stdio is not piped".to_string(),
            });
        };
        let stderr = child.stderr.take().map(log_stderr);

        let writer = Arc::new(Mutex::new(stdin));
        let root_uri = Url::from_directory_path(&root)
            .map(|u| u.to_string())
            .unwrap_or_default();
        let initialize = rpc::request(
            INITIALIZE_REQUEST_ID,
            "initialize",
            json!({
                "processId": std::process::id(),
                "rootUri": root_uri,
                "capabilities": {},
            }),
        );
        if let Err(error) = rpc::write_message(&mut *writer.lock().await, &initialize).await {
            let _ = child.start_kill();
            return Err(error);
        }

        let context = self.context.clone();
        let events = self.events.clone();
        let protocol = tokio::spawn(async move {
            if let Err(e) = run_protocol(BufReader::new(stdout), writer, context).await {
                warn!(error = %e, "validation server connection failed");
            }
            events.post(DocsEvent::LanguageServerStopped);
        });

        Ok(Session {
            child,
            protocol,
            stderr,
        })
    }
}

fn restarts_server(event: &DocsEvent) -> bool {
    match event {
        DocsEvent::EnvironmentChanged { .. } | DocsEvent::UserSignOutSucceeded { .. } => true,
        // After an expiry during validation the running server receives the
        // new token through its pending credential request.
        DocsEvent::UserSignInSucceeded {
            retrieved_from_cache,
            sign_in_reason,
            ..
        } => {
            !*retrieved_from_cache
                && *sign_in_reason != Some(SignInReason::CredentialExpiredDuringRealTimeValidation)
        }
        _ => false,
    }
}

fn log_stderr<R>(stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "docs_build::language_server", "{line}");
        }
    })
}
