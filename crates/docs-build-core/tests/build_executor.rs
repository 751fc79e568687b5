//! Build tool process tests. The tool is `/bin/sh`, so `restore`, `build`
//! and `serve` resolve to shell scripts in the repository directory (the
//! tool's working directory).
#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docs_build_core::fakes::{FakeRepositoryInspector, MemoryDiagnosticSink, MemoryWorkspace};
use docs_build_core::{
    BuildExecutor, BuildRunner, CredentialSource, DocsConfig, EnvironmentController,
    LanguageServerDeps, LanguageServerManager, WorkspaceFolder,
};
use docs_build_domain::{
    drain_events, BuildInput, BuildType, Credential, DocfxExecutionResult, DocsEvent,
    EventStream, MessageSeverity,
};
use tempfile::TempDir;
use url::Url;

struct Fixture {
    events: EventStream,
    environment: Arc<EnvironmentController>,
    executor: Arc<BuildExecutor>,
    input: BuildInput,
    _dir: TempDir,
}

impl Fixture {
    fn new(scripts: &[(&str, &str)]) -> Self {
        Self::with_binary(scripts, "/bin/sh")
    }

    fn with_binary(scripts: &[(&str, &str)], binary: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        for (name, body) in scripts {
            std::fs::write(repo.join(name), body).unwrap();
        }

        let config = DocsConfig {
            build_binary: binary.into(),
            enable_real_time_validation: true,
            cache_dir: dir.path().join("cache"),
            ..DocsConfig::default()
        };
        let events = EventStream::new();
        let environment = Arc::new(EnvironmentController::new(config, events.clone()));
        let executor = Arc::new(BuildExecutor::new(events.clone(), Arc::clone(&environment)));
        let input = BuildInput {
            workspace_name: "repo".to_string(),
            build_type: BuildType::FullBuild,
            local_repository_path: repo,
            local_repository_url: "https://github.com/octo/docs".to_string(),
            original_repository_url: "https://github.com/MicrosoftDocs/docs".to_string(),
            output_folder: dir.path().join("output"),
            log_path: dir.path().join("output").join(".errors.log"),
            dry_run: false,
        };
        Self {
            events,
            environment,
            executor,
            input,
            _dir: dir,
        }
    }

    fn repo(&self) -> &Path {
        &self.input.local_repository_path
    }

    fn marker_lines(&self, name: &str) -> usize {
        std::fs::read_to_string(self.repo().join(name))
            .map(|raw| raw.lines().count())
            .unwrap_or(0)
    }
}

fn progress(events: &[DocsEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            DocsEvent::BuildProgress { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_restore_runs_once_per_executor() {
    let f = Fixture::new(&[
        ("restore", "echo restoring\necho x >> restore.count\nexit 0\n"),
        ("build", "echo building\necho x >> build.count\nexit 1\n"),
    ]);
    let mut rx = f.events.subscribe();

    let first = f.executor.run_build("b-1", &f.input, Some("tok")).await;
    let second = f.executor.run_build("b-2", &f.input, Some("tok")).await;

    // Exit code 1 from the build phase means "completed with warnings".
    assert_eq!(first.result, DocfxExecutionResult::Succeeded);
    assert!(!first.is_restore_skipped);
    assert!(first.restore_time_in_seconds.is_some());
    assert_eq!(second.result, DocfxExecutionResult::Succeeded);
    assert!(second.is_restore_skipped);
    assert!(second.restore_time_in_seconds.is_none());
    assert!(f.executor.is_restore_done());
    assert_eq!(f.marker_lines("restore.count"), 1);
    assert_eq!(f.marker_lines("build.count"), 2);

    let posted = drain_events(&mut rx);
    assert!(posted.contains(&DocsEvent::DocfxRestoreCompleted {
        correlation_id: "b-1".to_string(),
        result: DocfxExecutionResult::Succeeded,
        exit_code: Some(0),
    }));
    assert!(posted.contains(&DocsEvent::DocfxBuildCompleted {
        correlation_id: "b-2".to_string(),
        result: DocfxExecutionResult::Succeeded,
        exit_code: Some(1),
    }));
    let lines = progress(&posted);
    assert!(lines.contains(&"restoring".to_string()));
    assert!(lines.contains(&"building".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("& /bin/sh restore")));
}

#[tokio::test]
async fn test_failed_restore_skips_build() {
    let f = Fixture::new(&[
        ("restore", "echo 'restore failed' >&2\nexit 1\n"),
        ("build", "echo x >> build.count\n"),
    ]);
    let mut rx = f.events.subscribe();

    let result = f.executor.run_build("b", &f.input, None).await;

    assert_eq!(result.result, DocfxExecutionResult::Failed);
    assert!(!f.executor.is_restore_done());
    assert_eq!(f.marker_lines("build.count"), 0);
    let posted = drain_events(&mut rx);
    assert!(progress(&posted).contains(&"restore failed".to_string()));
    // Exit code 1 is a warning-level success for the build phase only.
    assert!(posted.contains(&DocsEvent::DocfxRestoreCompleted {
        correlation_id: "b".to_string(),
        result: DocfxExecutionResult::Failed,
        exit_code: Some(1),
    }));
    assert!(!posted.contains(&DocsEvent::DocfxBuildStarted));
}

#[tokio::test]
async fn test_build_exit_code_two_fails() {
    let f = Fixture::new(&[("restore", "exit 0\n"), ("build", "exit 2\n")]);

    let result = f.executor.run_build("b", &f.input, None).await;

    assert_eq!(result.result, DocfxExecutionResult::Failed);
    assert!(f.executor.is_restore_done());
}

#[tokio::test]
async fn test_sigkill_from_outside_is_canceled() {
    let f = Fixture::new(&[("restore", "exit 0\n"), ("build", "echo dying\nkill -9 $$\n")]);
    let mut rx = f.events.subscribe();

    let result = f.executor.run_build("b", &f.input, None).await;

    assert_eq!(result.result, DocfxExecutionResult::Canceled);
    assert!(drain_events(&mut rx).contains(&DocsEvent::DocfxBuildCompleted {
        correlation_id: "b".to_string(),
        result: DocfxExecutionResult::Canceled,
        exit_code: None,
    }));
}

#[tokio::test]
async fn test_background_helper_does_not_hold_the_build_open() {
    let f = Fixture::new(&[
        ("restore", "exit 0\n"),
        ("build", "echo done\n(sleep 8 &)\nexit 0\n"),
    ]);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        f.executor.run_build("b", &f.input, None),
    )
    .await
    .expect("build should finish when the tool exits");

    assert_eq!(result.result, DocfxExecutionResult::Succeeded);
    assert!(f.executor.running_pid().is_none());
}

#[tokio::test]
async fn test_tool_receives_environment_but_not_token_arguments() {
    let f = Fixture::new(&[
        ("restore", "exit 0\n"),
        (
            "build",
            "echo \"url=$DOCFX_REPOSITORY_URL\"\necho \"cid=$DOCFX_CORRELATION_ID\"\necho \"args=$*\"\n",
        ),
    ]);
    let mut rx = f.events.subscribe();

    f.executor.run_build("c-77", &f.input, Some("secret")).await;

    let lines = progress(&drain_events(&mut rx));
    assert!(lines.contains(&"url=https://github.com/MicrosoftDocs/docs".to_string()));
    assert!(lines.contains(&"cid=c-77".to_string()));
    let args = lines.iter().find(|l| l.starts_with("args=")).unwrap();
    assert!(args.contains("--output-type pagejson"));
    assert!(!args.contains("secret"));
}

#[tokio::test]
async fn test_missing_binary_fails_without_panicking() {
    let f = Fixture::with_binary(&[], "/nonexistent/docfx");
    let mut rx = f.events.subscribe();

    let result = f.executor.run_build("b", &f.input, None).await;

    assert_eq!(result.result, DocfxExecutionResult::Failed);
    assert!(progress(&drain_events(&mut rx))
        .iter()
        .any(|l| l.starts_with("failed to start")));
}

#[tokio::test]
async fn test_cancel_kills_process_tree() {
    let f = Fixture::new(&[
        ("restore", "exit 0\n"),
        ("build", "echo started\nsleep 30 &\nwait\n"),
    ]);
    let mut rx = f.events.subscribe();
    let executor = Arc::clone(&f.executor);
    let input = f.input.clone();
    let build = tokio::spawn(async move { executor.run_build("b", &input, None).await });

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(DocsEvent::BuildProgress { message }) = rx.recv().await {
                if message == "started" {
                    break;
                }
            }
        }
    })
    .await
    .expect("build should start");
    assert!(f.executor.running_pid().is_some());

    f.executor.cancel_build().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), build)
        .await
        .expect("build should stop")
        .unwrap();

    assert_eq!(result.result, DocfxExecutionResult::Canceled);
    assert!(f.executor.running_pid().is_none());
}

#[tokio::test]
async fn test_cancel_during_restore_skips_build() {
    let f = Fixture::new(&[
        ("restore", "echo restoring\nsleep 30 &\nwait\n"),
        ("build", "echo x >> build.count\n"),
    ]);
    let mut rx = f.events.subscribe();
    let executor = Arc::clone(&f.executor);
    let input = f.input.clone();
    let build = tokio::spawn(async move { executor.run_build("b", &input, None).await });

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(DocsEvent::BuildProgress { message }) = rx.recv().await {
                if message == "restoring" {
                    break;
                }
            }
        }
    })
    .await
    .expect("restore should start");

    f.executor.cancel_build().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), build)
        .await
        .expect("build should stop")
        .unwrap();

    assert_eq!(result.result, DocfxExecutionResult::Canceled);
    assert!(!f.executor.is_restore_done());
    assert_eq!(f.marker_lines("build.count"), 0);
}

#[tokio::test]
async fn test_cancel_without_running_build_is_ok() {
    let f = Fixture::new(&[("restore", "exit 0\n"), ("build", "exit 0\n")]);

    f.executor.cancel_build().await.unwrap();

    // An idle cancel does not carry over to the next build.
    let result = f.executor.run_build("b", &f.input, None).await;
    assert_eq!(result.result, DocfxExecutionResult::Succeeded);
}

struct Anonymous;

impl CredentialSource for Anonymous {
    fn current_credential(&self) -> Credential {
        Credential::signed_out()
    }
}

#[tokio::test]
async fn test_language_server_publishes_diagnostics() {
    let f = Fixture::new(&[]);
    let uri = Url::from_file_path(f.repo().join("index.md")).unwrap();
    let body = format!(
        r#"{{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{{"uri":"{uri}","diagnostics":[{{"range":{{"start":{{"line":2,"character":0}},"end":{{"line":2,"character":4}}}},"severity":1,"code":"broken-link","message":"broken"}}]}}}}"#
    );
    let script = format!(
        "body='{body}'\nprintf 'Content-Length: %d\\r\\n\\r\\n%s' \"${{#body}}\" \"$body\"\nexec cat > /dev/null\n"
    );
    std::fs::write(f.repo().join("serve"), script).unwrap();

    let sink = Arc::new(MemoryDiagnosticSink::new());
    let manager = LanguageServerManager::new(
        f.events.clone(),
        Arc::clone(&f.environment),
        LanguageServerDeps {
            executor: Arc::clone(&f.executor),
            credentials: Arc::new(Anonymous),
            inspector: Arc::new(FakeRepositoryInspector::new(
                f.repo().to_path_buf(),
                "https://github.com/octo/docs",
            )),
            workspace: Arc::new(MemoryWorkspace::new(vec![WorkspaceFolder::from_path(
                f.repo().to_path_buf(),
            )])),
            sink: sink.clone(),
        },
    );
    let mut rx = f.events.subscribe();

    manager.start("ls-1").await.unwrap();
    assert!(manager.is_running().await);

    let file = f.repo().join("index.md");
    tokio::time::timeout(Duration::from_secs(10), async {
        while sink.get(&file).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("diagnostics should arrive");
    let diagnostics = sink.get(&file).unwrap();
    assert_eq!(diagnostics[0].severity, MessageSeverity::Error);
    assert_eq!(diagnostics[0].code, "broken-link");

    manager.stop().await;
    assert!(!manager.is_running().await);
    let posted = drain_events(&mut rx);
    assert!(posted.contains(&DocsEvent::StartLanguageServerCompleted {
        succeeded: true,
        error: None,
    }));
    assert!(posted.contains(&DocsEvent::LanguageServerStopped));
}

#[tokio::test]
async fn test_language_server_can_start_again_after_exiting() {
    // Exits once the initialize request arrives.
    let f = Fixture::new(&[("serve", "read header\nexit 0\n")]);
    let manager = LanguageServerManager::new(
        f.events.clone(),
        Arc::clone(&f.environment),
        LanguageServerDeps {
            executor: Arc::clone(&f.executor),
            credentials: Arc::new(Anonymous),
            inspector: Arc::new(FakeRepositoryInspector::new(
                f.repo().to_path_buf(),
                "https://github.com/octo/docs",
            )),
            workspace: Arc::new(MemoryWorkspace::new(vec![WorkspaceFolder::from_path(
                f.repo().to_path_buf(),
            )])),
            sink: Arc::new(MemoryDiagnosticSink::new()),
        },
    );
    let mut rx = f.events.subscribe();

    manager.start("ls-1").await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while manager.is_running().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server exit should be noticed");

    manager.start("ls-2").await.unwrap();
    let started = drain_events(&mut rx)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                DocsEvent::StartLanguageServerCompleted {
                    succeeded: true,
                    ..
                }
            )
        })
        .count();
    assert_eq!(started, 2);

    manager.stop().await;
    assert!(!manager.is_running().await);
}
