//! docs-build - terminal host for the docs build pipeline
//!
//! The `docs-build` command wires every component once at startup and
//! drives them from the terminal.
//!
//! ## Commands
//!
//! - `sign-in`: sign in to the build service through the browser
//! - `sign-out`: forget the stored credential
//! - `status`: show configuration and sign-in state
//! - `build`: build the repository in the current directory and print its diagnostics
//! - `serve`: run real-time validation until interrupted

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docs_build_core::{
    spawn_event_logger, BuildController, BuildControllerDeps, BuildExecutor, CallbackHub,
    CredentialController, CredentialStore, DocsConfig, EnvironmentController,
    FileCredentialStore, GitRepositoryInspector, LanguageServerDeps, LanguageServerManager,
    OpBuildApiClient,
};
use docs_build_domain::{DocfxExecutionResult, EventStream, MessageSeverity};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

use terminal::{severity_label, CurrentDirWorkspace, StdinUriOpener, TerminalSink};

#[derive(Parser)]
#[command(name = "docs-build")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and validate a docs repository locally", long_about = None)]
struct Cli {
    /// Enable verbose output, including the build tool's own output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to the build service
    SignIn,

    /// Sign out and remove the stored credential
    SignOut,

    /// Show configuration and sign-in state
    Status,

    /// Build the docs repository in the current directory
    Build {
        /// File or folder to build (default: the current directory)
        path: Option<PathBuf>,
    },

    /// Run real-time validation and print diagnostics as they are published
    Serve,
}

/// Every component, wired once.
struct App {
    environment: Arc<EnvironmentController>,
    credentials: Arc<CredentialController>,
    builds: Arc<BuildController>,
    language_server: Arc<LanguageServerManager>,
    sink: Arc<TerminalSink>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    fn new(config: DocsConfig, live_diagnostics: bool) -> Result<Self> {
        let workspace_root =
            std::env::current_dir().context("Failed to read the current directory")?;
        let events = EventStream::new();
        let mut tasks = vec![spawn_event_logger(&events)];

        let store: Arc<dyn CredentialStore> =
            Arc::new(FileCredentialStore::in_dir(&config.cache_dir));
        let environment = Arc::new(EnvironmentController::new(config, events.clone()));

        let callbacks = CallbackHub::new();
        let credentials = Arc::new(CredentialController::new(
            events.clone(),
            Arc::clone(&environment),
            store,
            Arc::new(StdinUriOpener::new(callbacks.clone())),
            callbacks,
        ));
        tasks.push(credentials.spawn_event_loop());

        let sink = Arc::new(if live_diagnostics {
            TerminalSink::live()
        } else {
            TerminalSink::new()
        });
        let workspace = Arc::new(CurrentDirWorkspace::new(workspace_root));
        let inspector = Arc::new(GitRepositoryInspector::new());
        let api = Arc::new(
            OpBuildApiClient::new(Arc::clone(&environment))
                .context("Failed to create the build service client")?,
        );
        let executor = Arc::new(BuildExecutor::new(events.clone(), Arc::clone(&environment)));

        let builds = Arc::new(BuildController::new(
            events.clone(),
            Arc::clone(&environment),
            BuildControllerDeps {
                runner: executor.clone(),
                api,
                inspector: inspector.clone(),
                workspace: workspace.clone(),
                sink: sink.clone(),
            },
        ));
        tasks.push(builds.spawn_event_loop());

        let language_server = Arc::new(LanguageServerManager::new(
            events,
            Arc::clone(&environment),
            LanguageServerDeps {
                executor,
                credentials: credentials.clone(),
                inspector,
                workspace,
                sink: sink.clone(),
            },
        ));
        tasks.push(language_server.spawn_event_loop());

        Ok(Self {
            environment,
            credentials,
            builds,
            language_server,
            sink,
            tasks,
        })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    docs_build_core::init_tracing(cli.json, level);

    let mut config = DocsConfig::from_env();
    let serving = matches!(cli.command, Commands::Serve);
    if serving {
        config.enable_real_time_validation = true;
    }

    let app = App::new(config, serving)?;
    app.credentials.initialize(&new_correlation_id()).await;

    match cli.command {
        Commands::SignIn => cmd_sign_in(&app).await,
        Commands::SignOut => cmd_sign_out(&app).await,
        Commands::Status => cmd_status(&app, cli.json),
        Commands::Build { path } => cmd_build(&app, path).await,
        Commands::Serve => cmd_serve(&app).await,
    }
}

async fn cmd_sign_in(app: &App) -> Result<()> {
    match app.credentials.sign_in(&new_correlation_id()).await {
        Ok(()) => {
            match app.credentials.credential().user_info() {
                Some(user) => println!("Signed in as {} <{}>", user.user_name, user.user_email),
                None => println!("Signing in is not needed for public contributors"),
            }
            Ok(())
        }
        Err(e) if e.is_timeout() => {
            Err(e).context("Sign-in timed out; run `docs-build sign-in` to try again")
        }
        Err(e) => Err(e).context("Sign-in failed"),
    }
}

async fn cmd_sign_out(app: &App) -> Result<()> {
    app.credentials
        .sign_out(&new_correlation_id())
        .await
        .context("Sign-out failed")?;
    println!("Signed out");
    Ok(())
}

fn cmd_status(app: &App, json: bool) -> Result<()> {
    let config = app.environment.config();
    let credential = app.credentials.credential();
    let user = credential.user_info();

    if json {
        let status = json!({
            "environment": config.environment,
            "user_type": config.user_type,
            "docs_repo_type": config.docs_repo_type,
            "api_base_url": config.api_base_url(),
            "build_binary": config.build_binary,
            "real_time_validation": config.enable_real_time_validation,
            "sign_in_status": credential.sign_in_status(),
            "user_name": user.map(|u| u.user_name.as_str()),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(());
    }

    println!("Environment:           {}", config.environment);
    println!("User type:             {:?}", config.user_type);
    println!("Sign-in provider:      {}", config.docs_repo_type);
    println!("Build service:         {}", config.api_base_url());
    println!("Build tool:            {}", config.build_binary.display());
    println!(
        "Real-time validation:  {}",
        if config.enable_real_time_validation {
            "enabled"
        } else {
            "disabled"
        }
    );
    match user {
        Some(user) => println!("Signed in as:          {} <{}>", user.user_name, user.user_email),
        None => println!("Sign-in status:        {:?}", credential.sign_in_status()),
    }
    Ok(())
}

async fn cmd_build(app: &App, path: Option<PathBuf>) -> Result<()> {
    let target = match path {
        Some(path) => Some(
            tokio::fs::canonicalize(&path)
                .await
                .with_context(|| format!("Cannot find {}", path.display()))?,
        ),
        None => None,
    };
    let correlation_id = new_correlation_id();
    let credential = app.credentials.credential();

    let build = app
        .builds
        .build(&correlation_id, target.as_deref(), &credential);
    tokio::pin!(build);
    let outcome = tokio::select! {
        outcome = &mut build => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; canceling the build");
            if let Err(e) = app.builds.cancel_build(&new_correlation_id()).await {
                warn!(error = %e, "failed to cancel the build");
            }
            build.await
        }
    };

    let result = outcome.context("Build failed")?;
    let counts = app.sink.print_all();
    match result.result {
        DocfxExecutionResult::Canceled => println!("Build canceled"),
        _ => {
            let summary = [
                MessageSeverity::Error,
                MessageSeverity::Warning,
                MessageSeverity::Info,
                MessageSeverity::Suggestion,
            ]
            .iter()
            .map(|s| format!("{} {}", counts.get(s).copied().unwrap_or(0), severity_label(*s)))
            .collect::<Vec<_>>()
            .join(", ");
            println!("Build succeeded: {summary}");
        }
    }
    Ok(())
}

async fn cmd_serve(app: &App) -> Result<()> {
    app.language_server
        .start(&new_correlation_id())
        .await
        .context("Failed to start real-time validation")?;
    println!("Real-time validation is running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    app.language_server.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_build_path() {
        let cli = Cli::try_parse_from(["docs-build", "--verbose", "build", "docs/index.md"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Build { path } => assert_eq!(path, Some(PathBuf::from("docs/index.md"))),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["docs-build", "status", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["docs-build", "publish"]).is_err());
    }
}
