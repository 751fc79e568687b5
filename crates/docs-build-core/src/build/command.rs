//! Command lines of the external build tool.
//!
//! `<binary> restore|build <repo> --log <log> [--template URL] [--verbose]
//! [--dry-run] [--output <dir> --output-type pagejson]`, plus
//! `<binary> serve <repo> --language-server` for real-time validation.
//! Secrets travel in environment variables, never on the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use docs_build_domain::{BuildInput, Environment, BUILD_USER_TOKEN_HEADER};
use serde::{Deserialize, Serialize};

use crate::config::DocsConfig;

pub const ENV_CORRELATION_ID: &str = "DOCFX_CORRELATION_ID";
pub const ENV_REPOSITORY_URL: &str = "DOCFX_REPOSITORY_URL";
pub const ENV_DOCS_ENVIRONMENT: &str = "DOCS_ENVIRONMENT";
pub const ENV_HTTP: &str = "DOCFX_HTTP";

/// Extra HTTP headers the build tool adds to requests, keyed by URL prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HttpSecrets(BTreeMap<String, BTreeMap<String, String>>);

impl HttpSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// The build user token for requests to the build service.
    pub fn for_token(api_base_url: &str, user_token: Option<&str>) -> Self {
        let mut secrets = Self::new();
        if let Some(token) = user_token.filter(|t| !t.is_empty()) {
            secrets.insert(api_base_url, BUILD_USER_TOKEN_HEADER, token);
        }
        secrets
    }

    pub fn insert(&mut self, url: &str, header: &str, value: &str) {
        self.0
            .entry(url.to_string())
            .or_default()
            .insert(header.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn headers(&self, url: &str) -> Option<&BTreeMap<String, String>> {
        self.0.get(url)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Tool settings taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOptions {
    pub binary: PathBuf,
    pub template_url: Option<String>,
    pub verbose: bool,
    pub environment: Environment,
    pub api_base_url: String,
}

impl ToolOptions {
    pub fn from_config(config: &DocsConfig) -> Self {
        Self {
            binary: config.build_binary.clone(),
            template_url: config.template_url.clone(),
            verbose: config.debug_mode,
            environment: config.environment,
            api_base_url: config.api_base_url(),
        }
    }
}

/// A fully described process invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl std::fmt::Debug for CommandLine {
    // Environment values carry secrets; only their names are shown.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLine")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("envs", &self.envs.keys().collect::<Vec<_>>())
            .field("cwd", &self.cwd)
            .finish()
    }
}

impl CommandLine {
    /// Program and arguments as one shell-like string.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|a| {
                if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.envs.get(name).map(String::as_str)
    }

    /// A tokio command with piped stdio. The process dies with its handle.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

fn tool_envs(
    options: &ToolOptions,
    correlation_id: &str,
    repository_url: &str,
    user_token: Option<&str>,
) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::new();
    envs.insert(ENV_CORRELATION_ID.to_string(), correlation_id.to_string());
    envs.insert(ENV_REPOSITORY_URL.to_string(), repository_url.to_string());
    envs.insert(
        ENV_DOCS_ENVIRONMENT.to_string(),
        options.environment.as_str().to_string(),
    );
    let secrets = HttpSecrets::for_token(&options.api_base_url, user_token);
    if !secrets.is_empty() {
        envs.insert(ENV_HTTP.to_string(), secrets.to_json());
    }
    envs
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

pub fn restore_command(
    options: &ToolOptions,
    correlation_id: &str,
    input: &BuildInput,
    user_token: Option<&str>,
) -> CommandLine {
    let mut args = vec![
        "restore".to_string(),
        path_arg(&input.local_repository_path),
        "--log".to_string(),
        path_arg(&input.log_path),
    ];
    if options.verbose {
        args.push("--verbose".to_string());
    }
    CommandLine {
        program: options.binary.clone(),
        args,
        envs: tool_envs(
            options,
            correlation_id,
            &input.original_repository_url,
            user_token,
        ),
        cwd: Some(input.local_repository_path.clone()),
    }
}

pub fn build_command(
    options: &ToolOptions,
    correlation_id: &str,
    input: &BuildInput,
    user_token: Option<&str>,
) -> CommandLine {
    let mut args = vec![
        "build".to_string(),
        path_arg(&input.local_repository_path),
        "--log".to_string(),
        path_arg(&input.log_path),
    ];
    if let Some(template) = &options.template_url {
        args.push("--template".to_string());
        args.push(template.clone());
    }
    if options.verbose {
        args.push("--verbose".to_string());
    }
    if input.dry_run {
        args.push("--dry-run".to_string());
    }
    args.extend([
        "--output".to_string(),
        path_arg(&input.output_folder),
        "--output-type".to_string(),
        "pagejson".to_string(),
    ]);
    CommandLine {
        program: options.binary.clone(),
        args,
        envs: tool_envs(
            options,
            correlation_id,
            &input.original_repository_url,
            user_token,
        ),
        cwd: Some(input.local_repository_path.clone()),
    }
}

/// Real-time validation server speaking JSON-RPC over stdio.
pub fn serve_command(
    options: &ToolOptions,
    correlation_id: &str,
    repository_path: &Path,
    repository_url: &str,
    user_token: Option<&str>,
) -> CommandLine {
    let mut args = vec![
        "serve".to_string(),
        path_arg(repository_path),
        "--language-server".to_string(),
    ];
    if let Some(template) = &options.template_url {
        args.push("--template".to_string());
        args.push(template.clone());
    }
    if options.verbose {
        args.push("--verbose".to_string());
    }
    CommandLine {
        program: options.binary.clone(),
        args,
        envs: tool_envs(options, correlation_id, repository_url, user_token),
        cwd: Some(repository_path.to_path_buf()),
    }
}
