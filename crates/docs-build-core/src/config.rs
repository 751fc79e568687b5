//! Runtime configuration and the environment controller.

use std::path::PathBuf;
use std::sync::RwLock;

use docs_build_domain::{DocsEvent, DocsRepoType, Environment, EventStream, UserType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Build service API base URL per environment.
pub fn default_api_base_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Prod => "https://op-build-prod.azurewebsites.net",
        Environment::Ppe => "https://op-build-sandbox2.azurewebsites.net",
    }
}

/// docs-build configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocsConfig {
    pub environment: Environment,
    pub user_type: UserType,
    /// Also selects the sign-in provider.
    pub docs_repo_type: DocsRepoType,
    /// Keep output and log artifacts after a build and run the tool verbosely.
    pub debug_mode: bool,
    pub enable_real_time_validation: bool,
    pub build_binary: PathBuf,
    pub template_url: Option<String>,
    /// Overrides the per-environment API base URL.
    pub api_base_url: Option<String>,
    /// URI scheme the host registers for the sign-in callback.
    pub callback_scheme: String,
    pub sign_in_timeout_secs: u64,
    pub output_folder: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub cache_dir: PathBuf,
}

impl Default for DocsConfig {
    fn default() -> Self {
        DocsConfig {
            environment: Environment::Prod,
            user_type: UserType::MicrosoftEmployee,
            docs_repo_type: DocsRepoType::GitHub,
            debug_mode: false,
            enable_real_time_validation: false,
            build_binary: PathBuf::from("docfx"),
            template_url: None,
            api_base_url: None,
            callback_scheme: "docs-build".to_string(),
            sign_in_timeout_secs: 300,
            output_folder: None,
            log_path: None,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("docs-build"),
        }
    }
}

impl DocsConfig {
    /// Defaults overridden by `DOCS_BUILD_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(env) = parsed_var::<Environment>("DOCS_BUILD_ENVIRONMENT") {
            config.environment = env;
        }
        if let Some(user_type) = parsed_var::<UserType>("DOCS_BUILD_USER_TYPE") {
            config.user_type = user_type;
        }
        if let Some(repo_type) = parsed_var::<DocsRepoType>("DOCS_BUILD_REPO_TYPE") {
            config.docs_repo_type = repo_type;
        }
        if let Some(debug) = bool_var("DOCS_BUILD_DEBUG") {
            config.debug_mode = debug;
        }
        if let Some(rtv) = bool_var("DOCS_BUILD_REAL_TIME_VALIDATION") {
            config.enable_real_time_validation = rtv;
        }
        if let Ok(binary) = std::env::var("DOCS_BUILD_BINARY") {
            config.build_binary = PathBuf::from(binary);
        }
        config.template_url = std::env::var("DOCS_BUILD_TEMPLATE_URL").ok();
        config.api_base_url = std::env::var("DOCS_BUILD_API_BASE_URL").ok();
        if let Ok(scheme) = std::env::var("DOCS_BUILD_CALLBACK_SCHEME") {
            config.callback_scheme = scheme;
        }
        if let Some(timeout) = parsed_var::<u64>("DOCS_BUILD_SIGN_IN_TIMEOUT") {
            config.sign_in_timeout_secs = timeout;
        }
        config.output_folder = std::env::var("DOCS_BUILD_OUTPUT_FOLDER").ok().map(PathBuf::from);
        config.log_path = std::env::var("DOCS_BUILD_LOG_PATH").ok().map(PathBuf::from);
        if let Ok(cache_dir) = std::env::var("DOCS_BUILD_CACHE_DIR") {
            config.cache_dir = PathBuf::from(cache_dir);
        }

        config
    }

    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| default_api_base_url(self.environment).to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolved_output_folder(&self) -> PathBuf {
        self.output_folder
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("output"))
    }

    pub fn resolved_log_path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| self.resolved_output_folder().join(".errors.log"))
    }
}

fn parsed_var<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = name, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

fn bool_var(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    Some(matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}

/// Owns the live configuration and announces environment switches.
#[derive(Debug)]
pub struct EnvironmentController {
    config: RwLock<DocsConfig>,
    events: EventStream,
}

impl EnvironmentController {
    pub fn new(config: DocsConfig, events: EventStream) -> Self {
        Self {
            config: RwLock::new(config),
            events,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> DocsConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn environment(&self) -> Environment {
        self.read(|c| c.environment)
    }

    pub fn user_type(&self) -> UserType {
        self.read(|c| c.user_type)
    }

    pub fn docs_repo_type(&self) -> DocsRepoType {
        self.read(|c| c.docs_repo_type)
    }

    pub fn debug_mode(&self) -> bool {
        self.read(|c| c.debug_mode)
    }

    pub fn enable_real_time_validation(&self) -> bool {
        self.read(|c| c.enable_real_time_validation)
    }

    pub fn api_base_url(&self) -> String {
        self.read(|c| c.api_base_url())
    }

    pub fn requires_authentication(&self) -> bool {
        self.user_type().requires_authentication()
    }

    /// Switch environment; posts `EnvironmentChanged` only on an actual change.
    pub fn set_environment(&self, environment: Environment) {
        let changed = {
            let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
            let changed = config.environment != environment;
            config.environment = environment;
            changed
        };
        if changed {
            info!(environment = %environment, "environment changed");
            self.events
                .post(DocsEvent::EnvironmentChanged { environment });
        }
    }

    fn read<T>(&self, f: impl FnOnce(&DocsConfig) -> T) -> T {
        f(&self.config.read().unwrap_or_else(|e| e.into_inner()))
    }
}
