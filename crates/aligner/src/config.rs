//! Configuration loading.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables. Validation reports every problem at once instead
//! of stopping at the first one.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aligner_core::{DEFAULT_TOOL_TIMEOUT, RetryPolicy, ToolFailurePolicy};
use aligner_mcp::McpServerConfig;
use serde::Deserialize;
use thiserror::Error;

/// Namespace of the Wikidata tool server.
pub const WIKIDATA_MCP: &str = "WikidataMCP";
/// Namespace of the PostgreSQL tool server.
pub const POSTGRESQL_MCP: &str = "PostgreSQLMCP";

const DEFAULT_COMMAND: &str = "uv";
const DEFAULT_MAX_STEPS: usize = 25;

/// Environment variables that configure a well-known server.
struct ServerEnv {
    name: &'static str,
    path: &'static str,
    working_directory: &'static str,
    database_uri: Option<&'static str>,
}

const SERVER_ENVS: &[ServerEnv] = &[
    ServerEnv {
        name: WIKIDATA_MCP,
        path: "WIKIDATA_MCP_PATH",
        working_directory: "WIKIDATA_MCP_WORKING_DIRECTORY",
        database_uri: None,
    },
    ServerEnv {
        name: POSTGRESQL_MCP,
        path: "POSTGRESQL_MCP_PATH",
        working_directory: "POSTGRESQL_MCP_WORKING_DIRECTORY",
        database_uri: Some("POSTGRESQL_MCP_DATABASE_URI"),
    },
];

/// A problem found while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but couldn't be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// The config file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// The config file isn't valid.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        /// The config file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// A required value was given neither in the file nor the environment.
    #[error("{what} not found; set `{key}` in the config file or {env}")]
    Missing {
        /// What is missing, in plain words.
        what: String,
        /// The key in the config file.
        key: String,
        /// Where else it can be given.
        env: String,
    },
    /// No tool server is configured at all.
    #[error("no tool server is configured; add a `[servers.<name>]` table")]
    NoServers,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    model: ModelSection,
    retry: RetrySection,
    agent: AgentSection,
    servers: BTreeMap<String, ServerSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ModelSection {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    instructions_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    max_attempts: Option<u32>,
    default_delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AgentSection {
    max_steps: Option<usize>,
    tool_retries: Option<u32>,
    tool_timeout_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    command: Option<String>,
    path: Option<String>,
    working_directory: Option<PathBuf>,
    args: Option<Vec<String>>,
    database_uri: Option<String>,
}

/// Settings of the model backend.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ModelConfig {
    /// The GitHub Models (or OpenAI) API key.
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    /// A file with agent instructions replacing the built-in ones.
    pub instructions_path: Option<PathBuf>,
}

impl Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("instructions_path", &self.instructions_path)
            .finish()
    }
}

/// Limits of the reasoning loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    /// The most model round-trips one question may take.
    pub max_steps: usize,
    /// How failing or unresponsive tool calls are handled.
    pub tool_failure_policy: ToolFailurePolicy,
    /// A bound on answering one question, if any.
    pub timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            tool_failure_policy: Default::default(),
            timeout: None,
        }
    }
}

/// The validated configuration of one run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Model backend settings.
    pub model: ModelConfig,
    /// Retry policy for rate-limited model calls.
    pub retry: RetryPolicy,
    /// Reasoning loop limits.
    pub agent: AgentConfig,
    /// Tool servers to launch, ordered by name.
    pub servers: Vec<McpServerConfig>,
}

impl Config {
    /// Loads `path` if it exists and applies overrides looked up through
    /// `env`.
    pub fn load<E>(path: &Path, env: E) -> Result<Self, Vec<ConfigError>>
    where
        E: Fn(&str) -> Option<String>,
    {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("{} not found, using the environment", path.display());
                String::new()
            }
            Err(source) => {
                return Err(vec![ConfigError::Read {
                    path: path.to_owned(),
                    source,
                }]);
            }
        };
        let file = toml::from_str::<FileConfig>(&text).map_err(|source| {
            vec![ConfigError::Parse {
                path: path.to_owned(),
                source,
            }]
        })?;
        Self::resolve(file, env)
    }

    /// Same as [`Config::load`], for configuration given as a string.
    pub fn from_toml<E>(text: &str, env: E) -> Result<Self, Vec<ConfigError>>
    where
        E: Fn(&str) -> Option<String>,
    {
        let file = toml::from_str::<FileConfig>(text).map_err(|source| {
            vec![ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            }]
        })?;
        Self::resolve(file, env)
    }

    fn resolve<E>(
        mut file: FileConfig,
        env: E,
    ) -> Result<Self, Vec<ConfigError>>
    where
        E: Fn(&str) -> Option<String>,
    {
        // Blank variables count as unset.
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        override_with(&mut file.model.api_key, env("GITHUB_MODELS_API_KEY"));
        override_with(&mut file.model.model, env("ALIGNER_MODEL"));
        override_with(&mut file.model.base_url, env("ALIGNER_BASE_URL"));
        for server_env in SERVER_ENVS {
            let path = env(server_env.path);
            let working_directory = env(server_env.working_directory);
            let database_uri = server_env.database_uri.and_then(|key| env(key));
            if path.is_none()
                && working_directory.is_none()
                && database_uri.is_none()
            {
                continue;
            }
            let section =
                file.servers.entry(server_env.name.to_owned()).or_default();
            override_with(&mut section.path, path);
            override_with(
                &mut section.working_directory,
                working_directory.map(PathBuf::from),
            );
            override_with(&mut section.database_uri, database_uri);
        }

        let mut errors = vec![];
        let api_key = file.model.api_key.take().unwrap_or_else(|| {
            errors.push(ConfigError::Missing {
                what: "GitHub Models API key".to_owned(),
                key: "model.api_key".to_owned(),
                env: "GITHUB_MODELS_API_KEY".to_owned(),
            });
            String::new()
        });

        if file.servers.is_empty() {
            errors.push(ConfigError::NoServers);
        }
        let mut servers = Vec::with_capacity(file.servers.len());
        for (name, section) in file.servers {
            match server_config(&name, section) {
                Ok(server) => servers.push(server),
                Err(missing) => errors.extend(missing),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let defaults = RetryPolicy::default();
        Ok(Self {
            model: ModelConfig {
                api_key,
                base_url: file.model.base_url,
                model: file.model.model,
                instructions_path: file.model.instructions_path,
            },
            retry: RetryPolicy::new(
                file.retry.max_attempts.unwrap_or(defaults.max_attempts),
                file.retry
                    .default_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.default_delay),
            ),
            agent: AgentConfig {
                max_steps: file.agent.max_steps.unwrap_or(DEFAULT_MAX_STEPS),
                tool_failure_policy: ToolFailurePolicy {
                    retries: file.agent.tool_retries.unwrap_or_default(),
                    timeout: file
                        .agent
                        .tool_timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_TOOL_TIMEOUT),
                },
                timeout: file.agent.timeout_secs.map(Duration::from_secs),
            },
            servers,
        })
    }
}

#[inline]
fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Builds the launch command `<command> run <path> <args...>`.
fn server_config(
    name: &str,
    section: ServerSection,
) -> Result<McpServerConfig, Vec<ConfigError>> {
    let server_env = SERVER_ENVS.iter().find(|e| e.name == name);
    let missing = |what: &str, field: &str, env: Option<&str>| {
        ConfigError::Missing {
            what: format!("{name} {what}"),
            key: format!("servers.{name}.{field}"),
            env: match env {
                Some(env) => format!("the {env} environment variable"),
                None => "nowhere else".to_owned(),
            },
        }
    };

    let mut errors = vec![];
    if section.path.is_none() {
        errors.push(missing("path", "path", server_env.map(|e| e.path)));
    }
    if section.working_directory.is_none() {
        errors.push(missing(
            "working directory",
            "working_directory",
            server_env.map(|e| e.working_directory),
        ));
    }
    if let (None, Some(env)) =
        (&section.database_uri, server_env.and_then(|e| e.database_uri))
    {
        errors.push(missing("database URI", "database_uri", Some(env)));
    }
    let (Some(path), Some(working_directory)) =
        (section.path, section.working_directory)
    else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let command = section.command.unwrap_or_else(|| DEFAULT_COMMAND.to_owned());
    let args = section.args.unwrap_or_else(|| default_args(name));
    let mut config = McpServerConfig::new(name, command)
        .arg("run")
        .arg(path)
        .working_dir(working_directory);
    config.args.extend(args);
    if let Some(uri) = section.database_uri {
        config = config.env("DATABASE_URI", uri);
    }
    Ok(config)
}

fn default_args(name: &str) -> Vec<String> {
    if name == POSTGRESQL_MCP {
        vec!["--access-mode=restricted".to_owned()]
    } else {
        vec![]
    }
}
