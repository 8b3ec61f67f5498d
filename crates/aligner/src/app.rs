use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use aligner_core::tool::{DiscoveryError, ToolRegistry, ToolServer};
use aligner_core::{Agent, AgentBuilder};
use aligner_mcp::{McpClient, McpError};
use aligner_model::ModelProvider;
use aligner_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use thiserror::Error;

use crate::config::Config;

/// The instructions given to the model unless a file overrides them.
pub const DEFAULT_INSTRUCTIONS: &str = include_str!("./agent_instructions.md");

/// Errors preventing the aligner from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The configured instructions file couldn't be read.
    #[error("failed to read {}: {source}", path.display())]
    Instructions {
        /// The instructions file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// A tool server couldn't be started.
    #[error(transparent)]
    Connect(#[from] McpError),
    /// The tools of a server couldn't be listed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// The connected tool servers and the agent using them.
pub struct App {
    agent: Agent,
    clients: Vec<McpClient>,
}

impl App {
    /// Launches every configured tool server, discovers its tools and sets
    /// up the agent.
    ///
    /// Servers already launched are stopped again if a later one fails.
    pub async fn start(config: &Config) -> Result<Self, StartupError> {
        let mut instructions = match &config.model.instructions_path {
            Some(path) => std::fs::read_to_string(path).map_err(|source| {
                StartupError::Instructions {
                    path: path.clone(),
                    source,
                }
            })?,
            None => DEFAULT_INSTRUCTIONS.to_owned(),
        };

        let mut clients = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let client = McpClient::connect(server).await?;
            if let Some(hints) = &client.info().instructions {
                instructions.push_str(&format!(
                    "\n\n## Notes from {}\n\n{hints}\n",
                    client.name()
                ));
            }
            clients.push(client);
        }

        let mut openai_config =
            OpenAIConfigBuilder::with_api_key(config.model.api_key.clone());
        if let Some(model) = &config.model.model {
            openai_config = openai_config.with_model(model);
        }
        if let Some(base_url) = &config.model.base_url {
            openai_config = openai_config.with_base_url(base_url);
        }
        let provider = OpenAIProvider::new(openai_config.build());
        info!("using model {}", provider.config().model());

        let servers = clients.iter().map(|client| {
            let server: Arc<dyn ToolServer> = Arc::new(client.clone());
            (client.name().to_owned(), server)
        });
        let agent = build_agent(provider, servers, config, instructions).await?;
        Ok(Self { agent, clients })
    }

    /// Returns the agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Returns the connected tool servers.
    #[inline]
    pub fn clients(&self) -> &[McpClient] {
        &self.clients
    }

    /// Stops every tool server.
    pub fn shutdown(self) {
        for client in &self.clients {
            client.shutdown();
        }
    }
}

/// Discovers the tools of `servers` and builds an agent around them.
pub async fn build_agent<P, I>(
    provider: P,
    servers: I,
    config: &Config,
    instructions: String,
) -> Result<Agent, DiscoveryError>
where
    P: ModelProvider + 'static,
    I: IntoIterator<Item = (String, Arc<dyn ToolServer>)>,
{
    let registry = ToolRegistry::discover(servers).await?;
    let mut builder = AgentBuilder::with_model_provider(provider)
        .with_registry(Arc::new(registry))
        .with_system_prompt(instructions)
        .with_retry_policy(config.retry)
        .with_tool_failure_policy(config.agent.tool_failure_policy)
        .with_max_steps(config.agent.max_steps);
    if let Some(timeout) = config.agent.timeout {
        builder = builder.with_timeout(timeout);
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use aligner_core::NoopObserver;
    use aligner_core::tool::{ToolServerError, ToolSpec};
    use aligner_model::{Arguments, Role, ToolCallRequest};
    use aligner_test_model::{PresetEvent, PresetResponse, TestModelProvider};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::config::WIKIDATA_MCP;

    struct CapitalServer {
        broken: bool,
    }

    #[async_trait]
    impl ToolServer for CapitalServer {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolServerError> {
            if self.broken {
                return Err("server crashed".into());
            }
            Ok(vec![ToolSpec {
                name: "query_capital".to_owned(),
                description: "Looks up the capital of a country.".to_owned(),
                input_schema: json!({ "type": "object" }),
            }])
        }

        async fn invoke(
            &self,
            _name: &str,
            _arguments: Arguments,
        ) -> Result<Value, ToolServerError> {
            Ok(json!({ "capital": "Budapest" }))
        }
    }

    fn config() -> Config {
        Config::from_toml("[agent]\nmax_steps = 4\n", |key| match key {
            "GITHUB_MODELS_API_KEY" => Some("x".to_owned()),
            "WIKIDATA_MCP_PATH" => Some("wikidata_mcp.py".to_owned()),
            "WIKIDATA_MCP_WORKING_DIRECTORY" => Some(".".to_owned()),
            _ => None,
        })
        .unwrap()
    }

    fn server(broken: bool) -> (String, Arc<dyn ToolServer>) {
        let server: Arc<dyn ToolServer> = Arc::new(CapitalServer { broken });
        (WIKIDATA_MCP.to_owned(), server)
    }

    #[tokio::test]
    async fn test_build_agent() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "WikidataMCP-query_capital".to_owned(),
                arguments: json!({ "country": "Hungary" })
                    .as_object()
                    .cloned()
                    .unwrap(),
                malformed_arguments: None,
            }),
        ]));
        provider.add_tool_result_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::MessageDelta("The capital is Budapest.".to_owned()),
        ]));

        let agent = build_agent(
            provider.clone(),
            [server(false)],
            &config(),
            DEFAULT_INSTRUCTIONS.to_owned(),
        )
        .await
        .unwrap();
        assert_eq!(agent.registry().len(), 1);

        let answer = agent
            .session()
            .run("What is the capital of Hungary?", &NoopObserver)
            .await
            .unwrap();
        assert_eq!(answer.text(), "The capital is Budapest.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let first = &requests[0].messages[0];
        assert_eq!(first.role, Role::System);
        assert_eq!(first.text(), DEFAULT_INSTRUCTIONS);
        assert_eq!(requests[0].tools[0].name, "WikidataMCP-query_capital");
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let result = build_agent(
            TestModelProvider::default(),
            [server(false), ("Broken".to_owned(), server(true).1)],
            &config(),
            String::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(DiscoveryError::Listing { ref namespace, .. }) if namespace == "Broken"
        ));
    }
}
