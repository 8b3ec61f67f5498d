use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::Arc;

use aligner_model::{Arguments, ModelTool};
use serde_json::Value;
use tracing::Instrument;

use super::{DiscoveryError, ToolInvocationError, ToolServer};

/// The longest function name model APIs accept.
const MAX_QUALIFIED_NAME_LEN: usize = 64;

/// A discovered tool, bound to the server it came from.
#[derive(Clone)]
pub struct ToolDescriptor {
    namespace: String,
    name: String,
    qualified_name: String,
    description: String,
    input_schema: Value,
    server: Arc<dyn ToolServer>,
}

impl ToolDescriptor {
    /// Returns the namespace (tool server name) of this tool.
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the tool's name within its namespace.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description of the tool.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the declared input schema.
    #[inline]
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// The name the model uses to call this tool.
    ///
    /// Model APIs only accept up to 64 of `[A-Za-z0-9_-]` in function names,
    /// so the namespace is joined with a dash, other characters become `_`
    /// and overlong names are shortened. See [`model_facing_name`].
    #[inline]
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// The name shown to the operator, e.g. `WikidataMCP.query_capital`.
    #[inline]
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.qualified_name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

impl Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// The catalog of every tool exposed by the connected tool servers.
///
/// A registry is built once by [`ToolRegistry::discover`] and is read-only
/// afterwards, so it can be shared between sessions behind an `Arc`.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    by_qualified_name: HashMap<String, usize>,
    by_identity: HashMap<(String, String), usize>,
}

impl ToolRegistry {
    /// Lists the tools of every server, in order, and registers each under
    /// `(namespace, tool name)`.
    ///
    /// Discovery is all-or-nothing: if any server fails to list its tools,
    /// no registry is produced.
    pub async fn discover<I>(servers: I) -> Result<Self, DiscoveryError>
    where
        I: IntoIterator<Item = (String, Arc<dyn ToolServer>)>,
    {
        let mut registry = Self::default();
        let mut namespaces = HashSet::new();

        for (namespace, server) in servers {
            if !namespaces.insert(namespace.clone()) {
                return Err(DiscoveryError::DuplicateNamespace(namespace));
            }

            let specs = server
                .list_tools()
                .instrument(debug_span!("list tools", %namespace))
                .await
                .map_err(|source| DiscoveryError::Listing {
                    namespace: namespace.clone(),
                    source,
                })?;
            info!("discovered {} tools from {namespace}", specs.len());

            for spec in specs {
                let qualified_name = model_facing_name(
                    &namespace,
                    &spec.name,
                    registry.tools.len(),
                );
                registry.insert(ToolDescriptor {
                    namespace: namespace.clone(),
                    name: spec.name,
                    qualified_name,
                    description: spec.description,
                    input_schema: spec.input_schema,
                    server: Arc::clone(&server),
                })?;
            }
        }

        Ok(registry)
    }

    fn insert(&mut self, tool: ToolDescriptor) -> Result<(), DiscoveryError> {
        let identity = (tool.namespace.clone(), tool.name.clone());
        if self.by_identity.contains_key(&identity) {
            let (namespace, tool) = identity;
            return Err(DiscoveryError::DuplicateTool { namespace, tool });
        }
        let qualified_name = tool.qualified_name.clone();
        if self.by_qualified_name.contains_key(&qualified_name) {
            return Err(DiscoveryError::AmbiguousName(qualified_name));
        }

        let idx = self.tools.len();
        trace!(
            "registering tool {} as {qualified_name}",
            tool.display_name()
        );
        self.tools.push(tool);
        self.by_identity.insert(identity, idx);
        self.by_qualified_name.insert(qualified_name, idx);
        Ok(())
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterates the tools in discovery order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Finds a tool by namespace and name.
    pub fn get(&self, namespace: &str, name: &str) -> Option<&ToolDescriptor> {
        self.by_identity
            .get(&(namespace.to_owned(), name.to_owned()))
            .map(|&idx| &self.tools[idx])
    }

    /// Finds a tool by the name the model used to call it.
    pub fn lookup(&self, qualified_name: &str) -> Option<&ToolDescriptor> {
        self.by_qualified_name
            .get(qualified_name)
            .map(|&idx| &self.tools[idx])
    }

    /// Returns the tool definitions to expose to the model.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    /// Invokes a tool on the server it was discovered from.
    ///
    /// Failures are returned as-is and never retried here.
    pub async fn resolve(
        &self,
        namespace: &str,
        name: &str,
        arguments: Arguments,
    ) -> Result<Value, ToolInvocationError> {
        let Some(tool) = self.get(namespace, name) else {
            return Err(ToolInvocationError {
                namespace: namespace.to_owned(),
                tool: name.to_owned(),
                cause: "no such tool is registered".into(),
            });
        };

        trace!("invoking {} with args: {arguments:?}", tool.display_name());
        tool.server
            .invoke(&tool.name, arguments)
            .instrument(debug_span!("tool invoke", %namespace, %name))
            .await
            .map_err(|cause| ToolInvocationError {
                namespace: namespace.to_owned(),
                tool: name.to_owned(),
                cause,
            })
    }
}

/// Builds the name under which the model sees the tool `name` of
/// `namespace`.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced by `_`. A name longer
/// than 64 characters is cut and suffixed with `_<index>`, where `index` is
/// the tool's position in the registry, which keeps it unique.
pub fn model_facing_name(namespace: &str, name: &str, index: usize) -> String {
    let sanitize = |c: char| {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '_'
        }
    };
    let mut qualified: String = namespace
        .chars()
        .map(sanitize)
        .chain(['-'])
        .chain(name.chars().map(sanitize))
        .collect();

    if qualified.len() > MAX_QUALIFIED_NAME_LEN {
        let suffix = format!("_{index}");
        qualified.truncate(MAX_QUALIFIED_NAME_LEN - suffix.len());
        qualified.push_str(&suffix);
    }
    qualified
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::{ToolServerError, ToolSpec};

    struct StaticServer {
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl ToolServer for StaticServer {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolServerError> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolSpec {
                    name: (*name).to_owned(),
                    description: format!("The {name} tool"),
                    input_schema: json!({ "type": "object" }),
                })
                .collect())
        }

        async fn invoke(
            &self,
            name: &str,
            arguments: Arguments,
        ) -> Result<Value, ToolServerError> {
            if name == "broken" {
                return Err("connection reset".into());
            }
            Ok(json!({ "tool": name, "args": arguments }))
        }
    }

    struct FailingServer;

    #[async_trait]
    impl ToolServer for FailingServer {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolServerError> {
            Err("server exited".into())
        }

        async fn invoke(
            &self,
            _name: &str,
            _arguments: Arguments,
        ) -> Result<Value, ToolServerError> {
            unreachable!("never discovered")
        }
    }

    fn server(tools: Vec<&'static str>) -> Arc<dyn ToolServer> {
        Arc::new(StaticServer { tools })
    }

    #[tokio::test]
    async fn test_discover_namespaces() {
        let registry = ToolRegistry::discover([
            ("WikidataMCP".to_owned(), server(vec!["search", "query"])),
            ("PostgreSQLMCP".to_owned(), server(vec!["query"])),
        ])
        .await
        .unwrap();

        assert_eq!(registry.len(), 3);
        let names: Vec<_> = registry.iter().map(|t| t.display_name()).collect();
        assert_eq!(
            names,
            ["WikidataMCP.search", "WikidataMCP.query", "PostgreSQLMCP.query"]
        );
        assert!(registry.get("WikidataMCP", "query").is_some());
        assert!(registry.get("PostgreSQLMCP", "query").is_some());
        assert!(registry.get("PostgreSQLMCP", "search").is_none());

        let tool = registry.lookup("PostgreSQLMCP-query").unwrap();
        assert_eq!(tool.namespace(), "PostgreSQLMCP");
        assert_eq!(tool.name(), "query");

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 3);
        assert_eq!(definitions[0].name, "WikidataMCP-search");
        assert_eq!(definitions[0].description, "The search tool");
    }

    #[tokio::test]
    async fn test_discover_is_all_or_nothing() {
        let result = ToolRegistry::discover([
            ("WikidataMCP".to_owned(), server(vec!["search"])),
            ("Broken".to_owned(), Arc::new(FailingServer) as _),
        ])
        .await;

        let Err(DiscoveryError::Listing { namespace, .. }) = result else {
            panic!("expected a listing error");
        };
        assert_eq!(namespace, "Broken");
    }

    #[tokio::test]
    async fn test_discover_rejects_duplicates() {
        let result = ToolRegistry::discover([
            ("A".to_owned(), server(vec!["x"])),
            ("A".to_owned(), server(vec!["y"])),
        ])
        .await;
        assert!(matches!(result, Err(DiscoveryError::DuplicateNamespace(ns)) if ns == "A"));

        let result =
            ToolRegistry::discover([("A".to_owned(), server(vec!["x", "x"]))])
                .await;
        assert!(matches!(result, Err(DiscoveryError::DuplicateTool { .. })));

        let result = ToolRegistry::discover([
            ("a-b".to_owned(), server(vec!["c"])),
            ("a".to_owned(), server(vec!["b-c"])),
        ])
        .await;
        assert!(matches!(result, Err(DiscoveryError::AmbiguousName(name)) if name == "a-b-c"));
    }

    #[tokio::test]
    async fn test_resolve() {
        let registry = ToolRegistry::discover([(
            "WikidataMCP".to_owned(),
            server(vec!["query", "broken"]),
        )])
        .await
        .unwrap();

        let mut arguments = Arguments::new();
        arguments.insert("country".to_owned(), json!("Hungary"));
        let value = registry
            .resolve("WikidataMCP", "query", arguments)
            .await
            .unwrap();
        assert_eq!(value["tool"], json!("query"));
        assert_eq!(value["args"]["country"], json!("Hungary"));

        let err = registry
            .resolve("WikidataMCP", "broken", Arguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.namespace, "WikidataMCP");
        assert_eq!(err.tool, "broken");
        assert_eq!(err.cause.to_string(), "connection reset");

        let err = registry
            .resolve("Nowhere", "query", Arguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.namespace, "Nowhere");
    }

    #[tokio::test]
    async fn test_names_are_made_model_safe() {
        let registry = ToolRegistry::discover([
            (
                "Wikidata MCP".to_owned(),
                server(vec![
                    "wikidata.get_entity_with_all_statements_and_qualifiers_by_id",
                    "search.items",
                ]),
            ),
        ])
        .await
        .unwrap();

        let definitions = registry.definitions();
        assert_eq!(definitions[1].name, "Wikidata_MCP-search_items");
        let long = &definitions[0].name;
        assert_eq!(long.len(), 64);
        assert!(long.starts_with("Wikidata_MCP-wikidata_get_entity_with_all"));
        assert!(long.ends_with("_0"));
        for definition in &definitions {
            assert!(
                definition
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                "{}",
                definition.name
            );
        }

        let tool = registry.lookup(long).unwrap();
        assert_eq!(tool.namespace(), "Wikidata MCP");
        assert_eq!(
            tool.name(),
            "wikidata.get_entity_with_all_statements_and_qualifiers_by_id"
        );
        assert_eq!(
            tool.display_name(),
            "Wikidata MCP.wikidata.get_entity_with_all_statements_and_qualifiers_by_id"
        );
        let value = registry
            .resolve("Wikidata MCP", "search.items", Arguments::new())
            .await
            .unwrap();
        assert_eq!(value["tool"], json!("search.items"));
    }

    #[tokio::test]
    async fn test_sanitized_names_must_stay_unique() {
        let result = ToolRegistry::discover([(
            "WikidataMCP".to_owned(),
            server(vec!["search.items", "search_items"]),
        )])
        .await;
        assert!(matches!(
            result,
            Err(DiscoveryError::AmbiguousName(name)) if name == "WikidataMCP-search_items"
        ));
    }

    #[test]
    fn test_model_facing_name() {
        assert_eq!(
            model_facing_name("WikidataMCP", "query_capital", 0),
            "WikidataMCP-query_capital"
        );
        assert_eq!(model_facing_name("", "", 0), "-");
        assert_eq!(model_facing_name("Ünï", "a b", 3), "_n_-a_b");

        let name = model_facing_name("A", &"x".repeat(100), 12);
        assert_eq!(name.len(), 64);
        assert!(name.ends_with("x_12"));
    }
}
