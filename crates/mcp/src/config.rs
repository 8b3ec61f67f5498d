use std::path::PathBuf;

/// How to launch one MCP server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct McpServerConfig {
    /// The logical name, which becomes the namespace of its tools.
    pub name: String,
    /// The executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// The working directory of the process, if not inherited.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl McpServerConfig {
    /// Creates a config that runs `command` without arguments.
    #[inline]
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, command: S2) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Appends an argument.
    #[inline]
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets the working directory.
    #[inline]
    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    #[inline]
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}
