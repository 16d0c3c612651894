//! CLI command definitions

use clap::{Parser, ValueEnum};
use pilot_application::{CompletionMode, SendOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Output format for the settled result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Response text followed by a usage line
    #[default]
    Text,
    /// The complete result as JSON
    Json,
}

/// CLI arguments for copilot-pilot
#[derive(Parser, Debug)]
#[command(name = "copilot-pilot")]
#[command(author, version, about = "Send a prompt to GitHub Copilot and wait for a complete answer")]
#[command(long_about = r#"
Copilot Pilot sends one prompt to the GitHub Copilot CLI, follows the
session's event stream and prints the answer once the agent has finished,
including any tool-calling turns in between.

Configuration files are loaded from (in priority order):
1. PILOT_* environment variables (e.g. PILOT_POOL__MAX_SESSIONS=4)
2. --config <path>     Explicit config file
3. ./pilot.toml        Project-level config
4. ~/.config/copilot-pilot/config.toml   Global config

Example:
  copilot-pilot "Summarize the open TODOs in this repository"
  copilot-pilot --stream -m claude-sonnet-4.5 --cwd ../service "Why does the build fail?"
  copilot-pilot --deny-tool shell --output json "List the public API of src/lib.rs"
"#)]
pub struct Cli {
    /// The prompt to send (not required with --show-config)
    pub prompt: Option<String>,

    /// Model to use (defaults to the configured or backend default)
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Working directory the Copilot CLI runs in
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Overall timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Print response text as it streams in
    #[arg(long)]
    pub stream: bool,

    /// Run on a pooled session (per-request model, cwd and tools are ignored)
    #[arg(long)]
    pub pool: bool,

    /// Only allow this tool (can be specified multiple times)
    #[arg(long, value_name = "TOOL")]
    pub allow_tool: Vec<String>,

    /// Never allow this tool (can be specified multiple times)
    #[arg(long, value_name = "TOOL")]
    pub deny_tool: Vec<String>,

    /// Do not load MCP servers from ~/.copilot/mcp-config.json
    #[arg(long)]
    pub no_mcp_config: bool,

    /// Return only the last assistant message instead of every turn's text
    #[arg(long)]
    pub last_message_only: bool,

    /// Approve every permission request (otherwise all are denied)
    #[arg(short, long)]
    pub yes: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long)]
    pub no_config: bool,

    /// Show configuration file locations and exit
    #[arg(long)]
    pub show_config: bool,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Append a JSONL conversation transcript to this file
    #[arg(long, value_name = "PATH")]
    pub conversation_log: Option<PathBuf>,
}

impl Cli {
    /// Tracing filter directive for the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Whether response chunks should be echoed while streaming.
    pub fn prints_chunks(&self) -> bool {
        self.stream && self.output == OutputFormat::Text
    }

    /// Build the send request, without permission handler or chunk callback.
    ///
    /// Returns `None` when no prompt was given.
    pub fn send_options(&self) -> Option<SendOptions> {
        let prompt = self.prompt.as_ref()?;
        let mode = if self.last_message_only {
            CompletionMode::LastMessage
        } else {
            CompletionMode::JoinAll
        };

        let mut options = SendOptions::new(prompt.clone())
            .with_streaming(self.stream)
            .with_pool(self.pool)
            .with_mode(mode);

        if let Some(model) = &self.model {
            options = options.with_model(model.clone());
        }
        if let Some(cwd) = &self.cwd {
            options = options.with_working_directory(cwd.clone());
        }
        if let Some(ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        if !self.allow_tool.is_empty() {
            options = options.with_available_tools(self.allow_tool.clone());
        }
        if !self.deny_tool.is_empty() {
            options = options.with_excluded_tools(self.deny_tool.clone());
        }
        if self.no_mcp_config {
            options = options.with_default_mcp_config(false);
        }
        Some(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("copilot-pilot").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_minimal_invocation() {
        let cli = parse(&["hello"]);
        let options = cli.send_options().unwrap();
        assert_eq!(options.prompt, "hello");
        assert!(!options.streaming);
        assert!(!options.use_pool);
        assert_eq!(options.mode, CompletionMode::JoinAll);
        assert!(options.timeout.is_none());
        assert!(options.available_tools.is_none());
        assert!(options.load_default_mcp_config.is_none());
        assert_eq!(cli.output, OutputFormat::Text);
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_all_send_flags() {
        let cli = parse(&[
            "--model",
            "gpt-5",
            "--cwd",
            "/work",
            "--timeout-ms",
            "90000",
            "--stream",
            "--pool",
            "--allow-tool",
            "read",
            "--allow-tool",
            "grep",
            "--deny-tool",
            "shell",
            "--no-mcp-config",
            "--last-message-only",
            "fix the build",
        ]);
        let options = cli.send_options().unwrap();
        assert_eq!(options.model.as_deref(), Some("gpt-5"));
        assert_eq!(options.working_directory, Some(PathBuf::from("/work")));
        assert_eq!(options.timeout, Some(Duration::from_secs(90)));
        assert!(options.streaming);
        assert!(options.use_pool);
        assert_eq!(
            options.available_tools,
            Some(vec!["read".to_string(), "grep".to_string()])
        );
        assert_eq!(options.excluded_tools, Some(vec!["shell".to_string()]));
        assert_eq!(options.load_default_mcp_config, Some(false));
        assert_eq!(options.mode, CompletionMode::LastMessage);
    }

    #[test]
    fn test_show_config_needs_no_prompt() {
        let cli = parse(&["--show-config"]);
        assert!(cli.show_config);
        assert!(cli.send_options().is_none());
    }

    #[test]
    fn test_verbosity_and_output() {
        let cli = parse(&["-vv", "--output", "json", "--stream", "hi"]);
        assert_eq!(cli.log_level(), "debug");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(!cli.prints_chunks());

        assert_eq!(parse(&["-vvvv", "hi"]).log_level(), "trace");
        assert!(parse(&["--stream", "hi"]).prints_chunks());
    }

    #[test]
    fn test_rejects_unknown_output_format() {
        assert!(Cli::try_parse_from(["copilot-pilot", "--output", "yaml", "hi"]).is_err());
    }
}
