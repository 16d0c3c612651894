//! Console output formatter for service results

use colored::Colorize;
use pilot_domain::{ServiceResult, TokenUsage};

/// Formats [`ServiceResult`]s for console display
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// Format a result as text.
    ///
    /// When the response was already echoed chunk by chunk, only the
    /// trailer (usage, session) is produced.
    pub fn format_text(result: &ServiceResult, streamed: bool) -> String {
        let mut output = String::new();

        if !result.success {
            output.push_str(&format!(
                "{} {}\n",
                "Error:".red().bold(),
                result.error.as_deref().unwrap_or("Unknown error")
            ));
            return output;
        }

        if !streamed {
            output.push_str(&result.response);
            if !result.response.ends_with('\n') {
                output.push('\n');
            }
        }

        if let Some(usage) = &result.token_usage {
            output.push_str(&format!("\n{}\n", Self::format_usage(usage).dimmed()));
        }
        if let Some(session_id) = &result.session_id {
            output.push_str(&format!("{}\n", format!("Session: {}", session_id).dimmed()));
        }

        output
    }

    /// Format as JSON
    pub fn format_json(result: &ServiceResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
    }

    /// One-line usage summary.
    pub fn format_usage(usage: &TokenUsage) -> String {
        let mut line = format!(
            "Tokens: {} in, {} out ({} total)",
            usage.input_tokens,
            usage.output_tokens,
            usage.total()
        );
        if usage.cache_read_tokens > 0 || usage.cache_write_tokens > 0 {
            line.push_str(&format!(
                ", cache {} read / {} written",
                usage.cache_read_tokens, usage.cache_write_tokens
            ));
        }
        line.push_str(&format!(
            " | {} turn{}",
            usage.turn_count,
            if usage.turn_count == 1 { "" } else { "s" }
        ));
        if let Some(cost) = usage.cost {
            line.push_str(&format!(" | cost {}", cost));
        }
        if let (Some(current), Some(limit)) = (usage.current_tokens, usage.token_limit) {
            line.push_str(&format!(" | context {}/{}", current, limit));
        }
        line
    }
}
