//! Presentation layer for copilot-pilot
//!
//! This crate contains the CLI definition, the result formatter and the
//! printer that echoes streamed response text.

pub mod cli;
pub mod output;

// Re-export commonly used types
pub use cli::commands::{Cli, OutputFormat};
pub use output::chunk_printer::ChunkPrinter;
pub use output::console::ConsoleFormatter;
