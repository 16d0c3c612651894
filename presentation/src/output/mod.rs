//! Terminal output: settled results and streamed chunks

pub mod chunk_printer;
pub mod console;
