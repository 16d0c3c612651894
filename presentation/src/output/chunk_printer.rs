//! Streams response chunks to the terminal as they arrive.

use pilot_application::ChunkCallback;
use std::io::{Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Writes every chunk immediately and flushes, so partial answers show up
/// while the agent is still working.
pub struct ChunkPrinter<W: Write + Send> {
    out: Mutex<W>,
    printed: AtomicBool,
    at_line_start: AtomicBool,
}

impl ChunkPrinter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> ChunkPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            printed: AtomicBool::new(false),
            at_line_start: AtomicBool::new(true),
        }
    }

    pub fn print(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        // A closed stdout must not abort the send.
        let _ = out.write_all(chunk.as_bytes()).and_then(|_| out.flush());
        self.printed.store(true, Ordering::SeqCst);
        self.at_line_start
            .store(chunk.ends_with('\n'), Ordering::SeqCst);
    }

    pub fn has_printed(&self) -> bool {
        self.printed.load(Ordering::SeqCst)
    }

    /// Terminate the streamed text with a newline if it lacks one.
    pub fn finish(&self) {
        if self.has_printed() && !self.at_line_start.swap(true, Ordering::SeqCst) {
            let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
            let _ = out.write_all(b"\n").and_then(|_| out.flush());
        }
    }

    /// Callback handing every chunk to this printer.
    pub fn callback(self: &Arc<Self>) -> ChunkCallback {
        let printer = Arc::clone(self);
        Arc::new(move |chunk: &str| printer.print(chunk))
    }
}
