//! Console transcript of an exchange.
//!
//! The connection banners and `Message Received:` lines are the programs'
//! user-facing output. They go through a [`Console`] so the binaries can
//! print them to stdout and tests can capture them with a [`Transcript`].

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared line-oriented output sink.
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    /// Console writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Console writing to an arbitrary sink.
    pub fn new<W: Write + Send + 'static>(sink: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Write one line and flush it.
    ///
    /// Failures are logged and otherwise ignored: losing the console must not
    /// abort an exchange.
    pub fn line(&self, text: &str) {
        let mut sink = lock(&self.sink);
        if let Err(e) = writeln!(sink, "{text}").and_then(|_| sink.flush()) {
            debug!(error = %e, "Console write failed");
        }
    }
}

/// In-memory capture of console output.
#[derive(Clone, Default)]
pub struct Transcript {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A console that appends to this transcript.
    pub fn console(&self) -> Console {
        Console::new(self.clone())
    }

    /// Captured output, split into lines.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&lock(&self.buf))
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for Transcript {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        lock(&self.buf).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Lock a mutex, recovering the data if a writer panicked.
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_captures_lines() {
        let transcript = Transcript::new();
        let console = transcript.console();

        console.line("Server TCP");
        console.clone().line("Message Received: Hallo");

        assert_eq!(
            transcript.lines(),
            vec!["Server TCP", "Message Received: Hallo"]
        );
    }

    #[test]
    fn test_empty_transcript() {
        assert!(Transcript::new().lines().is_empty());
    }
}
