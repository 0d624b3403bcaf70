//! Console sink for `consoleI32` and `consoleString`

use parking_lot::Mutex;

/// Destination of console output; shared by every context of a program
pub trait Console: Send + Sync {
    fn log(&self, line: &str);
}

/// Prints each line to standard output
#[derive(Debug, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn log(&self, line: &str) {
        println!("{}", line);
    }
}

/// Keeps lines in memory, for tests and embedding
#[derive(Debug, Default)]
pub struct CapturedConsole {
    lines: Mutex<Vec<String>>,
}

impl CapturedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines logged so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl Console for CapturedConsole {
    fn log(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
