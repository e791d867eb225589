use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;

pub const MAX_DIAGNOSTIC_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub message: String,
    pub file: String,
    pub line: u32,
    pub function: String,
    pub timestamp: DateTime<Local>,
}

/// Trace of one operation (a connection attempt, a command exchange).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticData {
    pub id: String,
    pub start_time: DateTime<Local>,
    pub last_update_time: DateTime<Local>,
    pub entries: VecDeque<DiagnosticEntry>,
}

impl DiagnosticData {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id: id.into(),
            start_time: now,
            last_update_time: now,
            entries: VecDeque::new(),
        }
    }

    /// Starts a new trace under `id`, dropping previous entries.
    pub fn restart(&mut self, id: impl Into<String>) {
        *self = Self::new(id);
    }

    pub fn add_entry(&mut self, message: impl Into<String>, file: &str, line: u32, function: &str) {
        let now = Local::now();
        if self.entries.len() == MAX_DIAGNOSTIC_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(DiagnosticEntry {
            message: message.into(),
            file: short_file_name(file).to_string(),
            line,
            function: function.to_string(),
            timestamp: now,
        });
        self.last_update_time = now;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Diagnostic ID: {}", self.id);
        let _ = writeln!(out, "Start Time: {}", self.start_time.format("%Y-%m-%d %H:%M:%S%.3f"));
        let _ = writeln!(
            out,
            "Last Update: {}",
            self.last_update_time.format("%Y-%m-%d %H:%M:%S%.3f")
        );
        let _ = writeln!(out, "Entries: {}", self.entries.len());

        for (index, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{:3}] {} - {}({}) - {}: {}",
                index,
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.file,
                entry.line,
                entry.function,
                entry.message
            );
        }
        out
    }
}

fn short_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Records a diagnostic entry tagged with the call site.
#[macro_export]
macro_rules! capture_diagnostic {
    ($data:expr, $($arg:tt)*) => {
        $data.add_entry(format!($($arg)*), file!(), line!(), module_path!())
    };
}
