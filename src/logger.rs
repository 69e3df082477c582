use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{stderr, stdout, Write};
use std::sync::{Mutex, Once};
use std::thread;

/// Log implementation for standard output streams
///
/// Every line is prefixed with a marker for its level and the name of the emitting thread. Each
/// prober runs on a thread named after its target and connection index, so interleaved output of
/// parallel probers stays attributable.
pub struct StdLogger(Mutex<()>);

impl StdLogger {
    /// Initialize logger
    ///
    /// Even if this function is called multiple times, initialization will only be done once.
    ///
    /// If initialization of the logger fails, the initializer will become poisoned and subsequent
    /// calls to this function will automatically fail, too.
    pub fn init(level: LevelFilter) {
        static INIT: Once = Once::new();

        // Initialization may run from more than one thread
        INIT.call_once(|| {
            if log::set_boxed_logger(Box::new(StdLogger(Mutex::new(())))).is_ok() {
                log::set_max_level(level);
            }
        });
    }

    /// Map the number of `-v` flags to a level filter
    pub fn level_for(verbosity: u64) -> LevelFilter {
        match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn prefix(level: Level) -> &'static str {
        match level {
            Level::Error | Level::Warn => "[-]",
            Level::Info => "[i]",
            _ => "[+]",
        }
    }

    /// Format a record as emitted by the thread named `thread`
    fn line(record: &Record, thread: &str) -> String {
        format!("{} [{}] {}", Self::prefix(record.level()), thread, record.args())
    }
}

impl Log for StdLogger {
    /// This logger is enabled by default
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    /// Internal call to `write`
    fn log(&self, record: &Record) {
        let _guard = self.0.lock();
        let current = thread::current();
        let line = Self::line(record, current.name().unwrap_or("main"));

        if record.level() == Level::Error {
            let stderr = stderr();
            let mut handle = stderr.lock();
            let _ = writeln!(handle, "{}", line);
        } else {
            let stdout = stdout();
            let mut handle = stdout.lock();
            let _ = writeln!(handle, "{}", line);
        }
    }

    /// Flush buffered output stream
    fn flush(&self) {
        let _ = stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_markers() {
        assert_eq!(StdLogger::prefix(Level::Error), "[-]");
        assert_eq!(StdLogger::prefix(Level::Warn), "[-]");
        assert_eq!(StdLogger::prefix(Level::Info), "[i]");
        assert_eq!(StdLogger::prefix(Level::Debug), "[+]");
        assert_eq!(StdLogger::prefix(Level::Trace), "[+]");
    }

    #[test]
    fn line_names_thread() {
        assert_eq!(
            StdLogger::line(
                &Record::builder()
                    .args(format_args!("Stopped after {} cycles", 4))
                    .level(Level::Info)
                    .build(),
                "10.0.0.1#0"
            ),
            "[i] [10.0.0.1#0] Stopped after 4 cycles"
        );
        assert_eq!(
            StdLogger::line(
                &Record::builder()
                    .args(format_args!("refused"))
                    .level(Level::Warn)
                    .build(),
                "main"
            ),
            "[-] [main] refused"
        );
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(StdLogger::level_for(0), LevelFilter::Warn);
        assert_eq!(StdLogger::level_for(1), LevelFilter::Info);
        assert_eq!(StdLogger::level_for(2), LevelFilter::Debug);
        assert_eq!(StdLogger::level_for(7), LevelFilter::Trace);
    }
}
