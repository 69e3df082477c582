use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Header row of the CSV sink
pub const CSV_HEADER: &str = "dst,rtt";

/// One round-trip time measured from a matched echo reply
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Address the echo reply came from
    pub source: IpAddr,
    pub rtt: Duration,
}

/// Consumer of round-trip samples
///
/// A sink belongs to exactly one prober. Samples are recorded in the order the replies arrived.
pub trait SampleSink: Send {
    /// Record a single sample
    ///
    /// # Errors
    ///
    /// A sample that cannot be recorded ends the prober, as the record would be incomplete.
    fn record(&mut self, sample: &Sample) -> io::Result<()>;

    /// Flush and release the sink
    ///
    /// Calling this more than once has no further effect.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Two-column CSV table of samples
///
/// Each row holds the address of the replying host and the round-trip time in nanoseconds.
pub struct CsvSink<W: Write + Send = BufWriter<File>> {
    out: Option<W>,
    rows: u64,
}

impl CsvSink {
    /// Create the file at `path` and write the header row
    ///
    /// An existing file is truncated.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;

        info!("Recording samples to {}", path.as_ref().display());

        Self::from_writer(BufWriter::new(file))
    }
}

impl<W: Write + Send> CsvSink<W> {
    /// Start a new table on any writer
    pub fn from_writer(mut out: W) -> io::Result<Self> {
        writeln!(out, "{}", CSV_HEADER)?;
        Ok(Self {
            out: Some(out),
            rows: 0,
        })
    }
}

impl<W: Write + Send> SampleSink for CsvSink<W> {
    fn record(&mut self, sample: &Sample) -> io::Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "csv sink is closed"))?;
        writeln!(out, "{},{}", sample.source, sample.rtt.as_nanos())?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;

            debug!("Closed csv sink after {} rows", self.rows);
        }
        Ok(())
    }
}

impl<W: Write + Send> Drop for CsvSink<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Cannot close csv sink: {}", e);
        }
    }
}

/// Prints every sample to standard output
pub struct ConsoleSink {
    label: String,
}

impl ConsoleSink {
    pub fn new(label: String) -> Self {
        Self { label }
    }

    /// Console row of a sample, e.g. `10.0.0.1#0: reply from 10.0.0.1: rtt=2.500 ms`
    fn line(&self, sample: &Sample) -> String {
        format!(
            "{}: reply from {}: rtt={:.3} ms",
            self.label,
            sample.source,
            sample.rtt.as_secs_f64() * 1000f64
        )
    }
}

impl SampleSink for ConsoleSink {
    fn record(&mut self, sample: &Sample) -> io::Result<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", self.line(sample))
    }
}

/// Sink keeping samples in memory, shared with the test that created it
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct MemorySink {
    pub samples: std::sync::Arc<std::sync::Mutex<Vec<Sample>>>,
    pub closed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl MemorySink {
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn times_closed(&self) -> usize {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl SampleSink for MemorySink {
    fn record(&mut self, sample: &Sample) -> io::Result<()> {
        self.samples.lock().unwrap().push(*sample);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
