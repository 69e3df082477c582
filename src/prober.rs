use crossbeam::channel;
use std::error::Error;
use std::io;
use std::net::IpAddr;

use crate::config::{CycleTiming, ProberConfig};
use crate::receiver::{self, ReceiveSummary};
use crate::run::RunId;
use crate::schedule::{Clock, InterruptSignal, Scheduler, SystemClock};
use crate::sender;
use crate::sink::{ConsoleSink, CsvSink, SampleSink};
use crate::transport::Transport;

/// Outcome of a single probe cycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub run: RunId,
    pub sent: usize,
    pub received: ReceiveSummary,
}

/// Latency prober for one target and connection index
///
/// The `Prober` owns the raw socket, the sample sink and the cycle counter. Each probe cycle
/// sends a burst of stamped echo requests from the calling thread while a scoped thread collects
/// the replies. The two are joined before the cycle returns, so cycles never overlap.
pub struct Prober<C: Clock = SystemClock> {
    config: ProberConfig,
    target: IpAddr,
    transport: Transport,
    sink: Box<dyn SampleSink>,
    timing: CycleTiming,
    cycles: u64,
    clock: C,
}

impl Prober {
    /// Set up a new prober from its configuration
    ///
    /// Validates the configuration, resolves the target, opens the raw socket and creates the
    /// sink, in this order. A sink file is only truncated once the prober is able to probe.
    ///
    /// # Errors
    ///
    /// Every error here is fatal: an invalid configuration, an unresolvable target, a sink file
    /// that cannot be created or a socket that cannot be opened.
    pub fn init(config: ProberConfig) -> Result<Self, Box<dyn Error>> {
        config.validate()?;

        let target = IpAddr::V4(config.target.resolve()?);

        let transport = Transport::open(&config.proto)?;

        let sink: Box<dyn SampleSink> = match config.sink_path()? {
            Some(path) => match CsvSink::create(&path) {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    return Err(format!("cannot create sink file {}: {}", path.display(), e).into())
                }
            },
            None => Box::new(ConsoleSink::new(config.label())),
        };

        info!(
            "Prober from {} to {} ({}) ready on connection {}",
            config.source, config.target, target, config.conn_index
        );

        Ok(Self::with_parts(
            config,
            target,
            transport,
            sink,
            CycleTiming::default(),
            SystemClock,
        ))
    }
}

impl<C: Clock> Prober<C> {
    /// Assemble a prober from already opened parts
    pub fn with_parts(
        config: ProberConfig,
        target: IpAddr,
        transport: Transport,
        sink: Box<dyn SampleSink>,
        timing: CycleTiming,
        clock: C,
    ) -> Self {
        Self {
            config,
            target,
            transport,
            sink,
            timing,
            cycles: 0,
            clock,
        }
    }

    /// Run a single probe cycle to completion
    ///
    /// The receive pass is started before the first packet leaves and collects replies for the
    /// reply window of the cycle timing, which closes just before the next cycle is due.
    ///
    /// # Errors
    ///
    /// Fails if a request cannot be built, the sink refuses a sample or one of the passes panics.
    pub fn run_cycle(&mut self) -> io::Result<CycleReport> {
        self.cycles += 1;
        let run = RunId::new(self.cycles, &mut rand::thread_rng());
        let deadline = self.clock.now() + self.timing.reply_window();

        // Bounded by the burst size, so the sender never blocks on it
        let (tx, rx) = channel::bounded(self.timing.packets);

        let Transport { writer, reader } = &mut self.transport;
        let sink = &mut self.sink;
        let clock = &self.clock;
        let target = self.target;
        let timing = self.timing;

        let (sent, received) = crossbeam::scope(|s| {
            let receiving = s.spawn(move |_| {
                receiver::receive_replies(&mut **reader, &mut **sink, clock, run, deadline, rx)
            });
            let sent = sender::send_burst(&mut **writer, clock, target, run, &timing, tx);
            (sent, receiving.join())
        })
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "probe cycle panicked"))?;

        let received = received
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "receive pass panicked"))??;
        let sent = sent?;

        debug!(
            "Run {} finished: sent={} samples={} foreign={} duplicates={} missing={}",
            run, sent, received.samples, received.foreign, received.duplicates, received.outstanding
        );

        Ok(CycleReport {
            run,
            sent,
            received,
        })
    }

    /// Probe once per cycle period until `interrupt` is raised
    ///
    /// A cycle in progress when the interrupt arrives runs to completion. Afterwards the sink is
    /// flushed and closed and the socket released.
    ///
    /// Returns the number of completed cycles.
    ///
    /// # Errors
    ///
    /// A failing cycle ends the prober. The sink is still closed before the error is passed on.
    pub fn run(mut self, interrupt: &InterruptSignal) -> io::Result<u64> {
        let clock = self.clock.clone();
        let outcome = Scheduler::new(self.timing.period)
            .run(&clock, interrupt, || self.run_cycle().map(|_| ()));

        let closed = self.shutdown();
        let cycles = outcome?;
        closed?;
        Ok(cycles)
    }

    /// Flush and close the sink, then release the socket
    fn shutdown(mut self) -> io::Result<()> {
        trace!("Shutting down prober {}", self.config.label());

        let closed = self.sink.close();
        if let Err(e) = &closed {
            error!("Cannot close sink of prober {}: {}", self.config.label(), e);
        }
        self.transport.close();
        closed
    }
}
