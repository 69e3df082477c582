use crossbeam::channel::Receiver;
use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::packet::{self, IcmpMessage, ReadError, READ_BUFFER_SIZE};
use crate::run::RunId;
use crate::schedule::Clock;
use crate::sink::{Sample, SampleSink};
use crate::transport::EchoReader;

/// Lower bound for the wait on a single read
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Verdict on a single ICMP message
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A reply to one of our packets, seen for the first time
    Accepted(Sample),
    /// Any message other than an echo reply
    Ignored,
    /// An echo reply from another prober or an earlier cycle
    Foreign,
    Duplicate,
}

/// Bookkeeping of the receive pass of one cycle
///
/// The tracker counts the packets in flight and remembers the `(source, sequence)` pairs already
/// answered. Its state lives exactly as long as one cycle.
#[derive(Debug)]
pub struct ReplyTracker {
    run: RunId,
    outstanding: usize,
    seen: HashSet<(IpAddr, u16)>,
    summary: ReceiveSummary,
}

/// Outcome of a receive pass
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub samples: usize,
    pub foreign: usize,
    pub duplicates: usize,
    /// Packets still unanswered when the pass ended
    pub outstanding: usize,
}

impl ReplyTracker {
    pub fn new(run: RunId) -> Self {
        Self {
            run,
            outstanding: 0,
            seen: HashSet::with_capacity(4),
            summary: ReceiveSummary::default(),
        }
    }

    /// Register one more packet in flight
    pub fn sent(&mut self) {
        self.outstanding += 1;
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Judge a message that arrived at `now`, in nanoseconds since the Unix epoch
    ///
    /// Only an accepted reply settles an outstanding packet.
    pub fn judge(&mut self, source: IpAddr, message: IcmpMessage, now: i64) -> Verdict {
        let reply = match message {
            IcmpMessage::EchoReply(reply) => reply,
            IcmpMessage::Other(_) => return Verdict::Ignored,
        };
        let rtt = reply.rtt(now);

        if !self.run.matches(reply.id, reply.seq) {
            debug!(
                "Reply from={} id={:#06x} seq={:#06x} rtt={:?} does not belong to run {}",
                source, reply.id, reply.seq, rtt, self.run
            );
            self.summary.foreign += 1;
            return Verdict::Foreign;
        }

        if !self.seen.insert((source, reply.seq)) {
            debug!(
                "Duplicate reply from={} id={:#06x} seq={:#06x} rtt={:?}",
                source, reply.id, reply.seq, rtt
            );
            self.summary.duplicates += 1;
            return Verdict::Duplicate;
        }

        trace!("Reply from={} seq={:#06x} rtt={:?}", source, reply.seq, rtt);

        self.outstanding = self.outstanding.saturating_sub(1);
        self.summary.samples += 1;
        Verdict::Accepted(Sample { source, rtt })
    }

    /// Finish the pass
    pub fn summarize(self) -> ReceiveSummary {
        ReceiveSummary {
            outstanding: self.outstanding,
            ..self.summary
        }
    }
}

/// Collect the replies of one probe cycle
///
/// Runs alongside `send_burst`. While no packet is outstanding, the pass blocks on `in_flight`
/// for the next token; a closed and drained channel means every reply has been accounted for.
/// Otherwise it reads the next message off the socket, waiting no longer than `deadline`, which
/// keeps a lost reply from stalling the cycle. Every accepted reply goes to the sink right away.
///
/// Read errors other than the timeout are logged and reading continues.
///
/// # Errors
///
/// A sample that cannot be recorded by the sink is passed on.
pub fn receive_replies<C: Clock>(
    reader: &mut dyn EchoReader,
    sink: &mut dyn SampleSink,
    clock: &C,
    run: RunId,
    deadline: Instant,
    in_flight: Receiver<()>,
) -> io::Result<ReceiveSummary> {
    let mut tracker = ReplyTracker::new(run);
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        if tracker.outstanding() == 0 {
            match in_flight.recv() {
                Ok(()) => tracker.sent(),
                Err(_) => break,
            }
        }

        let now = clock.now();
        if now >= deadline {
            debug!("Run {} passed its deadline with {} replies missing", run, tracker.outstanding());
            break;
        }
        let timeout = (deadline - now).max(MIN_READ_TIMEOUT);

        let (source, message) = match packet::decode(reader, &mut buf, timeout) {
            Ok(received) => received,
            Err(ReadError::Timeout) => {
                debug!("Run {} timed out with {} replies missing", run, tracker.outstanding());
                break;
            }
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        if let Verdict::Accepted(sample) = tracker.judge(source, message, clock.unix_nanos()) {
            sink.record(&sample)?;
        }
    }

    Ok(tracker.summarize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::EchoReply;
    use crate::schedule::FakeClock;
    use crate::sink::MemorySink;
    use crossbeam::channel;
    use pnet::packet::icmp::IcmpTypes;
    use std::net::Ipv4Addr;

    /// Reader whose every read fails after taking `cost` of the clock's time
    struct FailingReader {
        clock: FakeClock,
        cost: Duration,
        reads: usize,
        timeouts: Vec<Duration>,
    }

    impl EchoReader for FailingReader {
        fn read_from(&mut self, _buf: &mut [u8], timeout: Duration) -> io::Result<(IpAddr, usize)> {
            self.reads += 1;
            self.timeouts.push(timeout);
            self.clock.advance(self.cost);
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn reply(run: RunId, index: usize, sent_at: i64) -> IcmpMessage {
        IcmpMessage::EchoReply(EchoReply {
            id: run.id(),
            seq: run.sequence(index),
            sent_at,
        })
    }

    #[test]
    fn accepts_matching_reply() {
        let run = RunId::from_parts(4, 0x21);
        let mut tracker = ReplyTracker::new(run);
        tracker.sent();

        let verdict = tracker.judge(addr(1), reply(run, 0, 1_000), 4_000);

        assert_eq!(
            verdict,
            Verdict::Accepted(Sample {
                source: addr(1),
                rtt: Duration::from_nanos(3_000)
            })
        );
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn drops_duplicate_reply() {
        let run = RunId::from_parts(4, 0x21);
        let mut tracker = ReplyTracker::new(run);
        tracker.sent();
        tracker.sent();

        assert!(matches!(tracker.judge(addr(1), reply(run, 0, 0), 5), Verdict::Accepted(_)));
        assert_eq!(tracker.judge(addr(1), reply(run, 0, 0), 9), Verdict::Duplicate);
        assert_eq!(tracker.outstanding(), 1);

        // Same sequence number from another host is a reply of its own
        assert!(matches!(tracker.judge(addr(2), reply(run, 0, 0), 9), Verdict::Accepted(_)));

        let summary = tracker.summarize();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.duplicates, 1);
    }

    #[test]
    fn foreign_reply_keeps_packet_outstanding() {
        let run = RunId::from_parts(4, 0x21);
        let previous = RunId::from_parts(3, 0x21);
        let mut tracker = ReplyTracker::new(run);
        tracker.sent();

        assert_eq!(tracker.judge(addr(1), reply(previous, 0, 0), 5), Verdict::Foreign);
        assert_eq!(tracker.outstanding(), 1);
        assert_eq!(tracker.summarize().foreign, 1);
    }

    #[test]
    fn ignores_other_messages() {
        let run = RunId::from_parts(4, 0x21);
        let mut tracker = ReplyTracker::new(run);
        tracker.sent();

        let verdict = tracker.judge(addr(1), IcmpMessage::Other(IcmpTypes::DestinationUnreachable), 5);

        assert_eq!(verdict, Verdict::Ignored);
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn pass_ends_at_deadline_despite_read_errors() {
        let clock = FakeClock::new();
        let mut reader = FailingReader {
            clock: clock.clone(),
            cost: Duration::from_millis(400),
            reads: 0,
            timeouts: Vec::new(),
        };
        let sink = MemorySink::default();
        let mut recording = sink.clone();
        let deadline = clock.now() + Duration::from_millis(1000);

        let (tx, rx) = channel::bounded(3);
        tx.send(()).unwrap();
        drop(tx);

        let summary = receive_replies(
            &mut reader,
            &mut recording,
            &clock,
            RunId::from_parts(1, 2),
            deadline,
            rx,
        )
        .unwrap();

        // Reads at 0, 400 and 800 ms, none once the clock stands at 1200 ms
        assert_eq!(reader.reads, 3);
        assert_eq!(
            reader.timeouts,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(600),
                Duration::from_millis(200)
            ]
        );
        assert_eq!(summary.outstanding, 1);
        assert_eq!(summary.samples, 0);
        assert!(sink.samples().is_empty());
    }
}
