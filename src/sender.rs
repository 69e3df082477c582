use crossbeam::channel::Sender;
use std::io;
use std::net::IpAddr;

use crate::config::CycleTiming;
use crate::packet::EchoRequest;
use crate::run::RunId;
use crate::schedule::Clock;
use crate::transport::EchoWriter;

/// Send the burst of echo requests of one probe cycle
///
/// The `i`th packet carries the run id as identifier and `run.sequence(i)` as sequence number.
/// Each request is stamped right before it is handed to the transport. For every packet that
/// left the host, a token is passed to the receive pass over `in_flight`, then the sender waits
/// for the packet interval. The last packet is not followed by a wait.
///
/// A packet the transport refuses is logged and skipped without waiting. Consuming `in_flight`
/// closes the channel on return, telling the receive pass that no further packets follow.
///
/// Returns the number of packets sent.
///
/// # Errors
///
/// Only failing to build a request is an error. This is an invariant violation and ends the
/// prober.
pub fn send_burst<C: Clock>(
    writer: &mut dyn EchoWriter,
    clock: &C,
    target: IpAddr,
    run: RunId,
    timing: &CycleTiming,
    in_flight: Sender<()>,
) -> io::Result<usize> {
    let mut sent = 0;

    for index in 0..timing.packets {
        let seq = run.sequence(index);
        let request = EchoRequest::new(run.id(), seq, clock.unix_nanos())?;

        trace!("Request to={} id={} seq={:#06x}", target, run, seq);

        if let Err(e) = writer.write_to(request.as_bytes(), target) {
            warn!("Could not send echo request seq={:#06x} to {}: {}", seq, target, e);
            continue;
        }
        sent += 1;

        // The receive pass may already have given up on the cycle
        let _ = in_flight.send(());

        if index + 1 < timing.packets {
            clock.sleep(timing.packet_interval);
        }
    }

    trace!("Done sending {} packets for run {}", sent, run);

    Ok(sent)
}
