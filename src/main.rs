#[macro_use]
extern crate log;

use rttprobe::{cli::App, schedule::InterruptSignal, CycleTiming, Prober};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn main() {
    let configs = match App::parse_args() {
        Ok(configs) => configs,
        Err(e) => {
            error!("Could not parse provided argument: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = CycleTiming::default().validate() {
        error!("Invalid probe timing: {}", e);
        std::process::exit(1);
    }

    let interrupt = InterruptSignal::new(AtomicBool::new(false));
    let set_signal = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        set_signal.store(true, Ordering::SeqCst);

        trace!("Registered interrupt -- Signalling shut down to probers")
    }) {
        error!("Could not install signal handler: {}", e);
        std::process::exit(1);
    }

    trace!("Set up {} probers", configs.len());

    // Every prober is set up before the first probe goes out
    let mut probers = Vec::with_capacity(configs.len());
    for config in configs {
        let label = config.label();
        match Prober::init(config) {
            Ok(prober) => probers.push((label, prober)),
            Err(e) => {
                error!("Could not configure prober {}: {}", label, e);

                // `exit` skips destructors, close the sinks opened so far first
                drop(probers);
                std::process::exit(1);
            }
        }
    }

    let mut healthy = true;
    let mut handles = Vec::with_capacity(probers.len());
    for (label, prober) in probers {
        let signal = interrupt.clone();
        let spawned = thread::Builder::new().name(label.clone()).spawn(move || {
            match prober.run(&signal) {
                Ok(cycles) => {
                    info!("Stopped after {} probe cycles", cycles);
                    true
                }
                Err(e) => {
                    error!("Prober failed: {}", e);
                    false
                }
            }
        });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!("Could not start prober {}: {}", label, e);

                // Stop the probers already running and report failure once they are done
                interrupt.store(true, Ordering::SeqCst);
                healthy = false;
                break;
            }
        }
    }

    for handle in handles {
        match handle.join() {
            Ok(ok) => healthy &= ok,
            Err(_) => {
                warn!("A prober thread panicked");
                healthy = false;
            }
        }
    }

    trace!("Shutting down...");

    if !healthy {
        std::process::exit(1);
    }
}
