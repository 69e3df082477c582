//! Command line interface

use clap::ArgMatches;
use std::error::Error;

use crate::config::{Dest, ProberConfig, DEFAULT_PROTOCOL};
use crate::logger::StdLogger;
use crate::transport::local_source_ip;

/// Application initialization
pub struct App;

impl App {
    /// Retrieve user input from command line
    ///
    /// The user can modify the following parameters of the application:
    /// - targets: One or more host names or IPv4 addresses (required)
    /// - connections: Number of parallel probers per target (default 1)
    /// - csv: File name template for recording samples, `%d` is replaced by the connection
    ///   index and `%s` by the target (default none, samples are printed)
    /// - proto: Protocol selector of the raw socket (default ip4:icmp)
    /// - verbose: Repeat to raise the log level from warn to info, debug and trace
    ///
    /// One `ProberConfig` is returned per target and connection index.
    pub fn parse_args() -> Result<Vec<ProberConfig>, Box<dyn Error>> {
        let matches = Self::app().get_matches();
        Self::configure(&matches)
    }

    fn app() -> clap::App<'static, 'static> {
        clap_app!(rttprobe =>
            (version: "0.1")
            (author: "Michael Prantl <michael.prantl@hotmail.de>")
            (about: "Measure round-trip times with bursts of ICMP echo requests")
            (@arg targets: +required +multiple "Host names or IPv4 addresses to probe")
            (@arg connections: -c --connections +takes_value "Number of parallel probers per target")
            (@arg csv: --csv +takes_value "Output file template for samples, e.g. rtt-%d-%s.csv")
            (@arg proto: -p --proto +takes_value "Protocol selector of the raw socket")
            (@arg verbose: -v --verbose +multiple "Sets the level of verbosity"))
    }

    fn configure(matches: &ArgMatches) -> Result<Vec<ProberConfig>, Box<dyn Error>> {
        StdLogger::init(StdLogger::level_for(matches.occurrences_of("verbose")));

        let connections = matches
            .value_of("connections")
            .unwrap_or("1")
            .parse::<usize>()?;
        if connections == 0 {
            warn!("No connections requested, nothing to probe");
        }

        let proto = matches.value_of("proto").unwrap_or(DEFAULT_PROTOCOL);
        let csv = matches.value_of("csv").map(String::from);

        // Only for log output, probing works without it
        let source = local_source_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let mut configs = Vec::new();
        let mut targets: Vec<Dest> = Vec::new();
        for target in matches.values_of("targets").into_iter().flatten() {
            let target = Dest::parse(target)?;

            // One prober per target and connection index, or their sink files collide
            if targets.contains(&target) {
                warn!("Target {} given more than once, probing it once", target);
                continue;
            }
            targets.push(target.clone());

            for conn_index in 0..connections {
                let config = ProberConfig {
                    proto: proto.to_string(),
                    source: source.clone(),
                    target: target.clone(),
                    csv: csv.clone(),
                    conn_index,
                };
                config.validate()?;
                configs.push(config);
            }
        }

        trace!("Parsed {} prober configurations", configs.len());

        Ok(configs)
    }
}
