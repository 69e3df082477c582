use std::error::Error;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::receiver::MIN_READ_TIMEOUT;

/// Number of echo requests sent per probe cycle
pub const PACKETS_PER_CYCLE: usize = 3;

/// Pause between two echo requests of the same cycle
pub const PACKET_INTERVAL: Duration = Duration::from_millis(300);

/// Time between the start of two consecutive probe cycles
pub const CYCLE_PERIOD: Duration = Duration::from_millis(1000);

/// Protocol selector used when none is given on the command line
pub const DEFAULT_PROTOCOL: &str = "ip4:icmp";

/// Errors that stop the application before any probe goes out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The prober has no protocol selector to open its socket with
    MissingProtocol { source: String },
    /// The protocol selector names something other than ICMP over IPv4
    UnsupportedProtocol(String),
    /// The burst of a cycle does not fit into the cycle period
    CycleTooShort {
        packets: usize,
        interval: Duration,
        period: Duration,
    },
    /// The sink path template lacks the `%d` or `%s` placeholder
    BadSinkTemplate(String),
    /// The target is an IPv6 address or resolves to no IPv4 address
    UnsupportedTarget(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProtocol { source } => {
                write!(f, "the prober from host {} misses a protocol selector", source)
            }
            Self::UnsupportedProtocol(proto) => {
                write!(f, "unsupported protocol selector '{}', expected ip4:icmp", proto)
            }
            Self::CycleTooShort {
                packets,
                interval,
                period,
            } => write!(
                f,
                "{} packets every {:?} do not fit into a cycle period of {:?}",
                packets, interval, period
            ),
            Self::BadSinkTemplate(template) => write!(
                f,
                "sink path template requires '%d' and '%s': {}",
                template
            ),
            Self::UnsupportedTarget(target) => {
                write!(f, "target {} has no IPv4 address", target)
            }
        }
    }
}

impl Error for ConfigError {}

/// Timing of a probe cycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CycleTiming {
    pub packets: usize,
    pub packet_interval: Duration,
    pub period: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            packets: PACKETS_PER_CYCLE,
            packet_interval: PACKET_INTERVAL,
            period: CYCLE_PERIOD,
        }
    }
}

impl CycleTiming {
    /// Check that a whole burst of packets is sent before the next cycle is due
    ///
    /// This is a static property of the configuration and is checked once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let burst = self.packet_interval * self.packets as u32;
        if self.packets == 0 || burst > self.period {
            return Err(ConfigError::CycleTooShort {
                packets: self.packets,
                interval: self.packet_interval,
                period: self.period,
            });
        }
        Ok(())
    }

    /// Time the receive pass of a cycle waits for replies, measured from the cycle start
    ///
    /// Ends one minimal read before the next tick, so a cycle that lost replies does not push
    /// back the next one.
    pub fn reply_window(&self) -> Duration {
        self.period
            .checked_sub(MIN_READ_TIMEOUT)
            .filter(|window| *window > Duration::from_secs(0))
            .unwrap_or(self.period)
    }
}

/// Destination of a prober
///
/// Either an IPv4 address or a host name, which is resolved when the prober is initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    Ip(Ipv4Addr),
    Host(String),
}

impl Dest {
    /// Interpret a command line argument as destination
    pub fn parse(arg: &str) -> Result<Self, ConfigError> {
        match arg.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => Ok(Dest::Ip(ip)),
            Ok(IpAddr::V6(_)) => Err(ConfigError::UnsupportedTarget(arg.to_string())),
            Err(_) => Ok(Dest::Host(arg.to_string())),
        }
    }

    /// Resolve this destination to the address echo requests are sent to
    ///
    /// # Errors
    ///
    /// Lookup failures are passed on. A host without any IPv4 address is a configuration error.
    pub fn resolve(&self) -> Result<Ipv4Addr, Box<dyn Error>> {
        use dns_lookup::lookup_host;

        match self {
            Dest::Ip(ip) => Ok(*ip),
            Dest::Host(host) => {
                let addr = lookup_host(host)?
                    .into_iter()
                    .find_map(|addr| match addr {
                        IpAddr::V4(ip) => Some(ip),
                        IpAddr::V6(_) => None,
                    })
                    .ok_or_else(|| ConfigError::UnsupportedTarget(host.clone()))?;

                info!("Resolved host {} to IP {}", host, addr);

                Ok(addr)
            }
        }
    }
}

impl fmt::Display for Dest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dest::Ip(ip) => write!(f, "{}", ip),
            Dest::Host(host) => write!(f, "{}", host),
        }
    }
}

/// Configuration of a single prober
///
/// There is exactly one prober per target and parallel connection index. The configuration is
/// consumed by the `Prober` and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProberConfig {
    /// Network protocol selector, e.g. `ip4:icmp`
    pub proto: String,
    /// Description of the probing host, only used in log output
    pub source: String,
    pub target: Dest,
    /// Path template for the CSV sink, `None` prints samples to the console
    pub csv: Option<String>,
    pub conn_index: usize,
}

impl ProberConfig {
    /// Reject a configuration that cannot be probed with, before anything is opened
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proto.is_empty() {
            return Err(ConfigError::MissingProtocol {
                source: self.source.clone(),
            });
        }
        if let Some(template) = &self.csv {
            check_template(template)?;
        }
        Ok(())
    }

    /// Path of the CSV file for this prober, if a template is configured
    ///
    /// `%d` is replaced by the connection index and `%s` by the target as given by the user.
    pub fn sink_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        match &self.csv {
            Some(template) => {
                check_template(template)?;
                let path = template
                    .replacen("%d", &self.conn_index.to_string(), 1)
                    .replacen("%s", &self.target.to_string(), 1);
                Ok(Some(PathBuf::from(path)))
            }
            None => Ok(None),
        }
    }

    /// Name of this prober in log output and thread names
    pub fn label(&self) -> String {
        format!("{}#{}", self.target, self.conn_index)
    }
}

fn check_template(template: &str) -> Result<(), ConfigError> {
    if template.contains("%d") && template.contains("%s") {
        Ok(())
    } else {
        Err(ConfigError::BadSinkTemplate(template.to_string()))
    }
}
