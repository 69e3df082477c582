//! # RTTPROBE latency prober
//!
//! This crate measures round-trip times to one or more targets with bursts of ICMP echo
//! requests. Every probe cycle consists of two halves running side by side:
//! - The send pass, which stamps each echo request with its departure time and hands a token
//!   to the receive pass for every packet that left the host
//! - The receive pass, which matches incoming echo replies against the identifier of the
//!   running cycle, drops duplicates and foreign traffic, and records one sample per reply
//!
//! The `Prober` owns the raw socket and the sample sink, and the `Scheduler` repeats the cycle
//! at a fixed cadence until the process is interrupted.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

pub mod cli;
pub mod config;
pub mod logger;
pub mod packet;
pub mod prober;
pub mod receiver;
pub mod run;
pub mod schedule;
pub mod sender;
pub mod sink;
pub mod transport;

pub use config::{ConfigError, CycleTiming, Dest, ProberConfig};
pub use prober::Prober;
