use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A thread-safe boolean representing the receipt of an interrupt or termination signal
pub type InterruptSignal = Arc<AtomicBool>;

/// Source of time for the probing engine
///
/// Monotonic time drives deadlines and the cadence of cycles, wall clock time is what gets
/// embedded into the echo requests.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> Instant;

    /// Wall clock time in nanoseconds since the Unix epoch
    fn unix_nanos(&self) -> i64;

    fn sleep(&self, duration: Duration);
}

/// The operating system's clocks
#[derive(Debug, Copy, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_nanos(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        }
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration)
    }
}

/// Repeats a probe cycle at a fixed cadence
///
/// The first cycle fires one period after start. Cycles never overlap: a cycle that overruns its
/// period delays the next one, which then starts right away. Ticks missed in the meantime are
/// dropped rather than caught up on.
#[derive(Debug, Copy, Clone)]
pub struct Scheduler {
    period: Duration,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Run `cycle` once per period until `interrupt` is raised
    ///
    /// The interrupt is only checked between cycles, so a running cycle always completes.
    /// Returns the number of completed cycles.
    ///
    /// # Errors
    ///
    /// The first error returned by `cycle` ends the schedule and is passed on.
    pub fn run<C, F, E>(&self, clock: &C, interrupt: &AtomicBool, mut cycle: F) -> Result<u64, E>
    where
        C: Clock,
        F: FnMut() -> Result<(), E>,
    {
        let mut completed = 0;
        let mut next = clock.now() + self.period;

        while !interrupt.load(Ordering::SeqCst) {
            let now = clock.now();
            if next > now {
                clock.sleep(next - now);
            }
            if interrupt.load(Ordering::SeqCst) {
                break;
            }

            cycle()?;
            completed += 1;

            next += self.period;
            let now = clock.now();
            if next < now {
                debug!("Probe cycle overran its period by {:?}", now - next);
                next = now;
            }
        }

        trace!("Schedule stopped after {} cycles", completed);

        Ok(completed)
    }
}

/// Clock that only moves when slept on
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct FakeClock {
    base: Instant,
    base_nanos: i64,
    state: Arc<std::sync::Mutex<FakeState>>,
}

#[cfg(test)]
#[derive(Default)]
struct FakeState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_nanos: 1_600_000_000_000_000_000,
            state: Default::default(),
        }
    }

    /// Move time forward without sleeping
    pub fn advance(&self, duration: Duration) {
        self.state.lock().unwrap().elapsed += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.state.lock().unwrap().elapsed
    }

    fn unix_nanos(&self) -> i64 {
        self.base_nanos + self.state.lock().unwrap().elapsed.as_nanos() as i64
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}
