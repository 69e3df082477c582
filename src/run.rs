use rand::Rng;
use std::fmt;

/// Identifier of a single probe cycle
///
/// The run id is the echo identifier of every packet sent during one cycle. Its 16 bits are
/// split in two halves:
///
/// ```text
///  cycle counter (mod 256)  |  random byte
///  -- -- -- -- -- -- -- --  |  -- -- -- -- -- -- -- --
/// ```
///
/// The high byte tells consecutive cycles of the same prober apart and doubles as the base of
/// the cycle's sequence numbers. The random low byte keeps probers that run side by side on the
/// same host, and therefore read each other's replies, from claiming each other's packets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RunId(u16);

impl RunId {
    /// Draw a fresh run id for the given cycle counter
    pub fn new<R: Rng + ?Sized>(cycle: u64, rng: &mut R) -> Self {
        Self::from_parts(cycle, rng.gen::<u8>())
    }

    /// Assemble a run id from the cycle counter and the random byte
    pub fn from_parts(cycle: u64, random: u8) -> Self {
        Self((((cycle % 256) as u16) << 8) | u16::from(random))
    }

    /// Value placed into the identifier field of the echo header
    pub fn id(self) -> u16 {
        self.0
    }

    /// First sequence number of the cycle
    pub fn sequence_base(self) -> u16 {
        self.0 & 0xff00
    }

    /// Sequence number of the `index`th packet in the cycle
    pub fn sequence(self, index: usize) -> u16 {
        self.sequence_base().wrapping_add(index as u16)
    }

    /// Check whether a reply belongs to this cycle
    ///
    /// The identifier is the only real discriminant. Every sequence number of a cycle shares the
    /// high byte with the run id, so the second comparison holds for all of our own packets. The
    /// low byte of the sequence number is not checked against the packets actually sent;
    /// duplicates are caught by the receiver instead.
    pub fn matches(self, reply_id: u16, reply_seq: u16) -> bool {
        self.0 == reply_id && self.0 >> 8 == reply_seq >> 8
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn run_id_layout() {
        for &cycle in &[0u64, 1, 42, 255, 256, 257, 1 << 40, u64::MAX] {
            for &random in &[0u8, 1, 0x7f, 0xff] {
                let run = RunId::from_parts(cycle, random);
                assert_eq!(run.id() >> 8, (cycle % 256) as u16);
                assert_eq!(run.id() & 0xff, u16::from(random));
            }
        }
    }

    #[test]
    fn run_id_takes_random_byte_from_rng() {
        let mut rng = StepRng::new(0x2a, 0);
        let run = RunId::new(3, &mut rng);
        assert_eq!(run.id(), 0x032a);
    }

    #[test]
    fn cycle_counter_wraps() {
        assert_eq!(RunId::from_parts(256, 9), RunId::from_parts(0, 9));
        assert_ne!(RunId::from_parts(1, 9), RunId::from_parts(2, 9));
    }

    #[test]
    fn matches_every_sequence_of_the_cycle() {
        let run = RunId::from_parts(7, 0xc3);
        assert_eq!(run.sequence_base(), 0x0700);

        for index in 0..3 {
            let seq = run.sequence(index);
            assert_eq!(seq >> 8, run.id() >> 8);
            assert!(run.matches(run.id(), seq));
        }
    }

    #[test]
    fn rejects_foreign_identifiers() {
        let run = RunId::from_parts(7, 0xc3);
        let seq = run.sequence(1);

        // Same cycle counter but another prober
        assert!(!run.matches(0x07c4, seq));
        // Previous cycle of this prober
        assert!(!run.matches(RunId::from_parts(6, 0xc3).id(), seq));
        assert!(!run.matches(0, seq));
    }

    #[test]
    fn accepts_stray_low_byte() {
        let run = RunId::from_parts(1, 0x10);
        assert!(run.matches(run.id(), 0x01ff));
    }
}
