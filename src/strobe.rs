use crate::pulses::Coprocessor;
use crate::Error;

const WORD_BITS: core::ops::RangeInclusive<u8> = 1..=32;

/// Word output through the `strobe` program.
///
/// Each word is shifted out MSB first, `width` bits per strobe, for
/// consumers that latch parallel data on a falling edge.
pub struct Strobe<C> {
    sm: C,
    word_bits: u8,
}

impl<C: Coprocessor> Strobe<C> {
    /// Starts `sm` from its entry point.
    ///
    /// # Arguments
    ///
    /// * `sm` - Machine loaded with the strobe program.
    /// * `word_bits` - Bits per word, 1 to 32. Must match the autopull
    ///   threshold the machine was built with.
    pub fn new(mut sm: C, word_bits: u8) -> Result<Self, Error> {
        if !WORD_BITS.contains(&word_bits) {
            error!("strobe word of {} bits", word_bits);
            return Err(Error::InvalidWidth);
        }
        sm.restart();
        sm.set_enabled(true);
        Ok(Self { sm, word_bits })
    }

    pub fn write(&mut self, word: u32) {
        // Bits above `word_bits` fall off the top.
        self.sm.push(word << (32 - self.word_bits as u32));
    }

    pub fn write_all(&mut self, words: &[u32]) {
        for &word in words {
            self.write(word);
        }
    }

    /// Blocks until every queued word has been strobed out.
    pub fn flush(&mut self) {
        self.sm.take_tx_stall();
        while !self.sm.take_tx_stall() {
            core::hint::spin_loop();
        }
    }

    pub fn release(mut self) -> C {
        self.flush();
        self.sm.set_enabled(false);
        self.sm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionFlag;
    use crate::sim::{Bench, Machine, Side, SimPort};

    static IDLE: CompletionFlag = CompletionFlag::new();

    #[test]
    fn nibbles_leave_most_significant_first() {
        let bench = Bench::new(Machine::strobe(4, 8), Machine::generator(&IDLE)).into_shared();
        let mut strobe = Strobe::new(SimPort::new(&bench, Side::Timer), 8).unwrap();

        strobe.write_all(&[0xa5, 0x3c]);
        strobe.flush();

        assert_eq!(bench.borrow().timer.strobes, [0xa, 0x5, 0x3, 0xc]);
    }

    #[test]
    fn flush_waits_for_a_backlog() {
        let bench = Bench::new(Machine::strobe(8, 8), Machine::generator(&IDLE)).into_shared();
        let mut strobe = Strobe::new(SimPort::new(&bench, Side::Timer), 8).unwrap();
        let words: Vec<u32> = (0..12).collect();

        strobe.write_all(&words);
        strobe.release();

        let bench = bench.borrow();
        assert_eq!(bench.timer.strobes, words);
        assert!(!bench.timer.enabled);
    }

    #[test]
    fn word_width_is_checked_before_starting() {
        let bench = Bench::new(Machine::strobe(8, 8), Machine::generator(&IDLE)).into_shared();
        for word_bits in [0, 33] {
            assert_eq!(
                Strobe::new(SimPort::new(&bench, Side::Timer), word_bits).err(),
                Some(Error::InvalidWidth)
            );
        }
        assert!(!bench.borrow().timer.enabled);
        assert!(bench.borrow().timer.tx.is_empty());
    }

    #[test]
    fn full_width_words_are_not_shifted() {
        let bench = Bench::new(Machine::strobe(8, 32), Machine::generator(&IDLE)).into_shared();
        let mut strobe = Strobe::new(SimPort::new(&bench, Side::Timer), 32).unwrap();

        strobe.write(0x1234_5678);
        strobe.release();

        assert_eq!(bench.borrow().timer.strobes, [0x12, 0x34, 0x56, 0x78]);
    }
}
