use embedded_hal::delay::DelayNs;

use crate::completion::{CompletionFlag, CAPTURE_DONE, GENERATE_DONE};
use crate::program::{CAPTURE_FIRST_OVERHEAD, CAPTURE_OVERHEAD, GENERATE_OVERHEAD};
use crate::Error;

pub const DEFAULT_START_TIMEOUT: u32 = 100_000;
pub const DEFAULT_BIT_TIMEOUT: u32 = 100_000;

/// Largest usable bit timeout. At `u32::MAX` the wrapped counter of a
/// saturated pulse is indistinguishable from an instant edge.
pub const MAX_BIT_TIMEOUT: u32 = u32::MAX - 1;

/// Sleep between completion checks while a pulse train is being generated.
pub const POLL_INTERVAL_MS: u32 = 1;

/// Sleep between completion checks once the last capture word has arrived.
const SETTLE_POLL_US: u32 = 1;

/// A state machine loaded with one of the pulse programs.
///
/// `push` and `pull` block on full and empty FIFOs. Implementations may
/// override `stream` and `drain` to move whole buffers by DMA; either way the
/// words are in flight or delivered when the call returns.
pub trait Coprocessor {
    /// Rerun the loaded program from its entry point.
    fn restart(&mut self);
    fn set_enabled(&mut self, enabled: bool);
    fn push(&mut self, word: u32);
    fn pull(&mut self) -> u32;

    fn stream(&mut self, words: &[u32]) {
        for &word in words {
            self.push(word);
        }
    }

    fn drain(&mut self, words: &mut [u32]) {
        for word in words {
            *word = self.pull();
        }
    }

    /// Reads and clears the "stalled on an empty input queue" flag.
    fn take_tx_stall(&mut self) -> bool;
}

/// Placeholder for a direction that is not bound to a pin.
pub enum Unbound {}

impl Coprocessor for Unbound {
    fn restart(&mut self) {
        match *self {}
    }

    fn set_enabled(&mut self, _: bool) {
        match *self {}
    }

    fn push(&mut self, _: u32) {
        match *self {}
    }

    fn pull(&mut self) -> u32 {
        match *self {}
    }

    fn take_tx_stall(&mut self) -> bool {
        match *self {}
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Level {
    Low = 0,
    /// Default start level of a generated train.
    #[default]
    High = 1,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for u32 {
    fn from(level: Level) -> Self {
        level as u32
    }
}

/// Parameters of one capture run, in the order the timer consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct RunParameters {
    /// Longest wait for the first transition.
    pub start_timeout: u32,
    pub pulse_count: u32,
    /// Longest countable pulse; longer pulses saturate.
    pub bit_timeout: u32,
}

impl RunParameters {
    pub fn new(pulse_count: u32) -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            pulse_count,
            bit_timeout: DEFAULT_BIT_TIMEOUT,
        }
    }
}

/// Fixed loop overhead added back to the sample at `index`.
pub fn capture_overhead(index: usize) -> u32 {
    if index == 0 {
        CAPTURE_FIRST_OVERHEAD
    } else {
        CAPTURE_OVERHEAD
    }
}

/// Value reported at `index` for a pulse that outlasted `bit_timeout`.
pub fn saturation(index: usize, bit_timeout: u32) -> u32 {
    bit_timeout
        .min(MAX_BIT_TIMEOUT)
        .saturating_add(capture_overhead(index))
}

/// Turns remaining-counter words from the timer into tick durations.
///
/// # Arguments
///
/// * `samples` - Words read from the timer, rewritten in place.
/// * `bit_timeout` - The bit timeout the run was started with.
pub fn correct_capture(samples: &mut [u32], bit_timeout: u32) {
    let bit_timeout = bit_timeout.min(MAX_BIT_TIMEOUT);
    for (index, sample) in samples.iter_mut().enumerate() {
        // The counter wraps below zero when a pulse outlasts the timeout.
        *sample = if *sample > bit_timeout {
            saturation(index, bit_timeout)
        } else {
            (bit_timeout - *sample).saturating_add(capture_overhead(index))
        };
    }
}

/// Shortens requested holds by the generator's per-edge overhead.
pub fn compensate_generation(holds: &mut [u32]) {
    for hold in holds {
        *hold = hold.saturating_sub(GENERATE_OVERHEAD);
    }
}

/// Pulse capture and playback on one timer and one generator state machine.
///
/// Calls are synchronous. Capture blocks on the timer's output queue and
/// always terminates because both waits inside the timer are bounded.
/// Generation blocks until the generator raises its IRQ, and hangs if the
/// input queue starves.
pub struct Pulses<'a, C, G, D> {
    timer: Option<C>,
    generator: Option<G>,
    delay: D,
    capture_done: &'a CompletionFlag,
    generate_done: &'a CompletionFlag,
}

impl<C, G, D> Pulses<'static, C, G, D>
where
    C: Coprocessor,
    G: Coprocessor,
    D: DelayNs,
{
    /// Creates an orchestrator signalled by the process-wide completion flags
    /// that the PIO IRQ handlers raise.
    ///
    /// # Arguments
    ///
    /// * `timer` - State machine loaded with the pulse timer, `None` disables capture.
    /// * `generator` - State machine loaded with the pulse generator, `None` disables generation.
    /// * `delay` - Sleeps between completion checks.
    pub fn new(timer: Option<C>, generator: Option<G>, delay: D) -> Self {
        Self::with_flags(timer, generator, delay, &CAPTURE_DONE, &GENERATE_DONE)
    }
}

impl<'a, C, G, D> Pulses<'a, C, G, D>
where
    C: Coprocessor,
    G: Coprocessor,
    D: DelayNs,
{
    /// Same as [`Pulses::new`] with caller-owned completion flags.
    ///
    /// # Arguments
    ///
    /// * `capture_done` - Flag raised when the timer finishes a run.
    /// * `generate_done` - Flag raised when the generator finishes a run.
    pub fn with_flags(
        timer: Option<C>,
        generator: Option<G>,
        delay: D,
        capture_done: &'a CompletionFlag,
        generate_done: &'a CompletionFlag,
    ) -> Self {
        Self {
            timer,
            generator,
            delay,
            capture_done,
            generate_done,
        }
    }

    /// Times `buffer.len()` pulses and returns the level of the first one.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Receives one duration in ticks per pulse.
    /// * `start_timeout` - Longest wait for the first transition, in ticks.
    /// * `bit_timeout` - Longest countable pulse, capped at [`MAX_BIT_TIMEOUT`].
    ///
    /// # Returns
    ///
    /// The level of the first pulse, or the level at the start timeout.
    pub fn capture(
        &mut self,
        buffer: &mut [u32],
        start_timeout: u32,
        bit_timeout: u32,
    ) -> Result<Level, Error> {
        let pulse_count = u32::try_from(buffer.len()).map_err(|_| Error::BufferLengthMismatch)?;
        self.capture_with(
            buffer,
            RunParameters {
                start_timeout,
                pulse_count,
                bit_timeout,
            },
        )
    }

    pub fn capture_with(&mut self, buffer: &mut [u32], params: RunParameters) -> Result<Level, Error> {
        let timer = self.timer.as_mut().ok_or(Error::NotConfigured)?;
        if params.pulse_count as usize != buffer.len() {
            return Err(Error::BufferLengthMismatch);
        }
        let params = RunParameters {
            bit_timeout: params.bit_timeout.min(MAX_BIT_TIMEOUT),
            ..params
        };
        debug!(
            "capture: {} pulses, start timeout {}, bit timeout {}",
            params.pulse_count,
            params.start_timeout,
            params.bit_timeout
        );

        self.capture_done.reset();
        timer.restart();
        timer.push(params.start_timeout);
        timer.push(params.pulse_count);
        timer.push(params.bit_timeout);
        timer.set_enabled(true);

        let level = Level::from(timer.pull() & 1 != 0);
        timer.drain(buffer);
        while !self.capture_done.is_set() {
            self.delay.delay_us(SETTLE_POLL_US);
        }
        timer.set_enabled(false);

        correct_capture(buffer, params.bit_timeout);
        trace!("capture done, start level {}", level as u8);
        Ok(level)
    }

    /// Plays `buffer` as alternating holds starting at `start`.
    ///
    /// The pin rests low between runs, so a low start is preceded by a short
    /// high mark. Returns once the last hold has been closed by an edge.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Hold durations in ticks, rewritten in place with the compensated holds.
    /// * `start` - Level of the first hold.
    pub fn generate(&mut self, buffer: &mut [u32], start: Level) -> Result<(), Error> {
        let generator = self.generator.as_mut().ok_or(Error::NotConfigured)?;
        let edges = u32::try_from(buffer.len()).map_err(|_| Error::BufferLengthMismatch)?;
        if edges == 0 {
            return Ok(());
        }
        debug!("generate: {} edges from level {}", edges, start as u8);
        if !start.is_high() {
            trace!("low start, leading with a high mark");
        }

        compensate_generation(buffer);
        self.generate_done.reset();
        generator.restart();
        generator.set_enabled(true);
        generator.push(edges);
        generator.push(start.into());
        generator.stream(buffer);
        while !self.generate_done.is_set() {
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }
        generator.set_enabled(false);

        trace!("generate done");
        Ok(())
    }

    pub fn release(self) -> (Option<C>, Option<G>, D) {
        (self.timer, self.generator, self.delay)
    }
}
