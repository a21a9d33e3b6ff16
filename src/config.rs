use crate::program::CAPTURE_CYCLES_PER_TICK;
use crate::Error;

pub const DEFAULT_TICK_HZ: u32 = 1_000_000;

/// Fixed-point state machine clock divider, 16 integer and 8 fractional bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct ClockDivider {
    pub int: u16,
    pub frac: u8,
}

impl ClockDivider {
    /// Computes the divider that runs a state machine at `sm_hz` off `sys_hz`.
    pub fn from_rates(sys_hz: u32, sm_hz: u32) -> Result<Self, Error> {
        if sm_hz == 0 {
            return Err(Error::FrequencyTooLow);
        }
        if sm_hz > sys_hz {
            return Err(Error::FrequencyTooHigh);
        }
        let int = sys_hz / sm_hz;
        let rem = sys_hz % sm_hz;
        let frac = (rem as u64 * 256 / sm_hz as u64) as u8;
        let int = u16::try_from(int).map_err(|_| Error::FrequencyTooLow)?;
        Ok(Self { int, frac })
    }
}

/// Dividers for the enabled directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clocks {
    pub capture: Option<ClockDivider>,
    pub generate: Option<ClockDivider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// GPIO timed by the pulse timer, `None` disables capture.
    pub capture_pin: Option<u8>,
    /// GPIO driven by the pulse generator, `None` disables generation.
    pub generate_pin: Option<u8>,
    /// Tick rate shared by both directions.
    pub tick_hz: u32,
    /// DMA channel feeding the generator input queue.
    pub dma_channel: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_pin: None,
            generate_pin: None,
            tick_hz: DEFAULT_TICK_HZ,
            dma_channel: None,
        }
    }
}

impl Config {
    /// Validates the tick rate against the system clock and derives dividers.
    ///
    /// Capture needs two state machine cycles per tick, so its limit is half
    /// the system clock. Generation can tick at the system clock.
    pub fn clocks(&self, sys_hz: u32) -> Result<Clocks, Error> {
        let capture = match self.capture_pin {
            Some(_) => {
                let sm_hz = self
                    .tick_hz
                    .checked_mul(CAPTURE_CYCLES_PER_TICK)
                    .ok_or(Error::FrequencyTooHigh)?;
                Some(ClockDivider::from_rates(sys_hz, sm_hz)?)
            }
            None => None,
        };
        let generate = match self.generate_pin {
            Some(_) => Some(ClockDivider::from_rates(sys_hz, self.tick_hz)?),
            None => None,
        };
        Ok(Clocks { capture, generate })
    }

    pub fn resolution_ns(&self) -> u32 {
        1_000_000_000 / self.tick_hz.max(1)
    }

    /// Longest duration a 32-bit tick count can hold.
    pub fn max_range_ms(&self) -> u64 {
        u32::MAX as u64 * 1_000 / self.tick_hz.max(1) as u64
    }
}
