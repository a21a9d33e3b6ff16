use core::fmt;

/// Errors reported before a capture or generation run touches the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Error {
    /// The direction was never bound to a pin.
    NotConfigured,
    /// The requested tick rate exceeds what the system clock can drive.
    FrequencyTooHigh,
    /// The requested tick rate needs a divider beyond the 16-bit integer part.
    FrequencyTooLow,
    /// The buffer length does not match the pulse or edge count of the run.
    BufferLengthMismatch,
    /// The PIO block has no room left for the micro-program.
    NoProgramSpace,
    /// A pin or word width outside 1..=32 bits.
    InvalidWidth,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotConfigured => f.write_str("direction is not bound to a pin"),
            Error::FrequencyTooHigh => f.write_str("frequency too high"),
            Error::FrequencyTooLow => f.write_str("frequency too low"),
            Error::BufferLengthMismatch => f.write_str("buffer length does not match count"),
            Error::NoProgramSpace => f.write_str("no space left in instruction memory"),
            Error::InvalidWidth => f.write_str("width must be 1 to 32 bits"),
        }
    }
}
