//! PIO micro-programs for the pulse timer, the pulse generator and the strobe
//! output used by byte-oriented consumers.
//!
//! Both pulse programs count time with `jmp x--` busy loops. The correction
//! constants below are the instruction overheads of those loops, counted in
//! ticks from the listings in this module.
use pio::{
    InSource, JmpCondition, MovDestination, MovOperation, MovSource, OutDestination,
    SetDestination, SideSet,
};

pub type PulseAssembler = pio::Assembler<{ pio::RP2040_MAX_PROGRAM_SIZE }>;
pub type PulseProgram = pio::Program<{ pio::RP2040_MAX_PROGRAM_SIZE }>;

/// The timer loop spends two state machine cycles per counted tick.
pub const CAPTURE_CYCLES_PER_TICK: u32 = 2;

/// Ticks between the first transition and the first counted sample.
pub const CAPTURE_FIRST_OVERHEAD: u32 = 7;

/// Ticks between the end of one pulse and the first sample of the next.
pub const CAPTURE_OVERHEAD: u32 = 4;

/// Ticks between two `out pins` beyond the requested hold.
pub const GENERATE_OVERHEAD: u32 = 7;

/// Length in ticks of the high mark that precedes a low start.
pub const GENERATE_LEAD_IN: u32 = 8;

/// Relative IRQ flag raised by both pulse programs when a run completes.
pub const DONE_IRQ: u8 = 0;

/// Pulse timer.
///
/// Input queue: start timeout, pulse count, bit timeout. Output queue: the
/// level of the first pulse, then one remaining-counter word per pulse.
/// Requires `jmp_pin`, `in_base` and `set_base` on the measured pin and a
/// left-shifting ISR without autopush.
pub fn pulse_timer() -> PulseProgram {
    let mut a = PulseAssembler::new();
    let mut wait_rise = a.label();
    let mut rise_seen = a.label();
    let mut wait_fall = a.label();
    let mut hold_high = a.label();
    let mut triggered = a.label();
    let mut get_pulse = a.label();
    let mut count_low = a.label();
    let mut low_done = a.label();
    let mut count_high = a.label();
    let mut still_high = a.label();
    let mut issue = a.label();
    let mut check_done = a.label();
    let mut halt = a.label();

    a.set(SetDestination::PINDIRS, 0);
    a.pull(false, true);
    a.mov(MovDestination::X, MovOperation::None, MovSource::OSR);
    a.jmp(JmpCondition::PinHigh, &mut wait_fall);

    // Both wait loops sample the pin every second cycle and leave through one
    // extra jump, so either polarity reaches `triggered` two cycles after the
    // detecting sample.
    a.bind(&mut wait_rise);
    a.jmp(JmpCondition::PinHigh, &mut rise_seen);
    a.jmp(JmpCondition::XDecNonZero, &mut wait_rise);
    a.bind(&mut rise_seen);
    a.jmp(JmpCondition::Always, &mut triggered);

    a.bind(&mut wait_fall);
    a.jmp(JmpCondition::PinHigh, &mut hold_high);
    a.jmp(JmpCondition::Always, &mut triggered);
    a.bind(&mut hold_high);
    a.jmp(JmpCondition::XDecNonZero, &mut wait_fall);

    a.bind(&mut triggered);
    a.mov(MovDestination::ISR, MovOperation::None, MovSource::NULL);
    a.r#in(InSource::PINS, 1);
    a.push(false, true);
    a.pull(false, true);
    a.mov(MovDestination::Y, MovOperation::None, MovSource::OSR);
    // The bit timeout stays in OSR for the rest of the run.
    a.pull(false, true);
    a.jmp_with_delay(JmpCondition::Always, &mut check_done, 1);

    a.bind(&mut get_pulse);
    a.mov_with_delay(MovDestination::X, MovOperation::None, MovSource::OSR, 1);
    a.jmp(JmpCondition::PinHigh, &mut count_high);

    a.bind(&mut count_low);
    a.jmp(JmpCondition::PinHigh, &mut low_done);
    a.jmp(JmpCondition::XDecNonZero, &mut count_low);
    a.bind(&mut low_done);
    a.jmp(JmpCondition::Always, &mut issue);

    a.bind(&mut count_high);
    a.jmp(JmpCondition::PinHigh, &mut still_high);
    a.jmp(JmpCondition::Always, &mut issue);
    a.bind(&mut still_high);
    a.jmp(JmpCondition::XDecNonZero, &mut count_high);

    a.bind(&mut issue);
    a.mov(MovDestination::ISR, MovOperation::None, MovSource::X);
    a.push(false, true);

    a.bind(&mut check_done);
    a.jmp(JmpCondition::YDecNonZero, &mut get_pulse);
    a.irq(false, false, DONE_IRQ, true);

    a.bind(&mut halt);
    a.jmp(JmpCondition::Always, &mut halt);

    a.assemble_program()
}

/// Pulse generator.
///
/// Input queue: edge count, start level, then one hold duration per edge.
/// Requires `out_base` and `set_base` on the driven pin and a right-shifting
/// OSR with a 32-bit pull threshold and no autopull.
///
/// The pin idles low between runs. A high start therefore needs no lead-in,
/// a low start is preceded by a high mark so its first edge is visible. The
/// last hold is always closed by an edge; when that edge goes high the pin
/// returns low on the next cycle.
pub fn pulse_generator() -> PulseProgram {
    let mut a = PulseAssembler::new();
    let mut pulse_loop = a.label();
    let mut set_pin = a.label();
    let mut count = a.label();
    let mut check_done = a.label();
    let mut done = a.label();
    let mut halt = a.label();

    a.set(SetDestination::PINDIRS, 1);
    a.pull(false, true);
    a.mov(MovDestination::Y, MovOperation::None, MovSource::OSR);
    a.pull(false, true);
    a.mov(MovDestination::ISR, MovOperation::None, MovSource::OSR);
    a.jmp(JmpCondition::YIsZero, &mut done);
    // Low idle: only a low start drives the pin here.
    a.mov(MovDestination::PINS, MovOperation::Invert, MovSource::ISR);
    a.jmp(JmpCondition::Always, &mut check_done);

    a.bind(&mut pulse_loop);
    a.pull(false, true);
    a.out(OutDestination::X, 32);
    a.mov(MovDestination::OSR, MovOperation::None, MovSource::ISR);
    a.mov(MovDestination::ISR, MovOperation::Invert, MovSource::ISR);
    a.jmp(JmpCondition::XDecNonZero, &mut set_pin);
    a.jmp(JmpCondition::Always, &mut check_done);

    a.bind(&mut set_pin);
    a.out(OutDestination::PINS, 1);
    a.bind(&mut count);
    a.jmp(JmpCondition::XDecNonZero, &mut count);

    a.bind(&mut check_done);
    a.jmp(JmpCondition::YDecNonZero, &mut pulse_loop);
    // Closing edge, delayed to keep the last hold as long as the others.
    a.mov_with_delay(MovDestination::OSR, MovOperation::None, MovSource::ISR, 4);
    a.out(OutDestination::PINS, 1);
    a.set(SetDestination::PINS, 0);

    a.bind(&mut done);
    a.irq(false, false, DONE_IRQ, true);
    a.bind(&mut halt);
    a.jmp(JmpCondition::Always, &mut halt);

    a.assemble_program()
}

/// One-shot word output with a strobe.
///
/// Every word pulled from the input queue is shifted out `width` bits at a
/// time onto the data pins while the side-set pin is high, and the strobe
/// falls on the next cycle. Requires autopull with a threshold of `width`
/// and a left-shifting OSR.
pub fn strobe(width: u8) -> PulseProgram {
    let mut a = PulseAssembler::new_with_side_set(SideSet::new(false, 1, false));
    a.out_with_side_set(OutDestination::PINS, width, 1);
    a.mov_with_side_set(MovDestination::Y, MovOperation::None, MovSource::Y, 0);
    a.assemble_program()
}
