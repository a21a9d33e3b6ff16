//! Cycle-level model of PIO state machines, used by the tests to run the
//! programs from `program` against synthetic waveforms or a loopback wire.
//!
//! Only the features the programs in this crate rely on are modelled: one
//! input pin, one output pin group, a single non-optional side-set pin, blocking
//! FIFOs, autopull and IRQ flags. A pin changed by one machine is visible to
//! the other on the following cycle.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;

use crate::completion::CompletionFlag;
use crate::program::{self, PulseProgram, CAPTURE_CYCLES_PER_TICK};
use crate::pulses::Coprocessor;

const STEP_BUDGET: u64 = 50_000_000;

pub struct Machine {
    code: Vec<u16>,
    wrap_source: u8,
    wrap_target: u8,
    side_set_bits: u8,
    in_left: bool,
    out_left: bool,
    autopull: bool,
    pull_threshold: u8,
    tx_depth: usize,
    pc: u8,
    x: u32,
    y: u32,
    isr: u32,
    isr_count: u8,
    osr: u32,
    osr_count: u8,
    delay: u8,
    pub tx: VecDeque<u32>,
    pub rx: VecDeque<u32>,
    pub enabled: bool,
    pub pins: u32,
    pub pindir_out: bool,
    pub side: bool,
    pub irq: bool,
    pub tx_stall: bool,
    pub cycles: u64,
    /// Output pin changes as `(cycle, level)`.
    pub edges: Vec<(u64, bool)>,
    /// Data pins latched on each falling side-set edge.
    pub strobes: Vec<u32>,
    done: Option<&'static CompletionFlag>,
}

impl Machine {
    fn new(program: &PulseProgram) -> Self {
        Self {
            code: program.code.iter().copied().collect(),
            wrap_source: program.wrap.source,
            wrap_target: program.wrap.target,
            side_set_bits: program.side_set.bits(),
            in_left: true,
            out_left: false,
            autopull: false,
            pull_threshold: 32,
            tx_depth: 4,
            pc: 0,
            x: 0,
            y: 0,
            isr: 0,
            isr_count: 0,
            osr: 0,
            osr_count: 32,
            delay: 0,
            tx: VecDeque::new(),
            rx: VecDeque::new(),
            enabled: false,
            pins: 0,
            pindir_out: false,
            side: false,
            irq: false,
            tx_stall: false,
            cycles: 0,
            edges: Vec::new(),
            strobes: Vec::new(),
            done: None,
        }
    }

    pub fn timer(done: &'static CompletionFlag) -> Self {
        Self {
            done: Some(done),
            ..Self::new(&program::pulse_timer())
        }
    }

    /// Generator with its FIFOs joined on the TX side.
    pub fn generator(done: &'static CompletionFlag) -> Self {
        Self {
            done: Some(done),
            tx_depth: 8,
            ..Self::new(&program::pulse_generator())
        }
    }

    pub fn strobe(width: u8, word_bits: u8) -> Self {
        Self {
            out_left: true,
            autopull: true,
            pull_threshold: word_bits,
            ..Self::new(&program::strobe(width))
        }
    }

    pub fn pin(&self) -> bool {
        self.pins & 1 != 0
    }

    pub fn tx_full(&self) -> bool {
        self.tx.len() >= self.tx_depth
    }

    pub fn restart(&mut self) {
        self.pc = 0;
        self.isr = 0;
        self.isr_count = 0;
        self.osr_count = 32;
        self.delay = 0;
        self.irq = false;
    }

    fn set_pins(&mut self, value: u32) {
        let before = self.pin();
        self.pins = value;
        if self.pin() != before {
            self.edges.push((self.cycles, self.pin()));
        }
    }

    fn set_side(&mut self, side: bool) {
        if self.side && !side {
            self.strobes.push(self.pins);
        }
        self.side = side;
    }

    fn raise_irq(&mut self) {
        self.irq = true;
        if let Some(done) = self.done {
            done.signal();
        }
    }

    /// Runs one state machine clock with `input` on the input pin.
    pub fn step(&mut self, input: bool) {
        if !self.enabled {
            return;
        }
        self.cycles += 1;
        if self.delay > 0 {
            self.delay -= 1;
            return;
        }

        let instr = self.code[self.pc as usize];
        let field = ((instr >> 8) & 0x1f) as u8;
        let delay_bits = 5 - self.side_set_bits;
        if self.side_set_bits > 0 {
            self.set_side(field >> delay_bits != 0);
        }
        let delay = field & ((1 << delay_bits) - 1);

        let mut next = if self.pc == self.wrap_source {
            self.wrap_target
        } else {
            self.pc + 1
        };
        let mut stalled = false;
        let dest = (instr >> 5) & 0x07;
        let low = (instr & 0x1f) as u8;
        let bit_count = if low == 0 { 32 } else { low as u32 };
        let mask = if bit_count == 32 { u32::MAX } else { (1 << bit_count) - 1 };

        match instr >> 13 {
            0b000 => {
                let taken = match dest {
                    0 => true,
                    1 => self.x == 0,
                    2 => {
                        let taken = self.x != 0;
                        self.x = self.x.wrapping_sub(1);
                        taken
                    }
                    3 => self.y == 0,
                    4 => {
                        let taken = self.y != 0;
                        self.y = self.y.wrapping_sub(1);
                        taken
                    }
                    5 => self.x != self.y,
                    6 => input,
                    _ => self.osr_count < self.pull_threshold,
                };
                if taken {
                    next = low;
                }
            }
            0b010 => {
                let data = match dest {
                    0 => input as u32,
                    1 => self.x,
                    2 => self.y,
                    3 => 0,
                    6 => self.isr,
                    7 => self.osr,
                    _ => panic!("unsupported in source {}", dest),
                } & mask;
                self.isr = if self.in_left {
                    self.isr.checked_shl(bit_count).unwrap_or(0) | data
                } else {
                    self.isr.checked_shr(bit_count).unwrap_or(0) | data << (32 - bit_count)
                };
                self.isr_count = (self.isr_count as u32 + bit_count).min(32) as u8;
            }
            0b011 => {
                if self.autopull && self.osr_count >= self.pull_threshold {
                    match self.tx.pop_front() {
                        Some(word) => {
                            self.osr = word;
                            self.osr_count = 0;
                        }
                        None => {
                            self.tx_stall = true;
                            stalled = true;
                        }
                    }
                }
                if !stalled {
                    let data = if self.out_left {
                        self.osr.checked_shr(32 - bit_count).unwrap_or(0)
                    } else {
                        self.osr & mask
                    };
                    self.osr = if self.out_left {
                        self.osr.checked_shl(bit_count).unwrap_or(0)
                    } else {
                        self.osr.checked_shr(bit_count).unwrap_or(0)
                    };
                    self.osr_count = (self.osr_count as u32 + bit_count).min(32) as u8;
                    match dest {
                        0 => self.set_pins(data),
                        1 => self.x = data,
                        2 => self.y = data,
                        3 => {}
                        4 => self.pindir_out = data & 1 != 0,
                        _ => panic!("unsupported out destination {}", dest),
                    }
                }
            }
            0b100 if instr & 0x80 == 0 => {
                let block = instr & 0x20 != 0;
                if self.rx.len() >= 4 {
                    stalled = block;
                } else {
                    self.rx.push_back(self.isr);
                    self.isr = 0;
                    self.isr_count = 0;
                }
            }
            0b100 => {
                let block = instr & 0x20 != 0;
                match self.tx.pop_front() {
                    Some(word) => {
                        self.osr = word;
                        self.osr_count = 0;
                    }
                    None if block => {
                        self.tx_stall = true;
                        stalled = true;
                    }
                    None => self.osr = self.x,
                }
            }
            0b101 => {
                let value = match instr & 0x07 {
                    0 => input as u32,
                    1 => self.x,
                    2 => self.y,
                    3 => 0,
                    6 => self.isr,
                    7 => self.osr,
                    src => panic!("unsupported mov source {}", src),
                };
                let value = match (instr >> 3) & 0x03 {
                    0 => value,
                    1 => !value,
                    _ => value.reverse_bits(),
                };
                match dest {
                    0 => self.set_pins(value),
                    1 => self.x = value,
                    2 => self.y = value,
                    6 => {
                        self.isr = value;
                        self.isr_count = 0;
                    }
                    7 => {
                        self.osr = value;
                        self.osr_count = 0;
                    }
                    _ => panic!("unsupported mov destination {}", dest),
                }
            }
            0b110 => {
                if instr & 0x40 != 0 {
                    self.irq = false;
                } else {
                    self.raise_irq();
                }
            }
            0b111 => match dest {
                0 => self.set_pins(low as u32),
                1 => self.x = low as u32,
                2 => self.y = low as u32,
                4 => self.pindir_out = low & 1 != 0,
                _ => panic!("unsupported set destination {}", dest),
            },
            opcode => panic!("unsupported opcode {:#05b}", opcode),
        }

        if !stalled {
            self.pc = next;
            self.delay = delay;
        }
    }
}

/// The two machines plus the wire between them. Time advances in timer
/// cycles; the generator runs at half that rate, one cycle per tick.
pub struct Bench {
    pub timer: Machine,
    pub generator: Machine,
    pub wire: bool,
    pub now: u64,
    waveform: Option<Box<dyn Fn(u64) -> bool>>,
}

impl Bench {
    pub fn new(timer: Machine, generator: Machine) -> Self {
        Self {
            timer,
            generator,
            wire: false,
            now: 0,
            waveform: None,
        }
    }

    /// Drives the timer input from `waveform(now)` instead of the generator.
    pub fn with_waveform(mut self, waveform: impl Fn(u64) -> bool + 'static) -> Self {
        self.waveform = Some(Box::new(waveform));
        self
    }

    pub fn step(&mut self) {
        if let Some(waveform) = &self.waveform {
            self.wire = waveform(self.now);
        }
        self.timer.step(self.wire);
        if self.now % CAPTURE_CYCLES_PER_TICK as u64 == 0 {
            self.generator.step(false);
            if self.waveform.is_none() && self.generator.pindir_out {
                self.wire = self.generator.pin();
            }
        }
        self.now += 1;
        assert!(self.now < STEP_BUDGET, "simulation ran away");
    }

    pub fn into_shared(self) -> Rc<RefCell<Bench>> {
        Rc::new(RefCell::new(self))
    }
}

/// Waveform in timer cycles: idle at the opposite of `start` until
/// `start_tick`, then one pulse per entry of `ticks`, alternating from
/// `start`, then the level after the last pulse forever.
pub fn pulse_train(start: bool, start_tick: u64, ticks: &[u32]) -> impl Fn(u64) -> bool {
    let per_tick = CAPTURE_CYCLES_PER_TICK as u64;
    let mut edges = Vec::with_capacity(ticks.len() + 1);
    let mut at = start_tick * per_tick;
    edges.push(at);
    for &duration in ticks {
        at += duration as u64 * per_tick;
        edges.push(at);
    }
    move |now| {
        let crossed = edges.iter().take_while(|&&edge| edge <= now).count();
        if crossed % 2 == 1 {
            start
        } else {
            !start
        }
    }
}

#[derive(Clone, Copy)]
pub enum Side {
    Timer,
    Generator,
}

pub struct SimPort {
    bench: Rc<RefCell<Bench>>,
    side: Side,
}

impl SimPort {
    pub fn new(bench: &Rc<RefCell<Bench>>, side: Side) -> Self {
        Self {
            bench: bench.clone(),
            side,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        let mut bench = self.bench.borrow_mut();
        match self.side {
            Side::Timer => f(&mut bench.timer),
            Side::Generator => f(&mut bench.generator),
        }
    }
}

impl Coprocessor for SimPort {
    fn restart(&mut self) {
        self.with(Machine::restart);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.with(|m| m.enabled = enabled);
    }

    fn push(&mut self, word: u32) {
        while self.with(|m| m.tx_full()) {
            self.bench.borrow_mut().step();
        }
        self.with(|m| m.tx.push_back(word));
    }

    fn pull(&mut self) -> u32 {
        loop {
            if let Some(word) = self.with(|m| m.rx.pop_front()) {
                return word;
            }
            self.bench.borrow_mut().step();
        }
    }

    fn take_tx_stall(&mut self) -> bool {
        self.bench.borrow_mut().step();
        self.with(|m| core::mem::take(&mut m.tx_stall))
    }
}

/// Delay that advances the bench instead of sleeping.
pub struct SimDelay {
    bench: Rc<RefCell<Bench>>,
    ns_per_cycle: u32,
}

impl SimDelay {
    pub fn new(bench: &Rc<RefCell<Bench>>, tick_hz: u32) -> Self {
        Self {
            bench: bench.clone(),
            ns_per_cycle: 1_000_000_000 / (tick_hz * CAPTURE_CYCLES_PER_TICK),
        }
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = (ns / self.ns_per_cycle).max(1);
        let mut bench = self.bench.borrow_mut();
        for _ in 0..cycles {
            bench.step();
        }
    }
}
