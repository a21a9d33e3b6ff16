//! `rp2040-hal` binding of the pulse programs.
//!
//! Programs are installed and configured through the HAL builder. Restart,
//! FIFO joining, interrupt routing and DMA go through [`crate::regs`].
use core::hint::spin_loop;
use core::sync::atomic::{compiler_fence, Ordering};

use rp2040_hal::pio::{
    InstalledProgram, PIOBuilder, PIOExt, PinDir, PinState, Running, Rx, ShiftDirection,
    StateMachine, StateMachineIndex, Stopped, Tx, UninitStateMachine, PIO,
};

use crate::config::ClockDivider;
use crate::program::{self, PulseProgram};
use crate::pulses::Coprocessor;
use crate::regs::{self, Block, FifoJoin, Raw, Slot};
use crate::Error;

enum Engine<P: PIOExt, SM: StateMachineIndex> {
    Stopped(StateMachine<(P, SM), Stopped>),
    Running(StateMachine<(P, SM), Running>),
}

/// One state machine running a program from [`crate::program`].
pub struct PioCoprocessor<P: PIOExt, SM: StateMachineIndex> {
    engine: Option<Engine<P, SM>>,
    rx: Rx<(P, SM)>,
    tx: Tx<(P, SM)>,
    slot: Slot,
    entry: u8,
    dma_channel: Option<u8>,
    mmio: Raw,
}

fn install<P: PIOExt>(pio: &mut PIO<P>, program: &PulseProgram) -> Result<InstalledProgram<P>, Error> {
    pio.install(program).map_err(|_| {
        error!("no room for a {} instruction program", program.code.len());
        Error::NoProgramSpace
    })
}

impl<P: PIOExt, SM: StateMachineIndex> PioCoprocessor<P, SM> {
    /// Loads the pulse timer on `pin`.
    ///
    /// # Arguments
    ///
    /// * `pio` - Block to install the program into.
    /// * `sm` - Free state machine of that block.
    /// * `pin` - GPIO to time, already routed to the block.
    /// * `divider` - Must run the machine at twice the tick rate, see [`crate::Config::clocks`].
    pub fn bind_timer(
        pio: &mut PIO<P>,
        sm: UninitStateMachine<(P, SM)>,
        pin: u8,
        divider: ClockDivider,
    ) -> Result<Self, Error> {
        let installed = install(pio, &program::pulse_timer())?;
        let entry = installed.offset();
        let (sm, rx, tx) = PIOBuilder::from_installed_program(installed)
            .set_pins(pin, 1)
            .in_pin_base(pin)
            .jmp_pin(pin)
            .in_shift_direction(ShiftDirection::Left)
            .clock_divisor_fixed_point(divider.int, divider.frac)
            .build(sm);
        let this = Self::new(sm, rx, tx, entry, None);
        info!("timer on gpio{} at {}, divider {}", pin, this.slot, divider);
        Ok(this)
    }

    /// Loads the pulse generator on `pin`, holding it low until the first run.
    ///
    /// # Arguments
    ///
    /// * `divider` - Runs the machine at the tick rate.
    /// * `dma_channel` - Feeds the holds when set, otherwise they are written
    ///   word by word.
    pub fn bind_generator(
        pio: &mut PIO<P>,
        sm: UninitStateMachine<(P, SM)>,
        pin: u8,
        divider: ClockDivider,
        dma_channel: Option<u8>,
    ) -> Result<Self, Error> {
        let installed = install(pio, &program::pulse_generator())?;
        let entry = installed.offset();
        let (mut sm, rx, tx) = PIOBuilder::from_installed_program(installed)
            .set_pins(pin, 1)
            .out_pins(pin, 1)
            .out_shift_direction(ShiftDirection::Right)
            .autopull(false)
            .clock_divisor_fixed_point(divider.int, divider.frac)
            .build(sm);
        sm.set_pins([(pin, PinState::Low)]);
        sm.set_pindirs([(pin, PinDir::Output)]);
        let mut this = Self::new(sm, rx, tx, entry, dma_channel);
        regs::fifo_join(&mut this.mmio, this.slot, FifoJoin::Tx);
        info!("generator on gpio{} at {}, divider {}", pin, this.slot, divider);
        Ok(this)
    }

    /// Loads the strobe program: `width` data pins from `data_base`, strobe on
    /// `strobe_pin`, `word_bits` bits per queued word. Both widths are 1 to 32
    /// bits, otherwise [`Error::InvalidWidth`] is returned before anything is
    /// installed.
    pub fn bind_strobe(
        pio: &mut PIO<P>,
        sm: UninitStateMachine<(P, SM)>,
        data_base: u8,
        width: u8,
        strobe_pin: u8,
        word_bits: u8,
        divider: ClockDivider,
    ) -> Result<Self, Error> {
        if !(1..=32).contains(&width) || !(1..=32).contains(&word_bits) {
            error!("strobe of {} pins, {} bit words", width, word_bits);
            return Err(Error::InvalidWidth);
        }
        let installed = install(pio, &program::strobe(width))?;
        let entry = installed.offset();
        let (mut sm, rx, tx) = PIOBuilder::from_installed_program(installed)
            .out_pins(data_base, width)
            .side_set_pin_base(strobe_pin)
            .out_shift_direction(ShiftDirection::Left)
            .autopull(true)
            .pull_threshold(word_bits)
            .clock_divisor_fixed_point(divider.int, divider.frac)
            .build(sm);
        sm.set_pindirs(
            (data_base..data_base + width)
                .chain(core::iter::once(strobe_pin))
                .map(|pin| (pin, PinDir::Output)),
        );
        Ok(Self::new(sm, rx, tx, entry, None))
    }

    fn new(
        sm: StateMachine<(P, SM), Stopped>,
        rx: Rx<(P, SM)>,
        tx: Tx<(P, SM)>,
        entry: u8,
        dma_channel: Option<u8>,
    ) -> Self {
        let block = if P::id() == 0 { Block::Pio0 } else { Block::Pio1 };
        let slot = Slot::new(block, SM::id() as u8);
        // SAFETY: the registers touched are those of this state machine, its
        // IRQ flag and its own DMA channel.
        let mut mmio = unsafe { Raw::steal() };
        regs::enable_sm_interrupt(&mut mmio, slot);
        Self {
            engine: Some(Engine::Stopped(sm)),
            rx,
            tx,
            slot,
            entry,
            dma_channel,
            mmio,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    fn abort_dma(&mut self) {
        if let Some(channel) = self.dma_channel {
            if regs::is_busy(&self.mmio, channel) {
                warn!(
                    "aborting dma{} with {} words left",
                    channel,
                    regs::transfer_count(&self.mmio, channel)
                );
                regs::abort_transfer(&mut self.mmio, channel);
            }
        }
    }

    fn wait_dma(&self, channel: u8) {
        while regs::is_busy(&self.mmio, channel) {
            spin_loop();
        }
        compiler_fence(Ordering::SeqCst);
    }

    /// Stops the machine and frees its instruction memory.
    pub fn free(mut self, pio: &mut PIO<P>) -> UninitStateMachine<(P, SM)> {
        self.set_enabled(false);
        let sm = match self.engine.take() {
            Some(Engine::Stopped(sm)) => sm,
            Some(Engine::Running(sm)) => sm.stop(),
            None => unreachable!(),
        };
        let (sm, program) = sm.uninit(self.rx, self.tx);
        pio.uninstall(program);
        sm
    }
}

impl<P: PIOExt, SM: StateMachineIndex> Coprocessor for PioCoprocessor<P, SM> {
    fn restart(&mut self) {
        let previous = regs::restart(&mut self.mmio, self.slot, self.entry);
        trace!("{} restarted at {}, was at {}", self.slot, self.entry, previous);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.engine = match self.engine.take() {
            Some(Engine::Stopped(sm)) if enabled => Some(Engine::Running(sm.start())),
            Some(Engine::Running(sm)) if !enabled => {
                self.abort_dma();
                Some(Engine::Stopped(sm.stop()))
            }
            engine => engine,
        };
    }

    fn push(&mut self, word: u32) {
        while !self.tx.write(word) {
            spin_loop();
        }
    }

    fn pull(&mut self) -> u32 {
        loop {
            if let Some(word) = self.rx.read() {
                return word;
            }
            spin_loop();
        }
    }

    fn stream(&mut self, words: &[u32]) {
        match self.dma_channel {
            Some(channel) if !words.is_empty() => {
                compiler_fence(Ordering::SeqCst);
                let ctrl = regs::start_fifo_write(
                    &mut self.mmio,
                    channel,
                    self.slot,
                    words.as_ptr() as u32,
                    words.len() as u32,
                );
                trace!("dma{} feeding {}, ctrl {:#x}", channel, self.slot, ctrl);
                // The slice is only borrowed for this call.
                self.wait_dma(channel);
            }
            _ => {
                for &word in words {
                    self.push(word);
                }
            }
        }
    }

    fn drain(&mut self, words: &mut [u32]) {
        match self.dma_channel {
            Some(channel) if !words.is_empty() => {
                compiler_fence(Ordering::SeqCst);
                regs::start_fifo_read(
                    &mut self.mmio,
                    channel,
                    self.slot,
                    words.as_mut_ptr() as u32,
                    words.len() as u32,
                );
                self.wait_dma(channel);
            }
            _ => {
                for word in words {
                    *word = self.pull();
                }
            }
        }
    }

    fn take_tx_stall(&mut self) -> bool {
        regs::take_tx_stall(&mut self.mmio, self.slot)
    }
}
