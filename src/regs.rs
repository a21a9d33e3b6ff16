//! Raw register access for the PIO blocks and the DMA controller.
//!
//! Everything here is plain bit-field arithmetic over RP2040 addresses. Field
//! offsets follow the datasheet register descriptions and must not change.
//! Slot and channel numbers are trusted, out-of-range values are a bug.

pub const PIO0_BASE: u32 = 0x5020_0000;
pub const PIO1_BASE: u32 = 0x5030_0000;
pub const DMA_BASE: u32 = 0x5000_0000;

/// Atomic set and clear aliases of every peripheral register.
const ALIAS_SET: u32 = 0x2000;
const ALIAS_CLR: u32 = 0x3000;

const PIO_CTRL: u32 = 0x000;
const PIO_FSTAT: u32 = 0x004;
const PIO_FDEBUG: u32 = 0x008;
const PIO_FLEVEL: u32 = 0x00c;
const PIO_TXF0: u32 = 0x010;
const PIO_RXF0: u32 = 0x020;
const PIO_IRQ: u32 = 0x030;
const PIO_IRQ0_INTE: u32 = 0x12c;

const SM0_BASE: u32 = 0x0c8;
const SM_STRIDE: u32 = 0x18;
const SM_SHIFTCTRL: u32 = 0x08;
const SM_ADDR: u32 = 0x0c;
const SM_INSTR: u32 = 0x10;

const SHIFTCTRL_PUSH_THRESH: u32 = 20;
const SHIFTCTRL_PULL_THRESH: u32 = 25;
const SHIFTCTRL_FJOIN_TX: u32 = 1 << 30;
const SHIFTCTRL_FJOIN_RX: u32 = 1 << 31;

const CTRL_SM_RESTART: u32 = 4;
const CTRL_CLKDIV_RESTART: u32 = 8;

/// `jmp` with the always condition encodes as its bare target address.
const JMP_ALWAYS: u32 = 0x0000;

const DMA_CHANNEL_STRIDE: u32 = 0x40;
const DMA_READ_ADDR: u32 = 0x00;
const DMA_WRITE_ADDR: u32 = 0x04;
const DMA_TRANS_COUNT: u32 = 0x08;
const DMA_CTRL_TRIG: u32 = 0x0c;
const DMA_AL1_CTRL: u32 = 0x10;
const DMA_CHAN_ABORT: u32 = 0x444;
const DMA_CTRL_BUSY: u32 = 1 << 24;

/// 32-bit volatile access by absolute address.
pub trait Mmio {
    fn read(&self, addr: u32) -> u32;
    fn write(&mut self, addr: u32, value: u32);
}

/// Direct access to the peripheral bus.
pub struct Raw(());

impl Raw {
    /// # Safety
    ///
    /// Callers must own the registers they touch through the returned handle.
    pub unsafe fn steal() -> Self {
        Raw(())
    }
}

impl Mmio for Raw {
    fn read(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write(&mut self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Block {
    Pio0,
    Pio1,
}

impl Block {
    pub const fn base(self) -> u32 {
        match self {
            Block::Pio0 => PIO0_BASE,
            Block::Pio1 => PIO1_BASE,
        }
    }
}

/// FIFO side, named from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Direction {
    /// Host to state machine, the TX FIFO.
    Tx,
    /// State machine to host, the RX FIFO.
    Rx,
}

/// One state machine of one PIO block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct Slot {
    pub block: Block,
    pub sm: u8,
}

impl Slot {
    pub const fn new(block: Block, sm: u8) -> Self {
        Self { block, sm }
    }

    /// Flat numbering: 0..=3 on PIO0, 4..=7 on PIO1.
    pub const fn from_index(index: u8) -> Self {
        if index < 4 {
            Self::new(Block::Pio0, index)
        } else {
            Self::new(Block::Pio1, index % 4)
        }
    }

    const fn reg(self, offset: u32) -> u32 {
        self.block.base() + SM0_BASE + self.sm as u32 * SM_STRIDE + offset
    }

    pub const fn tx_fifo(self) -> u32 {
        self.block.base() + PIO_TXF0 + self.sm as u32 * 4
    }

    pub const fn rx_fifo(self) -> u32 {
        self.block.base() + PIO_RXF0 + self.sm as u32 * 4
    }

    /// DMA request line paced by this FIFO.
    pub const fn dreq(self, dir: Direction) -> u8 {
        let block = match self.block {
            Block::Pio0 => 0,
            Block::Pio1 => 8,
        };
        let side = match dir {
            Direction::Tx => 0,
            Direction::Rx => 4,
        };
        block + side + self.sm
    }
}

/// Cold restart: clears the state machine's shift counters, scratch state and
/// clock phase, then forces the program counter to `entry` by executing an
/// unconditional jump. Returns the program counter seen before the restart.
pub fn restart<M: Mmio>(mmio: &mut M, slot: Slot, entry: u8) -> u8 {
    let previous = (mmio.read(slot.reg(SM_ADDR)) & 0x1f) as u8;
    let bits = (1 << (CTRL_SM_RESTART + slot.sm as u32))
        | (1 << (CTRL_CLKDIV_RESTART + slot.sm as u32));
    mmio.write(slot.block.base() + ALIAS_SET + PIO_CTRL, bits);
    mmio.write(slot.reg(SM_INSTR), JMP_ALWAYS | (entry as u32 & 0x1f));
    previous
}

pub fn set_enabled<M: Mmio>(mmio: &mut M, slot: Slot, enabled: bool) {
    let alias = if enabled { ALIAS_SET } else { ALIAS_CLR };
    mmio.write(slot.block.base() + alias + PIO_CTRL, 1 << slot.sm);
}

/// Number of words waiting in one FIFO, 0..=8.
pub fn fifo_level<M: Mmio>(mmio: &M, slot: Slot, dir: Direction) -> u8 {
    let shift = 8 * slot.sm as u32
        + match dir {
            Direction::Tx => 0,
            Direction::Rx => 4,
        };
    ((mmio.read(slot.block.base() + PIO_FLEVEL) >> shift) & 0x0f) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct FifoStatus {
    pub rx_full: bool,
    pub rx_empty: bool,
    pub tx_full: bool,
    pub tx_empty: bool,
}

impl FifoStatus {
    /// Decodes the FSTAT bits of state machine 0 layout.
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            rx_full: bits & 0x0000_0001 != 0,
            rx_empty: bits & 0x0000_0100 != 0,
            tx_full: bits & 0x0001_0000 != 0,
            tx_empty: bits & 0x0100_0000 != 0,
        }
    }
}

pub fn fifo_status<M: Mmio>(mmio: &M, slot: Slot) -> FifoStatus {
    let bits = (mmio.read(slot.block.base() + PIO_FSTAT) >> slot.sm) & 0x0101_0101;
    FifoStatus::from_bits(bits)
}

/// Reads and clears the sticky "stalled on empty TX FIFO" flag.
pub fn take_tx_stall<M: Mmio>(mmio: &mut M, slot: Slot) -> bool {
    let addr = slot.block.base() + PIO_FDEBUG;
    let bit = 1 << (24 + slot.sm as u32);
    let stalled = mmio.read(addr) & bit != 0;
    if stalled {
        mmio.write(addr, bit);
    }
    stalled
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum FifoJoin {
    None,
    /// Both FIFOs serve the RX side, 8 words deep.
    Rx,
    /// Both FIFOs serve the TX side, 8 words deep.
    Tx,
}

pub fn fifo_join<M: Mmio>(mmio: &mut M, slot: Slot, join: FifoJoin) {
    let addr = slot.reg(SM_SHIFTCTRL);
    let shiftctrl = mmio.read(addr) & !(SHIFTCTRL_FJOIN_RX | SHIFTCTRL_FJOIN_TX);
    let shiftctrl = match join {
        FifoJoin::None => shiftctrl,
        FifoJoin::Rx => shiftctrl | SHIFTCTRL_FJOIN_RX,
        FifoJoin::Tx => shiftctrl | SHIFTCTRL_FJOIN_TX,
    };
    mmio.write(addr, shiftctrl);
}

/// Autopull threshold for the TX side, autopush threshold for the RX side.
/// Zero stands for 32.
pub fn shift_threshold<M: Mmio>(mmio: &M, slot: Slot, dir: Direction) -> u8 {
    let shift = match dir {
        Direction::Tx => SHIFTCTRL_PULL_THRESH,
        Direction::Rx => SHIFTCTRL_PUSH_THRESH,
    };
    ((mmio.read(slot.reg(SM_SHIFTCTRL)) >> shift) & 0x1f) as u8
}

/// Routes the state machine's relative IRQ flag 0 to the block's IRQ0 line.
pub fn enable_sm_interrupt<M: Mmio>(mmio: &mut M, slot: Slot) {
    let addr = slot.block.base() + ALIAS_SET + PIO_IRQ0_INTE;
    mmio.write(addr, 1 << (8 + slot.sm as u32));
}

/// Acknowledges the state machine's IRQ flag, returning whether it was raised.
pub fn take_irq<M: Mmio>(mmio: &mut M, slot: Slot) -> bool {
    let addr = slot.block.base() + PIO_IRQ;
    let bit = 1 << slot.sm;
    let raised = mmio.read(addr) & bit != 0;
    if raised {
        mmio.write(addr, bit);
    }
    raised
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum TransferSize {
    Byte = 0,
    HalfWord = 1,
    Word = 2,
}

impl TransferSize {
    /// Narrowest transfer that carries one FIFO word of `threshold` bits.
    pub const fn from_threshold(threshold: u8) -> Self {
        match threshold {
            0 | 17.. => TransferSize::Word,
            9..=16 => TransferSize::HalfWord,
            _ => TransferSize::Byte,
        }
    }
}

/// Fields of a DMA channel CTRL register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct TransferControl {
    pub enable: bool,
    pub high_priority: bool,
    pub data_size: TransferSize,
    pub incr_read: bool,
    pub incr_write: bool,
    pub ring_size: u8,
    pub ring_sel: bool,
    /// Chaining to the channel itself disables chaining.
    pub chain_to: u8,
    pub treq_sel: u8,
    pub irq_quiet: bool,
    pub bswap: bool,
    pub sniff_en: bool,
}

impl TransferControl {
    pub const fn word(&self) -> u32 {
        (self.enable as u32)
            | (self.high_priority as u32) << 1
            | (self.data_size as u32) << 2
            | (self.incr_read as u32) << 4
            | (self.incr_write as u32) << 5
            | (self.ring_size as u32 & 0x0f) << 6
            | (self.ring_sel as u32) << 10
            | (self.chain_to as u32 & 0x0f) << 11
            | (self.treq_sel as u32 & 0x3f) << 15
            | (self.irq_quiet as u32) << 21
            | (self.bswap as u32) << 22
            | (self.sniff_en as u32) << 23
    }
}

/// Control word for a FIFO transfer paced by the state machine. The memory
/// side increments, the FIFO side stays put.
pub const fn transfer_control(
    slot: Slot,
    dir: Direction,
    threshold: u8,
    high_priority: bool,
    channel: u8,
) -> TransferControl {
    TransferControl {
        enable: true,
        high_priority,
        data_size: TransferSize::from_threshold(threshold),
        incr_read: matches!(dir, Direction::Tx),
        incr_write: matches!(dir, Direction::Rx),
        ring_size: 0,
        ring_sel: false,
        chain_to: channel,
        treq_sel: slot.dreq(dir),
        irq_quiet: true,
        bswap: false,
        sniff_en: false,
    }
}

const fn dma_reg(channel: u8, offset: u32) -> u32 {
    DMA_BASE + channel as u32 * DMA_CHANNEL_STRIDE + offset
}

fn dma_trigger<M: Mmio>(mmio: &mut M, channel: u8, read: u32, write: u32, count: u32, ctrl: u32) {
    mmio.write(dma_reg(channel, DMA_READ_ADDR), read);
    mmio.write(dma_reg(channel, DMA_WRITE_ADDR), write);
    mmio.write(dma_reg(channel, DMA_TRANS_COUNT), count);
    mmio.write(dma_reg(channel, DMA_CTRL_TRIG), ctrl);
}

/// Streams `count` words from memory at `src` into the state machine's TX
/// FIFO. Returns the control word that started the transfer.
pub fn start_fifo_write<M: Mmio>(mmio: &mut M, channel: u8, slot: Slot, src: u32, count: u32) -> u32 {
    let threshold = shift_threshold(mmio, slot, Direction::Tx);
    let ctrl = transfer_control(slot, Direction::Tx, threshold, true, channel).word();
    dma_trigger(mmio, channel, src, slot.tx_fifo(), count, ctrl);
    ctrl
}

/// Drains `count` words from the state machine's RX FIFO into memory at
/// `dst`. Returns the control word that started the transfer.
pub fn start_fifo_read<M: Mmio>(mmio: &mut M, channel: u8, slot: Slot, dst: u32, count: u32) -> u32 {
    let threshold = shift_threshold(mmio, slot, Direction::Rx);
    let ctrl = transfer_control(slot, Direction::Rx, threshold, true, channel).word();
    dma_trigger(mmio, channel, slot.rx_fifo(), dst, count, ctrl);
    ctrl
}

pub fn transfer_count<M: Mmio>(mmio: &M, channel: u8) -> u32 {
    mmio.read(dma_reg(channel, DMA_TRANS_COUNT))
}

pub fn read_addr<M: Mmio>(mmio: &M, channel: u8) -> u32 {
    mmio.read(dma_reg(channel, DMA_READ_ADDR))
}

pub fn write_addr<M: Mmio>(mmio: &M, channel: u8) -> u32 {
    mmio.read(dma_reg(channel, DMA_WRITE_ADDR))
}

pub fn is_busy<M: Mmio>(mmio: &M, channel: u8) -> bool {
    mmio.read(dma_reg(channel, DMA_AL1_CTRL)) & DMA_CTRL_BUSY != 0
}

/// Requests an abort and spins until the controller reports the channel idle.
pub fn abort_transfer<M: Mmio>(mmio: &mut M, channel: u8) {
    let bit = 1 << channel;
    mmio.write(DMA_BASE + DMA_CHAN_ABORT, bit);
    while mmio.read(DMA_BASE + DMA_CHAN_ABORT) & bit != 0 {
        core::hint::spin_loop();
    }
}
