#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate panic_probe;
#[cfg(target_os = "none")]
extern crate rp2040_hal as hal;

#[cfg(target_os = "none")]
use defmt_rtt as _;
#[cfg(target_os = "none")]
use hal::pac;

#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(all(target_os = "none", not(feature = "generic-bootloader")))]
#[used]
#[no_mangle]
#[link_section = ".boot2"]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

#[cfg(all(target_os = "none", feature = "generic-bootloader"))]
#[used]
#[no_mangle]
#[link_section = ".boot2"]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[cfg(target_os = "none")]
#[rtic::app(device = pac, peripherals = true)]
mod app {
    use super::*;

    use hal::clocks::Clock;
    use hal::gpio::{FunctionPio0, FunctionPio1, Pins};
    use hal::pio::{PIOExt, SM0};
    use pio_pulses::hw::PioCoprocessor;
    use pio_pulses::pulses::{DEFAULT_BIT_TIMEOUT, DEFAULT_START_TIMEOUT};
    use pio_pulses::regs::{self, Block, Raw, Slot};
    use pio_pulses::{Config, Level, Pulses, CAPTURE_DONE, GENERATE_DONE};

    pub const XTAL_FREQ_HZ: u32 = 12_000_000_u32;

    /// GPIO timed by the pulse timer.
    pub const CAPTURE_PIN: u8 = 10;
    /// GPIO driven by the pulse generator.
    pub const GENERATE_PIN: u8 = 11;
    pub const GENERATE_DMA_CHANNEL: u8 = 0;
    /// Pulses per capture round.
    pub const PULSES: usize = 16;
    /// Pause between rounds, in system clock cycles.
    pub const ROUND_GAP_CYCLES: u32 = 125_000_000;

    type CaptureSm = PioCoprocessor<pac::PIO0, SM0>;
    type GenerateSm = PioCoprocessor<pac::PIO1, SM0>;

    const CAPTURE_SLOT: Slot = Slot::new(Block::Pio0, 0);
    const GENERATE_SLOT: Slot = Slot::new(Block::Pio1, 0);

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        pulses: Pulses<'static, CaptureSm, GenerateSm, hal::Timer>,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local) {
        unsafe {
            hal::sio::spinlock_reset();
        }

        let mut resets = ctx.device.RESETS;
        let mut watchdog = hal::Watchdog::new(ctx.device.WATCHDOG);
        let clocks = hal::clocks::init_clocks_and_plls(
            XTAL_FREQ_HZ,
            ctx.device.XOSC,
            ctx.device.CLOCKS,
            ctx.device.PLL_SYS,
            ctx.device.PLL_USB,
            &mut resets,
            &mut watchdog,
        )
        .ok()
        .unwrap();

        let config = Config {
            capture_pin: Some(CAPTURE_PIN),
            generate_pin: Some(GENERATE_PIN),
            dma_channel: Some(GENERATE_DMA_CHANNEL),
            ..Default::default()
        };
        let sys_hz = clocks.system_clock.freq().to_Hz();
        let dividers = defmt::unwrap!(config.clocks(sys_hz));
        defmt::info!(
            "tick {} ns, range {} ms",
            config.resolution_ns(),
            config.max_range_ms()
        );

        // Brings the DMA block out of reset; channels are driven by number.
        let _dma = hal::dma::DMAExt::split(ctx.device.DMA, &mut resets);
        let (mut pio0, sm0, _, _, _) = ctx.device.PIO0.split(&mut resets);
        let (mut pio1, sm1, _, _, _) = ctx.device.PIO1.split(&mut resets);

        let sio = hal::Sio::new(ctx.device.SIO);
        let pins = Pins::new(
            ctx.device.IO_BANK0,
            ctx.device.PADS_BANK0,
            sio.gpio_bank0,
            &mut resets,
        );
        pins.gpio10.into_function::<FunctionPio0>();
        pins.gpio11.into_function::<FunctionPio1>();

        let timer = config.capture_pin.zip(dividers.capture).map(|(pin, divider)| {
            defmt::unwrap!(PioCoprocessor::bind_timer(&mut pio0, sm0, pin, divider))
        });
        let generator = config.generate_pin.zip(dividers.generate).map(|(pin, divider)| {
            defmt::unwrap!(PioCoprocessor::bind_generator(
                &mut pio1,
                sm1,
                pin,
                divider,
                config.dma_channel
            ))
        });

        let delay = hal::Timer::new(ctx.device.TIMER, &mut resets, &clocks);
        let pulses = Pulses::new(timer, generator, delay);

        (Shared {}, Local { pulses })
    }

    #[task(binds = PIO0_IRQ_0)]
    fn capture_irq(_: capture_irq::Context) {
        // SAFETY: only the IRQ flag of the capture state machine is written.
        if regs::take_irq(&mut unsafe { Raw::steal() }, CAPTURE_SLOT) {
            CAPTURE_DONE.signal();
        }
    }

    #[task(binds = PIO1_IRQ_0)]
    fn generate_irq(_: generate_irq::Context) {
        // SAFETY: only the IRQ flag of the generator state machine is written.
        if regs::take_irq(&mut unsafe { Raw::steal() }, GENERATE_SLOT) {
            GENERATE_DONE.signal();
        }
    }

    /// Captures a pulse train on the capture pin and replays it on the
    /// generator pin, forever.
    #[idle(local = [pulses])]
    fn idle(ctx: idle::Context) -> ! {
        let pulses = ctx.local.pulses;
        let mut samples = [0u32; PULSES];
        loop {
            let start = match pulses.capture(&mut samples, DEFAULT_START_TIMEOUT, DEFAULT_BIT_TIMEOUT) {
                Ok(start) => start,
                Err(err) => {
                    defmt::error!("capture failed: {}", err);
                    Level::High
                }
            };
            defmt::info!("captured from {}: {}", start, samples);

            if let Err(err) = pulses.generate(&mut samples, start) {
                defmt::error!("generate failed: {}", err);
            }
            cortex_m::asm::delay(ROUND_GAP_CYCLES);
        }
    }
}
