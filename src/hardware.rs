// /src/hardware.rs
use embassy_stm32::flash::{Blocking, FLASH_SIZE, Flash, WRITE_SIZE};
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::mode::Async;
use embassy_stm32::rcc::{Hse, HseMode, Pll, PllMul, PllPreDiv, PllSource, Sysclk};
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{Config as UartConfig, Uart};
use embassy_stm32::{Config, bind_interrupts, peripherals, usart};
use embassy_time::{Duration, Instant, Timer};
use defmt::info;

use gate800c::control::Board;
use gate800c::error::StoreError;
use gate800c::platform::{Clock, DigitalInput, DigitalOutput, PersistentStore};

bind_interrupts!(pub struct Irqs {
    USART2 => usart::InterruptHandler<peripherals::USART2>;
});

pub type ModemUart = Uart<'static, Async>;

/// The configuration lives in the last two 2 KiB pages of the flash.
const STORE_PAGE_SIZE: u32 = 2048;
const STORE_SIZE: u32 = 2 * STORE_PAGE_SIZE;
const STORE_OFFSET: u32 = FLASH_SIZE as u32 - STORE_SIZE;
const STORE_CHUNK: usize = 64;
const ERASED: u8 = 0xFF;

pub struct BoardInput(Input<'static>);

impl DigitalInput for BoardInput {
    fn read(&mut self) -> bool {
        self.0.is_high()
    }
}

pub struct BoardOutput(Output<'static>);

impl DigitalOutput for BoardOutput {
    fn set(&mut self, high: bool) {
        self.0.set_level(Level::from(high));
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&mut self, duration: Duration) {
        Timer::after(duration).await;
    }
}

/// Zero-terminated JSON document at the end of the flash. An erased first
/// byte means nothing was saved yet.
pub struct FlashStore {
    flash: Flash<'static, Blocking>,
}

impl PersistentStore for FlashStore {
    fn exists(&mut self) -> bool {
        let mut first = [ERASED; 1];
        match self.flash.blocking_read(STORE_OFFSET, &mut first) {
            Ok(()) => first[0] != ERASED && first[0] != 0,
            Err(_) => false,
        }
    }

    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let len = buf.len().min(STORE_SIZE as usize);
        self.flash
            .blocking_read(STORE_OFFSET, &mut buf[..len])
            .map_err(|_| StoreError::Read)?;
        buf[..len]
            .iter()
            .position(|b| *b == 0 || *b == ERASED)
            .ok_or(StoreError::TooLarge)
    }

    fn save(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        if bytes.len() >= STORE_SIZE as usize {
            return Err(StoreError::TooLarge);
        }
        self.flash
            .blocking_erase(STORE_OFFSET, STORE_OFFSET + STORE_SIZE)
            .map_err(|_| StoreError::Write)?;

        let mut offset = STORE_OFFSET;
        let mut chunk = [0u8; STORE_CHUNK];
        for part in bytes.chunks(STORE_CHUNK) {
            chunk.fill(0);
            chunk[..part.len()].copy_from_slice(part);
            self.flash.blocking_write(offset, &chunk).map_err(|_| StoreError::Write)?;
            offset += STORE_CHUNK as u32;
        }
        // A partial last chunk already carries the terminator.
        if bytes.len() % STORE_CHUNK == 0 {
            self.flash
                .blocking_write(offset, &[0u8; WRITE_SIZE])
                .map_err(|_| StoreError::Write)?;
        }
        info!("Configuration saved ({} bytes)", bytes.len());
        Ok(())
    }
}

pub struct Sim800Control {
    pub sim800_enable: Output<'static>,
    pub sim800_ttl: Output<'static>,
}

pub struct Hardware {
    pub io: Board<BoardInput, BoardOutput>,
    pub modem_uart: ModemUart,
    pub sim800_control: Sim800Control,
    pub store: FlashStore,
    pub _alarm_pullup: Output<'static>,
}

pub fn init() -> Hardware {
    // 1. Clock Configuration
    let mut config = Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz::mhz(8),
        mode: HseMode::Bypass,
    });
    config.rcc.pll = Some(Pll {
        src: PllSource::HSE,
        prediv: PllPreDiv::DIV1,
        mul: PllMul::MUL6,
    });
    config.rcc.sys = Sysclk::PLL1_P;

    let p = embassy_stm32::init(config);
    info!("Hardware initialized! Clocked at 48MHz");

    // 2. Alarm inputs, powered from the pull-up rail
    let alarm_pullup = Output::new(p.PA7, Level::High, Speed::Low);
    let inputs = [
        BoardInput(Input::new(p.PA4, Pull::Down)),
        BoardInput(Input::new(p.PA5, Pull::Down)),
        BoardInput(Input::new(p.PA6, Pull::Down)),
        BoardInput(Input::new(p.PB1, Pull::Down)),
    ];
    // Closing the switch to ground stops the loop.
    let run_switch = BoardInput(Input::new(p.PB2, Pull::Up));

    // 3. Relays and status LED
    let relays = [
        BoardOutput(Output::new(p.PB3, Level::Low, Speed::Low)),
        BoardOutput(Output::new(p.PB4, Level::Low, Speed::Low)),
    ];
    let led = BoardOutput(Output::new(p.PC8, Level::Low, Speed::Low));

    // 4. SIM800 power control
    let sim800_control = Sim800Control {
        sim800_enable: Output::new(p.PC6, Level::Low, Speed::Low),
        sim800_ttl: Output::new(p.PC7, Level::Low, Speed::Low),
    };

    // 5. USART2 to the SIM800
    let mut config_u2 = UartConfig::default();
    config_u2.baudrate = 9600;
    let modem_uart = Uart::new(
        p.USART2,
        p.PA3, p.PA2,
        Irqs,
        p.DMA1_CH4, p.DMA1_CH5,
        config_u2,
    ).unwrap();

    let store = FlashStore {
        flash: Flash::new_blocking(p.FLASH),
    };

    Hardware {
        io: Board {
            inputs,
            relays,
            led,
            run_switch,
        },
        modem_uart,
        sim800_control,
        store,
        _alarm_pullup: alarm_pullup,
    }
}
