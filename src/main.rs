// /src/main.rs
#![no_std]
#![no_main]

use defmt::{error, info};
use defmt_rtt as _;
use panic_probe as _;

use embassy_executor::Spawner;
use embassy_stm32::mode::Async;
use embassy_stm32::usart::UartRx;

use gate800c::control::{Controller, Exit};
use gate800c::dispatcher::{DispatchPolicy, Dispatcher};
use gate800c::handlers::register_gate_handlers;

mod hardware;
mod sim800;

use crate::hardware::SystemClock;
use crate::sim800::Sim800;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let hw = hardware::init();

    info!("Starting gate800c...");

    let (tx, rx) = hw.modem_uart.split();
    spawner.spawn(sim800_rx_task(rx)).unwrap();

    let mut modem = Sim800::new(tx, hw.sim800_control);
    modem.power_up().await;
    if let Err(err) = modem.init().await {
        // Registration polling reports the modem as unreachable.
        error!("SIM800 init failed: {}", err);
    }

    let mut dispatcher = Dispatcher::new(DispatchPolicy::GATE);
    register_gate_handlers(&mut dispatcher).unwrap();

    let mut controller = Controller::new(modem, hw.io, hw.store, SystemClock, dispatcher);
    match controller.run().await {
        Ok(Exit::Reboot) => {
            info!("Rebooting...");
            cortex_m::peripheral::SCB::sys_reset();
        }
        Ok(Exit::Stopped) => {
            info!("Stopped by the run switch");
            core::future::pending::<()>().await;
        }
        Err(err) => controller.halt(err).await,
    }
}

#[embassy_executor::task]
async fn sim800_rx_task(rx: UartRx<'static, Async>) {
    sim800::rx_runner(rx).await;
}
