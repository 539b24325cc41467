//! NUCLEO-F103RB in internal loop-back: every frame sent on the queued path comes back through
//! FIFO 0 and is counted by the filter callback.

#![no_std]
#![no_main]

use bxcan_fifo::pac::mapping::CAN_CLOCK_HZ;
use bxcan_fifo::{
    Action, Can, CanInterrupt, CanMessage, ClockGate, Filters, Format, InterruptBinding,
    MaskEntry, Mcu, Mmio, ModuleMode, NvicLines, Settings,
};
use core::sync::atomic::{AtomicU32, Ordering};
use cortex_m_rt::entry;
use defmt::*;
use embassy_stm32::gpio::{AfType, Flex, Level, Output, OutputType, Pull, Speed};
use embassy_stm32::interrupt::Interrupt;
use embassy_stm32::rcc::{
    AHBPrescaler, APBPrescaler, Hse, HseMode, Pll, PllMul, PllPreDiv, PllSource, Sysclk,
};
use embassy_stm32::time::Hertz;
use embassy_stm32::{Config, interrupt, peripherals};
use {defmt_rtt as _, panic_probe as _};

static CAN1: InterruptBinding<Mmio, Mcu<Interrupt>> = InterruptBinding::new();
static ECHOED: AtomicU32 = AtomicU32::new(0);

#[interrupt]
fn USB_HP_CAN1_TX() {
    CAN1.on_interrupt(CanInterrupt::Tx);
}

#[interrupt]
fn USB_LP_CAN1_RX0() {
    CAN1.on_interrupt(CanInterrupt::Rx0);
}

#[interrupt]
fn CAN1_RX1() {
    CAN1.on_interrupt(CanInterrupt::Rx1);
}

#[entry]
fn main() -> ! {
    let p = embassy_stm32::init(clock_config());
    info!("bxCAN loop-back");

    let mut led = Output::new(p.PA5, Level::Low, Speed::Low);

    let board = Mcu {
        clock: ClockGate::can1(),
        lines: NvicLines {
            tx: interrupt::USB_HP_CAN1_TX,
            rx0: interrupt::USB_LP_CAN1_RX0,
            rx1: interrupt::CAN1_RX1,
        },
        pins: can_pins,
    };
    let can = unwrap!(CAN1.init(Can::new(unsafe { Mmio::can1() }, board)));

    let settings =
        Settings::new(CAN_CLOCK_HZ, 500_000).set_module_mode(ModuleMode::InternalLoopBack);
    let bit_rate = settings.actual_bit_rate();
    let sample_point = settings.sample_point_from_bit_start();
    info!("{} b/s, sample point {}%", bit_rate, sample_point);

    let echo = MaskEntry::new(0x100, 0x700, Format::Data).with_callback(on_echo);
    let remote = MaskEntry::new(0x200, 0x7FF, Format::Remote);
    let mut filters = Filters::new();
    unwrap!(filters.add_standard_masks(echo, remote, Action::Fifo0));
    unwrap!(can.begin(&settings, &filters));

    let mut sequence: u8 = 0;
    loop {
        let id = 0x100 | u16::from(sequence & 0xF);
        let frame = unwrap!(CanMessage::new_standard(id, &[sequence]));
        if let Err(error) = can.try_to_send(&frame) {
            warn!("send refused: {}", error);
        }
        while can.dispatch_received_message() {}

        led.toggle();
        let echoed = ECHOED.load(Ordering::Relaxed);
        info!("sent {}, echoed {}", sequence, echoed);
        sequence = sequence.wrapping_add(1);
        cortex_m::asm::delay(CAN_CLOCK_HZ);
    }
}

fn on_echo(message: &CanMessage) {
    ECHOED.fetch_add(1, Ordering::Relaxed);
    trace!("echo {=u32:#x}", message.id);
}

/// PA11 RX, PA12 TX, no remap.
fn can_pins(open_collector: bool) {
    let output = if open_collector {
        OutputType::OpenDrain
    } else {
        OutputType::PushPull
    };
    let mut tx = Flex::new(unsafe { peripherals::PA12::steal() });
    tx.set_as_af_unchecked(0, AfType::output(output, Speed::VeryHigh));
    core::mem::forget(tx);

    let mut rx = Flex::new(unsafe { peripherals::PA11::steal() });
    rx.set_as_af_unchecked(0, AfType::input(Pull::Up));
    core::mem::forget(rx);
}

/// 8 MHz HSE, 72 MHz SYSCLK, 36 MHz APB1 feeding the CAN peripheral.
fn clock_config() -> Config {
    let mut config = Config::default();
    config.rcc.hse = Some(Hse {
        freq: Hertz(8_000_000),
        mode: HseMode::Oscillator,
    });
    config.rcc.pll = Some(Pll {
        src: PllSource::HSE,
        prediv: PllPreDiv::DIV1,
        mul: PllMul::MUL9,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV2;
    config.rcc.apb2_pre = APBPrescaler::DIV1;
    config
}
