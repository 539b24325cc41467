use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;

// Two peripheral clock cycles must elapse after enabling before the peripheral responds.
// http://efton.sk/STM32/gotcha/g183.html
const CLOCK_DOMAIN_SYNCHRONIZATION_DELAY: u32 = 100;

/// Chip and board specific side of the driver: clock gating, pin muxing and interrupt lines.
pub trait Board {
    fn enable_clock(&self);

    /// Pulses the peripheral reset.
    fn reset(&self);

    /// Routes RX and TX to the CAN alternate function. TX is open drain when `open_collector` is
    /// set, push-pull otherwise.
    fn configure_pins(&self, open_collector: bool);

    /// Masks the TX, RX0 and RX1 interrupt lines.
    fn mask_interrupts(&self);

    /// Clears pending state of the three interrupt lines and unmasks them.
    fn unmask_interrupts(&self);
}

/// RCC enable and reset bits of one peripheral.
pub struct ClockGate {
    enable_register: *mut u32,
    enable_bit: u8,
    reset_register: *mut u32,
    reset_bit: u8,
}

unsafe impl Send for ClockGate {}
unsafe impl Sync for ClockGate {}

impl ClockGate {
    /// # Safety
    /// Both registers must be RCC registers where setting the given bits only affects this
    /// peripheral.
    pub const unsafe fn new(
        enable_register: *mut u32,
        enable_bit: u8,
        reset_register: *mut u32,
        reset_bit: u8,
    ) -> Self {
        Self {
            enable_register,
            enable_bit,
            reset_register,
            reset_bit,
        }
    }

    /// CAN1 of the selected chip.
    #[cfg(any(feature = "f1", feature = "f3", feature = "l4"))]
    pub const fn can1() -> Self {
        use crate::pac::mapping::*;
        unsafe {
            Self::new(
                CAN1_CLOCK_ENABLE_REGISTER,
                CAN1_CLOCK_ENABLE_BIT,
                CAN1_RESET_REGISTER,
                CAN1_RESET_BIT,
            )
        }
    }

    pub fn enable(&self) {
        unsafe { set_bit(self.enable_register, self.enable_bit, true) };
        cortex_m::asm::delay(CLOCK_DOMAIN_SYNCHRONIZATION_DELAY);
        cortex_m::asm::dsb();
    }

    pub fn pulse_reset(&self) {
        unsafe { set_bit(self.reset_register, self.reset_bit, true) };
        cortex_m::asm::dsb();
        unsafe { set_bit(self.reset_register, self.reset_bit, false) };
    }
}

/// Read-modify-write of one bit.
///
/// # Safety
/// `register` must be valid for volatile reads and writes.
#[inline]
unsafe fn set_bit(register: *mut u32, bit: u8, value: bool) {
    unsafe {
        let current = core::ptr::read_volatile(register);
        let updated = if value {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        core::ptr::write_volatile(register, updated);
    }
}

/// The three NVIC lines of one bxCAN instance.
#[derive(Clone, Copy)]
pub struct NvicLines<I> {
    pub tx: I,
    pub rx0: I,
    pub rx1: I,
}

impl<I: InterruptNumber> NvicLines<I> {
    pub fn mask(&self) {
        NVIC::mask(self.rx0);
        NVIC::mask(self.rx1);
        NVIC::mask(self.tx);
    }

    pub fn unmask(&self) {
        for line in [self.rx0, self.rx1, self.tx] {
            NVIC::unpend(line);
            unsafe { NVIC::unmask(line) };
        }
    }
}

/// [`Board`] built from a clock gate, the interrupt lines and a pin setup routine.
pub struct Mcu<I> {
    pub clock: ClockGate,
    pub lines: NvicLines<I>,
    /// Called with the open drain flag from [`Board::configure_pins`].
    pub pins: fn(bool),
}

impl<I: InterruptNumber> Board for Mcu<I> {
    fn enable_clock(&self) {
        self.clock.enable();
    }

    fn reset(&self) {
        self.clock.pulse_reset();
    }

    fn configure_pins(&self, open_collector: bool) {
        (self.pins)(open_collector);
    }

    fn mask_interrupts(&self) {
        self.lines.mask();
    }

    fn unmask_interrupts(&self) {
        self.lines.unmask();
    }
}
