pub mod regs;

#[cfg(test)]
pub(crate) mod mock;

/// Named bxCAN registers. Mailbox, FIFO and bank numbers are not range-checked here; the driver
/// only produces mailboxes 0..3, FIFOs 0..2 and banks 0..14.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Master control
    Mcr,
    /// Master status
    Msr,
    /// Transmit status
    Tsr,
    /// Receive FIFO 0 / 1 status
    Rfr(u8),
    /// Interrupt enable
    Ier,
    /// Error status
    Esr,
    /// Bit timing
    Btr,
    /// TX mailbox identifier
    Tir(u8),
    /// TX mailbox length (and time stamp)
    Tdtr(u8),
    /// TX mailbox data bytes 0..4
    Tdlr(u8),
    /// TX mailbox data bytes 4..8
    Tdhr(u8),
    /// RX FIFO mailbox identifier
    Rir(u8),
    /// RX FIFO mailbox length and filter match index
    Rdtr(u8),
    Rdlr(u8),
    Rdhr(u8),
    /// Filter master
    Fmr,
    /// Filter mode, 1 = identifier list
    Fm1r,
    /// Filter scale, 1 = single 32-bit
    Fs1r,
    /// Filter FIFO assignment, 1 = FIFO 1
    Ffa1r,
    /// Filter activation
    Fa1r,
    /// Filter bank first word
    Fr1(u8),
    /// Filter bank second word
    Fr2(u8),
}

impl Reg {
    /// Byte offset from the peripheral base address.
    pub const fn offset(self) -> usize {
        match self {
            Reg::Mcr => 0x000,
            Reg::Msr => 0x004,
            Reg::Tsr => 0x008,
            Reg::Rfr(fifo) => 0x00C + 4 * fifo as usize,
            Reg::Ier => 0x014,
            Reg::Esr => 0x018,
            Reg::Btr => 0x01C,
            Reg::Tir(mailbox) => 0x180 + 16 * mailbox as usize,
            Reg::Tdtr(mailbox) => 0x184 + 16 * mailbox as usize,
            Reg::Tdlr(mailbox) => 0x188 + 16 * mailbox as usize,
            Reg::Tdhr(mailbox) => 0x18C + 16 * mailbox as usize,
            Reg::Rir(fifo) => 0x1B0 + 16 * fifo as usize,
            Reg::Rdtr(fifo) => 0x1B4 + 16 * fifo as usize,
            Reg::Rdlr(fifo) => 0x1B8 + 16 * fifo as usize,
            Reg::Rdhr(fifo) => 0x1BC + 16 * fifo as usize,
            Reg::Fmr => 0x200,
            Reg::Fm1r => 0x204,
            Reg::Fs1r => 0x20C,
            Reg::Ffa1r => 0x214,
            Reg::Fa1r => 0x21C,
            Reg::Fr1(bank) => 0x240 + 8 * bank as usize,
            Reg::Fr2(bank) => 0x244 + 8 * bank as usize,
        }
    }
}

/// Word access to one bxCAN instance.
///
/// Reads of status registers may have side effects on real hardware (none of the registers the
/// driver reads do), writes of 1 clear the `rc_w1` flags.
pub trait RegisterBlock {
    fn read(&self, reg: Reg) -> u32;

    fn write(&self, reg: Reg, value: u32);

    #[inline]
    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

/// Memory mapped register block.
pub struct Mmio {
    base: *mut u32,
}

// Only volatile word accesses go through the pointer, the driver serializes them.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Mmio {
    /// # Safety
    /// `base` must be the address of a bxCAN register block that nothing else accesses.
    #[inline]
    pub const unsafe fn new(base: *mut ()) -> Self {
        Self {
            base: base as *mut u32,
        }
    }

    /// CAN1 of the selected chip.
    ///
    /// # Safety
    /// Must be called at most once, see [`Mmio::new`].
    #[cfg(any(feature = "f1", feature = "f3", feature = "l4"))]
    #[inline]
    pub unsafe fn can1() -> Self {
        unsafe { Self::new(mapping::CAN1_REGISTER_BLOCK_ADDR) }
    }

    #[inline]
    fn ptr(&self, reg: Reg) -> *mut u32 {
        self.base.wrapping_add(reg.offset() / 4)
    }
}

impl RegisterBlock for Mmio {
    #[inline]
    fn read(&self, reg: Reg) -> u32 {
        unsafe { core::ptr::read_volatile(self.ptr(reg)) }
    }

    #[inline]
    fn write(&self, reg: Reg, value: u32) {
        unsafe { core::ptr::write_volatile(self.ptr(reg), value) }
    }
}

#[cfg(feature = "f1")]
pub mod mapping {
    pub const CAN1_REGISTER_BLOCK_ADDR: *mut () = 0x4000_6400 as *mut ();
    /// RCC_APB1ENR
    pub const CAN1_CLOCK_ENABLE_REGISTER: *mut u32 = 0x4002_101C as *mut u32;
    /// RCC_APB1RSTR
    pub const CAN1_RESET_REGISTER: *mut u32 = 0x4002_1010 as *mut u32;
    pub const CAN1_CLOCK_ENABLE_BIT: u8 = 25;
    pub const CAN1_RESET_BIT: u8 = 25;
    pub const CAN1_TX_IRQ: u16 = 19;
    pub const CAN1_RX0_IRQ: u16 = 20;
    pub const CAN1_RX1_IRQ: u16 = 21;
    /// APB1 at its maximum on a 72 MHz F103RB.
    pub const CAN_CLOCK_HZ: u32 = 36_000_000;
}

#[cfg(feature = "f3")]
pub mod mapping {
    pub const CAN1_REGISTER_BLOCK_ADDR: *mut () = 0x4000_6400 as *mut ();
    /// RCC_APB1ENR
    pub const CAN1_CLOCK_ENABLE_REGISTER: *mut u32 = 0x4002_101C as *mut u32;
    /// RCC_APB1RSTR
    pub const CAN1_RESET_REGISTER: *mut u32 = 0x4002_1010 as *mut u32;
    pub const CAN1_CLOCK_ENABLE_BIT: u8 = 25;
    pub const CAN1_RESET_BIT: u8 = 25;
    pub const CAN1_TX_IRQ: u16 = 19;
    pub const CAN1_RX0_IRQ: u16 = 20;
    pub const CAN1_RX1_IRQ: u16 = 21;
    /// APB1 of a 64 MHz F303K8.
    pub const CAN_CLOCK_HZ: u32 = 32_000_000;
}

#[cfg(feature = "l4")]
pub mod mapping {
    pub const CAN1_REGISTER_BLOCK_ADDR: *mut () = 0x4000_6400 as *mut ();
    /// RCC_APB1ENR1
    pub const CAN1_CLOCK_ENABLE_REGISTER: *mut u32 = 0x4002_1058 as *mut u32;
    /// RCC_APB1RSTR1
    pub const CAN1_RESET_REGISTER: *mut u32 = 0x4002_1038 as *mut u32;
    pub const CAN1_CLOCK_ENABLE_BIT: u8 = 25;
    pub const CAN1_RESET_BIT: u8 = 25;
    pub const CAN1_TX_IRQ: u16 = 19;
    pub const CAN1_RX0_IRQ: u16 = 20;
    pub const CAN1_RX1_IRQ: u16 = 21;
    /// APB1 of an 80 MHz L432KC.
    pub const CAN_CLOCK_HZ: u32 = 80_000_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_reference_manual() {
        assert_eq!(Reg::Rfr(1).offset(), 0x010);
        assert_eq!(Reg::Tir(2).offset(), 0x1A0);
        assert_eq!(Reg::Tdhr(1).offset(), 0x19C);
        assert_eq!(Reg::Rir(1).offset(), 0x1C0);
        assert_eq!(Reg::Rdhr(0).offset(), 0x1BC);
        assert_eq!(Reg::Fr1(13).offset(), 0x2A8);
        assert_eq!(Reg::Fr2(13).offset(), 0x2AC);
    }

    #[test]
    fn mmio_uses_word_offsets() {
        let mut words = [0u32; 0x2B0 / 4];
        {
            let mmio = unsafe { Mmio::new(words.as_mut_ptr() as *mut ()) };
            mmio.write(Reg::Btr, 0x1234);
            mmio.modify(Reg::Fr2(3), |w| w | 0x8000_0001);
            assert_eq!(mmio.read(Reg::Btr), 0x1234);
            assert_eq!(mmio.read(Reg::Fr2(3)), 0x8000_0001);
        }
        assert_eq!(words[0x1C / 4], 0x1234);
        assert_eq!(words[0x25C / 4], 0x8000_0001);
    }
}
