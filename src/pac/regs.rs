use bitfield_struct::bitfield;

/// CAN_MCR
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Mcr {
    /// Initialization request
    pub inrq: bool,
    /// Sleep mode request
    pub sleep: bool,
    /// Transmit FIFO priority: 0 = by identifier, 1 = by request order
    pub txfp: bool,
    /// Receive FIFO locked mode
    pub rflm: bool,
    /// No automatic retransmission
    pub nart: bool,
    /// Automatic wakeup
    pub awum: bool,
    /// Automatic bus-off management
    pub abom: bool,
    /// Time triggered communication
    pub ttcm: bool,
    #[bits(7)]
    __: u8,
    /// Software master reset
    pub reset: bool,
    /// Debug freeze
    pub dbf: bool,
    #[bits(15)]
    __: u16,
}

/// CAN_MSR
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Msr {
    /// Initialization acknowledge
    pub inak: bool,
    pub slak: bool,
    pub erri: bool,
    pub wkui: bool,
    pub slaki: bool,
    #[bits(27)]
    __: u32,
}

/// CAN_TSR
///
/// `rqcpN`, `txokN`, `alstN` and `terrN` are cleared by writing 1 to `rqcpN`.
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Tsr {
    pub rqcp0: bool,
    pub txok0: bool,
    pub alst0: bool,
    pub terr0: bool,
    #[bits(3)]
    __: u8,
    pub abrq0: bool,
    pub rqcp1: bool,
    pub txok1: bool,
    pub alst1: bool,
    pub terr1: bool,
    #[bits(3)]
    __: u8,
    pub abrq1: bool,
    pub rqcp2: bool,
    pub txok2: bool,
    pub alst2: bool,
    pub terr2: bool,
    #[bits(3)]
    __: u8,
    pub abrq2: bool,
    /// Number of the next empty mailbox, valid when at least one `tmeN` is set
    #[bits(2)]
    pub code: u8,
    pub tme0: bool,
    pub tme1: bool,
    pub tme2: bool,
    pub low0: bool,
    pub low1: bool,
    pub low2: bool,
}

impl Tsr {
    /// Transmit mailbox `mailbox` is empty.
    #[inline]
    pub const fn tme(&self, mailbox: u8) -> bool {
        match mailbox {
            0 => self.tme0(),
            1 => self.tme1(),
            2 => self.tme2(),
            _ => false,
        }
    }

    #[inline]
    pub const fn any_empty(&self) -> bool {
        self.tme0() || self.tme1() || self.tme2()
    }

    /// Value clearing all three request-completed flags when written.
    #[inline]
    pub const fn clear_request_completed() -> Self {
        Self::new()
            .with_rqcp0(true)
            .with_rqcp1(true)
            .with_rqcp2(true)
    }
}

/// CAN_RF0R / CAN_RF1R
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Rfr {
    /// Number of pending messages in the hardware FIFO
    #[bits(2)]
    pub fmp: u8,
    __: bool,
    /// FIFO full, write 1 to clear
    pub full: bool,
    /// FIFO overrun, write 1 to clear
    pub fovr: bool,
    /// Release the output mailbox
    pub rfom: bool,
    #[bits(26)]
    __: u32,
}

/// CAN_IER, error and wakeup interrupts are never enabled by this driver.
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Ier {
    pub tmeie: bool,
    pub fmpie0: bool,
    pub ffie0: bool,
    pub fovie0: bool,
    pub fmpie1: bool,
    pub ffie1: bool,
    pub fovie1: bool,
    #[bits(25)]
    __: u32,
}

/// CAN_BTR, every timing field holds its value minus one.
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Btr {
    #[bits(10)]
    pub brp: u16,
    #[bits(6)]
    __: u8,
    #[bits(4)]
    pub ts1: u8,
    #[bits(3)]
    pub ts2: u8,
    __: bool,
    #[bits(2)]
    pub sjw: u8,
    #[bits(4)]
    __: u8,
    /// Loop back mode
    pub lbkm: bool,
    /// Silent mode
    pub silm: bool,
}

/// Identifier word shared by CAN_TIxR, CAN_RIxR and 32-bit filter registers.
///
/// Bit 0 is TXRQ for transmit mailboxes and reserved elsewhere.
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct IdWord {
    pub txrq: bool,
    pub rtr: bool,
    pub ide: bool,
    /// Standard identifier in the upper 11 bits, or the full extended identifier
    #[bits(29)]
    pub exid: u32,
}

impl IdWord {
    const STID_SHIFT: u32 = 18;

    #[inline]
    pub const fn from_id(id: u32, ext: bool, rtr: bool) -> Self {
        let exid = if ext { id } else { id << Self::STID_SHIFT };
        Self::new().with_exid(exid).with_ide(ext).with_rtr(rtr)
    }

    /// Identifier interpreted according to `ide`.
    #[inline]
    pub const fn id(&self) -> u32 {
        if self.ide() {
            self.exid()
        } else {
            self.exid() >> Self::STID_SHIFT
        }
    }
}

/// CAN_TDTxR / CAN_RDTxR
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Dtr {
    #[bits(4)]
    pub dlc: u8,
    #[bits(4)]
    __: u8,
    /// Filter match index, receive side only
    #[bits(8)]
    pub fmi: u8,
    #[bits(16)]
    __: u16,
}

/// CAN_FMR
#[bitfield(u32, defmt = cfg(feature = "defmt"))]
pub struct Fmr {
    /// Filter initialization mode
    pub finit: bool,
    #[bits(31)]
    __: u32,
}

/// One 16-bit half of a filter register in dual scale configuration.
#[bitfield(u16, defmt = cfg(feature = "defmt"))]
pub struct FilterHalf {
    /// Extended identifier bits 17:15, unused by standard filters
    #[bits(3)]
    pub exid_hi: u8,
    pub ide: bool,
    pub rtr: bool,
    #[bits(11)]
    pub stid: u16,
}

impl FilterHalf {
    /// `FRx` word made of two halves, `high` in bits 31:16.
    #[inline]
    pub const fn pack(low: Self, high: Self) -> u32 {
        ((high.into_bits() as u32) << 16) | low.into_bits() as u32
    }
}
