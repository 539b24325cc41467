//! Register block simulation for host tests.
//!
//! Mirrors MCR.INRQ into MSR.INAK, tracks mailbox occupancy behind TSR, keeps two receive FIFOs
//! behind RFxR and the RX mailbox registers, and honors write-1-to-clear flags.

use super::regs::{Dtr, IdWord, Mcr, Msr, Rfr, Tsr};
use super::{Reg, RegisterBlock};
use crate::message::CanMessage;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::RefCell;
use critical_section::Mutex;

const WORDS: usize = 0x2B0 / 4;
const TSR_RQCP_BITS: u32 = 0x0001_0101;
const RFR_FLAG_BITS: u32 = 0b1_1000;

struct State {
    words: [u32; WORDS],
    busy: [bool; 3],
    rx: [VecDeque<(CanMessage, u8)>; 2],
    sent: Vec<(u8, CanMessage)>,
    writes: Vec<(Reg, u32)>,
}

pub(crate) struct MockRegisters {
    state: Mutex<RefCell<State>>,
}

impl MockRegisters {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                words: [0; WORDS],
                busy: [false; 3],
                rx: [VecDeque::new(), VecDeque::new()],
                sent: Vec::new(),
                writes: Vec::new(),
            })),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// Places a frame in hardware receive FIFO `fifo` as if accepted by filter `fmi`.
    pub(crate) fn inject(&self, fifo: u8, message: CanMessage, fmi: u8) {
        self.with(|s| s.rx[usize::from(fifo)].push_back((message, fmi)));
    }

    /// Number of frames still held by the hardware FIFO.
    pub(crate) fn pending(&self, fifo: u8) -> usize {
        self.with(|s| s.rx[usize::from(fifo)].len())
    }

    /// Raises FULL and FOVR on `fifo`.
    pub(crate) fn raise_overrun(&self, fifo: u8) {
        self.with(|s| s.words[Reg::Rfr(fifo).offset() / 4] |= RFR_FLAG_BITS);
    }

    /// Marks `mailbox` as holding a pending request.
    pub(crate) fn set_busy(&self, mailbox: u8, busy: bool) {
        self.with(|s| s.busy[usize::from(mailbox)] = busy);
    }

    /// Finishes transmission from `mailbox`, setting its request-completed flag.
    pub(crate) fn complete(&self, mailbox: u8) {
        self.with(|s| {
            s.busy[usize::from(mailbox)] = false;
            s.words[Reg::Tsr.offset() / 4] |= 1 << (8 * u32::from(mailbox));
        });
    }

    /// Frames whose TXRQ was set, with the mailbox used.
    pub(crate) fn sent(&self) -> Vec<(u8, CanMessage)> {
        self.with(|s| s.sent.clone())
    }

    /// Every write in order.
    pub(crate) fn writes(&self) -> Vec<(Reg, u32)> {
        self.with(|s| s.writes.clone())
    }

    /// Last value written to `reg`.
    pub(crate) fn stored(&self, reg: Reg) -> u32 {
        self.with(|s| s.words[reg.offset() / 4])
    }
}

impl State {
    fn word(&self, reg: Reg) -> u32 {
        self.words[reg.offset() / 4]
    }

    fn rx_front(&self, fifo: u8) -> Option<&(CanMessage, u8)> {
        self.rx.get(usize::from(fifo)).and_then(VecDeque::front)
    }

    /// Front frame of `fifo` as seen through the receive mailbox registers.
    fn rx_mailbox(&self, fifo: u8, reg: Reg) -> u32 {
        let Some((m, fmi)) = self.rx_front(fifo) else {
            return 0;
        };
        match reg {
            Reg::Rir(_) => IdWord::from_id(m.id, m.ext, m.rtr).into_bits(),
            Reg::Rdtr(_) => Dtr::new().with_dlc(m.len).with_fmi(*fmi).into_bits(),
            Reg::Rdlr(_) => m.data32()[0],
            _ => m.data32()[1],
        }
    }

    fn tsr(&self) -> Tsr {
        let stored = Tsr::from_bits(self.word(Reg::Tsr) & TSR_RQCP_BITS);
        let code = self.busy.iter().position(|busy| !busy).unwrap_or(0);
        stored
            .with_tme0(!self.busy[0])
            .with_tme1(!self.busy[1])
            .with_tme2(!self.busy[2])
            .with_code(code as u8)
    }

    fn record_transmission(&mut self, mailbox: u8, tir: IdWord) {
        let dtr = Dtr::from_bits(self.word(Reg::Tdtr(mailbox)));
        let mut message = CanMessage {
            id: tir.id(),
            ext: tir.ide(),
            rtr: tir.rtr(),
            len: dtr.dlc(),
            ..CanMessage::default()
        };
        message.set_data32(self.word(Reg::Tdlr(mailbox)), self.word(Reg::Tdhr(mailbox)));
        self.busy[usize::from(mailbox)] = true;
        self.sent.push((mailbox, message));
    }
}

impl RegisterBlock for MockRegisters {
    fn read(&self, reg: Reg) -> u32 {
        self.with(|s| match reg {
            Reg::Msr => {
                let inak = Mcr::from_bits(s.word(Reg::Mcr)).inrq();
                Msr::from_bits(s.word(Reg::Msr)).with_inak(inak).into_bits()
            }
            Reg::Tsr => s.tsr().into_bits(),
            Reg::Rfr(fifo) => {
                let pending = s.rx[usize::from(fifo)].len().min(3) as u8;
                Rfr::from_bits(s.word(reg) & RFR_FLAG_BITS)
                    .with_fmp(pending)
                    .into_bits()
            }
            Reg::Rir(fifo) | Reg::Rdtr(fifo) | Reg::Rdlr(fifo) | Reg::Rdhr(fifo) => {
                s.rx_mailbox(fifo, reg)
            }
            _ => s.word(reg),
        })
    }

    fn write(&self, reg: Reg, value: u32) {
        self.with(|s| {
            s.writes.push((reg, value));
            let index = reg.offset() / 4;
            match reg {
                Reg::Tsr => s.words[index] &= !(value & TSR_RQCP_BITS),
                Reg::Rfr(fifo) => {
                    s.words[index] &= !(value & RFR_FLAG_BITS);
                    if Rfr::from_bits(value).rfom() {
                        s.rx[usize::from(fifo)].pop_front();
                    }
                }
                Reg::Tir(mailbox) => {
                    let tir = IdWord::from_bits(value);
                    s.words[index] = value & !1;
                    if tir.txrq() {
                        s.record_transmission(mailbox, tir);
                    }
                }
                _ => s.words[index] = value,
            }
        });
    }
}
