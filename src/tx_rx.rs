use crate::board::Board;
use crate::bxcan::Can;
use crate::message::CanMessage;
use crate::pac::regs::{Dtr, IdWord, Rfr, Tsr};
use crate::pac::{Reg, RegisterBlock};
use paste::paste;

/// Why [`Can::try_to_send`] refused a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// `idx` is not 0, 1 or 2.
    IndexOutOfRange,
    /// The transmit queue is full (`idx` 0) or the dedicated mailbox is busy (`idx` 1 and 2).
    BufferOverflow,
}

impl SendError {
    /// Numeric status code, 0 being success.
    pub const fn code(self) -> u32 {
        match self {
            SendError::IndexOutOfRange => 1,
            SendError::BufferOverflow => 2,
        }
    }
}

macro_rules! receive_fifo {
    ($fifo:literal) => {
        paste! {
            #[doc = "A frame is waiting in the receive queue of FIFO " $fifo "."]
            #[inline]
            pub fn [<available $fifo>](&self) -> bool {
                self.available($fifo)
            }

            #[doc = "Pops the oldest frame received through FIFO " $fifo "."]
            #[inline]
            pub fn [<receive $fifo>](&self) -> Option<CanMessage> {
                self.receive($fifo)
            }

            #[doc = "Pops one frame of FIFO " $fifo " and hands it to its filter callback. "]
            #[doc = "Returns whether a frame was popped, even if no callback handled it."]
            #[inline]
            pub fn [<dispatch_received_message $fifo>](&self) -> bool {
                self.dispatch_from($fifo)
            }

            #[inline]
            pub fn [<driver_receive_fifo $fifo _size>](&self) -> usize {
                self.with_inner(|inner| inner.rx[$fifo].size())
            }

            #[inline]
            pub fn [<driver_receive_fifo $fifo _count>](&self) -> usize {
                self.with_inner(|inner| inner.rx[$fifo].count())
            }

            #[inline]
            pub fn [<driver_receive_fifo $fifo _peak_count>](&self) -> usize {
                self.with_inner(|inner| inner.rx[$fifo].peak_count())
            }

            #[inline]
            pub fn [<reset_driver_receive_fifo $fifo _peak_count>](&self) {
                self.with_inner(|inner| inner.rx[$fifo].reset_peak_count())
            }

            #[doc = "Body of the RX" $fifo " interrupt handler."]
            #[inline]
            pub fn [<message_isr_rx $fifo>](&self) {
                self.message_isr_rx($fifo)
            }
        }
    };
}

impl<R: RegisterBlock, B: Board> Can<R, B> {
    receive_fifo!(0);
    receive_fifo!(1);

    /// Sends `message` through the path selected by `message.idx`.
    ///
    /// - 0: written straight to mailbox 0 when it is free and nothing is queued, otherwise
    ///   appended to the software transmit queue that the TX interrupt drains.
    /// - 1, 2: written to that mailbox if it is free. These mailboxes are never fed from the
    ///   queue by this method, which keeps them available for latency sensitive frames.
    pub fn try_to_send(&self, message: &CanMessage) -> Result<(), SendError> {
        self.with_inner(|inner| {
            let tsr = self.tsr();
            match message.idx {
                0 => {
                    if inner.tx.is_empty() && tsr.tme0() {
                        self.write_mailbox(0, message);
                        Ok(())
                    } else if inner.tx.append(*message) {
                        Ok(())
                    } else {
                        Err(SendError::BufferOverflow)
                    }
                }
                mailbox @ (1 | 2) => {
                    if tsr.tme(mailbox) {
                        self.write_mailbox(mailbox, message);
                        Ok(())
                    } else {
                        Err(SendError::BufferOverflow)
                    }
                }
                _ => Err(SendError::IndexOutOfRange),
            }
        })
    }

    /// Whether [`try_to_send`](Self::try_to_send) would currently accept a frame with this `idx`.
    pub fn send_buffer_not_full_for_index(&self, idx: u8) -> bool {
        match idx {
            0 => self.with_inner(|inner| !inner.tx.is_full()),
            1 | 2 => self.tsr().tme(idx),
            _ => false,
        }
    }

    /// Pops one frame from each receive queue and dispatches it. Returns whether either queue
    /// yielded a frame.
    pub fn dispatch_received_message(&self) -> bool {
        let fifo0 = self.dispatch_received_message0();
        let fifo1 = self.dispatch_received_message1();
        fifo0 || fifo1
    }

    #[inline]
    pub fn driver_transmit_fifo_size(&self) -> usize {
        self.with_inner(|inner| inner.tx.size())
    }

    #[inline]
    pub fn driver_transmit_fifo_count(&self) -> usize {
        self.with_inner(|inner| inner.tx.count())
    }

    #[inline]
    pub fn driver_transmit_fifo_peak_count(&self) -> usize {
        self.with_inner(|inner| inner.tx.peak_count())
    }

    #[inline]
    pub fn reset_driver_transmit_fifo_peak_count(&self) {
        self.with_inner(|inner| inner.tx.reset_peak_count())
    }

    /// Body of the TX interrupt handler: moves one queued frame into the mailbox the peripheral
    /// reports free, then acknowledges the request-completed flags of all mailboxes.
    pub fn message_isr_tx(&self) {
        self.with_inner(|inner| {
            if inner.tx.is_empty() {
                return;
            }
            let tsr = self.tsr();
            if !tsr.any_empty() {
                return;
            }
            if let Some(message) = inner.tx.remove() {
                self.write_mailbox(tsr.code(), &message);
            }
        });
        self.regs
            .write(Reg::Tsr, Tsr::clear_request_completed().into_bits());
    }

    #[inline]
    fn tsr(&self) -> Tsr {
        Tsr::from_bits(self.regs.read(Reg::Tsr))
    }

    fn write_mailbox(&self, mailbox: u8, message: &CanMessage) {
        let tir = IdWord::from_id(message.id, message.ext, message.rtr);
        let tdtr = Dtr::new().with_dlc(message.len & 0xF);
        let [low, high] = message.data32();
        self.regs.write(Reg::Tir(mailbox), tir.into_bits());
        self.regs.write(Reg::Tdtr(mailbox), tdtr.into_bits());
        self.regs.write(Reg::Tdlr(mailbox), low);
        self.regs.write(Reg::Tdhr(mailbox), high);
        let request = |w| IdWord::from_bits(w).with_txrq(true).into_bits();
        self.regs.modify(Reg::Tir(mailbox), request);
    }

    #[inline]
    fn available(&self, fifo: usize) -> bool {
        self.with_inner(|inner| !inner.rx[fifo].is_empty())
    }

    #[inline]
    fn receive(&self, fifo: usize) -> Option<CanMessage> {
        self.with_inner(|inner| inner.rx[fifo].remove())
    }

    /// The callback runs outside the critical section.
    fn dispatch_from(&self, fifo: usize) -> bool {
        let popped = self.with_inner(|inner| {
            let message = inner.rx[fifo].remove()?;
            let callback = inner.callbacks[fifo]
                .get(usize::from(message.idx))
                .copied()
                .flatten();
            Some((message, callback))
        });
        match popped {
            Some((message, callback)) => {
                if let Some(callback) = callback {
                    callback(&message);
                }
                true
            }
            None => false,
        }
    }

    fn message_isr_rx(&self, fifo: usize) {
        let n = fifo as u8;
        let rfr = Rfr::from_bits(self.regs.read(Reg::Rfr(n)));
        if rfr.fmp() != 0 {
            let message = self.read_fifo_mailbox(n);
            let stored = self.with_inner(|inner| inner.rx[fifo].append(message));
            if !stored {
                #[cfg(feature = "defmt")]
                defmt::warn!("rx{} queue full, dropped frame {=u32:#x}", n, message.id);
            }
            self.regs
                .write(Reg::Rfr(n), Rfr::new().with_rfom(true).into_bits());
        }

        // Hardware already lost a frame when these are set, acknowledging is all that is left.
        let rfr = Rfr::from_bits(self.regs.read(Reg::Rfr(n)));
        if rfr.full() || rfr.fovr() {
            #[cfg(feature = "defmt")]
            defmt::trace!("rx{} full {} overrun {}", n, rfr.full(), rfr.fovr());
            let clear = Rfr::new().with_full(rfr.full()).with_fovr(rfr.fovr());
            self.regs.write(Reg::Rfr(n), clear.into_bits());
        }
    }

    fn read_fifo_mailbox(&self, fifo: u8) -> CanMessage {
        let rir = IdWord::from_bits(self.regs.read(Reg::Rir(fifo)));
        let rdtr = Dtr::from_bits(self.regs.read(Reg::Rdtr(fifo)));
        let mut message = CanMessage {
            id: rir.id(),
            ext: rir.ide(),
            rtr: rir.rtr(),
            idx: rdtr.fmi(),
            len: rdtr.dlc(),
            data: [0; 8],
        };
        message.set_data32(
            self.regs.read(Reg::Rdlr(fifo)),
            self.regs.read(Reg::Rdhr(fifo)),
        );
        message
    }
}
