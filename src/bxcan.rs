use crate::board::Board;
use crate::config::{BeginError, ModuleMode, Settings, TransmitPriority};
use crate::filters::{Action, Callback, Filters};
use crate::pac::regs::{Btr, Fmr, Ier, Mcr, Msr, Tsr};
use crate::pac::{Reg, RegisterBlock};
use crate::queue::FrameQueue;
use crate::util::wait_while;
use alloc::vec::Vec;
use core::cell::RefCell;
use critical_section::Mutex;

/// Life cycle of a [`Can`] instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
    Uninitialized,
    /// Inside [`Can::begin`], the peripheral is in initialization mode.
    Initializing,
    Running,
    /// After [`Can::end`]; `begin` may be called again.
    Stopped,
}

/// Everything shared between thread mode and the interrupt handlers.
pub(crate) struct Inner {
    pub(crate) state: DriverState,
    pub(crate) rx: [FrameQueue; 2],
    pub(crate) tx: FrameQueue,
    pub(crate) callbacks: [Vec<Option<Callback>>; 2],
}

/// Interrupt driven bxCAN driver.
///
/// Received frames are moved by [`message_isr_rx0`](Self::message_isr_rx0) and
/// [`message_isr_rx1`](Self::message_isr_rx1) from the hardware FIFOs into software queues, and
/// [`message_isr_tx`](Self::message_isr_tx) refills free mailboxes from the software transmit
/// queue. All methods take `&self`; queue state lives behind a critical section, so one instance
/// can be shared between the application and the interrupt handlers, see
/// [`InterruptBinding`](crate::InterruptBinding).
pub struct Can<R, B> {
    pub(crate) regs: R,
    pub(crate) board: B,
    pub(crate) inner: Mutex<RefCell<Inner>>,
}

impl<R, B> Can<R, B> {
    pub const fn new(regs: R, board: B) -> Self {
        Self {
            regs,
            board,
            inner: Mutex::new(RefCell::new(Inner {
                state: DriverState::Uninitialized,
                rx: [FrameQueue::new(), FrameQueue::new()],
                tx: FrameQueue::new(),
                callbacks: [Vec::new(), Vec::new()],
            })),
        }
    }

    #[inline]
    pub fn registers(&self) -> &R {
        &self.regs
    }

    #[inline]
    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn state(&self) -> DriverState {
        self.with_inner(|inner| inner.state)
    }

    #[inline]
    pub(crate) fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

impl<R: RegisterBlock, B: Board> Can<R, B> {
    /// Validates `settings`, sizes the software queues, programs bit timing and filters, and
    /// starts the peripheral with its interrupts unmasked.
    ///
    /// Nothing is touched when `settings` is rejected. An empty `filters` set accepts every
    /// frame into FIFO 0.
    ///
    /// Busy-waits on the peripheral acknowledging initialization mode, and on leaving it, which
    /// requires the bus to be idle.
    pub fn begin(&self, settings: &Settings, filters: &Filters) -> Result<(), BeginError> {
        settings.validate().inspect_err(|_errors| {
            #[cfg(feature = "defmt")]
            defmt::warn!("bxCAN settings rejected: {}", _errors);
        })?;

        let rx0_size = usize::from(settings.driver_receive_fifo0_size);
        let rx1_size = usize::from(settings.driver_receive_fifo1_size);
        let tx_size = usize::from(settings.driver_transmit_fifo_size);
        self.with_inner(|inner| {
            inner.state = DriverState::Initializing;
            inner.rx[0].init_with_size(rx0_size);
            inner.rx[1].init_with_size(rx1_size);
            inner.tx.init_with_size(tx_size);
            inner.callbacks = [
                filters.callbacks(Action::Fifo0).to_vec(),
                filters.callbacks(Action::Fifo1).to_vec(),
            ];
        });

        self.board.enable_clock();
        self.board.reset();
        self.board.configure_pins(settings.open_collector_output);

        self.enter_init_mode();
        self.set_bit_timing(settings);
        self.program_filters(filters);
        self.enable_interrupts();
        self.leave_init_mode(settings.transmit_priority);

        self.with_inner(|inner| inner.state = DriverState::Running);
        self.board.unmask_interrupts();
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "bxCAN running at {} b/s, {} filter banks",
            settings.actual_bit_rate(),
            filters.count()
        );
        Ok(())
    }

    /// Masks the interrupt lines and releases the software queues and callbacks.
    pub fn end(&self) {
        self.board.mask_interrupts();
        self.with_inner(|inner| {
            inner.rx[0].free();
            inner.rx[1].free();
            inner.tx.free();
            inner.callbacks = [Vec::new(), Vec::new()];
            inner.state = DriverState::Stopped;
        });
    }

    #[inline]
    fn enter_init_mode(&self) {
        // Every other MCR field back to its reset value.
        let mcr = Mcr::new().with_inrq(true).with_nart(true);
        self.regs.write(Reg::Mcr, mcr.into_bits());
        wait_while(|| !Msr::from_bits(self.regs.read(Reg::Msr)).inak());
        self.regs.write(Reg::Ier, 0);
    }

    /// Segment lengths are written minus one. bxCAN always samples once, the triple sampling
    /// setting is only validated.
    #[inline]
    fn set_bit_timing(&self, settings: &Settings) {
        let timing = &settings.bit_timing;
        let (lbkm, silm) = match settings.module_mode {
            ModuleMode::Normal => (false, false),
            ModuleMode::InternalLoopBack => (true, true),
            ModuleMode::ExternalLoopBack => (true, false),
            ModuleMode::Silent => (false, true),
        };
        let btr = Btr::new()
            .with_brp(timing.prescaler - 1)
            .with_ts1(timing.phase_segment1 - 1)
            .with_ts2(timing.phase_segment2 - 1)
            .with_sjw(timing.rjw - 1)
            .with_lbkm(lbkm)
            .with_silm(silm);
        self.regs.write(Reg::Btr, btr.into_bits());
    }

    /// Read-modify-write keeps the CAN2 start bank of dual-CAN parts.
    #[inline]
    fn set_filter_init(&self, finit: bool) {
        let update = |w| Fmr::from_bits(w).with_finit(finit).into_bits();
        self.regs.modify(Reg::Fmr, update);
    }

    fn program_filters(&self, filters: &Filters) {
        self.set_filter_init(true);
        self.regs.write(Reg::Fa1r, 0);
        self.regs.write(Reg::Fs1r, 0);
        self.regs.write(Reg::Fm1r, 0);
        self.regs.write(Reg::Ffa1r, 0);

        if filters.is_empty() {
            // Bank 0, 32-bit mask mode, mask 0: every frame into FIFO 0.
            self.regs.write(Reg::Fs1r, 1);
            self.regs.write(Reg::Fr1(0), 0);
            self.regs.write(Reg::Fr2(0), 0);
            self.regs.write(Reg::Fa1r, 1);
        } else {
            for bank in 0..filters.count() {
                let fr1 = filters.fr1_at_index(bank).unwrap_or(0);
                let fr2 = filters.fr2_at_index(bank).unwrap_or(0);
                self.regs.write(Reg::Fr1(bank as u8), fr1);
                self.regs.write(Reg::Fr2(bank as u8), fr2);
            }
            self.regs.write(Reg::Fm1r, filters.fm1r());
            self.regs.write(Reg::Fs1r, filters.fs1r());
            self.regs.write(Reg::Ffa1r, filters.ffa1r());
            self.regs.write(Reg::Fa1r, (1 << filters.count()) - 1);
        }

        self.set_filter_init(false);
    }

    #[inline]
    fn enable_interrupts(&self) {
        let ier = Ier::new()
            .with_fmpie0(true)
            .with_ffie0(true)
            .with_fovie0(true)
            .with_fmpie1(true)
            .with_ffie1(true)
            .with_fovie1(true)
            .with_tmeie(true);
        self.regs.write(Reg::Ier, ier.into_bits());
    }

    /// Clears NART so that frames are retransmitted until acknowledged, and enables automatic
    /// bus-off recovery.
    #[inline]
    fn leave_init_mode(&self, priority: TransmitPriority) {
        let mcr = Mcr::new()
            .with_abom(true)
            .with_txfp(priority == TransmitPriority::ByRequestOrder);
        self.regs.write(Reg::Mcr, mcr.into_bits());
        wait_while(|| Msr::from_bits(self.regs.read(Reg::Msr)).inak());
        wait_while(|| !Tsr::from_bits(self.regs.read(Reg::Tsr)).tme0());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::mock::{BoardCall, RecordingBoard};
    use crate::filters::{Format, ListEntry, MaskEntry};
    use crate::message::CanMessage;
    use crate::pac::mock::MockRegisters;

    const CLOCK: u32 = 36_000_000;

    fn can() -> Can<MockRegisters, RecordingBoard> {
        Can::new(MockRegisters::new(), RecordingBoard::new())
    }

    #[test]
    fn empty_filter_set_installs_accept_all_bank() {
        let can = can();
        assert_eq!(can.state(), DriverState::Uninitialized);
        can.begin(&Settings::new(CLOCK, 500_000), &Filters::new())
            .unwrap();
        assert_eq!(can.state(), DriverState::Running);

        let regs = can.registers();
        assert_eq!(regs.stored(Reg::Fs1r), 1);
        assert_eq!(regs.stored(Reg::Fm1r), 0);
        assert_eq!(regs.stored(Reg::Ffa1r), 0);
        assert_eq!(regs.stored(Reg::Fa1r), 1);
        assert_eq!(regs.stored(Reg::Fr1(0)), 0);
        assert_eq!(regs.stored(Reg::Fr2(0)), 0);
        assert!(!Fmr::from_bits(regs.stored(Reg::Fmr)).finit());

        let frame = CanMessage::new_standard(0x123, &[1, 2, 3]).unwrap();
        regs.inject(0, frame, 0);
        can.message_isr_rx0();
        assert_eq!(regs.pending(0), 0);
        assert!(can.available0());
        assert_eq!(can.receive0(), Some(frame.with_idx(0)));
        assert_eq!(can.receive0(), None);
    }

    #[test]
    fn init_sequence() {
        let can = can();
        let settings = Settings::new(CLOCK, 500_000)
            .set_module_mode(ModuleMode::InternalLoopBack)
            .set_transmit_priority(TransmitPriority::ByRequestOrder)
            .set_open_collector_output(true);
        can.begin(&settings, &Filters::new()).unwrap();

        assert_eq!(
            can.board().calls(),
            [
                BoardCall::EnableClock,
                BoardCall::Reset,
                BoardCall::ConfigurePins {
                    open_collector: true
                },
                BoardCall::UnmaskInterrupts,
            ]
        );

        let writes = can.registers().writes();
        let mcr: alloc::vec::Vec<u32> = writes
            .iter()
            .filter(|(reg, _)| *reg == Reg::Mcr)
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(mcr, [0b1_0001u32, (1 << 6) | (1 << 2)]);

        // prescaler 3, 24 TQ: PS1 16, PS2 7, RJW 4
        let btr = Btr::from_bits(can.registers().stored(Reg::Btr));
        assert_eq!(btr.brp(), 2);
        assert_eq!(btr.ts1(), 15);
        assert_eq!(btr.ts2(), 6);
        assert_eq!(btr.sjw(), 3);
        assert!(btr.lbkm() && btr.silm());

        let btr_index = writes.iter().position(|(reg, _)| *reg == Reg::Btr);
        let first_filter = writes.iter().position(|(reg, _)| *reg == Reg::Fmr);
        assert!(btr_index < first_filter);
        assert_eq!(can.registers().stored(Reg::Ier), 0x7F);
    }

    #[test]
    fn module_mode_and_priority_bits() {
        let modes = [
            (ModuleMode::Normal, false, false),
            (ModuleMode::InternalLoopBack, true, true),
            (ModuleMode::ExternalLoopBack, true, false),
            (ModuleMode::Silent, false, true),
        ];
        let priorities = [
            (TransmitPriority::ByIdentifier, false),
            (TransmitPriority::ByRequestOrder, true),
        ];
        for (mode, lbkm, silm) in modes {
            for (priority, txfp) in priorities {
                let can = can();
                let settings = Settings::new(CLOCK, 250_000)
                    .set_module_mode(mode)
                    .set_transmit_priority(priority);
                can.begin(&settings, &Filters::new()).unwrap();

                let btr = Btr::from_bits(can.registers().stored(Reg::Btr));
                assert_eq!((btr.lbkm(), btr.silm()), (lbkm, silm), "{mode:?}");

                let mcr = Mcr::from_bits(can.registers().stored(Reg::Mcr));
                assert_eq!(mcr.txfp(), txfp, "{priority:?}");
                assert!(mcr.abom() && !mcr.inrq() && !mcr.nart());
            }
        }
    }

    #[test]
    fn filter_banks_are_copied() {
        let can = can();
        let mut filters = Filters::new();
        filters
            .add_standard_masks(
                MaskEntry::new(0x100, 0x700, Format::Data),
                MaskEntry::new(0x200, 0x700, Format::Data),
                Action::Fifo0,
            )
            .unwrap();
        filters
            .add_extended_dual([ListEntry::data(7), ListEntry::remote(8)], Action::Fifo1)
            .unwrap();
        can.begin(&Settings::new(CLOCK, 250_000), &filters).unwrap();

        let regs = can.registers();
        assert_eq!(regs.stored(Reg::Fr1(0)), filters.fr1_at_index(0).unwrap());
        assert_eq!(regs.stored(Reg::Fr2(1)), filters.fr2_at_index(1).unwrap());
        assert_eq!(regs.stored(Reg::Fm1r), 0b10);
        assert_eq!(regs.stored(Reg::Fs1r), 0b10);
        assert_eq!(regs.stored(Reg::Ffa1r), 0b10);
        assert_eq!(regs.stored(Reg::Fa1r), 0b11);
    }

    #[test]
    fn rejected_settings_touch_nothing() {
        let can = can();
        let mut settings = Settings::new(CLOCK, 500_000);
        settings.bit_timing.phase_segment2 = 0;
        assert_eq!(
            can.begin(&settings, &Filters::new()),
            Err(BeginError::PHASE_SEGMENT2_IS_ZERO)
        );
        assert_eq!(
            can.begin(&Settings::new(CLOCK, 7_000_000), &Filters::new()),
            Err(BeginError::ACTUAL_BIT_RATE_TOO_FAR_FROM_DESIRED_BIT_RATE)
        );
        assert!(can.registers().writes().is_empty());
        assert!(can.board().calls().is_empty());
        assert_eq!(can.state(), DriverState::Uninitialized);
    }

    #[test]
    fn end_releases_queues() {
        let can = can();
        can.begin(&Settings::new(CLOCK, 500_000), &Filters::new())
            .unwrap();
        assert_eq!(can.driver_receive_fifo0_size(), 32);
        assert_eq!(can.driver_transmit_fifo_size(), 16);

        can.end();
        assert_eq!(can.state(), DriverState::Stopped);
        assert_eq!(can.board().calls().last(), Some(&BoardCall::MaskInterrupts));
        assert_eq!(can.driver_receive_fifo0_size(), 0);
        assert_eq!(can.driver_receive_fifo1_size(), 0);
        assert_eq!(can.driver_transmit_fifo_size(), 0);

        can.registers().inject(0, CanMessage::default(), 0);
        can.message_isr_rx0();
        assert_eq!(can.receive0(), None);
    }
}
