use crate::Error;
use crate::board::Board;
use crate::bxcan::Can;
use crate::pac::RegisterBlock;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use static_cell::StaticCell;

/// The three vectors of one bxCAN instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanInterrupt {
    Tx,
    Rx0,
    Rx1,
}

/// Static home of a driver, reachable from the interrupt vectors.
///
/// ```ignore
/// static CAN1: InterruptBinding<Mmio, Mcu<Interrupt>> = InterruptBinding::new();
///
/// let can = CAN1.init(Can::new(unsafe { Mmio::can1() }, board))?;
/// can.begin(&settings, &Filters::new())?;
///
/// #[interrupt]
/// fn CAN1_RX0() {
///     CAN1.on_interrupt(CanInterrupt::Rx0);
/// }
/// ```
pub struct InterruptBinding<R, B> {
    slot: StaticCell<Can<R, B>>,
    bound: AtomicPtr<Can<R, B>>,
}

impl<R, B> InterruptBinding<R, B> {
    pub const fn new() -> Self {
        Self {
            slot: StaticCell::new(),
            bound: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl<R: RegisterBlock + Sync + 'static, B: Board + Sync + 'static> InterruptBinding<R, B> {
    /// Moves `can` into the binding. Only one driver can ever be bound, further calls return
    /// [`Error::AlreadyBound`].
    pub fn init(&'static self, can: Can<R, B>) -> Result<&'static Can<R, B>, Error> {
        let can: &'static Can<R, B> = self.slot.try_init(can).ok_or(Error::AlreadyBound)?;
        self.bound
            .store(can as *const Can<R, B> as *mut Can<R, B>, Ordering::Release);
        Ok(can)
    }

    /// The bound driver, if any.
    pub fn get(&self) -> Option<&'static Can<R, B>> {
        // Only ever set from a `&'static` handed out by `init`.
        unsafe { self.bound.load(Ordering::Acquire).as_ref() }
    }

    /// Forwards a vector to the bound driver. Does nothing before [`init`](Self::init).
    pub fn on_interrupt(&self, irq: CanInterrupt) {
        let Some(can) = self.get() else {
            #[cfg(feature = "defmt")]
            defmt::trace!("{} before driver bound", irq);
            return;
        };
        match irq {
            CanInterrupt::Tx => can.message_isr_tx(),
            CanInterrupt::Rx0 => can.message_isr_rx0(),
            CanInterrupt::Rx1 => can.message_isr_rx1(),
        }
    }
}

impl<R, B> Default for InterruptBinding<R, B> {
    fn default() -> Self {
        Self::new()
    }
}
