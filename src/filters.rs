use crate::message::{CanMessage, EXTENDED_IDENTIFIER_MAX, STANDARD_IDENTIFIER_MAX};
use crate::pac::regs::{FilterHalf, IdWord};
use alloc::vec::Vec;

/// Number of filter banks available to a single bxCAN instance.
pub const FILTER_BANK_COUNT: usize = 14;

/// Invoked by [`Can::dispatch_received_message0`](crate::Can::dispatch_received_message0) and
/// friends with the frame accepted by the bound filter.
pub type Callback = fn(&CanMessage);

/// Hardware receive FIFO a filter bank feeds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    #[default]
    Fifo0,
    Fifo1,
}

/// Kind of frames a mask filter accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Format {
    Data,
    Remote,
    #[default]
    DataOrRemote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    /// All 14 banks are already used.
    NoFreeBank,
    /// An identifier or a mask is wider than 11 (standard) or 29 (extended) bits.
    IdentifierTooWide,
    /// `base & mask != base`, such a filter never matches its own base.
    BaseOutsideMask,
}

/// Identifier range: a frame matches when `id & mask == base`.
#[derive(Clone, Copy, Debug)]
pub struct MaskEntry {
    pub base: u32,
    pub mask: u32,
    pub format: Format,
    pub callback: Option<Callback>,
}

impl MaskEntry {
    pub const fn new(base: u32, mask: u32, format: Format) -> Self {
        Self {
            base,
            mask,
            format,
            callback: None,
        }
    }

    pub const fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    fn check(&self, max: u32) -> Result<(), FilterError> {
        if self.base > max || self.mask > max {
            return Err(FilterError::IdentifierTooWide);
        }
        if self.base & self.mask != self.base {
            return Err(FilterError::BaseOutsideMask);
        }
        Ok(())
    }
}

/// Single identifier matched exactly, RTR included.
#[derive(Clone, Copy, Debug)]
pub struct ListEntry {
    pub id: u32,
    pub rtr: bool,
    pub callback: Option<Callback>,
}

impl ListEntry {
    pub const fn data(id: u32) -> Self {
        Self {
            id,
            rtr: false,
            callback: None,
        }
    }

    pub const fn remote(id: u32) -> Self {
        Self {
            id,
            rtr: true,
            callback: None,
        }
    }

    pub const fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Acceptance filter set handed to [`Can::begin`](crate::Can::begin).
///
/// Each `add_*` call fills exactly one bank and appends its callbacks to the array of the FIFO
/// selected by `action`. Hardware numbers filters per FIFO in bank order, so the position of a
/// callback in [`callbacks`](Self::callbacks) is the filter match index of the frames it handles.
///
/// An empty set makes `begin` install one bank accepting every frame into FIFO 0.
#[derive(Clone, Default)]
pub struct Filters {
    fr1: [u32; FILTER_BANK_COUNT],
    fr2: [u32; FILTER_BANK_COUNT],
    count: usize,
    fm1r: u32,
    fs1r: u32,
    ffa1r: u32,
    callbacks: [Vec<Option<Callback>>; 2],
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two 11-bit mask filters, 16-bit dual scale.
    pub fn add_standard_masks(
        &mut self,
        first: MaskEntry,
        second: MaskEntry,
        action: Action,
    ) -> Result<(), FilterError> {
        self.check_free_bank()?;
        first.check(STANDARD_IDENTIFIER_MAX)?;
        second.check(STANDARD_IDENTIFIER_MAX)?;
        let fr1 = standard_mask_word(&first);
        let fr2 = standard_mask_word(&second);
        let callbacks = [first.callback, second.callback];
        self.push_bank(fr1, fr2, false, false, action, &callbacks);
        Ok(())
    }

    /// Four 11-bit identifiers, 16-bit scale, list mode.
    pub fn add_standard_quad(
        &mut self,
        entries: [ListEntry; 4],
        action: Action,
    ) -> Result<(), FilterError> {
        self.check_free_bank()?;
        if entries.iter().any(|e| e.id > STANDARD_IDENTIFIER_MAX) {
            return Err(FilterError::IdentifierTooWide);
        }
        let [e1, e2, e3, e4] = entries;
        let fr1 = FilterHalf::pack(standard_list_half(&e1), standard_list_half(&e2));
        let fr2 = FilterHalf::pack(standard_list_half(&e3), standard_list_half(&e4));
        let callbacks = [e1.callback, e2.callback, e3.callback, e4.callback];
        self.push_bank(fr1, fr2, true, false, action, &callbacks);
        Ok(())
    }

    /// One 29-bit mask filter, 32-bit scale.
    pub fn add_extended_mask(
        &mut self,
        entry: MaskEntry,
        action: Action,
    ) -> Result<(), FilterError> {
        self.check_free_bank()?;
        entry.check(EXTENDED_IDENTIFIER_MAX)?;
        let (base_rtr, mask_rtr) = match entry.format {
            Format::Data => (false, true),
            Format::Remote => (true, true),
            Format::DataOrRemote => (false, false),
        };
        let fr1 = IdWord::from_id(entry.base, true, base_rtr).into_bits();
        let fr2 = IdWord::from_id(entry.mask, true, mask_rtr).into_bits();
        self.push_bank(fr1, fr2, false, true, action, &[entry.callback]);
        Ok(())
    }

    /// Two 29-bit identifiers, 32-bit scale, list mode.
    pub fn add_extended_dual(
        &mut self,
        entries: [ListEntry; 2],
        action: Action,
    ) -> Result<(), FilterError> {
        self.check_free_bank()?;
        if entries.iter().any(|e| e.id > EXTENDED_IDENTIFIER_MAX) {
            return Err(FilterError::IdentifierTooWide);
        }
        let [e1, e2] = entries;
        let fr1 = IdWord::from_id(e1.id, true, e1.rtr).into_bits();
        let fr2 = IdWord::from_id(e2.id, true, e2.rtr).into_bits();
        self.push_bank(fr1, fr2, true, true, action, &[e1.callback, e2.callback]);
        Ok(())
    }

    /// Number of banks used.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn fr1_at_index(&self, bank: usize) -> Option<u32> {
        self.fr1[..self.count].get(bank).copied()
    }

    #[inline]
    pub fn fr2_at_index(&self, bank: usize) -> Option<u32> {
        self.fr2[..self.count].get(bank).copied()
    }

    /// Mode bits, 1 = identifier list.
    #[inline]
    pub fn fm1r(&self) -> u32 {
        self.fm1r
    }

    /// Scale bits, 1 = single 32-bit.
    #[inline]
    pub fn fs1r(&self) -> u32 {
        self.fs1r
    }

    /// FIFO assignment bits, 1 = FIFO 1.
    #[inline]
    pub fn ffa1r(&self) -> u32 {
        self.ffa1r
    }

    /// Callbacks of the filters routed to `fifo`, indexed by filter match index.
    #[inline]
    pub fn callbacks(&self, fifo: Action) -> &[Option<Callback>] {
        &self.callbacks[fifo as usize]
    }

    fn check_free_bank(&self) -> Result<(), FilterError> {
        if self.count >= FILTER_BANK_COUNT {
            return Err(FilterError::NoFreeBank);
        }
        Ok(())
    }

    fn push_bank(
        &mut self,
        fr1: u32,
        fr2: u32,
        list_mode: bool,
        single_scale: bool,
        action: Action,
        callbacks: &[Option<Callback>],
    ) {
        let n = self.count;
        let bit = 1u32 << n;
        if list_mode {
            self.fm1r |= bit;
        }
        if single_scale {
            self.fs1r |= bit;
        }
        if action == Action::Fifo1 {
            self.ffa1r |= bit;
        }
        self.fr1[n] = fr1;
        self.fr2[n] = fr2;
        self.callbacks[action as usize].extend_from_slice(callbacks);
        self.count += 1;
        #[cfg(feature = "defmt")]
        defmt::trace!("bank {}: {=u32:#x} {=u32:#x} {}", n, fr1, fr2, action);
    }
}

/// Mask in the upper half, base in the lower half. The RTR bit of the mask half selects whether
/// the frame kind is compared at all.
fn standard_mask_word(entry: &MaskEntry) -> u32 {
    let (base_rtr, mask_rtr) = match entry.format {
        Format::Data => (false, true),
        Format::Remote => (true, true),
        Format::DataOrRemote => (false, false),
    };
    let base = FilterHalf::new()
        .with_stid(entry.base as u16)
        .with_rtr(base_rtr);
    let mask = FilterHalf::new()
        .with_stid(entry.mask as u16)
        .with_rtr(mask_rtr);
    FilterHalf::pack(base, mask)
}

fn standard_list_half(entry: &ListEntry) -> FilterHalf {
    FilterHalf::new()
        .with_stid(entry.id as u16)
        .with_rtr(entry.rtr)
}
