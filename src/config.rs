use bitflags::bitflags;

/// Default tolerance between the wished and the achieved bit rate, in parts per million.
pub const DEFAULT_TOLERANCE_PPM: u32 = 1000;

const MAX_PRESCALER: u32 = 1024;
const MAX_TQ_COUNT: u32 = 25;
const MIN_TQ_COUNT: u32 = 5;
const PPM: u64 = 1_000_000;

bitflags! {
    /// Reasons for [`Can::begin`](crate::Can::begin) to refuse a configuration.
    ///
    /// Bits 0 to 9 come from [`Settings::can_bit_setting_consistency`], bit 16 is reported when
    /// the timing is consistent but the achieved bit rate is outside the requested tolerance.
    /// [`bits`](Self::bits) gives the numeric error code.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BeginError: u32 {
        const BIT_RATE_PRESCALER_IS_ZERO = 1 << 0;
        const BIT_RATE_PRESCALER_IS_GREATER_THAN_1024 = 1 << 1;
        const PHASE_SEGMENT1_IS_ZERO = 1 << 2;
        const PHASE_SEGMENT1_IS_GREATER_THAN_16 = 1 << 3;
        const PHASE_SEGMENT2_IS_ZERO = 1 << 4;
        const PHASE_SEGMENT2_IS_GREATER_THAN_8 = 1 << 5;
        const RJW_IS_ZERO = 1 << 6;
        const RJW_IS_GREATER_THAN_4 = 1 << 7;
        const RJW_IS_GREATER_THAN_PHASE_SEGMENT2 = 1 << 8;
        /// Triple sampling requested above 125 kb/s or with a phase segment 1 of 1 TQ.
        const PHASE_SEGMENT1_IS_1_AND_TRIPLE_SAMPLING = 1 << 9;
        const ACTUAL_BIT_RATE_TOO_FAR_FROM_DESIRED_BIT_RATE = 1 << 16;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BeginError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "BeginError({=u32:#x})", self.bits())
    }
}

/// Operating mode entered when leaving initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleMode {
    #[default]
    Normal,
    /// TX is looped back to RX internally and the TX pin is held recessive. Useful for self-test
    /// without disturbing the bus.
    InternalLoopBack,
    /// TX is looped back to RX internally and still driven on the pin.
    ExternalLoopBack,
    /// Receive only, the node never drives a dominant bit.
    Silent,
}

/// Order in which pending mailboxes are sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitPriority {
    /// Lowest identifier first, as arbitration would do.
    #[default]
    ByIdentifier,
    /// Chronological order of the transmit requests.
    ByRequestOrder,
}

/// Bit segment lengths, expressed in time quanta, and the quantum prescaler.
///
/// One bit is `1 + phase_segment1 + phase_segment2` quanta long, the leading quantum being the
/// synchronization segment. `phase_segment1` includes the propagation segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Divider from the CAN clock to one time quantum. Valid values are 1 to 1024.
    pub prescaler: u16,
    /// Valid values are 1 to 16.
    pub phase_segment1: u8,
    /// Valid values are 1 to 8.
    pub phase_segment2: u8,
    /// Resynchronization jump width, 1 to 4 and not above `phase_segment2`.
    pub rjw: u8,
    /// Only meaningful at 125 kb/s or below.
    pub triple_sampling: bool,
}

impl BitTiming {
    /// Slowest setting the peripheral supports.
    pub const fn slowest() -> Self {
        Self {
            prescaler: 1024,
            phase_segment1: 16,
            phase_segment2: 8,
            rjw: 4,
            triple_sampling: true,
        }
    }

    /// Number of time quanta in one bit.
    #[inline]
    pub const fn tq_count(&self) -> u32 {
        1 + self.phase_segment1 as u32 + self.phase_segment2 as u32
    }

    /// Finds the prescaler / quanta count pair whose bit rate is closest to `bit_rate`, then
    /// splits the bit into segments.
    ///
    /// Returns the timing and whether it lies within `tolerance_ppm` of the wished rate.
    pub fn resolve(can_clock_hz: u32, bit_rate: u32, tolerance_ppm: u32) -> (Self, bool) {
        if bit_rate == 0 {
            return (Self::slowest(), false);
        }
        let clock = u64::from(can_clock_hz);
        let rate = u64::from(bit_rate);

        let mut tq_count = MAX_TQ_COUNT;
        let mut smallest_error = u64::MAX;
        let mut best_brp = MAX_PRESCALER;
        let mut best_tq_count = MAX_TQ_COUNT;
        let mut brp = can_clock_hz / bit_rate / tq_count;

        while tq_count >= MIN_TQ_COUNT && brp <= MAX_PRESCALER {
            let quanta = rate * u64::from(tq_count);
            if brp > 0 {
                let error = clock.abs_diff(quanta * u64::from(brp));
                if error < smallest_error {
                    smallest_error = error;
                    best_brp = brp;
                    best_tq_count = tq_count;
                }
            }
            if brp < MAX_PRESCALER {
                let error = clock.abs_diff(quanta * u64::from(brp + 1));
                if error < smallest_error {
                    smallest_error = error;
                    best_brp = brp + 1;
                    best_tq_count = tq_count;
                }
            }
            tq_count -= 1;
            brp = can_clock_hz / bit_rate / tq_count;
        }

        // 2 <= PS2 <= 8 and 1 <= PS1 <= 16 for every TQ count in 5..=25
        let phase_segment2 = 1 + 2 * best_tq_count / 7;
        let phase_segment1 = best_tq_count - phase_segment2 - 1;
        let rjw = phase_segment2.min(4);
        let timing = Self {
            prescaler: best_brp as u16,
            phase_segment1: phase_segment1 as u8,
            phase_segment2: phase_segment2 as u8,
            rjw: rjw as u8,
            triple_sampling: bit_rate <= 125_000 && phase_segment1 > 1,
        };

        let w = u64::from(best_tq_count) * rate * u64::from(best_brp);
        let allowed = w.saturating_mul(u64::from(tolerance_ppm));
        let close = clock.abs_diff(w).saturating_mul(PPM) <= allowed;
        (timing, close)
    }
}

impl Default for BitTiming {
    #[inline]
    fn default() -> Self {
        Self::slowest()
    }
}

/// Driver settings, consumed by [`Can::begin`](crate::Can::begin).
///
/// Construct with [`Settings::new`] or [`Settings::with_tolerance`], which compute the bit
/// timing, then adjust the remaining fields directly or with the chained setters. The timing
/// fields may be overwritten by hand as well; `begin` validates them with
/// [`can_bit_setting_consistency`](Self::can_bit_setting_consistency).
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// Frequency of the clock feeding the peripheral (APB1 on the supported chips), in Hz.
    pub can_clock_hz: u32,
    /// Requested bit rate, in b/s.
    pub wished_bit_rate: u32,
    pub bit_timing: BitTiming,
    /// Set by the resolver; `begin` refuses to start when it is false.
    pub bit_rate_close_to_desired_rate: bool,
    pub module_mode: ModuleMode,
    /// Drive TX as open drain instead of push-pull.
    pub open_collector_output: bool,
    pub transmit_priority: TransmitPriority,
    /// Software queue behind hardware receive FIFO 0, in frames.
    pub driver_receive_fifo0_size: u16,
    /// Software queue behind hardware receive FIFO 1, in frames.
    pub driver_receive_fifo1_size: u16,
    /// Software queue feeding mailboxes when they are all busy, in frames.
    pub driver_transmit_fifo_size: u16,
}

impl Settings {
    /// Settings for `wished_bit_rate`, accepting a deviation of [`DEFAULT_TOLERANCE_PPM`].
    pub fn new(can_clock_hz: u32, wished_bit_rate: u32) -> Self {
        Self::with_tolerance(can_clock_hz, wished_bit_rate, DEFAULT_TOLERANCE_PPM)
    }

    pub fn with_tolerance(can_clock_hz: u32, wished_bit_rate: u32, tolerance_ppm: u32) -> Self {
        let (bit_timing, close) = BitTiming::resolve(can_clock_hz, wished_bit_rate, tolerance_ppm);
        Self {
            can_clock_hz,
            wished_bit_rate,
            bit_timing,
            bit_rate_close_to_desired_rate: close,
            module_mode: ModuleMode::Normal,
            open_collector_output: false,
            transmit_priority: TransmitPriority::ByIdentifier,
            driver_receive_fifo0_size: 32,
            driver_receive_fifo1_size: 0,
            driver_transmit_fifo_size: 16,
        }
    }

    #[inline]
    pub const fn set_module_mode(mut self, mode: ModuleMode) -> Self {
        self.module_mode = mode;
        self
    }

    #[inline]
    pub const fn set_transmit_priority(mut self, priority: TransmitPriority) -> Self {
        self.transmit_priority = priority;
        self
    }

    #[inline]
    pub const fn set_open_collector_output(mut self, enabled: bool) -> Self {
        self.open_collector_output = enabled;
        self
    }

    #[inline]
    pub const fn set_driver_receive_fifo0_size(mut self, size: u16) -> Self {
        self.driver_receive_fifo0_size = size;
        self
    }

    #[inline]
    pub const fn set_driver_receive_fifo1_size(mut self, size: u16) -> Self {
        self.driver_receive_fifo1_size = size;
        self
    }

    #[inline]
    pub const fn set_driver_transmit_fifo_size(mut self, size: u16) -> Self {
        self.driver_transmit_fifo_size = size;
        self
    }

    /// Bit rate produced by the current timing, in b/s.
    pub fn actual_bit_rate(&self) -> u32 {
        let tq_count = self.bit_timing.tq_count();
        let prescaler = u32::from(self.bit_timing.prescaler);
        if prescaler == 0 {
            return 0;
        }
        self.can_clock_hz / prescaler / tq_count
    }

    /// Whether the current timing produces the wished bit rate exactly.
    pub fn exact_bit_rate(&self) -> bool {
        u64::from(self.can_clock_hz) == self.quanta_clock()
    }

    /// Distance between the achieved and the wished bit rate, in parts per million.
    pub fn ppm_from_wished_bit_rate(&self) -> u32 {
        let w = self.quanta_clock();
        if w == 0 {
            return u32::MAX;
        }
        let diff = u64::from(self.can_clock_hz).abs_diff(w);
        u32::try_from(diff.saturating_mul(PPM) / w).unwrap_or(u32::MAX)
    }

    /// Position of the sample point, in percent of the bit time.
    pub fn sample_point_from_bit_start(&self) -> u32 {
        let sample_point = 1 + u32::from(self.bit_timing.phase_segment1);
        sample_point * 100 / self.bit_timing.tq_count()
    }

    /// Checks every timing field against the peripheral limits. An empty set means consistent.
    pub fn can_bit_setting_consistency(&self) -> BeginError {
        let timing = &self.bit_timing;
        let mut errors = BeginError::empty();
        if timing.prescaler == 0 {
            errors |= BeginError::BIT_RATE_PRESCALER_IS_ZERO;
        } else if u32::from(timing.prescaler) > MAX_PRESCALER {
            errors |= BeginError::BIT_RATE_PRESCALER_IS_GREATER_THAN_1024;
        }
        if timing.phase_segment1 == 0 {
            errors |= BeginError::PHASE_SEGMENT1_IS_ZERO;
        } else if timing.phase_segment1 > 16 {
            errors |= BeginError::PHASE_SEGMENT1_IS_GREATER_THAN_16;
        }
        if timing.phase_segment2 == 0 {
            errors |= BeginError::PHASE_SEGMENT2_IS_ZERO;
        } else if timing.phase_segment2 > 8 {
            errors |= BeginError::PHASE_SEGMENT2_IS_GREATER_THAN_8;
        }
        if timing.rjw == 0 {
            errors |= BeginError::RJW_IS_ZERO;
        } else if timing.rjw > 4 {
            errors |= BeginError::RJW_IS_GREATER_THAN_4;
        }
        // A zero PS2 is already reported on its own.
        if timing.phase_segment2 != 0 && timing.rjw > timing.phase_segment2 {
            errors |= BeginError::RJW_IS_GREATER_THAN_PHASE_SEGMENT2;
        }
        let single_quantum_ps1 = timing.phase_segment1 == 1;
        if timing.triple_sampling && (self.wished_bit_rate > 125_000 || single_quantum_ps1) {
            errors |= BeginError::PHASE_SEGMENT1_IS_1_AND_TRIPLE_SAMPLING;
        }
        errors
    }

    /// Everything `begin` checks before touching the hardware.
    pub fn validate(&self) -> Result<(), BeginError> {
        let errors = self.can_bit_setting_consistency();
        if !errors.is_empty() {
            return Err(errors);
        }
        if !self.bit_rate_close_to_desired_rate {
            return Err(BeginError::ACTUAL_BIT_RATE_TOO_FAR_FROM_DESIRED_BIT_RATE);
        }
        Ok(())
    }

    fn quanta_clock(&self) -> u64 {
        u64::from(self.bit_timing.tq_count())
            * u64::from(self.wished_bit_rate)
            * u64::from(self.bit_timing.prescaler)
    }
}
