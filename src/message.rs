/// Largest 11-bit identifier.
pub const STANDARD_IDENTIFIER_MAX: u32 = 0x7FF;
/// Largest 29-bit identifier.
pub const EXTENDED_IDENTIFIER_MAX: u32 = 0x1FFF_FFFF;

/// One classic CAN frame as it travels between the application, the driver queues and the
/// peripheral mailboxes.
///
/// `idx` has two meanings depending on direction:
/// - on receive it is the filter match index reported by hardware, used to pick the callback;
/// - on transmit it selects the send path: 0 is the buffered path, 1 and 2 are the dedicated
///   mailboxes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    /// 11-bit or 29-bit identifier, depending on `ext`.
    pub id: u32,
    /// Extended (29-bit) identifier.
    pub ext: bool,
    /// Remote transmission request.
    pub rtr: bool,
    /// Filter match index (receive) or send path (transmit).
    pub idx: u8,
    /// Data length, 0 to 8.
    pub len: u8,
    pub data: [u8; 8],
}

impl CanMessage {
    /// Data frame with a standard identifier, sent through the buffered path.
    /// Returns `None` if `id` does not fit in 11 bits or `data` is longer than 8 bytes.
    pub fn new_standard(id: u16, data: &[u8]) -> Option<Self> {
        if u32::from(id) > STANDARD_IDENTIFIER_MAX {
            return None;
        }
        Self::with_payload(u32::from(id), false, data)
    }

    /// Data frame with an extended identifier, sent through the buffered path.
    /// Returns `None` if `id` does not fit in 29 bits or `data` is longer than 8 bytes.
    pub fn new_extended(id: u32, data: &[u8]) -> Option<Self> {
        if id > EXTENDED_IDENTIFIER_MAX {
            return None;
        }
        Self::with_payload(id, true, data)
    }

    /// Remote frame requesting `len` bytes.
    pub fn new_remote(id: u32, ext: bool, len: u8) -> Option<Self> {
        let max = if ext {
            EXTENDED_IDENTIFIER_MAX
        } else {
            STANDARD_IDENTIFIER_MAX
        };
        if id > max || len > 8 {
            return None;
        }
        Some(Self {
            id,
            ext,
            rtr: true,
            len,
            ..Self::default()
        })
    }

    fn with_payload(id: u32, ext: bool, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut message = Self {
            id,
            ext,
            len: data.len() as u8,
            ..Self::default()
        };
        message.data[..data.len()].copy_from_slice(data);
        Some(message)
    }

    /// Selects the send path, see [`Can::try_to_send`](crate::Can::try_to_send).
    #[inline]
    pub const fn with_idx(mut self, idx: u8) -> Self {
        self.idx = idx;
        self
    }

    /// Payload bytes actually carried by the frame.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(8))]
    }

    /// Payload as the two little-endian words the mailbox data registers hold.
    #[inline]
    pub fn data32(&self) -> [u32; 2] {
        let [b0, b1, b2, b3, b4, b5, b6, b7] = self.data;
        [
            u32::from_le_bytes([b0, b1, b2, b3]),
            u32::from_le_bytes([b4, b5, b6, b7]),
        ]
    }

    #[inline]
    pub fn set_data32(&mut self, low: u32, high: u32) {
        self.data[..4].copy_from_slice(&low.to_le_bytes());
        self.data[4..].copy_from_slice(&high.to_le_bytes());
    }
}
