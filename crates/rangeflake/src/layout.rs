use crate::error::ConfigurationError;

/// Default number of bits for the elapsed-millisecond timestamp.
pub const DEFAULT_TIMESTAMP_BITS: u32 = 41;

/// Default number of bits for the worker id.
pub const DEFAULT_WORKER_BITS: u32 = 10;

/// Default number of bits for the per-millisecond sequence.
pub const DEFAULT_SEQUENCE_BITS: u32 = 12;

/// Shift that saturates to zero instead of panicking for `n >= 64`.
#[inline]
pub(crate) const fn shl(value: u64, n: u32) -> u64 {
    match value.checked_shl(n) {
        Some(v) => v,
        None => 0,
    }
}

/// Shift that saturates to zero instead of panicking for `n >= 64`.
#[inline]
pub(crate) const fn shr(value: u64, n: u32) -> u64 {
    match value.checked_shr(n) {
        Some(v) => v,
        None => 0,
    }
}

/// All-ones mask covering the lowest `bits` bits.
#[inline]
const fn mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Bit layout of a generated ID, from most to least significant bit:
///
/// ```text
///  Bit Index:  63          63 62          22 21          12 11             0
///              +--------------+--------------+--------------+---------------+
///  Field:      | reserved (1) | timestamp(41)| worker (10)  | sequence (12) |
///              +--------------+--------------+--------------+---------------+
///              |<----- MSB ---------- 64 bits ----------- LSB ------------->|
/// ```
///
/// The widths above are the defaults. Any split is accepted as long as the
/// three fields cover 63 bits (sign bit reserved) or 64 bits (not reserved).
/// Shifts and masks are derived once and never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitLayout {
    timestamp_bits: u32,
    worker_bits: u32,
    sequence_bits: u32,
    reserve_sign_bit: bool,
    sequence_mask: u64,
    timestamp_shift: u32,
    worker_shift: u32,
}

impl BitLayout {
    /// Validates the declared widths and derives shifts and masks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::BitSum`] when the widths do not add up to
    /// 63 with `reserve_sign_bit`, or to 64 without it.
    ///
    /// # Example
    ///
    /// ```
    /// use rangeflake::BitLayout;
    ///
    /// let layout = BitLayout::new(41, 10, 12, true).unwrap();
    /// assert_eq!(layout.sequence_mask(), 4095);
    /// assert_eq!(layout.timestamp_shift(), 22);
    /// assert_eq!(layout.worker_shift(), 12);
    ///
    /// assert!(BitLayout::new(41, 10, 12, false).is_err());
    /// ```
    pub fn new(
        timestamp_bits: u32,
        worker_bits: u32,
        sequence_bits: u32,
        reserve_sign_bit: bool,
    ) -> Result<Self, ConfigurationError> {
        let expected = if reserve_sign_bit { 63 } else { 64 };
        let actual = u64::from(timestamp_bits) + u64::from(worker_bits) + u64::from(sequence_bits);
        if actual != expected {
            return Err(ConfigurationError::BitSum { expected, actual });
        }

        Ok(Self {
            timestamp_bits,
            worker_bits,
            sequence_bits,
            reserve_sign_bit,
            sequence_mask: mask(sequence_bits),
            timestamp_shift: worker_bits + sequence_bits,
            worker_shift: sequence_bits,
        })
    }

    pub const fn timestamp_bits(&self) -> u32 {
        self.timestamp_bits
    }

    pub const fn worker_bits(&self) -> u32 {
        self.worker_bits
    }

    pub const fn sequence_bits(&self) -> u32 {
        self.sequence_bits
    }

    pub const fn reserve_sign_bit(&self) -> bool {
        self.reserve_sign_bit
    }

    /// Largest sequence value within one millisecond.
    pub const fn sequence_mask(&self) -> u64 {
        self.sequence_mask
    }

    pub const fn timestamp_shift(&self) -> u32 {
        self.timestamp_shift
    }

    pub const fn worker_shift(&self) -> u32 {
        self.worker_shift
    }

    /// Largest encodable worker id.
    pub const fn max_worker_id(&self) -> u64 {
        mask(self.worker_bits)
    }

    /// Largest encodable elapsed-millisecond timestamp.
    pub const fn max_timestamp(&self) -> u64 {
        mask(self.timestamp_bits)
    }

    /// Number of distinct worker ids (`2^worker_bits`).
    pub const fn worker_capacity(&self) -> u128 {
        1u128 << self.worker_bits
    }

    /// Returns `true` if `value` has no bits at or above `bits`.
    pub(crate) const fn fits(value: u64, bits: u32) -> bool {
        shr(value, bits) == 0
    }

    /// Packs the three fields into an ID.
    ///
    /// Fields are not masked: callers are expected to pass values that fit
    /// their widths, which construction-time validation guarantees for the
    /// worker id and the elapsed timestamp.
    #[inline]
    pub const fn compose(&self, timestamp: u64, worker_id: u64, sequence: u64) -> u64 {
        shl(timestamp, self.timestamp_shift) | shl(worker_id, self.worker_shift) | sequence
    }

    /// Splits an ID back into its fields.
    ///
    /// ```
    /// use rangeflake::{BitLayout, IdParts};
    ///
    /// let layout = BitLayout::new(41, 10, 12, true).unwrap();
    /// let id = layout.compose(1_000, 49, 7);
    /// assert_eq!(
    ///     layout.decompose(id),
    ///     IdParts { timestamp: 1_000, worker_id: 49, sequence: 7 }
    /// );
    /// ```
    pub const fn decompose(&self, id: u64) -> IdParts {
        IdParts {
            timestamp: shr(id, self.timestamp_shift) & self.max_timestamp(),
            worker_id: shr(id, self.worker_shift) & self.max_worker_id(),
            sequence: id & self.sequence_mask,
        }
    }
}

impl Default for BitLayout {
    /// The classic 1 + 41 + 10 + 12 layout.
    fn default() -> Self {
        Self {
            timestamp_bits: DEFAULT_TIMESTAMP_BITS,
            worker_bits: DEFAULT_WORKER_BITS,
            sequence_bits: DEFAULT_SEQUENCE_BITS,
            reserve_sign_bit: true,
            sequence_mask: mask(DEFAULT_SEQUENCE_BITS),
            timestamp_shift: DEFAULT_WORKER_BITS + DEFAULT_SEQUENCE_BITS,
            worker_shift: DEFAULT_SEQUENCE_BITS,
        }
    }
}

/// The fields of a decomposed ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdParts {
    /// Milliseconds elapsed since the allocator's epoch.
    pub timestamp: u64,
    pub worker_id: u64,
    pub sequence: u64,
}
