//! Register file storage model: per-architecture layouts over a flat byte
//! image, with typed accessors that never widen or narrow.

use crate::error::{Error, ErrorCode};

/// Architecture-scoped register identifier.
pub type RegisterId = i32;

/// Native representation of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegisterKind {
    /// 8-bit integer.
    U8,
    /// 16-bit integer.
    U16,
    /// 32-bit integer.
    U32,
    /// 64-bit integer.
    U64,
    /// Single-precision float.
    F32,
    /// Double-precision float.
    F64,
    /// 128-bit SIMD lane pair.
    Vector128,
}

impl RegisterKind {
    /// Storage width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
            Self::U64 | Self::F64 => 8,
            Self::Vector128 => 16,
        }
    }

    /// Returns `true` for integer kinds.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }
}

/// Static description of one architectural register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor {
    /// Register ID.
    pub id: RegisterId,
    /// Canonical upper-case name.
    pub name: &'static str,
    /// Native representation.
    pub kind: RegisterKind,
}

/// 128-bit vector register value stored as two little-endian 64-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Vector128 {
    /// Low 64 bits.
    pub low: u64,
    /// High 64 bits.
    pub high: u64,
}

impl Vector128 {
    /// Builds a vector from two double lanes (lane 0 is low).
    #[must_use]
    pub const fn from_f64x2(lanes: [f64; 2]) -> Self {
        Self {
            low: lanes[0].to_bits(),
            high: lanes[1].to_bits(),
        }
    }

    /// Views the vector as two double lanes.
    #[must_use]
    pub const fn to_f64x2(self) -> [f64; 2] {
        [f64::from_bits(self.low), f64::from_bits(self.high)]
    }

    /// Builds a vector from four float lanes (lane 0 is lowest).
    #[must_use]
    pub fn from_f32x4(lanes: [f32; 4]) -> Self {
        let half = |a: f32, b: f32| u64::from(a.to_bits()) | (u64::from(b.to_bits()) << 32);
        Self {
            low: half(lanes[0], lanes[1]),
            high: half(lanes[2], lanes[3]),
        }
    }

    /// Views the vector as four float lanes.
    #[must_use]
    pub fn to_f32x4(self) -> [f32; 4] {
        let lo = self.low.to_le_bytes();
        let hi = self.high.to_le_bytes();
        let lane = |b: &[u8]| f32::from_bits(u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        [lane(&lo[..4]), lane(&lo[4..]), lane(&hi[..4]), lane(&hi[4..])]
    }
}

/// Values storable in a register of the matching [`RegisterKind`].
pub trait RegisterValue: Copy {
    /// Kind this accessor reads and writes.
    const KIND: RegisterKind;

    /// Decodes from a little-endian byte slice of exactly `KIND.width()` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Encodes into a little-endian byte slice of exactly `KIND.width()` bytes.
    fn write_le_slice(self, out: &mut [u8]);
}

macro_rules! primitive_register_value {
    ($ty:ty, $kind:expr, $width:literal) => {
        impl RegisterValue for $ty {
            const KIND: RegisterKind = $kind;

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $width];
                raw.copy_from_slice(&bytes[..$width]);
                Self::from_le_bytes(raw)
            }

            fn write_le_slice(self, out: &mut [u8]) {
                out[..$width].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

primitive_register_value!(u8, RegisterKind::U8, 1);
primitive_register_value!(u16, RegisterKind::U16, 2);
primitive_register_value!(u32, RegisterKind::U32, 4);
primitive_register_value!(u64, RegisterKind::U64, 8);
primitive_register_value!(f32, RegisterKind::F32, 4);
primitive_register_value!(f64, RegisterKind::F64, 8);

impl RegisterValue for Vector128 {
    const KIND: RegisterKind = RegisterKind::Vector128;

    fn from_le_slice(bytes: &[u8]) -> Self {
        Self {
            low: u64::from_le_slice(&bytes[..8]),
            high: u64::from_le_slice(&bytes[8..16]),
        }
    }

    fn write_le_slice(self, out: &mut [u8]) {
        self.low.write_le_slice(&mut out[..8]);
        self.high.write_le_slice(&mut out[8..16]);
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    descriptor: RegisterDescriptor,
    offset: usize,
}

/// Register storage for one session, laid out from a static descriptor list.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    layout: &'static [RegisterDescriptor],
    slots: Vec<Slot>,
    bytes: Box<[u8]>,
}

impl RegisterFile {
    /// Allocates zeroed storage for `layout`.
    #[must_use]
    pub fn new(layout: &'static [RegisterDescriptor]) -> Self {
        let mut offset = 0;
        let slots = layout
            .iter()
            .map(|descriptor| {
                let slot = Slot {
                    descriptor: *descriptor,
                    offset,
                };
                offset += descriptor.kind.width();
                slot
            })
            .collect();
        Self {
            layout,
            slots,
            bytes: vec![0; offset].into_boxed_slice(),
        }
    }

    /// Descriptors in layout order.
    #[must_use]
    pub const fn layout(&self) -> &'static [RegisterDescriptor] {
        self.layout
    }

    /// Total storage size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Raw storage image.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replaces the storage image.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidArgument`] when `image` has the wrong length.
    pub fn load_bytes(&mut self, image: &[u8]) -> Result<(), ErrorCode> {
        if image.len() != self.bytes.len() {
            return Err(ErrorCode::InvalidArgument);
        }
        self.bytes.copy_from_slice(image);
        Ok(())
    }

    /// Looks up the descriptor for `id`.
    #[must_use]
    pub fn descriptor(&self, id: RegisterId) -> Option<RegisterDescriptor> {
        self.slot(id).map(|slot| slot.descriptor)
    }

    /// Reads a register through the accessor matching its native kind.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidRegister`] for an unknown ID and
    /// [`Error::RegisterKindMismatch`] when `T` is not the native kind.
    pub fn read<T: RegisterValue>(&self, id: RegisterId) -> Result<T, Error> {
        let slot = self.typed_slot::<T>(id)?;
        Ok(T::from_le_slice(&self.bytes[slot.offset..]))
    }

    /// Writes a register through the accessor matching its native kind.
    ///
    /// # Errors
    ///
    /// Same as [`RegisterFile::read`].
    pub fn write<T: RegisterValue>(&mut self, id: RegisterId, value: T) -> Result<(), Error> {
        let slot = self.typed_slot::<T>(id)?;
        value.write_le_slice(&mut self.bytes[slot.offset..]);
        Ok(())
    }

    /// Reads several registers of the same kind.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid ID or kind mismatch.
    pub fn read_batch<T: RegisterValue>(&self, ids: &[RegisterId]) -> Result<Vec<T>, Error> {
        ids.iter().map(|id| self.read(*id)).collect()
    }

    /// Writes several registers of the same kind; nothing is written unless
    /// every entry is valid.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid ID or kind mismatch.
    pub fn write_batch<T: RegisterValue>(&mut self, entries: &[(RegisterId, T)]) -> Result<(), Error> {
        for (id, _) in entries {
            self.typed_slot::<T>(*id)?;
        }
        for (id, value) in entries {
            self.write(*id, *value)?;
        }
        Ok(())
    }

    /// Reads an integer register of any width, zero-extended.
    #[must_use]
    pub fn read_bits(&self, id: RegisterId) -> Option<u64> {
        let slot = self.slot(id)?;
        let width = slot.descriptor.kind.width();
        if !slot.descriptor.kind.is_integer() {
            return None;
        }
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&self.bytes[slot.offset..slot.offset + width]);
        Some(u64::from_le_bytes(raw))
    }

    /// Writes an integer register of any width, truncating `value`.
    ///
    /// Returns `false` for unknown or non-integer registers.
    pub fn write_bits(&mut self, id: RegisterId, value: u64) -> bool {
        let Some(slot) = self.slot(id).filter(|slot| slot.descriptor.kind.is_integer()) else {
            return false;
        };
        let width = slot.descriptor.kind.width();
        let offset = slot.offset;
        self.bytes[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
        true
    }

    /// Zeroes every register.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
    }

    fn slot(&self, id: RegisterId) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.descriptor.id == id)
    }

    fn typed_slot<T: RegisterValue>(&self, id: RegisterId) -> Result<Slot, Error> {
        let slot = *self.slot(id).ok_or(ErrorCode::InvalidRegister)?;
        if slot.descriptor.kind != T::KIND {
            return Err(Error::RegisterKindMismatch {
                id,
                actual: slot.descriptor.kind,
                requested: T::KIND,
            });
        }
        Ok(slot)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::{RegisterDescriptor, RegisterFile, RegisterKind, Vector128};
    use crate::error::{Error, ErrorCode};

    const LAYOUT: &[RegisterDescriptor] = &[
        RegisterDescriptor {
            id: 1,
            name: "B",
            kind: RegisterKind::U8,
        },
        RegisterDescriptor {
            id: 2,
            name: "W",
            kind: RegisterKind::U32,
        },
        RegisterDescriptor {
            id: 3,
            name: "Q",
            kind: RegisterKind::U64,
        },
        RegisterDescriptor {
            id: 4,
            name: "S",
            kind: RegisterKind::F32,
        },
        RegisterDescriptor {
            id: 5,
            name: "D",
            kind: RegisterKind::F64,
        },
        RegisterDescriptor {
            id: 6,
            name: "V",
            kind: RegisterKind::Vector128,
        },
    ];

    #[test]
    fn storage_is_sized_from_layout() {
        let file = RegisterFile::new(LAYOUT);
        assert_eq!(file.byte_len(), 1 + 4 + 8 + 4 + 8 + 16);
        assert!(file.as_bytes().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn every_kind_roundtrips_through_its_accessor() {
        let mut file = RegisterFile::new(LAYOUT);
        file.write(1, 0xABu8).expect("u8");
        file.write(2, 0xDEAD_BEEFu32).expect("u32");
        file.write(3, u64::MAX - 1).expect("u64");
        file.write(4, 1.5f32).expect("f32");
        file.write(5, -2.25f64).expect("f64");
        let vector = Vector128::from_f64x2([3.0, -4.0]);
        file.write(6, vector).expect("vector");

        assert_eq!(file.read::<u8>(1), Ok(0xAB));
        assert_eq!(file.read::<u32>(2), Ok(0xDEAD_BEEF));
        assert_eq!(file.read::<u64>(3), Ok(u64::MAX - 1));
        assert_eq!(file.read::<f32>(4), Ok(1.5));
        assert_eq!(file.read::<f64>(5), Ok(-2.25));
        assert_eq!(file.read::<Vector128>(6).map(Vector128::to_f64x2), Ok([3.0, -4.0]));
    }

    #[test]
    fn mismatched_accessor_is_rejected() {
        let mut file = RegisterFile::new(LAYOUT);
        assert_eq!(
            file.read::<u64>(2),
            Err(Error::RegisterKindMismatch {
                id: 2,
                actual: RegisterKind::U32,
                requested: RegisterKind::U64
            })
        );
        assert!(file.write(4, 1.0f64).is_err());
    }

    #[test]
    fn unknown_register_is_engine_error() {
        let file = RegisterFile::new(LAYOUT);
        assert_eq!(
            file.read::<u32>(99),
            Err(Error::Engine(ErrorCode::InvalidRegister))
        );
    }

    #[test]
    fn batch_write_is_all_or_nothing() {
        let mut file = RegisterFile::new(LAYOUT);
        file.write(3, 7u64).expect("seed");

        let result = file.write_batch(&[(3, 9u64), (2, 1u64)]);
        assert!(result.is_err());
        assert_eq!(file.read::<u64>(3), Ok(7));
    }

    #[test]
    fn bit_accessors_cover_integer_registers_only() {
        let mut file = RegisterFile::new(LAYOUT);
        assert!(file.write_bits(1, 0x1FF));
        assert_eq!(file.read_bits(1), Some(0xFF));
        assert!(!file.write_bits(5, 1));
        assert_eq!(file.read_bits(5), None);
        assert_eq!(file.read_bits(42), None);
    }

    #[test]
    fn float_lanes_pack_in_order() {
        let vector = Vector128::from_f32x4([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(vector.to_f32x4(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(vector.low & 0xFFFF_FFFF, u64::from(1.0f32.to_bits()));
    }
}
