//! Register-state snapshots detached from their session.

use crate::api::{Arch, Mode};
use crate::error::{Error, Target};

/// Context image schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial schema revision.
    V1 = 1,
}

impl SnapshotVersion {
    /// Converts a wire value to a known version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }
}

const MAGIC: [u8; 4] = *b"ECTX";

/// Bytes preceding the register image in [`Context::to_bytes`].
pub const CONTEXT_HEADER_LEN: usize = 4 + 2 + 4 + 4 + 8 + 4;

/// Saved CPU register state, tagged with the architecture and mode it was
/// captured from.
///
/// Memory contents are not part of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Context {
    version: SnapshotVersion,
    arch: Arch,
    mode: Mode,
    registers: Box<[u8]>,
    retired: u64,
}

impl Context {
    pub(crate) fn new(target: Target, registers: &[u8], retired: u64) -> Self {
        Self {
            version: SnapshotVersion::V1,
            arch: target.arch,
            mode: target.mode,
            registers: registers.into(),
            retired,
        }
    }

    pub(crate) fn overwrite(&mut self, target: Target, registers: &[u8], retired: u64) {
        self.version = SnapshotVersion::V1;
        self.arch = target.arch;
        self.mode = target.mode;
        if self.registers.len() == registers.len() {
            self.registers.copy_from_slice(registers);
        } else {
            self.registers = registers.into();
        }
        self.retired = retired;
    }

    /// Schema version.
    #[must_use]
    pub const fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Architecture and mode the context was captured from.
    #[must_use]
    pub const fn target(&self) -> Target {
        Target {
            arch: self.arch,
            mode: self.mode,
        }
    }

    /// Raw register image in layout order.
    #[must_use]
    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Instructions retired by the session when the context was saved.
    #[must_use]
    pub const fn retired(&self) -> u64 {
        self.retired
    }

    /// Length of [`Context::to_bytes`] output.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        CONTEXT_HEADER_LEN + self.registers.len()
    }

    /// Encodes the context into a self-describing little-endian image.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(self.version as u16).to_le_bytes());
        out.extend_from_slice(&self.arch.as_u32().to_le_bytes());
        out.extend_from_slice(&self.mode.bits().to_le_bytes());
        out.extend_from_slice(&self.retired.to_le_bytes());
        let len = u32::try_from(self.registers.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.registers);
        out
    }

    /// Decodes an image produced by [`Context::to_bytes`].
    ///
    /// # Errors
    ///
    /// [`Error::MalformedContext`] naming the first field that fails to parse.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = Reader { bytes };
        if reader.take::<4>("magic")? != MAGIC {
            return Err(Error::MalformedContext("magic"));
        }
        let version = SnapshotVersion::from_u16(u16::from_le_bytes(reader.take("version")?))
            .ok_or(Error::MalformedContext("version"))?;
        let arch = Arch::from_u32(u32::from_le_bytes(reader.take("arch")?))
            .ok_or(Error::MalformedContext("arch"))?;
        let mode = Mode::from_bits(u32::from_le_bytes(reader.take("mode")?))
            .ok_or(Error::MalformedContext("mode"))?;
        let retired = u64::from_le_bytes(reader.take("retired")?);
        let len = usize::try_from(u32::from_le_bytes(reader.take("length")?))
            .map_err(|_| Error::MalformedContext("length"))?;
        if reader.bytes.len() != len {
            return Err(Error::MalformedContext("length"));
        }
        Ok(Self {
            version,
            arch,
            mode,
            registers: reader.bytes.into(),
            retired,
        })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], Error> {
        let (head, rest) = self
            .bytes
            .split_first_chunk::<N>()
            .ok_or(Error::MalformedContext(field))?;
        self.bytes = rest;
        Ok(*head)
    }
}

#[cfg(test)]
mod tests {
    use super::{Context, SnapshotVersion, CONTEXT_HEADER_LEN};
    use crate::api::{Arch, Mode};
    use crate::error::{Error, Target};

    fn sample() -> Context {
        Context::new(
            Target {
                arch: Arch::Nullbyte,
                mode: Mode::MODE_16 | Mode::BIG_ENDIAN,
            },
            &[1, 2, 3, 4, 5, 6],
            77,
        )
    }

    #[test]
    fn snapshot_version_parser_accepts_only_known_versions() {
        assert_eq!(SnapshotVersion::from_u16(1), Some(SnapshotVersion::V1));
        assert_eq!(SnapshotVersion::from_u16(2), None);
    }

    #[test]
    fn byte_image_preserves_every_field() {
        let context = sample();
        let bytes = context.to_bytes();
        assert_eq!(bytes.len(), context.encoded_len());
        assert_eq!(bytes.len(), CONTEXT_HEADER_LEN + 6);
        assert_eq!(Context::from_bytes(&bytes), Ok(context));
    }

    #[test]
    fn truncated_or_corrupt_images_are_rejected() {
        let bytes = sample().to_bytes();
        assert_eq!(
            Context::from_bytes(&bytes[..3]),
            Err(Error::MalformedContext("magic"))
        );
        assert_eq!(
            Context::from_bytes(&bytes[..bytes.len() - 1]),
            Err(Error::MalformedContext("length"))
        );

        let mut bad_arch = bytes.clone();
        bad_arch[6] = 0xEE;
        assert_eq!(
            Context::from_bytes(&bad_arch),
            Err(Error::MalformedContext("arch"))
        );

        let mut bad_version = bytes;
        bad_version[4] = 9;
        assert_eq!(
            Context::from_bytes(&bad_version),
            Err(Error::MalformedContext("version"))
        );
    }

    #[test]
    fn overwrite_retargets_and_resizes() {
        let mut context = sample();
        let target = Target {
            arch: Arch::Nullbyte,
            mode: Mode::MODE_16,
        };
        context.overwrite(target, &[9; 10], 3);
        assert_eq!(context.target(), target);
        assert_eq!(context.registers(), &[9; 10]);
        assert_eq!(context.retired(), 3);
    }
}
