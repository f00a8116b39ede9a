//! Mapping table: page-aligned, non-overlapping regions ordered by address.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorCode};
use crate::memory::access::{range_end, validate_page_range, AccessFault, Permission};
use crate::memory::external::ExternalBuffer;

/// Snapshot of one mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Region {
    /// First mapped address.
    pub begin: u64,
    /// Last mapped address (inclusive).
    pub end: u64,
    /// Access permissions.
    pub perms: Permission,
}

impl Region {
    /// Region length in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end - self.begin + 1
    }

    /// Returns `true` when `address` lies inside the region.
    #[must_use]
    pub const fn contains(&self, address: u64) -> bool {
        address >= self.begin && address <= self.end
    }
}

#[derive(Debug)]
enum Backing {
    Owned(Vec<u8>),
    External {
        buffer: ExternalBuffer,
        offset: usize,
    },
}

#[derive(Debug)]
struct Mapping {
    begin: u64,
    size: u64,
    perms: Permission,
    backing: Backing,
}

impl Mapping {
    const fn end(&self) -> u64 {
        self.begin + self.size
    }

    const fn contains(&self, address: u64) -> bool {
        address >= self.begin && address < self.end()
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn offset_of(&self, address: u64) -> usize {
        // Mapping sizes were converted from usize when the backing was created.
        (address - self.begin) as usize
    }

    const fn region(&self) -> Region {
        Region {
            begin: self.begin,
            end: self.end() - 1,
            perms: self.perms,
        }
    }

    fn read(&self, offset: usize, out: &mut [u8]) {
        match &self.backing {
            Backing::Owned(data) => out.copy_from_slice(&data[offset..offset + out.len()]),
            Backing::External {
                buffer,
                offset: base,
            } => buffer.read(base + offset, out),
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        match &mut self.backing {
            Backing::Owned(bytes) => bytes[offset..offset + data.len()].copy_from_slice(data),
            Backing::External {
                buffer,
                offset: base,
            } => buffer.write(*base + offset, data),
        }
    }

    fn split_off(&mut self, at: u64) -> Self {
        let split = self.offset_of(at);
        let tail_backing = match &mut self.backing {
            Backing::Owned(data) => Backing::Owned(data.split_off(split)),
            Backing::External { buffer, offset } => Backing::External {
                buffer: buffer.clone(),
                offset: *offset + split,
            },
        };
        let tail = Self {
            begin: at,
            size: self.end() - at,
            perms: self.perms,
            backing: tail_backing,
        };
        self.size = at - self.begin;
        tail
    }

    const fn is_external(&self) -> bool {
        matches!(self.backing, Backing::External { .. })
    }
}

/// Page-granular address space owned by one session.
#[derive(Debug)]
pub struct MemoryManager {
    page_size: u64,
    max_regions: usize,
    mappings: BTreeMap<u64, Mapping>,
}

impl MemoryManager {
    /// Creates an empty address space.
    #[must_use]
    pub const fn new(page_size: u64, max_regions: usize) -> Self {
        Self {
            page_size,
            max_regions,
            mappings: BTreeMap::new(),
        }
    }

    /// Mapping granularity in bytes.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of mapped regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.mappings.len()
    }

    /// Maps zero-filled, engine-owned memory over `[address, address + size)`.
    ///
    /// # Errors
    ///
    /// Caller-side permission and alignment errors, [`ErrorCode::MapOverlap`],
    /// [`ErrorCode::MapTableFull`], [`ErrorCode::InvalidArgument`] for a range
    /// past the end of the address space, or [`ErrorCode::NoMemory`].
    pub fn map(&mut self, address: u64, size: u64, perms: Permission) -> Result<(), Error> {
        perms.validate()?;
        self.check_new_range(address, size)?;
        let len = usize::try_from(size).map_err(|_| ErrorCode::NoMemory)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ErrorCode::NoMemory)?;
        data.resize(len, 0);
        self.insert(address, size, perms, Backing::Owned(data));
        Ok(())
    }

    /// Maps caller-owned `buffer` over `[address, address + size)`.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryManager::map`], plus [`Error::ExternalBufferTooSmall`].
    pub fn map_external(
        &mut self,
        address: u64,
        size: u64,
        perms: Permission,
        buffer: ExternalBuffer,
    ) -> Result<(), Error> {
        perms.validate()?;
        validate_page_range(address, size, self.page_size)?;
        let len = buffer.len();
        if u64::try_from(len).is_ok_and(|len| len < size) {
            return Err(Error::ExternalBufferTooSmall { len, size });
        }
        self.check_new_range(address, size)?;
        self.insert(address, size, perms, Backing::External { buffer, offset: 0 });
        Ok(())
    }

    /// Removes every mapping inside `[address, address + size)`.
    ///
    /// The range must consist of whole regions with no gaps.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::MapNotFound`] when a byte is unmapped and
    /// [`ErrorCode::InvalidArgument`] when a region would be split.
    pub fn unmap(&mut self, address: u64, size: u64) -> Result<(), Error> {
        let end = self.checked_existing_range(address, size)?;
        let begins = self.covering(address, end)?;
        let first = begins.first().and_then(|begin| self.mappings.get(begin));
        let last = begins.last().and_then(|begin| self.mappings.get(begin));
        let splits_first = first.is_some_and(|mapping| mapping.begin < address);
        let splits_last = last.is_some_and(|mapping| mapping.end() > end);
        if splits_first || splits_last {
            return Err(ErrorCode::InvalidArgument.into());
        }
        for begin in begins {
            self.mappings.remove(&begin);
        }
        Ok(())
    }

    /// Sets `perms` over `[address, address + size)`, splitting edge regions.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPermissions`] for unknown bits,
    /// [`ErrorCode::MapNotFound`] when a byte is unmapped and
    /// [`ErrorCode::MapTableFull`] when splitting needs more table slots.
    pub fn protect(&mut self, address: u64, size: u64, perms: Permission) -> Result<(), Error> {
        perms.validate()?;
        let end = self.checked_existing_range(address, size)?;
        self.covering(address, end)?;
        let extra = usize::from(self.splits_at(address)) + usize::from(self.splits_at(end));
        if self.mappings.len() + extra > self.max_regions {
            return Err(ErrorCode::MapTableFull.into());
        }
        self.split_at(address);
        self.split_at(end);
        for mapping in self.mappings.range_mut(address..end).map(|(_, m)| m) {
            mapping.perms = perms;
        }
        Ok(())
    }

    /// Copies mapped bytes into `out`, ignoring permissions.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::ReadUnmapped`] when any byte is unmapped; `out` is left
    /// untouched in that case.
    pub fn read(&self, address: u64, out: &mut [u8]) -> Result<(), ErrorCode> {
        self.check(address, out.len(), Permission::NONE)
            .map_err(|_| ErrorCode::ReadUnmapped)?;
        self.copy_out(address, out);
        Ok(())
    }

    /// Copies `data` into mapped memory, ignoring permissions.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::WriteUnmapped`] when any byte is unmapped; memory is left
    /// untouched in that case.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), ErrorCode> {
        self.check(address, data.len(), Permission::NONE)
            .map_err(|_| ErrorCode::WriteUnmapped)?;
        self.copy_in(address, data);
        Ok(())
    }

    /// Verifies every byte of `[address, address + len)` is mapped with
    /// `required` permissions.
    ///
    /// # Errors
    ///
    /// Returns the first offending byte as an [`AccessFault`].
    pub fn check(&self, address: u64, len: usize, required: Permission) -> Result<(), AccessFault> {
        let Some(end) = u64::try_from(len)
            .ok()
            .and_then(|len| address.checked_add(len))
        else {
            return Err(AccessFault::Unmapped { address });
        };
        let mut cursor = address;
        while cursor < end {
            let mapping = self
                .find(cursor)
                .ok_or(AccessFault::Unmapped { address: cursor })?;
            if !mapping.perms.contains(required) {
                return Err(AccessFault::Protected { address: cursor });
            }
            cursor = mapping.end();
        }
        Ok(())
    }

    /// Region snapshot in ascending address order.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        self.mappings.values().map(Mapping::region).collect()
    }

    /// Writes the region table into `out` and returns the number written.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InsufficientMapEntries`] when `out` is shorter than the
    /// table; `out` is left untouched in that case.
    pub fn regions_into(&self, out: &mut [Region]) -> Result<usize, ErrorCode> {
        if out.len() < self.mappings.len() {
            return Err(ErrorCode::InsufficientMapEntries);
        }
        for (slot, mapping) in out.iter_mut().zip(self.mappings.values()) {
            *slot = mapping.region();
        }
        Ok(self.mappings.len())
    }

    /// Drops every mapping and returns how many were externally backed.
    pub fn clear(&mut self) -> usize {
        let external = self.mappings.values().filter(|m| m.is_external()).count();
        self.mappings.clear();
        external
    }

    pub(crate) fn copy_out(&self, address: u64, out: &mut [u8]) {
        let mut cursor = address;
        let mut done = 0;
        while done < out.len() {
            let Some(mapping) = self.find(cursor) else {
                return;
            };
            let offset = mapping.offset_of(cursor);
            let available = mapping.offset_of(mapping.end() - 1) + 1 - offset;
            let chunk = available.min(out.len() - done);
            mapping.read(offset, &mut out[done..done + chunk]);
            done += chunk;
            cursor = mapping.end();
        }
    }

    pub(crate) fn copy_in(&mut self, address: u64, data: &[u8]) {
        let mut cursor = address;
        let mut done = 0;
        while done < data.len() {
            let Some(mapping) = self.find_mut(cursor) else {
                return;
            };
            let offset = mapping.offset_of(cursor);
            let available = mapping.offset_of(mapping.end() - 1) + 1 - offset;
            let chunk = available.min(data.len() - done);
            mapping.write(offset, &data[done..done + chunk]);
            done += chunk;
            cursor = mapping.end();
        }
    }

    fn find(&self, address: u64) -> Option<&Mapping> {
        self.mappings
            .range(..=address)
            .next_back()
            .map(|(_, mapping)| mapping)
            .filter(|mapping| mapping.contains(address))
    }

    fn find_mut(&mut self, address: u64) -> Option<&mut Mapping> {
        self.mappings
            .range_mut(..=address)
            .next_back()
            .map(|(_, mapping)| mapping)
            .filter(|mapping| mapping.contains(address))
    }

    fn check_new_range(&self, address: u64, size: u64) -> Result<(), Error> {
        validate_page_range(address, size, self.page_size)?;
        let end = range_end(address, size).ok_or(ErrorCode::InvalidArgument)?;
        let overlaps = self
            .mappings
            .range(..end)
            .next_back()
            .is_some_and(|(_, mapping)| mapping.end() > address);
        if overlaps {
            return Err(ErrorCode::MapOverlap.into());
        }
        if self.mappings.len() >= self.max_regions {
            return Err(ErrorCode::MapTableFull.into());
        }
        Ok(())
    }

    fn checked_existing_range(&self, address: u64, size: u64) -> Result<u64, Error> {
        validate_page_range(address, size, self.page_size)?;
        range_end(address, size).ok_or(Error::Engine(ErrorCode::InvalidArgument))
    }

    fn covering(&self, address: u64, end: u64) -> Result<Vec<u64>, ErrorCode> {
        let mut begins = Vec::new();
        let mut cursor = address;
        while cursor < end {
            let mapping = self.find(cursor).ok_or(ErrorCode::MapNotFound)?;
            begins.push(mapping.begin);
            cursor = mapping.end();
        }
        Ok(begins)
    }

    fn splits_at(&self, at: u64) -> bool {
        self.find(at).is_some_and(|mapping| mapping.begin != at)
    }

    fn split_at(&mut self, at: u64) {
        if !self.splits_at(at) {
            return;
        }
        if let Some(mapping) = self.find_mut(at) {
            let tail = mapping.split_off(at);
            self.mappings.insert(tail.begin, tail);
        }
    }

    fn insert(&mut self, begin: u64, size: u64, perms: Permission, backing: Backing) {
        self.mappings.insert(
            begin,
            Mapping {
                begin,
                size,
                perms,
                backing,
            },
        );
    }
}
