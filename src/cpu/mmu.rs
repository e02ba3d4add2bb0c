//! Memory management unit.
//!
//! The MMU owns the physical [`AddressSpace`] and, while enabled, translates
//! every access through a flattened page table. The table is read once, at
//! [`Mmu::initialize`], from 32-bit entries in physical memory:
//!
//! ```text
//!  31                     12 11     8 7    6     5     4     3     2     1     0
//! +-------------------------+--------+-------+-----+-----+-----+-----+-----+-----+
//! |   address (4K aligned)  |  P(8)  |  -    | sz2 | sz1 | usr | wr  | ex  | sub |
//! +-------------------------+--------+-------+-----+-----+-----+-----+-----+-----+
//! ```
//!
//! Subtable entries are expanded in place, depth first. Leaf mappings are
//! given physical storage by a running allocator: each present leaf starts
//! where the previous one ended, regardless of its own address field.

use crate::cpu::decode::WORD_SIZE;
use crate::cpu::memory::{AddressSpace, Memory, MemoryError};
use bitflags::bitflags;
use serde::Serialize;

/// Maximum number of nested subtables followed during expansion.
pub const MAX_TABLE_DEPTH: usize = 8;

/// Maximum number of entries read while expanding one table.
pub const MAX_TABLE_ENTRIES: usize = 1 << 22;

/// End of the physical address range.
const PHYS_LIMIT: u64 = 1 << 32;

bitflags! {
    /// Flag bits of a page-table entry.
    ///
    /// Access flags are decoded and kept with each mapping but not enforced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        const SUBTABLE = 1 << 0;
        const EXECUTE = 1 << 1;
        const WRITE = 1 << 2;
        const USERSPACE = 1 << 3;
        const SIZE1 = 1 << 4;
        const SIZE2 = 1 << 5;
        const PRESENT = 1 << 8;
    }
}

impl PageFlags {
    /// Page size in KiB selected by the two size bits.
    pub fn size_kb(self) -> u32 {
        match (self.contains(Self::SIZE1), self.contains(Self::SIZE2)) {
            (false, false) => 4,
            (true, false) => 64,
            (false, true) => 1024,
            (true, true) => 64 * 1024,
        }
    }
}

/// A decoded page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub address: u32,
    pub flags: PageFlags,
}

impl PageEntry {
    pub fn decode(raw: u32) -> Self {
        Self {
            address: raw & 0xFFFF_F000,
            flags: PageFlags::from_bits_retain(raw & 0xFFF),
        }
    }

    pub fn is_present(&self) -> bool {
        self.flags.contains(PageFlags::PRESENT)
    }

    pub fn is_subtable(&self) -> bool {
        self.flags.contains(PageFlags::SUBTABLE)
    }

    /// Size in bytes of the page, or of the nested table for a subtable entry.
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.flags.size_kb()) * 1024
    }
}

/// One leaf of the flattened table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub virt: u32,
    pub size: u64,
    #[serde(serialize_with = "serialize_flags")]
    pub flags: PageFlags,
    pub phys: u64,
}

fn serialize_flags<S: serde::Serializer>(flags: &PageFlags, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(flags.bits())
}

impl Mapping {
    fn translate(&self, pos: u32) -> Option<u64> {
        let delta = u64::from(pos).checked_sub(u64::from(self.virt))?;
        (delta < self.size).then(|| self.phys + delta)
    }
}

/// A table still being walked: its entries and the index of the next one.
struct Frame {
    entries: Vec<u32>,
    next: usize,
}

/// The memory management unit.
#[derive(Debug)]
pub struct Mmu {
    mem: AddressSpace,
    enabled: bool,
    table: Vec<Mapping>,
}

impl Mmu {
    pub fn new(mem: AddressSpace) -> Self {
        Self {
            mem,
            enabled: false,
            table: Vec::new(),
        }
    }

    /// Physical memory.
    pub fn memory(&self) -> &AddressSpace {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.mem
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The flattened table, in traversal order.
    pub fn mappings(&self) -> &[Mapping] {
        &self.table
    }

    /// Read `count` entries at physical `table_pos` and rebuild the table.
    ///
    /// On error the previous table is left untouched.
    pub fn initialize(&mut self, table_pos: u32, count: u32) -> Result<&[Mapping], MemoryError> {
        let mut budget = MAX_TABLE_ENTRIES;
        let mut work = vec![Frame { entries: self.read_table(table_pos, count, &mut budget)?, next: 0 }];
        let mut table = Vec::new();
        let mut phys = 0u64;

        while let Some(frame) = work.last_mut() {
            let Some(&raw) = frame.entries.get(frame.next) else {
                work.pop();
                continue;
            };
            frame.next += 1;

            let entry = PageEntry::decode(raw);
            if !entry.is_present() {
                continue;
            }
            if entry.is_subtable() {
                if work.len() > MAX_TABLE_DEPTH {
                    return Err(MemoryError::PageTableTooDeep(MAX_TABLE_DEPTH));
                }
                let count = (entry.size_bytes() / u64::from(WORD_SIZE)) as u32;
                work.push(Frame { entries: self.read_table(entry.address, count, &mut budget)?, next: 0 });
                continue;
            }
            if phys + entry.size_bytes() > PHYS_LIMIT {
                return Err(MemoryError::AddressOutOfRange { pos: phys, size: PHYS_LIMIT });
            }
            table.push(Mapping {
                virt: entry.address,
                size: entry.size_bytes(),
                flags: entry.flags,
                phys,
            });
            phys += entry.size_bytes();
        }

        log::debug!(
            "MMU table at {:#x} ({} entries) expanded to {} mappings",
            table_pos,
            count,
            table.len()
        );
        self.table = table;
        Ok(&self.table)
    }

    /// Read `count` raw 32-bit entries from physical memory, charging them
    /// against `budget`.
    fn read_table(&self, pos: u32, count: u32, budget: &mut usize) -> Result<Vec<u32>, MemoryError> {
        let out_of_range = MemoryError::AddressOutOfRange { pos: u64::from(pos), size: self.mem.size() };
        let len = count.checked_mul(WORD_SIZE).ok_or_else(|| out_of_range.clone())?;
        if u64::from(pos) + u64::from(len) > self.mem.size() {
            return Err(out_of_range);
        }
        *budget = budget
            .checked_sub(count as usize)
            .ok_or(MemoryError::PageTableTooLarge(MAX_TABLE_ENTRIES))?;

        let mut bytes = vec![0u8; len as usize];
        self.mem.read_bytes(pos, &mut bytes)?;
        Ok(bytes
            .chunks_exact(WORD_SIZE as usize)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    /// Translate a virtual address with the current table.
    ///
    /// The first mapping covering `pos` wins.
    pub fn virt_to_phys(&self, pos: u32) -> Result<u32, MemoryError> {
        let phys = self
            .table
            .iter()
            .find_map(|m| m.translate(pos))
            .ok_or(MemoryError::UnmappedPage(pos))?;
        u32::try_from(phys).map_err(|_| MemoryError::AddressOutOfRange { pos: phys, size: 1 << 32 })
    }

    fn resolve(&self, pos: u32) -> Result<u32, MemoryError> {
        if self.enabled {
            self.virt_to_phys(pos)
        } else {
            Ok(pos)
        }
    }
}

impl Memory for Mmu {
    fn get_raw(&self, pos: u32) -> Result<u8, MemoryError> {
        self.mem.get_raw(self.resolve(pos)?)
    }

    fn set_raw(&mut self, pos: u32, value: u8) -> Result<(), MemoryError> {
        let pos = self.resolve(pos)?;
        self.mem.set_raw(pos, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u32 = PageFlags::PRESENT.bits();
    const SUB: u32 = PageFlags::SUBTABLE.bits();
    const S64K: u32 = PageFlags::SIZE1.bits();
    const S1M: u32 = PageFlags::SIZE2.bits();

    fn mmu_with(entries: &[(u32, u32)]) -> Mmu {
        let mut mem = AddressSpace::new(1024 * 1024);
        for (pos, raw) in entries {
            mem.set_data(*pos, u64::from(*raw), 4).unwrap();
        }
        Mmu::new(mem)
    }

    #[test]
    fn test_flag_decoding() {
        let entry = PageEntry::decode(0x0000_1111);
        assert_eq!(entry.address, 0x1000);
        assert!(entry.is_present());
        assert!(entry.is_subtable());
        assert_eq!(entry.flags.size_kb(), 64);
        assert_eq!(PageEntry::decode(0x0000_1100).flags.size_kb(), 4);

        let entry = PageEntry::decode(0x0000_2036);
        assert!(entry.flags.contains(PageFlags::EXECUTE | PageFlags::WRITE));
        assert!(!entry.is_present());
        assert_eq!(entry.flags.size_kb(), 64 * 1024);

        assert_eq!(PageEntry::decode(0x10).flags.size_kb(), 64);
        assert_eq!(PageEntry::decode(0x20).flags.size_kb(), 1024);
        assert_eq!(PageEntry::decode(0xFFFF_FFFF).address, 0xFFFF_F000);
    }

    #[test]
    fn test_single_leaf_translation() {
        let mut mmu = mmu_with(&[(0x100, 0x0004_0000 | P)]);
        mmu.initialize(0x100, 1).unwrap();
        mmu.enable();

        assert_eq!(mmu.virt_to_phys(0x40000).unwrap(), 0);
        assert_eq!(mmu.virt_to_phys(0x40FFF).unwrap(), 0xFFF);
        assert_eq!(mmu.virt_to_phys(0x41000), Err(MemoryError::UnmappedPage(0x41000)));
        assert_eq!(mmu.virt_to_phys(0x3FFFF), Err(MemoryError::UnmappedPage(0x3FFFF)));
    }

    #[test]
    fn test_subtable_expansion_order_and_allocation() {
        let mut mmu = mmu_with(&[
            // top level: subtable at 0x1000, then a 64K page at 0x8000
            (0x10, 0x0000_1000 | SUB | P),
            (0x14, 0x0000_8000 | S64K | P),
            (0x18, 0),
            // subtable: 4K page at 0x2000, 1M page at 0x3000
            (0x1000, 0x0000_2000 | P),
            (0x1004, 0x0000_3000 | S1M | P),
        ]);

        let table = mmu.initialize(0x10, 3).unwrap().to_vec();
        let virt: Vec<u32> = table.iter().map(|m| m.virt).collect();
        let phys: Vec<u64> = table.iter().map(|m| m.phys).collect();
        assert_eq!(virt, vec![0x2000, 0x3000, 0x8000]);
        assert_eq!(phys, vec![0, 0x1000, 0x1000 + 0x10_0000]);
    }

    #[test]
    fn test_non_present_entries_dropped() {
        let mut mmu = mmu_with(&[
            (0x20, 0x0001_0000),
            (0x24, 0x0002_0000 | P),
            (0x28, 0x0003_0000 | SUB),
        ]);
        let table = mmu.initialize(0x20, 3).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].virt, 0x20000);
        assert_eq!(table[0].phys, 0);
    }

    #[test]
    fn test_first_match_wins() {
        let mut mmu = mmu_with(&[
            (0x40, 0x0001_0000 | P),
            (0x44, 0x0001_0000 | P),
        ]);
        mmu.initialize(0x40, 2).unwrap();
        assert_eq!(mmu.virt_to_phys(0x10010).unwrap(), 0x10);
    }

    #[test]
    fn test_self_referencing_table_is_bounded() {
        let mut mmu = mmu_with(&[(0x1000, 0x0000_1000 | SUB | P)]);
        assert_eq!(
            mmu.initialize(0x1000, 1),
            Err(MemoryError::PageTableTooDeep(MAX_TABLE_DEPTH))
        );
        assert!(mmu.mappings().is_empty());
    }

    /// Three levels of 1024 entries, each level pointing every entry at the
    /// same next table, so the expansion is far wider than the guest data.
    fn shared_subtable_tree(leaf: u32) -> Mmu {
        let mut mem = AddressSpace::new(1024 * 1024);
        mem.set_data(0x100, u64::from(0x1000 | SUB | P), 4).unwrap();
        for i in 0..1024 {
            mem.set_data(0x1000 + i * 4, u64::from(0x2000 | SUB | P), 4).unwrap();
            mem.set_data(0x2000 + i * 4, u64::from(0x3000 | SUB | P), 4).unwrap();
            mem.set_data(0x3000 + i * 4, u64::from(leaf), 4).unwrap();
        }
        Mmu::new(mem)
    }

    #[test]
    fn test_wide_tree_stops_at_physical_limit() {
        // 64 MiB leaves exhaust the 4 GiB physical range after 64 of them.
        let mut mmu = shared_subtable_tree(P | S64K | S1M);
        assert_eq!(
            mmu.initialize(0x100, 1),
            Err(MemoryError::AddressOutOfRange { pos: 1 << 32, size: 1 << 32 })
        );
        assert!(mmu.mappings().is_empty());
    }

    #[test]
    fn test_wide_tree_entry_budget() {
        // No leaf is present, so only the entry budget ends the walk.
        let mut mmu = shared_subtable_tree(0);
        assert_eq!(
            mmu.initialize(0x100, 1),
            Err(MemoryError::PageTableTooLarge(MAX_TABLE_ENTRIES))
        );
    }

    #[test]
    fn test_physical_range_fills_exactly() {
        let mut mmu = mmu_with(&[]);
        for i in 0..64u32 {
            mmu.memory_mut().set_data(0x100 + i * 4, u64::from(P | S64K | S1M), 4).unwrap();
        }
        let table = mmu.initialize(0x100, 64).unwrap();
        assert_eq!(table.len(), 64);
        assert_eq!(table[63].phys, (1 << 32) - (64 << 20));
    }

    #[test]
    fn test_oversized_table_rejected_before_reading() {
        let mut mmu = mmu_with(&[(0x100, 0x0004_0000 | P)]);
        assert_eq!(
            mmu.initialize(0x100, 0x3FFF_FFFF),
            Err(MemoryError::AddressOutOfRange { pos: 0x100, size: 1024 * 1024 })
        );
    }

    #[test]
    fn test_disabled_passthrough() {
        let mut mmu = mmu_with(&[(0x100, 0x0004_0000 | P)]);
        mmu.initialize(0x100, 1).unwrap();
        mmu.set_data(0x200, 0xABCD, 2).unwrap();
        assert_eq!(mmu.memory().get_data(0x200, 2).unwrap(), 0xABCD);
    }

    #[test]
    fn test_enabled_routes_through_table() {
        let mut mmu = mmu_with(&[(0x100, 0x0004_0000 | P)]);
        mmu.initialize(0x100, 1).unwrap();
        mmu.enable();

        mmu.set_data(0x40010, 0x1234_5678, 4).unwrap();
        assert_eq!(mmu.memory().get_data(0x10, 4).unwrap(), 0x1234_5678);
        assert_eq!(mmu.get_data(0x40010, 4).unwrap(), 0x1234_5678);
        assert_eq!(mmu.get_raw(0x50000), Err(MemoryError::UnmappedPage(0x50000)));

        mmu.disable();
        assert_eq!(mmu.get_data(0x10, 4).unwrap(), 0x1234_5678);
    }
}
