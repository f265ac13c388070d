//! Per-section address classification map.
//!
//! Every address of a section is either *unmapped* (tracked in a dense vector
//! with an index for O(1) swap-removal) or *mapped* with a non-empty set of
//! [`AddrFlags`]. The two containers are only ever updated together.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::Address;

bitflags! {
    /// What became of one address. The empty set means unmapped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AddrFlags: u8 {
        const CODE      = 0x01;
        const INS_START = 0x02;
        const BB_START  = 0x04;
    }
}

impl AddrFlags {
    pub const UNMAPPED: AddrFlags = AddrFlags::empty();
}

#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    addrmap: HashMap<Address, AddrFlags>,
    unmapped: Vec<Address>,
    unmapped_lookup: HashMap<Address, usize>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `addr` as unmapped unless it is already known.
    pub fn insert(&mut self, addr: Address) {
        if !self.contains(addr) {
            self.unmapped.push(addr);
            self.unmapped_lookup.insert(addr, self.unmapped.len() - 1);
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.addrmap.contains_key(&addr) || self.unmapped_lookup.contains_key(&addr)
    }

    /// True if `addr` carries at least one flag.
    pub fn is_mapped(&self, addr: Address) -> bool {
        self.addrmap.get(&addr).is_some_and(|flags| !flags.is_empty())
    }

    pub fn is_unmapped(&self, addr: Address) -> bool {
        self.unmapped_lookup.contains_key(&addr)
    }

    /// # Panics
    /// If `addr` was never inserted.
    pub fn get_addr_type(&self, addr: Address) -> AddrFlags {
        assert!(self.contains(addr), "address 0x{:x} not in address map", addr);
        self.addrmap.get(&addr).copied().unwrap_or(AddrFlags::UNMAPPED)
    }

    /// Replace the flags of `addr`.
    ///
    /// Setting [`AddrFlags::UNMAPPED`] moves the address back into the unmapped set.
    ///
    /// # Panics
    /// If `addr` was never inserted.
    pub fn set_addr_type(&mut self, addr: Address, flags: AddrFlags) {
        assert!(self.contains(addr), "address 0x{:x} not in address map", addr);
        if flags.is_empty() {
            self.addrmap.remove(&addr);
            self.insert(addr);
        } else {
            self.erase_unmapped(addr);
            self.addrmap.insert(addr, flags);
        }
    }

    /// OR `flag` into the flags of `addr`.
    ///
    /// # Panics
    /// If `addr` was never inserted.
    pub fn add_addr_flag(&mut self, addr: Address, flag: AddrFlags) {
        assert!(self.contains(addr), "address 0x{:x} not in address map", addr);
        if flag.is_empty() {
            return;
        }
        self.erase_unmapped(addr);
        *self.addrmap.entry(addr).or_default() |= flag;
    }

    pub fn unmapped_count(&self) -> usize {
        self.unmapped.len()
    }

    /// The `i`-th unmapped address. Order is unspecified and changes on removal.
    pub fn get_unmapped(&self, i: usize) -> Address {
        self.unmapped[i]
    }

    /// Smallest address still unmapped.
    pub fn lowest_unmapped(&self) -> Option<Address> {
        self.unmapped.iter().copied().min()
    }

    pub fn mapped_count(&self) -> usize {
        self.addrmap.len()
    }

    /// Forget `addr` entirely.
    pub fn erase(&mut self, addr: Address) {
        self.addrmap.remove(&addr);
        self.erase_unmapped(addr);
    }

    /// Remove `addr` from the unmapped set by swapping in the last element.
    pub fn erase_unmapped(&mut self, addr: Address) {
        if let Some(i) = self.unmapped_lookup.remove(&addr) {
            self.unmapped.swap_remove(i);
            if let Some(&moved) = self.unmapped.get(i) {
                self.unmapped_lookup.insert(moved, i);
            }
        }
    }
}
