//! Symbolic memory and storage locations.

use std::fmt;

use crate::value::Variable;

/// The address spaces a symbolic location can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// A 32-byte memory word.
    Mem32,
    /// A one-byte memory cell.
    Mem1,
    /// A 32-byte storage slot.
    Storage,
}

impl AddressSpace {
    pub fn id(&self) -> &'static str {
        match self {
            AddressSpace::Mem32 => "M",
            AddressSpace::Mem1 => "M1",
            AddressSpace::Storage => "S",
        }
    }

    /// Size of a location in this space, in bytes.
    pub fn size(&self) -> usize {
        match self {
            AddressSpace::Mem32 | AddressSpace::Storage => 32,
            AddressSpace::Mem1 => 1,
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A symbolic storage location, keyed by its address.
///
/// Equality is structural, so locations with equal addresses key the same
/// slot in a map. The address is a [`Variable`] by default; TAC operands
/// instantiate the same shape over their argument type, letting a
/// location's address be re-resolved as stack information improves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemLoc<A = Variable> {
    pub space: AddressSpace,
    pub address: A,
}

impl<A> MemLoc<A> {
    /// A symbolic memory region 32 bytes in length.
    pub fn mloc32(address: A) -> MemLoc<A> {
        MemLoc {
            space: AddressSpace::Mem32,
            address,
        }
    }

    /// A symbolic one-byte cell from memory.
    pub fn mloc1(address: A) -> MemLoc<A> {
        MemLoc {
            space: AddressSpace::Mem1,
            address,
        }
    }

    /// A symbolic one-word static storage location.
    pub fn sloc32(address: A) -> MemLoc<A> {
        MemLoc {
            space: AddressSpace::Storage,
            address,
        }
    }

    pub fn size(&self) -> usize {
        self.space.size()
    }
}

impl<A: fmt::Display> fmt::Display for MemLoc<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.space, self.address)
    }
}
