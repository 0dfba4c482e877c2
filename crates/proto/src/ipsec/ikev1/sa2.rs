//! SA2 working set
//!
//! One [`Sa2Item`] per unidirectional SA pair being negotiated in a Quick
//! Mode exchange, kept in the same order as the proposal payloads that
//! describe them.

use super::constants::IPSEC_SPI_END;
use super::security::{Lifetime, SecurityProtocol};
use std::sync::atomic::{AtomicU32, Ordering};
use zeroize::Zeroizing;

/// Parameters of one IPsec SA pair under negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sa2Item {
    /// Negotiated security descriptor
    pub security: SecurityProtocol,
    /// SPI chosen locally, names the inbound SA
    pub local_spi: u32,
    /// SPI chosen by the peer, names the outbound SA
    pub remote_spi: u32,
    /// Requested, later negotiated, lifetime
    pub lifetime: Lifetime,
    /// Inbound keying material, filled once KEYMAT is derived
    pub local_keymat: Zeroizing<Vec<u8>>,
    /// Outbound keying material, filled once KEYMAT is derived
    pub remote_keymat: Zeroizing<Vec<u8>>,
}

impl Sa2Item {
    /// New item for `security` with the given local SPI
    pub fn new(security: SecurityProtocol, local_spi: u32, lifetime: Lifetime) -> Self {
        Sa2Item {
            security,
            local_spi,
            remote_spi: 0,
            lifetime,
            local_keymat: Zeroizing::new(Vec::new()),
            remote_keymat: Zeroizing::new(Vec::new()),
        }
    }
}

/// Ordered SA2 items of one exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sa2List {
    items: Vec<Sa2Item>,
}

impl Sa2List {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item
    pub fn push(&mut self, item: Sa2Item) {
        self.items.push(item);
    }

    /// Remove all items
    pub fn flush(&mut self) {
        self.items.clear();
    }

    /// Keep only the first `len` items
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First item, used for the CONNECTED notification
    pub fn first(&self) -> Option<&Sa2Item> {
        self.items.first()
    }

    /// Iterate over items
    pub fn iter(&self) -> std::slice::Iter<'_, Sa2Item> {
        self.items.iter()
    }

    /// Iterate mutably over items
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Sa2Item> {
        self.items.iter_mut()
    }

    /// Items as a slice
    pub fn as_slice(&self) -> &[Sa2Item] {
        &self.items
    }
}

impl From<Vec<Sa2Item>> for Sa2List {
    fn from(items: Vec<Sa2Item>) -> Self {
        Sa2List { items }
    }
}

impl<'a> IntoIterator for &'a Sa2List {
    type Item = &'a Sa2Item;
    type IntoIter = std::slice::Iter<'a, Sa2Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Local SPI allocator
///
/// Hands out increasing SPIs, wrapping past the range reserved by IANA.
#[derive(Debug)]
pub struct SpiAllocator {
    next: AtomicU32,
}

impl SpiAllocator {
    /// First SPI handed out by IKE
    pub const FIRST: u32 = IPSEC_SPI_END + 1;

    /// Allocator starting at the first unreserved SPI
    pub fn new() -> Self {
        Self::starting_at(Self::FIRST)
    }

    /// Allocator starting at `start` (reserved values are skipped)
    pub fn starting_at(start: u32) -> Self {
        SpiAllocator {
            next: AtomicU32::new(start.max(Self::FIRST)),
        }
    }

    /// Allocate the next SPI
    pub fn allocate(&self) -> u32 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let following = match current.wrapping_add(1) {
                0 => Self::FIRST,
                n => n,
            };
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SpiAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::ikev1::security::{AuthAlgorithm, EncapsulationMode};

    #[test]
    fn test_spi_allocator_monotonic() {
        let alloc = SpiAllocator::new();
        assert_eq!(alloc.allocate(), 256);
        assert_eq!(alloc.allocate(), 257);
    }

    #[test]
    fn test_spi_allocator_wraps_past_reserved_range() {
        let alloc = SpiAllocator::starting_at(u32::MAX);
        assert_eq!(alloc.allocate(), u32::MAX);
        assert_eq!(alloc.allocate(), 256);

        let alloc = SpiAllocator::starting_at(5);
        assert_eq!(alloc.allocate(), 256);
    }

    #[test]
    fn test_sa2_list() {
        let security = SecurityProtocol::ah(AuthAlgorithm::HmacSha1, EncapsulationMode::Transport);
        let mut list = Sa2List::new();
        list.push(Sa2Item::new(security, 300, Lifetime::Unspecified));
        list.push(Sa2Item::new(security, 301, Lifetime::Seconds(60)));
        assert_eq!(list.len(), 2);
        assert_eq!(list.first().map(|i| i.local_spi), Some(300));
        assert_eq!(list.iter().map(|i| i.local_spi).collect::<Vec<_>>(), vec![300, 301]);

        list.flush();
        assert!(list.is_empty());
    }
}
