//! Sparse four-level trie over the IPv4 space.
//!
//! Each level is a fixed 256-slot array indexed by one octet. Levels one to
//! three hold `Option<Box<_>>` children, level four is the `[i8; 256]` cell
//! array itself. Only the path to a recorded address is allocated; an empty
//! slot is `None` and costs one pointer.
//!
//! The trie is not synchronized. [`VisitGuard`](super::guard::VisitGuard)
//! owns it behind a single mutex.

use std::mem::size_of;

const FANOUT: usize = 256;

/// Level-four cell array, indexed by the last octet.
pub(crate) type Leaf = [i8; FANOUT];

/// A 256-way branch whose children are allocated on demand.
struct Node<T> {
    slots: [Option<Box<T>>; FANOUT],
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    #[inline]
    fn child(&self, octet: u8) -> Option<&T> {
        self.slots[octet as usize].as_deref()
    }

    #[inline]
    fn child_mut(&mut self, octet: u8) -> Option<&mut T> {
        self.slots[octet as usize].as_deref_mut()
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Indexed by the third octet.
type Third = Node<Leaf>;
/// Indexed by the second octet.
type Second = Node<Third>;
/// Indexed by the first octet.
type Root = Node<Second>;

/// Work done by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Non-zero cells whose value changed.
    pub cells_decayed: usize,
    /// Arrays unlinked because every slot was empty, at any level.
    pub arrays_reclaimed: usize,
}

/// Sparse map from IPv4 octets to one signed cell.
pub struct AddressTrie {
    root: Box<Root>,
}

impl Default for AddressTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AddressTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressTrie")
            .field("memory_footprint", &self.memory_footprint())
            .finish()
    }
}

impl AddressTrie {
    /// Create an empty trie. Only the root array is allocated.
    pub fn new() -> Self {
        Self {
            root: Box::new(Root::new()),
        }
    }

    /// Read a cell. Absent paths read as `0`.
    #[inline]
    pub fn get(&self, octets: [u8; 4]) -> i8 {
        self.root
            .child(octets[0])
            .and_then(|second| second.child(octets[1]))
            .and_then(|third| third.child(octets[2]))
            .map_or(0, |leaf| leaf[octets[3] as usize])
    }

    /// Mutable access to an existing cell without allocating.
    #[inline]
    pub fn cell_mut(&mut self, octets: [u8; 4]) -> Option<&mut i8> {
        self.root
            .child_mut(octets[0])?
            .child_mut(octets[1])?
            .child_mut(octets[2])
            .map(|leaf| &mut leaf[octets[3] as usize])
    }

    /// Mutable access to a cell, allocating the missing path.
    #[inline]
    pub fn cell_or_insert(&mut self, octets: [u8; 4]) -> &mut i8 {
        let second = self.root.slots[octets[0] as usize].get_or_insert_with(|| Box::new(Node::new()));
        let third = second.slots[octets[1] as usize].get_or_insert_with(|| Box::new(Node::new()));
        let leaf = third.slots[octets[2] as usize].get_or_insert_with(|| Box::new([0; FANOUT]));
        &mut leaf[octets[3] as usize]
    }

    /// First non-zero cell at or after `from`, in ascending address order.
    ///
    /// Unallocated subtrees are skipped whole, so a walk over a sparse trie
    /// costs roughly the number of allocated arrays.
    pub fn next_recorded(&self, from: u32) -> Option<([u8; 4], i8)> {
        let start = from.to_be_bytes();

        for a in start[0]..=u8::MAX {
            let Some(second) = self.root.child(a) else {
                continue;
            };
            let on_a = a == start[0];
            for b in lower(on_a, start[1])..=u8::MAX {
                let Some(third) = second.child(b) else {
                    continue;
                };
                let on_b = on_a && b == start[1];
                for c in lower(on_b, start[2])..=u8::MAX {
                    let Some(leaf) = third.child(c) else {
                        continue;
                    };
                    let on_c = on_b && c == start[2];
                    for d in lower(on_c, start[3])..=u8::MAX {
                        let cell = leaf[d as usize];
                        if cell != 0 {
                            return Some(([a, b, c, d], cell));
                        }
                    }
                }
            }
        }
        None
    }

    /// Visit every non-zero cell in ascending address order.
    pub fn for_each_recorded(&self, mut f: impl FnMut([u8; 4], i8)) {
        for (a, second) in occupied(&self.root) {
            for (b, third) in occupied(second) {
                for (c, leaf) in occupied(third) {
                    for (d, &cell) in leaf.iter().enumerate() {
                        if cell != 0 {
                            f([a, b, c, d as u8], cell);
                        }
                    }
                }
            }
        }
    }

    /// Apply `decay` to every non-zero cell, then unlink every array left
    /// with no live slot, bottom-up.
    pub fn sweep(&mut self, mut decay: impl FnMut(i8) -> i8) -> SweepStats {
        let mut stats = SweepStats::default();

        for second_slot in self.root.slots.iter_mut() {
            let Some(second) = second_slot.as_deref_mut() else {
                continue;
            };
            for third_slot in second.slots.iter_mut() {
                let Some(third) = third_slot.as_deref_mut() else {
                    continue;
                };
                for leaf_slot in third.slots.iter_mut() {
                    let Some(leaf) = leaf_slot.as_deref_mut() else {
                        continue;
                    };
                    let mut live = false;
                    for cell in leaf.iter_mut().filter(|c| **c != 0) {
                        let next = decay(*cell);
                        if next != *cell {
                            stats.cells_decayed += 1;
                            *cell = next;
                        }
                        live |= next != 0;
                    }
                    if !live {
                        *leaf_slot = None;
                        stats.arrays_reclaimed += 1;
                    }
                }
                if third.is_empty() {
                    *third_slot = None;
                    stats.arrays_reclaimed += 1;
                }
            }
            if second.is_empty() {
                *second_slot = None;
                stats.arrays_reclaimed += 1;
            }
        }

        stats
    }

    /// Estimated heap cost of every allocated array, root included.
    ///
    /// Counts whole arrays at allocation granularity, not allocator overhead.
    pub fn memory_footprint(&self) -> usize {
        let mut bytes = size_of::<Root>();
        for (_, second) in occupied(&self.root) {
            bytes += size_of::<Second>();
            for (_, third) in occupied(second) {
                bytes += size_of::<Third>();
                bytes += third.slots.iter().flatten().count() * size_of::<Leaf>();
            }
        }
        bytes
    }

    /// True when no path below the root is allocated.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Whether the first-octet slot for `octet` is allocated.
    pub fn has_prefix(&self, octet: u8) -> bool {
        self.root.child(octet).is_some()
    }
}

#[inline]
fn lower(on_path: bool, octet: u8) -> u8 {
    if on_path { octet } else { 0 }
}

fn occupied<T>(node: &Node<T>) -> impl Iterator<Item = (u8, &T)> {
    node.slots
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_deref().map(|child| (i as u8, child)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_BYTES: usize = 256 * size_of::<Option<Box<Second>>>();
    const PATH_BYTES: usize = 2 * 256 * size_of::<Option<Box<Third>>>() + 256;

    #[test]
    fn empty_trie_reads_zero() {
        let trie = AddressTrie::new();
        assert_eq!(trie.get([1, 2, 3, 4]), 0);
        assert!(trie.is_empty());
        assert_eq!(trie.memory_footprint(), EMPTY_BYTES);
    }

    #[test]
    fn insert_allocates_only_one_path() {
        let mut trie = AddressTrie::new();
        *trie.cell_or_insert([10, 0, 0, 1]) = 3;

        assert_eq!(trie.get([10, 0, 0, 1]), 3);
        assert_eq!(trie.get([10, 0, 0, 2]), 0);
        assert!(trie.has_prefix(10));
        assert!(!trie.has_prefix(11));
        assert_eq!(trie.memory_footprint(), EMPTY_BYTES + PATH_BYTES);

        // Sibling leaf under the same /24 costs nothing extra.
        *trie.cell_or_insert([10, 0, 0, 200]) = 1;
        assert_eq!(trie.memory_footprint(), EMPTY_BYTES + PATH_BYTES);

        // A new /24 under the same /16 adds one leaf.
        *trie.cell_or_insert([10, 0, 1, 0]) = 1;
        assert_eq!(trie.memory_footprint(), EMPTY_BYTES + PATH_BYTES + 256);
    }

    #[test]
    fn cell_mut_does_not_allocate() {
        let mut trie = AddressTrie::new();
        assert!(trie.cell_mut([1, 1, 1, 1]).is_none());
        assert!(trie.is_empty());

        *trie.cell_or_insert([1, 1, 1, 1]) = 7;
        assert_eq!(trie.cell_mut([1, 1, 1, 1]).copied(), Some(7));
        assert_eq!(trie.cell_mut([1, 1, 1, 2]).copied(), Some(0));
        assert!(trie.cell_mut([1, 1, 2, 1]).is_none());
    }

    #[test]
    fn next_recorded_walks_in_address_order() {
        let mut trie = AddressTrie::new();
        for octets in [[200, 1, 1, 1], [3, 0, 0, 9], [3, 0, 0, 2], [3, 4, 0, 0]] {
            *trie.cell_or_insert(octets) = 1;
        }
        // Allocated but zero: must be skipped.
        trie.cell_or_insert([3, 0, 0, 5]);

        let mut seen = Vec::new();
        let mut cursor = Some(0u32);
        while let Some(from) = cursor {
            let Some((octets, _)) = trie.next_recorded(from) else {
                break;
            };
            seen.push(octets);
            cursor = u32::from_be_bytes(octets).checked_add(1);
        }

        assert_eq!(
            seen,
            vec![[3, 0, 0, 2], [3, 0, 0, 9], [3, 4, 0, 0], [200, 1, 1, 1]]
        );
    }

    #[test]
    fn next_recorded_respects_lower_bound_inside_subtrees() {
        let mut trie = AddressTrie::new();
        *trie.cell_or_insert([9, 9, 9, 1]) = 1;
        *trie.cell_or_insert([9, 9, 10, 0]) = 1;

        let from = u32::from_be_bytes([9, 9, 9, 2]);
        assert_eq!(trie.next_recorded(from), Some(([9, 9, 10, 0], 1)));
        assert_eq!(trie.next_recorded(u32::from_be_bytes([9, 9, 10, 1])), None);
    }

    #[test]
    fn next_recorded_finds_last_address() {
        let mut trie = AddressTrie::new();
        *trie.cell_or_insert([255, 255, 255, 255]) = -128;
        assert_eq!(trie.next_recorded(u32::MAX), Some(([255; 4], -128)));
    }

    #[test]
    fn for_each_matches_next_recorded() {
        let mut trie = AddressTrie::new();
        *trie.cell_or_insert([1, 2, 3, 4]) = 5;
        *trie.cell_or_insert([1, 2, 3, 5]) = -128;
        *trie.cell_or_insert([8, 8, 8, 8]) = -3;

        let mut all = Vec::new();
        trie.for_each_recorded(|octets, cell| all.push((octets, cell)));
        assert_eq!(
            all,
            vec![([1, 2, 3, 4], 5), ([1, 2, 3, 5], -128), ([8, 8, 8, 8], -3)]
        );
    }

    #[test]
    fn sweep_applies_decay_and_reclaims_bottom_up() {
        let mut trie = AddressTrie::new();
        *trie.cell_or_insert([10, 0, 0, 1]) = 1;
        *trie.cell_or_insert([10, 0, 0, 2]) = 4;
        *trie.cell_or_insert([20, 0, 0, 1]) = 1;

        let stats = trie.sweep(|c| c - 1);
        assert_eq!(stats.cells_decayed, 3);
        // 20.0.0.0/8 drained: leaf, third and second arrays all go.
        assert_eq!(stats.arrays_reclaimed, 3);
        assert!(!trie.has_prefix(20));
        assert!(trie.has_prefix(10));
        assert_eq!(trie.get([10, 0, 0, 2]), 3);
    }

    #[test]
    fn sweep_reclaims_allocated_but_unused_paths() {
        let mut trie = AddressTrie::new();
        trie.cell_or_insert([7, 7, 7, 7]);
        assert!(!trie.is_empty());

        let stats = trie.sweep(|c| c);
        assert_eq!(stats.cells_decayed, 0);
        assert_eq!(stats.arrays_reclaimed, 3);
        assert!(trie.is_empty());
        assert_eq!(trie.memory_footprint(), EMPTY_BYTES);
    }

    #[test]
    fn sweep_keeps_unchanged_live_cells() {
        let mut trie = AddressTrie::new();
        *trie.cell_or_insert([5, 5, 5, 5]) = -128;
        let stats = trie.sweep(|c| c);
        assert_eq!(stats, SweepStats::default());
        assert_eq!(trie.get([5, 5, 5, 5]), -128);
    }
}
