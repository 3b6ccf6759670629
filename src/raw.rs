//! Hash finalization, block-aligned probing, and the Robin Hood engine over
//! the table's parallel slot arrays.

use alloc::boxed::Box;
use core::mem;

use crate::group;
use crate::group::BLOCK_SIZE;

/// Bit position of the tag byte within a finalized hash. The finalizer
/// forces this bit on, so the derived tag can never collide with [`EMPTY`].
pub(crate) const TAG_SHIFT: u32 = 56;

/// Tag value marking an unoccupied slot.
pub(crate) const EMPTY: u8 = 0;

/// Smallest table: a single probe block.
pub(crate) const MIN_CAPACITY: usize = BLOCK_SIZE;

/// Diffuses a raw hasher output into the 64-bit value the table probes with.
///
/// This is the splitmix64 finalizer, chosen so the low bits (block
/// selection) and the top byte (tag) avalanche independently even when the
/// upstream hasher is weak. Bit 56 is forced on so the tag byte is non-zero.
#[inline(always)]
pub(crate) fn finalize(hash: u64) -> u64 {
    let mut x = hash;
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x | 1 << TAG_SHIFT
}

/// Fingerprint stored per slot for fast rejection; never [`EMPTY`] for a
/// finalized hash.
#[inline(always)]
pub(crate) fn tag_of(h: u64) -> u8 {
    (h >> TAG_SHIFT) as u8
}

/// Number of probe blocks visited before a search or placement gives up.
///
/// Three blocks per doubling keeps worst-case probe cost logarithmic in the
/// table size while leaving enough slack that a freshly doubled table always
/// absorbs a full rehash.
#[inline(always)]
pub(crate) fn probe_limit(capacity: usize) -> usize {
    capacity.trailing_zeros() as usize * 3
}

/// Block-aligned candidate sequence for a finalized hash.
///
/// Yields `block(i) = (h + i * BLOCK_SIZE) mod capacity`, rounded down to a
/// block boundary, for `i` in `0..probe_limit(capacity)`. Striding by whole
/// blocks keeps each step's 16 candidate slots contiguous for one vector
/// comparison.
pub(crate) struct ProbeSeq {
    start: usize,
    index_mask: usize,
    step: usize,
    limit: usize,
}

impl ProbeSeq {
    #[inline(always)]
    pub(crate) fn new(h: u64, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_CAPACITY);
        ProbeSeq {
            start: h as usize,
            index_mask: capacity - 1,
            step: 0,
            limit: probe_limit(capacity),
        }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        if self.step == self.limit {
            return None;
        }
        let base = self.start.wrapping_add(self.step * BLOCK_SIZE) & self.index_mask
            & !(BLOCK_SIZE - 1);
        self.step += 1;
        Some(base)
    }
}

/// Outcome of running the insertion engine over one set of arrays.
pub(crate) enum Placement<K, V> {
    /// The entry filled a previously empty slot.
    Inserted,
    /// A resident with the same key was found. Carries whichever value lost
    /// out, per the [`OnMatch`] policy.
    Replaced(V),
    /// The probe budget ran out. Hands back the entry left in hand, which is
    /// either the original pair or a resident displaced along the way.
    Exhausted(K, V),
}

/// Policy for a tag-and-key match during insertion.
#[derive(Clone, Copy)]
pub(crate) enum OnMatch {
    /// The incoming value wins; the superseded resident value is handed
    /// back. Normal upsert.
    Replace,
    /// The resident value wins and the incoming value is handed back. Used
    /// when replaying old slots into a grown table, where the resident is
    /// the newer pending entry.
    Keep,
}

/// The table's backing arrays: one tag byte and one displacement byte per
/// slot, plus the stored pair. `tags[i] == EMPTY` iff `slots[i]` is `None`;
/// displacement bytes are only meaningful for occupied slots and go stale
/// (rather than being reset) when a slot is vacated.
#[derive(Clone)]
pub(crate) struct Storage<K, V> {
    pub(crate) tags: Box<[u8]>,
    pub(crate) dists: Box<[u8]>,
    pub(crate) slots: Box<[Option<(K, V)>]>,
}

impl<K: Eq, V> Storage<K, V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_CAPACITY);
        Storage {
            tags: alloc::vec![EMPTY; capacity].into_boxed_slice(),
            dists: alloc::vec![0; capacity].into_boxed_slice(),
            slots: core::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.tags.len()
    }

    /// Walks the probe sequence for `h`, confirming tag hits by key
    /// equality, and returns the matching slot index.
    ///
    /// Gives up early once a block holds no lane displaced at least as far
    /// as the probe has traveled: under the insertion-maintained ordering, a
    /// present key's chain never runs past such a block.
    pub(crate) fn find(&self, h: u64, key: &K) -> Option<usize> {
        let tag = tag_of(h);
        let mut dist = 0u8;

        for base in ProbeSeq::new(h, self.capacity()) {
            // SAFETY: Probe bases are block-aligned indices into arrays
            // whose power-of-two length is a multiple of BLOCK_SIZE, so
            // `base + BLOCK_SIZE` never overruns.
            let mut hits = unsafe { group::eq_mask(&self.tags, base, tag) };
            while hits != 0 {
                let lane = hits.trailing_zeros() as usize;
                hits &= !(1 << lane);

                if let Some((stored, _)) = &self.slots[base + lane] {
                    if stored == key {
                        return Some(base + lane);
                    }
                }
            }

            // SAFETY: As above.
            if unsafe { group::ge_mask(&self.dists, base, dist) } == 0 {
                return None;
            }
            dist = dist.saturating_add(1);
        }

        None
    }

    /// Robin Hood insertion over these arrays: overwrite a matching key,
    /// take the first empty lane, or displace a resident that has traveled
    /// less far and carry it forward.
    ///
    /// The carried entry keeps probing with its own distance. Striding is
    /// one whole block per step, so every chain through a block continues at
    /// the same next block regardless of which hash started it.
    pub(crate) fn insert_with(
        &mut self,
        h: u64,
        key: K,
        value: V,
        on_match: OnMatch,
    ) -> Placement<K, V> {
        let mut tag = tag_of(h);
        let mut dist = 0u8;
        let mut pair = (key, value);

        for base in ProbeSeq::new(h, self.capacity()) {
            // SAFETY: Probe bases are block-aligned and in-bounds; see
            // `find`.
            let mut hits = unsafe { group::eq_mask(&self.tags, base, tag) };
            while hits != 0 {
                let lane = hits.trailing_zeros() as usize;
                hits &= !(1 << lane);

                let slot = base + lane;
                let matched = matches!(&self.slots[slot], Some((stored, _)) if *stored == pair.0);
                if matched {
                    let (_, incoming) = pair;
                    return match (on_match, self.slots[slot].as_mut()) {
                        (OnMatch::Replace, Some((_, resident))) => {
                            Placement::Replaced(mem::replace(resident, incoming))
                        }
                        (OnMatch::Keep, Some(_)) => Placement::Replaced(incoming),
                        (_, None) => unreachable!("matching tag on an empty slot"),
                    };
                }
            }

            // SAFETY: As above.
            let empties = unsafe { group::eq_mask(&self.tags, base, EMPTY) };
            if empties != 0 {
                let slot = base + empties.trailing_zeros() as usize;
                self.tags[slot] = tag;
                self.dists[slot] = dist;
                self.slots[slot] = Some(pair);
                return Placement::Inserted;
            }

            // The block has no empty lane, so all 16 displacement bytes are
            // live; steal the first slot whose resident is closer to home
            // than the entry in hand.
            // SAFETY: As above.
            let poorer = unsafe { group::lt_mask(&self.dists, base, dist) };
            if poorer != 0 {
                let slot = base + poorer.trailing_zeros() as usize;
                mem::swap(&mut tag, &mut self.tags[slot]);
                mem::swap(&mut dist, &mut self.dists[slot]);
                match self.slots[slot].as_mut() {
                    Some(resident) => mem::swap(resident, &mut pair),
                    None => unreachable!("stealing from an empty slot"),
                }
            }

            dist = dist.saturating_add(1);
        }

        let (key, value) = pair;
        Placement::Exhausted(key, value)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn finalized_tag_is_never_empty() {
        for x in (0..100_000u64).chain([u64::MAX, u64::MAX - 1, 1 << 56]) {
            assert_ne!(tag_of(finalize(x)), EMPTY);
        }
    }

    #[test]
    fn finalize_is_deterministic() {
        assert_eq!(finalize(12345), finalize(12345));
        assert_ne!(finalize(12345), finalize(12346));
    }

    #[test]
    fn probe_seq_visits_aligned_blocks_within_budget() {
        for capacity in [16usize, 64, 1024] {
            for h in [0u64, 1, 0xdead_beef_cafe_f00d, u64::MAX] {
                let bases: Vec<usize> = ProbeSeq::new(h, capacity).collect();
                assert_eq!(bases.len(), probe_limit(capacity));
                for (i, &base) in bases.iter().enumerate() {
                    assert_eq!(base % BLOCK_SIZE, 0);
                    assert!(base + BLOCK_SIZE <= capacity);
                    let expected = (h as usize).wrapping_add(i * BLOCK_SIZE) & (capacity - 1)
                        & !(BLOCK_SIZE - 1);
                    assert_eq!(base, expected);
                }
            }
        }
    }

    #[test]
    fn probe_seq_strides_one_block_per_step() {
        let capacity = 256;
        let bases: Vec<usize> = ProbeSeq::new(0x1234_5678, capacity).collect();
        for pair in bases.windows(2) {
            assert_eq!((pair[0] + BLOCK_SIZE) & (capacity - 1), pair[1]);
        }
    }

    #[test]
    fn engine_places_and_finds_colliding_entries() {
        let mut storage: Storage<u64, u64> = Storage::with_capacity(64);
        // All entries share a home block; the 17th spills to the next block
        // with distance 1.
        let h = finalize(0);
        for key in 0..17u64 {
            match storage.insert_with(h, key, key * 10, OnMatch::Replace) {
                Placement::Inserted => {}
                _ => panic!("expected fresh placement"),
            }
        }
        for key in 0..17u64 {
            let slot = storage.find(h, &key).expect("key should be stored");
            assert_eq!(storage.slots[slot].as_ref().map(|(_, v)| *v), Some(key * 10));
        }
        assert!(storage.find(h, &99).is_none());
    }

    #[test]
    fn engine_replace_hands_back_old_value() {
        let mut storage: Storage<u64, &str> = Storage::with_capacity(16);
        let h = finalize(7);
        assert!(matches!(
            storage.insert_with(h, 7, "old", OnMatch::Replace),
            Placement::Inserted
        ));
        match storage.insert_with(h, 7, "new", OnMatch::Replace) {
            Placement::Replaced(old) => assert_eq!(old, "old"),
            _ => panic!("expected replacement"),
        }
        let slot = storage.find(h, &7).unwrap();
        assert_eq!(storage.slots[slot].as_ref().map(|(_, v)| *v), Some("new"));
    }

    #[test]
    fn engine_keep_preserves_resident_value() {
        let mut storage: Storage<u64, &str> = Storage::with_capacity(16);
        let h = finalize(7);
        assert!(matches!(
            storage.insert_with(h, 7, "pending", OnMatch::Replace),
            Placement::Inserted
        ));
        match storage.insert_with(h, 7, "stale", OnMatch::Keep) {
            Placement::Replaced(dropped) => assert_eq!(dropped, "stale"),
            _ => panic!("expected the stale value back"),
        }
        let slot = storage.find(h, &7).unwrap();
        assert_eq!(
            storage.slots[slot].as_ref().map(|(_, v)| *v),
            Some("pending")
        );
    }

    #[test]
    fn displaced_entries_keep_increasing_distance() {
        let mut storage: Storage<u64, ()> = Storage::with_capacity(64);
        let h = finalize(0);
        for key in 0..40u64 {
            match storage.insert_with(h, key, (), OnMatch::Replace) {
                Placement::Inserted => {}
                _ => panic!("expected fresh placement"),
            }
        }
        // Walking the shared chain block by block, occupied distances never
        // decrease past the probe distance while any chain entry remains.
        let mut dist = 0u8;
        for base in ProbeSeq::new(h, storage.capacity()) {
            let live: Vec<u8> = (0..BLOCK_SIZE)
                .filter(|&lane| storage.tags[base + lane] != EMPTY)
                .map(|lane| storage.dists[base + lane])
                .collect();
            if live.iter().all(|&d| d < dist) {
                break;
            }
            dist = dist.saturating_add(1);
        }
        for key in 0..40u64 {
            assert!(storage.find(h, &key).is_some());
        }
    }
}
