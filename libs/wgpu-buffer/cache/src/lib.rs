// This file is part of Xenon.
//
// Xenon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Xenon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Xenon.  If not, see <http://www.gnu.org/licenses/>.
use layout::TileIndex;
use log::{trace, warn};
use parking_lot::RwLock;
use std::sync::Weak;

/// The head of a layer's fetch wish-list, as the scheduler sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub index: TileIndex,
    /// Frame stamp of the demand that produced this entry.
    pub time: u64,
    pub priority: u32,
    pub estimated_bytes: u64,
    /// False for the prefetch ring around the viewport.
    pub visible: bool,
}

/// A resident tile nominated for eviction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidentTile {
    pub index: TileIndex,
    pub time: u64,
    pub priority: u32,
    pub bytes: u64,
}

/// What the scheduler asks of a layer. Layers that share a source's tiles
/// must answer for the owning side only; derived layers register nothing.
pub trait CacheClient: Send + Sync {
    /// Head of the queue, already filtered of resident and in-flight tiles.
    fn peek_candidate(&self) -> Option<Candidate>;

    /// Begin fetching `index`; false when the tile is already resident or
    /// in flight (the duplicate-request path).
    fn start_load(&mut self, index: TileIndex) -> bool;

    /// This layer's least wanted resident tile: smallest demand stamp,
    /// priority breaking ties.
    fn worst_resident(&self) -> Option<ResidentTile>;

    /// Release `index` and all its GPU textures; returns the bytes freed.
    fn drop_tile(&mut self, index: TileIndex) -> u64;

    /// Drop everything; returns the bytes freed.
    fn flush_tiles(&mut self) -> u64;
}

#[derive(Clone, Copy, Debug)]
pub struct CacheParams {
    /// GPU-resident tile byte budget.
    pub capacity: u64,
    /// Concurrent fetch cap.
    pub max_request: usize,
    /// In-flight byte budget for tiles outside the viewport.
    pub max_prefetch: u64,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            capacity: 512 * 1024 * 1024,
            max_request: 6,
            max_prefetch: 8 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LayerSlot(pub usize);

struct InFlight {
    slot: usize,
    index: TileIndex,
    estimated_bytes: u64,
    visible: bool,
}

/// The shared fetch scheduler: one per canvas, never a global. Orders
/// loads across every registered layer by freshness of demand, keeps at
/// most `max_request` fetches outstanding, and holds resident bytes under
/// `capacity` by evicting the least wanted tiles first. Layers are held
/// weakly; a dropped layer simply stops contributing.
pub struct Cache {
    params: CacheParams,
    size: u64,
    requested: Vec<InFlight>,
    prefetched: u64,
    clients: Vec<Weak<RwLock<dyn CacheClient>>>,
    dirty: bool,
}

impl Cache {
    pub fn new(params: CacheParams) -> Self {
        Self {
            params,
            size: 0,
            requested: Vec::new(),
            prefetched: 0,
            clients: Vec::new(),
            dirty: false,
        }
    }

    pub fn register_layer(&mut self, client: Weak<RwLock<dyn CacheClient>>) -> LayerSlot {
        self.clients.push(client);
        LayerSlot(self.clients.len() - 1)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn capacity(&self) -> u64 {
        self.params.capacity
    }

    pub fn requested(&self) -> usize {
        self.requested.len()
    }

    /// A layer refreshed its queue. Scheduling is deferred to the next
    /// `update` so that all layers touched this frame register first.
    pub fn set_candidates(&mut self, _slot: LayerSlot) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// One tile's fetch finished (all channels), successfully or not.
    /// Frees the request slot, accounts resident bytes, and leaves
    /// rescheduling to the caller's next `update`.
    pub fn note_finished(&mut self, slot: LayerSlot, index: TileIndex, loaded_bytes: Option<u64>) {
        let Some(at) = self
            .requested
            .iter()
            .position(|r| r.slot == slot.0 && r.index == index)
        else {
            // Completion for a tile dropped while in flight; discard.
            trace!("stale completion for {:?}", index);
            return;
        };
        let in_flight = self.requested.swap_remove(at);
        if !in_flight.visible {
            self.prefetched = self.prefetched.saturating_sub(in_flight.estimated_bytes);
        }
        match loaded_bytes {
            Some(bytes) => self.size += bytes,
            None => warn!("tile {:?} failed to load; will retry on demand", index),
        }
        self.dirty = true;
    }

    /// A resident tile was dropped outside the eviction path (layer flush,
    /// shader switch shrinking a tile).
    pub fn note_dropped(&mut self, bytes: u64) {
        self.size = self.size.saturating_sub(bytes);
    }

    /// A tile was dropped while its fetch was still outstanding; the
    /// eventual completion will be discarded.
    pub fn cancel_in_flight(&mut self, slot: LayerSlot, index: TileIndex) {
        if let Some(at) = self
            .requested
            .iter()
            .position(|r| r.slot == slot.0 && r.index == index)
        {
            let in_flight = self.requested.swap_remove(at);
            if !in_flight.visible {
                self.prefetched = self.prefetched.saturating_sub(in_flight.estimated_bytes);
            }
        }
    }

    pub fn flush_layer(&mut self, slot: LayerSlot) {
        if let Some(client) = self.clients.get(slot.0).and_then(Weak::upgrade) {
            let freed = client.write().flush_tiles();
            self.size = self.size.saturating_sub(freed);
        }
        self.requested.retain(|r| r.slot != slot.0);
        self.dirty = true;
    }

    pub fn flush(&mut self) {
        for client in self.clients.iter().filter_map(Weak::upgrade) {
            let freed = client.write().flush_tiles();
            self.size = self.size.saturating_sub(freed);
        }
        self.requested.clear();
        self.prefetched = 0;
        self.dirty = true;
    }

    /// Run the scheduler: admit the best candidates across all layers
    /// while request slots remain, evicting worse resident tiles to stay
    /// under budget. Stops when the best eviction victim is more wanted
    /// than the best candidate.
    pub fn update(&mut self) {
        self.dirty = false;
        self.shrink_to_capacity();
        let mut skip = vec![false; self.clients.len()];
        while self.requested.len() < self.params.max_request {
            let Some((slot, candidate)) = self.best_candidate(&skip) else {
                break;
            };
            if !candidate.visible
                && self.prefetched + candidate.estimated_bytes > self.params.max_prefetch
            {
                // The queue is visible-first: nothing better remains here.
                skip[slot] = true;
                continue;
            }
            if !self.make_room(&candidate) {
                break;
            }
            let Some(client) = self.clients.get(slot).and_then(Weak::upgrade) else {
                skip[slot] = true;
                continue;
            };
            if client.write().start_load(candidate.index) {
                trace!(
                    "loading {:?} (layer {}, priority {}, time {})",
                    candidate.index,
                    slot,
                    candidate.priority,
                    candidate.time
                );
                if !candidate.visible {
                    self.prefetched += candidate.estimated_bytes;
                }
                self.requested.push(InFlight {
                    slot,
                    index: candidate.index,
                    estimated_bytes: candidate.estimated_bytes,
                    visible: candidate.visible,
                });
            }
        }
    }

    /// Freshest demand wins; priority breaks ties; registration order
    /// breaks those.
    fn best_candidate(&self, skip: &[bool]) -> Option<(usize, Candidate)> {
        let mut best: Option<(usize, Candidate)> = None;
        for (slot, client) in self.clients.iter().enumerate() {
            if skip[slot] {
                continue;
            }
            let Some(client) = client.upgrade() else {
                continue;
            };
            let Some(candidate) = client.read().peek_candidate() else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((_, b)) => {
                    candidate.time > b.time
                        || (candidate.time == b.time && candidate.priority > b.priority)
                }
            };
            if better {
                best = Some((slot, candidate));
            }
        }
        best
    }

    /// Least wanted resident across layers: lowest priority, oldest stamp
    /// breaking ties.
    fn worst_resident(&self) -> Option<(usize, ResidentTile)> {
        let mut worst: Option<(usize, ResidentTile)> = None;
        for (slot, client) in self.clients.iter().enumerate() {
            let Some(client) = client.upgrade() else {
                continue;
            };
            let Some(resident) = client.read().worst_resident() else {
                continue;
            };
            let is_worse = match &worst {
                None => true,
                Some((_, w)) => {
                    resident.priority < w.priority
                        || (resident.priority == w.priority && resident.time < w.time)
                }
            };
            if is_worse {
                worst = Some((slot, resident));
            }
        }
        worst
    }

    fn shrink_to_capacity(&mut self) {
        while self.size > self.params.capacity {
            let Some((slot, worst)) = self.worst_resident() else {
                break;
            };
            self.evict(slot, worst);
        }
    }

    /// Make space for `candidate`; false when the remaining residents are
    /// all more wanted than it. In-flight loads count against the budget
    /// at their estimated size so a burst of admissions cannot overshoot.
    fn make_room(&mut self, candidate: &Candidate) -> bool {
        let pending: u64 = self.requested.iter().map(|r| r.estimated_bytes).sum();
        while self.size + pending + candidate.estimated_bytes > self.params.capacity {
            let Some((slot, worst)) = self.worst_resident() else {
                return false;
            };
            // Judged on the same axis the victim was selected on: priority
            // first, demand stamp breaking ties.
            let evictable = worst.priority < candidate.priority
                || (worst.priority == candidate.priority && worst.time < candidate.time);
            if !evictable {
                return false;
            }
            self.evict(slot, worst);
        }
        true
    }

    fn evict(&mut self, slot: usize, worst: ResidentTile) {
        let freed = match self.clients.get(slot).and_then(Weak::upgrade) {
            Some(client) => client.write().drop_tile(worst.index),
            None => 0,
        };
        trace!("evicted {:?} freeing {} bytes", worst.index, freed);
        // A zero answer (gone layer) must still unwind the accounting or
        // the eviction loop would wedge.
        self.size = self.size.saturating_sub(freed.max(worst.bytes));
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("size", &self.size)
            .field("capacity", &self.params.capacity)
            .field("requested", &self.requested.len())
            .field("layers", &self.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{collections::BTreeMap, sync::Arc};

    #[derive(Default)]
    struct MockLayer {
        queue: Vec<Candidate>,
        resident: BTreeMap<TileIndex, ResidentTile>,
        in_flight: Vec<TileIndex>,
        started: Vec<TileIndex>,
    }

    impl CacheClient for MockLayer {
        fn peek_candidate(&self) -> Option<Candidate> {
            self.queue.first().copied()
        }

        fn start_load(&mut self, index: TileIndex) -> bool {
            if self.resident.contains_key(&index) || self.in_flight.contains(&index) {
                return false;
            }
            self.queue.retain(|c| c.index != index);
            self.in_flight.push(index);
            self.started.push(index);
            true
        }

        fn worst_resident(&self) -> Option<ResidentTile> {
            self.resident
                .values()
                .min_by_key(|r| (r.time, r.priority))
                .copied()
        }

        fn drop_tile(&mut self, index: TileIndex) -> u64 {
            self.resident.remove(&index).map_or(0, |r| r.bytes)
        }

        fn flush_tiles(&mut self) -> u64 {
            let freed = self.resident.values().map(|r| r.bytes).sum();
            self.resident.clear();
            self.in_flight.clear();
            freed
        }
    }

    fn candidate(i: u64, time: u64, priority: u32) -> Candidate {
        Candidate {
            index: TileIndex(i),
            time,
            priority,
            estimated_bytes: 1,
            visible: true,
        }
    }

    fn mock_with(queue: Vec<Candidate>) -> Arc<RwLock<MockLayer>> {
        Arc::new(RwLock::new(MockLayer {
            queue,
            ..Default::default()
        }))
    }

    fn small_cache(capacity: u64, max_request: usize) -> Cache {
        Cache::new(CacheParams {
            capacity,
            max_request,
            max_prefetch: 1024,
        })
    }

    #[test]
    fn test_fetch_cap_holds() {
        let layer = mock_with((0..10).map(|i| candidate(i, 1, 0)).collect());
        let mut cache = small_cache(100, 3);
        let slot = cache.register_layer(Arc::downgrade(&layer) as Weak<RwLock<dyn CacheClient>>);
        cache.set_candidates(slot);
        cache.update();
        assert_eq!(cache.requested(), 3);
        assert_eq!(layer.read().started.len(), 3);
        // Completions free slots and the next update admits more.
        cache.note_finished(slot, TileIndex(0), Some(1));
        layer.write().in_flight.retain(|i| *i != TileIndex(0));
        cache.update();
        assert_eq!(cache.requested(), 3);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_freshest_layer_wins() {
        let stale = mock_with(vec![candidate(1, 5, 9)]);
        let fresh = mock_with(vec![candidate(2, 8, 0)]);
        let mut cache = small_cache(100, 1);
        cache.register_layer(Arc::downgrade(&stale) as Weak<RwLock<dyn CacheClient>>);
        cache.register_layer(Arc::downgrade(&fresh) as Weak<RwLock<dyn CacheClient>>);
        cache.update();
        assert_eq!(fresh.read().started.as_slice(), &[TileIndex(2)]);
        assert!(stale.read().started.is_empty());
    }

    #[test]
    fn test_priority_breaks_time_ties_then_registration_order() {
        let a = mock_with(vec![candidate(1, 5, 1)]);
        let b = mock_with(vec![candidate(2, 5, 3)]);
        let c = mock_with(vec![candidate(3, 5, 3)]);
        let mut cache = small_cache(100, 1);
        cache.register_layer(Arc::downgrade(&a) as Weak<RwLock<dyn CacheClient>>);
        cache.register_layer(Arc::downgrade(&b) as Weak<RwLock<dyn CacheClient>>);
        cache.register_layer(Arc::downgrade(&c) as Weak<RwLock<dyn CacheClient>>);
        cache.update();
        assert_eq!(b.read().started.as_slice(), &[TileIndex(2)]);
    }

    #[test]
    fn test_eviction_under_budget_pressure() {
        // 16 old residents, 20 fresh candidates, room for 16.
        let layer = mock_with((100..120).map(|i| candidate(i, 10, 0)).collect());
        for i in 0..16u64 {
            layer.write().resident.insert(
                TileIndex(i),
                ResidentTile {
                    index: TileIndex(i),
                    time: 1,
                    priority: 0,
                    bytes: 1,
                },
            );
        }
        let mut cache = small_cache(16, 4);
        let slot = cache.register_layer(Arc::downgrade(&layer) as Weak<RwLock<dyn CacheClient>>);
        cache.size = 16;
        cache.set_candidates(slot);
        cache.update();
        // Four old tiles went away to make room for four fresher fetches.
        assert_eq!(cache.requested(), 4);
        assert_eq!(layer.read().resident.len(), 12);
        assert!(cache.size() + 4 <= 16);
    }

    #[test]
    fn test_eviction_stops_at_better_resident() {
        let layer = mock_with(vec![candidate(50, 3, 0)]);
        layer.write().resident.insert(
            TileIndex(1),
            ResidentTile {
                index: TileIndex(1),
                time: 9,
                priority: 5,
                bytes: 10,
            },
        );
        let mut cache = small_cache(10, 4);
        let slot = cache.register_layer(Arc::downgrade(&layer) as Weak<RwLock<dyn CacheClient>>);
        cache.size = 10;
        cache.set_candidates(slot);
        cache.update();
        // The resident is fresher than the candidate: nothing moves.
        assert_eq!(cache.requested(), 0);
        assert_eq!(layer.read().resident.len(), 1);
        assert!(layer.read().started.is_empty());
    }

    #[test]
    fn test_eviction_when_priority_and_time_orderings_disagree() {
        // Layer A holds the globally lowest-priority resident but with a
        // fresh stamp; layer B holds a stale high-priority one. The
        // candidate outranks A's tile on priority, and that is the axis
        // that decides: A's tile goes, B's stays.
        let a = mock_with(Vec::new());
        a.write().resident.insert(
            TileIndex(1),
            ResidentTile {
                index: TileIndex(1),
                time: 100,
                priority: 0,
                bytes: 1,
            },
        );
        let b = mock_with(vec![candidate(50, 50, 5)]);
        b.write().resident.insert(
            TileIndex(2),
            ResidentTile {
                index: TileIndex(2),
                time: 1,
                priority: 9,
                bytes: 1,
            },
        );
        let mut cache = small_cache(2, 2);
        cache.register_layer(Arc::downgrade(&a) as Weak<RwLock<dyn CacheClient>>);
        let slot_b = cache.register_layer(Arc::downgrade(&b) as Weak<RwLock<dyn CacheClient>>);
        cache.size = 2;
        cache.set_candidates(slot_b);
        cache.update();
        assert!(a.read().resident.is_empty());
        assert_eq!(b.read().resident.len(), 1);
        assert_eq!(b.read().started.as_slice(), &[TileIndex(50)]);
        assert_eq!(cache.requested(), 1);
    }

    #[test]
    fn test_prefetch_budget_skips_ring() {
        let mut ring = candidate(7, 4, 0);
        ring.visible = false;
        ring.estimated_bytes = 4096;
        let layer = mock_with(vec![ring]);
        let mut cache = small_cache(1 << 20, 4);
        let slot = cache.register_layer(Arc::downgrade(&layer) as Weak<RwLock<dyn CacheClient>>);
        cache.set_candidates(slot);
        cache.update();
        assert!(layer.read().started.is_empty());
        assert_eq!(cache.requested(), 0);
    }

    #[test]
    fn test_stale_completion_discarded() {
        let layer = mock_with(vec![candidate(1, 1, 0)]);
        let mut cache = small_cache(100, 2);
        let slot = cache.register_layer(Arc::downgrade(&layer) as Weak<RwLock<dyn CacheClient>>);
        cache.update();
        assert_eq!(cache.requested(), 1);
        cache.cancel_in_flight(slot, TileIndex(1));
        assert_eq!(cache.requested(), 0);
        // The late completion finds no in-flight entry and adds no bytes.
        cache.note_finished(slot, TileIndex(1), Some(1000));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_flush_layer_resets_accounting() {
        let layer = mock_with(Vec::new());
        layer.write().resident.insert(
            TileIndex(1),
            ResidentTile {
                index: TileIndex(1),
                time: 1,
                priority: 0,
                bytes: 64,
            },
        );
        let mut cache = small_cache(1024, 2);
        let slot = cache.register_layer(Arc::downgrade(&layer) as Weak<RwLock<dyn CacheClient>>);
        cache.size = 64;
        cache.flush_layer(slot);
        assert_eq!(cache.size(), 0);
        assert!(layer.read().resident.is_empty());
    }
}
