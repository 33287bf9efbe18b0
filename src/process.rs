//! Process control blocks: private memory, parent-alias, and the live
//! thread count that drives process lifecycle.

use std::collections::VecDeque;

use crate::memory::SegmentRef;

/// A process: its own data segment, a non-owning alias to its parent's own
/// segment (used by `~`), live thread count, and — for the process-fair
/// scheduler only — a FIFO of its own ready threads.
pub struct Pcb {
    pub segment: SegmentRef,
    pub parent_alias: SegmentRef,
    pub threads: usize,
    pub ready: VecDeque<usize>,
}

impl Pcb {
    pub fn new(segment: SegmentRef, parent_alias: SegmentRef) -> Self {
        Pcb { segment, parent_alias, threads: 0, ready: VecDeque::new() }
    }
}

/// Slab of live processes, indexed by a small integer rather than linked by
/// intrusive pointers. Reaping a slot just drops the `Pcb`; any descendant
/// still holding a clone of `parent_alias` keeps that segment alive on its
/// own, so a dead parent's memory survives exactly as long as a live child
/// still references it.
#[derive(Default)]
pub struct ProcessTable {
    slots: Vec<Option<Pcb>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable::default()
    }

    pub fn insert(&mut self, pcb: Pcb) -> usize {
        self.slots.push(Some(pcb));
        self.slots.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&Pcb> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Pcb> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }

    /// `None` for an already-reaped (or never-existed) process.
    pub fn is_alive(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    pub fn reap(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = None;
        }
    }

    /// Every currently-live process id, in slab order. Used by cascading
    /// termination to find descendants (a child's `parent_alias` points at
    /// the same segment as its parent's `segment`).
    pub fn live_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.is_some().then_some(i))
    }
}
