//! Thread control blocks: the per-thread procedure table, program counter,
//! data pointer, active segment and call stack.
//!
//! A thread's `segment` starts as a clone of its owning process's `segment`
//! and flips to that process's `parent_alias` (and back) on `~` — it never
//! allocates memory of its own.

use crate::compiler::PROC_TABLE_SIZE;
use crate::memory::SegmentRef;

/// Maximum call-stack depth. A call beyond this depth is a contained
/// runtime advisory, not an error: the call is simply refused and
/// execution continues.
pub const STACK_SIZE: usize = 1024;

pub struct Tcb {
    pub process: usize,
    pub procs: [Option<usize>; PROC_TABLE_SIZE],
    pub pc: usize,
    pub dp: usize,
    pub segment: SegmentRef,
    pub call_stack: Vec<usize>,
}

impl Tcb {
    pub fn new(process: usize, pc: usize, dp: usize, segment: SegmentRef) -> Self {
        Tcb {
            process,
            procs: [None; PROC_TABLE_SIZE],
            pc,
            dp,
            segment,
            call_stack: Vec::new(),
        }
    }

    /// Pushes a return address; `false` if the stack is already at
    /// `STACK_SIZE` and the call must be refused.
    pub fn push_call(&mut self, return_pc: usize) -> bool {
        if self.call_stack.len() >= STACK_SIZE {
            false
        } else {
            self.call_stack.push(return_pc);
            true
        }
    }

    pub fn pop_call(&mut self) -> Option<usize> {
        self.call_stack.pop()
    }
}

/// Slab of live threads, indexed by a small integer rather than linked by
/// intrusive pointers.
#[derive(Default)]
pub struct ThreadTable {
    slots: Vec<Option<Tcb>>,
}

impl ThreadTable {
    pub fn new() -> Self {
        ThreadTable::default()
    }

    pub fn insert(&mut self, tcb: Tcb) -> usize {
        self.slots.push(Some(tcb));
        self.slots.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&Tcb> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Tcb> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: usize) -> Option<Tcb> {
        self.slots.get_mut(id).and_then(|s| s.take())
    }

    /// Removes every live thread owned by `pid`, wherever it's currently
    /// queued (a scheduler's ready structure, the sleep list, or nowhere —
    /// currently running). Used by cascading termination, which tears down
    /// a whole process subtree at once rather than threading removal
    /// through whichever scheduler discipline happens to hold each tid.
    pub fn remove_by_process(&mut self, pid: usize) -> Vec<usize> {
        let mut removed = Vec::new();
        for (tid, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|t| t.process == pid) {
                *slot = None;
                removed.push(tid);
            }
        }
        removed
    }
}
