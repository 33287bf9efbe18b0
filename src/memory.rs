//! Data segments: the cell-addressed memory a process (or the system-wide
//! root process group) owns.
//!
//! Every process either owns a segment outright or reads and writes through
//! a non-owning alias to its parent's — there is no shared bus, no device
//! map, just flat byte arrays threads point a data pointer into.

use std::cell::RefCell;
use std::rc::Rc;

/// Number of cells in a data segment.
pub const DMEM: usize = 65536;
const DMASK: usize = DMEM - 1;

/// A fixed-size array of 8-bit cells with modular wraparound on both the
/// data pointer and individual cell arithmetic.
#[derive(Clone)]
pub struct Segment {
    cells: Vec<u8>,
}

impl Segment {
    pub fn new() -> Self {
        Segment { cells: vec![0u8; DMEM] }
    }

    pub fn get(&self, index: usize) -> u8 {
        self.cells[index & DMASK]
    }

    pub fn set(&mut self, index: usize, value: u8) {
        self.cells[index & DMASK] = value;
    }

    pub fn add(&mut self, index: usize, n: u8) {
        let i = index & DMASK;
        self.cells[i] = self.cells[i].wrapping_add(n);
    }

    pub fn sub(&mut self, index: usize, n: u8) {
        let i = index & DMASK;
        self.cells[i] = self.cells[i].wrapping_sub(n);
    }

    pub fn window(&self, start: usize, len: usize) -> Vec<u8> {
        (0..len).map(|j| self.cells[(start + j) & DMASK]).collect()
    }

    pub fn zero_all(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = 0);
    }

    /// Overwrites every cell with `other`'s, byte for byte. Used to seed a
    /// newly spawned process's segment from its spawning thread's currently
    /// active one.
    pub fn copy_from(&mut self, other: &Segment) {
        self.cells.copy_from_slice(&other.cells);
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared handle to a segment: an `Rc<RefCell<_>>` owning reference for a
/// process's own segment, or a cloned handle to a parent's segment for the
/// parent-alias. Two handles compare equal (by `same_segment`) iff they
/// point at the same underlying segment, which is how `~` (swap) and the
/// semaphore wait list key on "(segment, cell index)".
pub type SegmentRef = Rc<RefCell<Segment>>;

pub fn new_segment() -> SegmentRef {
    Rc::new(RefCell::new(Segment::new()))
}

pub fn same_segment(a: &SegmentRef, b: &SegmentRef) -> bool {
    Rc::ptr_eq(a, b)
}

/// Masks a raw (possibly negative or oversized) pointer arithmetic result
/// into a valid cell index: data-pointer arithmetic is always applied
/// modulo `DMEM`.
pub fn wrap_dp(dp: i64) -> usize {
    dp.rem_euclid(DMEM as i64) as usize
}
