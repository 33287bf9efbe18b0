//! The two fairness disciplines: thread-fair (flat global FIFO) and
//! process-fair (round-robin over processes, FIFO within each).
//!
//! The sleeping-thread list (woken only by `^`/`_`) is shared by both
//! disciplines and lives on the interpreter, not here — only the *ready*
//! queue differs between the two.

use std::collections::VecDeque;

use crate::process::ProcessTable;
use crate::thread::ThreadTable;

/// A fairness discipline over ready threads. `schedule` enqueues a thread
/// that just yielded or was newly spawned; `next` dequeues the thread to run
/// this turn, or `None` if every process's ready queue is empty (deadlock or
/// true completion — the two are indistinguishable from here).
///
/// `next` takes `threads` so a discipline can silently drop a stale id —
/// one whose `Tcb` was reaped directly by cascading termination instead of
/// popped through the scheduler — rather than hand the caller a dead tid.
pub trait Scheduler {
    fn schedule(&mut self, processes: &mut ProcessTable, tid: usize, pid: usize);
    fn next(&mut self, processes: &mut ProcessTable, threads: &ThreadTable) -> Option<usize>;
}

/// Pure global FIFO across every ready thread, ignoring process boundaries
/// entirely. A thread-hungry process can starve its siblings.
#[derive(Default)]
pub struct ThreadFairScheduler {
    ready: VecDeque<usize>,
}

impl ThreadFairScheduler {
    pub fn new() -> Self {
        ThreadFairScheduler::default()
    }
}

impl Scheduler for ThreadFairScheduler {
    fn schedule(&mut self, _processes: &mut ProcessTable, tid: usize, _pid: usize) {
        self.ready.push_back(tid);
    }

    fn next(&mut self, _processes: &mut ProcessTable, threads: &ThreadTable) -> Option<usize> {
        while let Some(tid) = self.ready.pop_front() {
            if threads.get(tid).is_some() {
                return Some(tid);
            }
        }
        None
    }
}

/// Round-robins over processes; within the chosen process, pops that
/// process's own ready-thread FIFO. A process with ten threads gets no more
/// turns than a process with one.
///
/// `cursor` remembers the process served by the previous call: on entry,
/// that process is either dropped (already reaped) or rotated to the back
/// of `order` before a new pick is made.
#[derive(Default)]
pub struct ProcessFairScheduler {
    order: VecDeque<usize>,
    cursor: Option<usize>,
}

impl ProcessFairScheduler {
    pub fn new() -> Self {
        ProcessFairScheduler::default()
    }
}

impl Scheduler for ProcessFairScheduler {
    fn schedule(&mut self, processes: &mut ProcessTable, tid: usize, pid: usize) {
        if let Some(pcb) = processes.get_mut(pid) {
            if !pcb.ready.contains(&tid) {
                let already_queued = self.order.contains(&pid);
                pcb.ready.push_back(tid);
                if !already_queued {
                    self.order.push_back(pid);
                }
            }
        }
    }

    fn next(&mut self, processes: &mut ProcessTable, threads: &ThreadTable) -> Option<usize> {
        if let Some(prev) = self.cursor.take() {
            // `prev` may already have been re-added by a mid-turn `schedule()`
            // call (a sibling thread spawned or woken for the same process
            // while it sat here as the cursor, outside `order`) — skip the
            // push in that case or `prev` ends up with two slots in the
            // rotation and gets served roughly twice as often as its siblings.
            if processes.is_alive(prev) && !self.order.contains(&prev) {
                self.order.push_back(prev);
            }
        }

        let total = self.order.len();
        let mut scanned = 0;
        loop {
            if scanned >= total {
                return None;
            }
            let pid = self.order.pop_front()?;
            scanned += 1;
            if !processes.is_alive(pid) {
                continue;
            }
            let pcb = processes.get_mut(pid).expect("checked alive above");
            while let Some(tid) = pcb.ready.pop_front() {
                if threads.get(tid).is_none() {
                    continue;
                }
                // Deliberately not requeued here: the just-served process
                // stays outside the rotation until the next call's entry
                // step decides whether to bring it back.
                self.cursor = Some(pid);
                return Some(tid);
            }
            self.order.push_back(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::new_segment;
    use crate::process::Pcb;
    use crate::thread::Tcb;

    fn pcb() -> Pcb {
        Pcb::new(new_segment(), new_segment())
    }

    /// A `ThreadTable` with `n` dummy live threads (ids `0..n`), so scheduler
    /// liveness checks on these test ids pass.
    fn dummy_threads(n: usize) -> ThreadTable {
        let mut threads = ThreadTable::new();
        for _ in 0..n {
            threads.insert(Tcb::new(0, 0, 0, new_segment()));
        }
        threads
    }

    #[test]
    fn thread_fair_is_plain_fifo() {
        let mut procs = ProcessTable::new();
        let threads = dummy_threads(4);
        let mut sched = ThreadFairScheduler::new();
        sched.schedule(&mut procs, 1, 0);
        sched.schedule(&mut procs, 2, 0);
        sched.schedule(&mut procs, 3, 0);
        assert_eq!(sched.next(&mut procs, &threads), Some(1));
        assert_eq!(sched.next(&mut procs, &threads), Some(2));
        assert_eq!(sched.next(&mut procs, &threads), Some(3));
        assert_eq!(sched.next(&mut procs, &threads), None);
    }

    #[test]
    fn thread_fair_skips_a_tid_reaped_out_from_under_it() {
        let mut procs = ProcessTable::new();
        let mut threads = dummy_threads(3);
        let mut sched = ThreadFairScheduler::new();
        sched.schedule(&mut procs, 0, 0);
        sched.schedule(&mut procs, 1, 0);
        sched.schedule(&mut procs, 2, 0);
        threads.remove(1);
        assert_eq!(sched.next(&mut procs, &threads), Some(0));
        assert_eq!(sched.next(&mut procs, &threads), Some(2));
        assert_eq!(sched.next(&mut procs, &threads), None);
    }

    #[test]
    fn process_fair_round_robins_across_processes() {
        let mut procs = ProcessTable::new();
        let threads = dummy_threads(21);
        let p0 = procs.insert(pcb());
        let p1 = procs.insert(pcb());
        let mut sched = ProcessFairScheduler::new();

        // p0 has two threads ready, p1 has one.
        sched.schedule(&mut procs, 10, p0);
        sched.schedule(&mut procs, 11, p0);
        sched.schedule(&mut procs, 20, p1);

        // p0 goes first (enqueued first), then p1, then back to p0 for its
        // second thread — no process gets two turns before the other gets one.
        assert_eq!(sched.next(&mut procs, &threads), Some(10));
        assert_eq!(sched.next(&mut procs, &threads), Some(20));
        assert_eq!(sched.next(&mut procs, &threads), Some(11));
        assert_eq!(sched.next(&mut procs, &threads), None);
    }

    #[test]
    fn process_fair_skips_reaped_process_without_starving_others() {
        let mut procs = ProcessTable::new();
        let threads = dummy_threads(22);
        let p0 = procs.insert(pcb());
        let p1 = procs.insert(pcb());
        let mut sched = ProcessFairScheduler::new();

        sched.schedule(&mut procs, 10, p0);
        sched.schedule(&mut procs, 20, p1);
        assert_eq!(sched.next(&mut procs, &threads), Some(10));

        procs.reap(p0);
        sched.schedule(&mut procs, 21, p1);
        assert_eq!(sched.next(&mut procs, &threads), Some(20));
        assert_eq!(sched.next(&mut procs, &threads), Some(21));
    }

    #[test]
    fn process_fair_does_not_double_enqueue_the_cursor_process() {
        // A mid-turn `schedule()` for the process currently sitting as
        // `cursor` (e.g. a sibling thread spawned or a sleeper woken while
        // that process is being served) must not leave it with two slots in
        // `order` once `next()` runs again.
        let mut procs = ProcessTable::new();
        let threads = dummy_threads(2);
        let p0 = procs.insert(pcb());
        let p1 = procs.insert(pcb());
        let mut sched = ProcessFairScheduler::new();

        sched.schedule(&mut procs, 0, p0);
        sched.schedule(&mut procs, 1, p1);
        assert_eq!(sched.next(&mut procs, &threads), Some(0));

        // p0 is now the cursor, outside `order`; a same-turn spawn/wake for
        // p0 schedules a second thread of its own process.
        sched.schedule(&mut procs, 0, p0);

        // p0 must get exactly one slot in the rotation, not two: p1 should
        // still get its turn before p0 comes back around.
        assert_eq!(sched.next(&mut procs, &threads), Some(1));
        assert_eq!(sched.next(&mut procs, &threads), Some(0));
        assert_eq!(sched.next(&mut procs, &threads), None);
    }

    #[test]
    fn empty_ready_queues_report_deadlock() {
        let mut procs = ProcessTable::new();
        let threads = ThreadTable::new();
        let mut sched = ProcessFairScheduler::new();
        assert_eq!(sched.next(&mut procs, &threads), None);
    }
}
