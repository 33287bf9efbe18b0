//! Crate root: wires the compiler, the two slabs, a scheduler, and the
//! evaluator into one `Interpreter::run_file` call per source file — the one
//! public entry point that owns the runtime state and drives it to
//! completion.

use std::io::{Read, Write};

use rand::Rng;

pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod instruction;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod thread;

pub use error::CompileError;

use compiler::compile;
use evaluator::{Machine, Quanta, TurnOutcome};
use memory::{new_segment, same_segment, SegmentRef};
use process::{Pcb, ProcessTable};
use scheduler::{ProcessFairScheduler, Scheduler, ThreadFairScheduler};
use thread::{Tcb, ThreadTable};

/// Which fairness discipline governs a run. Maps directly to the CLI's
/// `-q`/`-Q` flags: `-q` is process-fair, `-Q` is thread-fair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerKind {
    ProcessFair,
    ThreadFair,
}

/// Per-run configuration.
///
/// `quantum` follows a three-way convention: `0` means unbounded (a thread
/// keeps the processor until it yields, dies, or blocks), a positive value
/// is a fixed per-turn cost budget, and a negative value draws a fresh
/// random budget in `1..=128` at the start of every turn.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub scheduler: SchedulerKind,
    pub quantum: i64,
    /// When a process dies, also tear down every live descendant process
    /// (recursively) instead of just letting them run on with an orphaned
    /// parent-alias. Not exposed on the CLI; set directly when embedding
    /// the library.
    pub cascading_termination: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig { scheduler: SchedulerKind::ProcessFair, quantum: 10, cascading_termination: false }
    }
}

pub struct Interpreter {
    config: RunConfig,
}

impl Interpreter {
    pub fn new(config: RunConfig) -> Self {
        Interpreter { config }
    }

    /// Compiles and runs one source file to completion (every thread dead,
    /// blocked forever, or the process graph deadlocked). Each call gets a
    /// freshly zeroed system segment and freshly empty process/thread
    /// tables, so state never leaks from one file to the next.
    pub fn run_file(
        &self,
        source: &[u8],
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<(), CompileError> {
        let code = compile(source)?;

        // A `!` terminator redirects every subsequent `,` read in this file's
        // execution to the remainder of the source, not the caller's stdin.
        let mut tail_cursor;
        let effective_stdin: &mut dyn Read = match &code.stdin_tail {
            Some(tail) => {
                tail_cursor = std::io::Cursor::new(tail.clone());
                &mut tail_cursor
            }
            None => stdin,
        };

        let system_segment = new_segment();
        let mut processes = ProcessTable::new();
        let mut threads = ThreadTable::new();
        let mut scheduler: Box<dyn Scheduler> = match self.config.scheduler {
            SchedulerKind::ProcessFair => Box::new(ProcessFairScheduler::new()),
            SchedulerKind::ThreadFair => Box::new(ThreadFairScheduler::new()),
        };
        let mut sleeping: Vec<(usize, SegmentRef, usize)> = Vec::new();

        for &entry in &code.programs {
            let own_segment = new_segment();
            own_segment.borrow_mut().copy_from(&system_segment.borrow());
            let pid = processes.insert(Pcb::new(own_segment.clone(), system_segment.clone()));
            let tid = threads.insert(Tcb::new(pid, entry, 0, own_segment));
            processes.get_mut(pid).unwrap().threads = 1;
            scheduler.schedule(&mut processes, tid, pid);
        }

        let mut rng = rand::thread_rng();

        loop {
            let Some(tid) = scheduler.next(&mut processes, &threads) else {
                break;
            };

            let quanta = match self.config.quantum {
                0 => Quanta::Unbounded,
                n if n < 0 => Quanta::Fixed(rng.gen_range(1..=128)),
                n => Quanta::Fixed(n as i32),
            };

            let (outcome, woken) = {
                let mut machine =
                    Machine::new(&code, &mut *effective_stdin, &mut *stdout, &mut *stderr);
                let result = machine.run_turn(&mut threads, &mut processes, tid, quanta);
                for spawned in machine.spawned.drain(..) {
                    scheduler.schedule(&mut processes, spawned.tid, spawned.process);
                }
                result
            };

            for (segment, cell) in woken {
                wake_one(&mut sleeping, &segment, cell, &threads, &mut processes, scheduler.as_mut());
            }

            match outcome {
                TurnOutcome::Yielded => {
                    let pid = threads.get(tid).unwrap().process;
                    scheduler.schedule(&mut processes, tid, pid);
                }
                TurnOutcome::Slept => {
                    let tcb = threads.get(tid).unwrap();
                    sleeping.push((tid, tcb.segment.clone(), tcb.dp));
                }
                TurnOutcome::Died => {
                    let pid = threads.get(tid).unwrap().process;
                    threads.remove(tid);
                    if let Some(pcb) = processes.get_mut(pid) {
                        pcb.threads -= 1;
                        if pcb.threads == 0 {
                            reap_process(
                                pid,
                                self.config.cascading_termination,
                                &mut processes,
                                &mut threads,
                                &mut sleeping,
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn wake_one(
    sleeping: &mut Vec<(usize, SegmentRef, usize)>,
    segment: &SegmentRef,
    cell: usize,
    threads: &ThreadTable,
    processes: &mut ProcessTable,
    scheduler: &mut dyn Scheduler,
) {
    if let Some(pos) = sleeping
        .iter()
        .position(|(_, seg, idx)| *idx == cell && same_segment(seg, segment))
    {
        let (tid, _, _) = sleeping.remove(pos);
        if let Some(pid) = threads.get(tid).map(|t| t.process) {
            scheduler.schedule(processes, tid, pid);
        }
    }
}

/// Reaps a dead process. With `cascading` off (the default), this is the
/// whole job: the slab entry drops, and any descendant's `parent_alias`
/// clone keeps that segment alive on its own. With `cascading` on, every
/// live descendant (transitively, not just the immediate children) is torn
/// down too: its ready and sleeping threads are dropped and its own slab
/// entry reaped.
fn reap_process(
    pid: usize,
    cascading: bool,
    processes: &mut ProcessTable,
    threads: &mut ThreadTable,
    sleeping: &mut Vec<(usize, SegmentRef, usize)>,
) {
    let segment = processes.get(pid).map(|pcb| pcb.segment.clone());
    processes.reap(pid);

    if !cascading {
        return;
    }
    let Some(segment) = segment else { return };

    let children: Vec<usize> = processes
        .live_ids()
        .filter(|&id| same_segment(&processes.get(id).unwrap().parent_alias, &segment))
        .collect();

    for child in children {
        // Removes the child's threads wherever they're queued — a
        // scheduler's ready structure, the sleep list, or nowhere — so
        // neither scheduler discipline is left holding a tid whose `Tcb`
        // is gone (both `next()` implementations tolerate that, but there's
        // no reason to leave stale entries lying around either).
        let removed = threads.remove_by_process(child);
        sleeping.retain(|&(tid, _, _)| !removed.contains(&tid));
        reap_process(child, cascading, processes, threads, sleeping);
    }
}
