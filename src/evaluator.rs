//! The quantum dispatch loop: one thread's turn at the processor.
//!
//! Reads the current instruction, mutates process/thread state, and reports
//! back what happened — one dispatch call runs a thread for up to `quanta`
//! cost units before yielding, blocking, or dying.

use std::io::{Read, Write};

use crate::compiler::{proc_slot, CompiledFile};
use crate::instruction::Op;
use crate::memory::{new_segment, same_segment, wrap_dp, SegmentRef};
use crate::process::{Pcb, ProcessTable};
use crate::thread::{Tcb, ThreadTable};

/// How a thread's turn ended.
pub enum TurnOutcome {
    /// Ran out of quanta, or yielded via `*`: reschedule as ready.
    Yielded,
    /// Hit `@` (or an exhausted call stack on `;`): the thread is gone.
    Died,
    /// Blocked on `_` with insufficient resources: move to the sleep list.
    Slept,
}

/// A thread newly created by `&` or `%` this turn, not yet known to either
/// scheduler. The caller (the interpreter driving `run_turn`) is responsible
/// for scheduling it once the turn returns.
pub struct Spawned {
    pub tid: usize,
    pub process: usize,
}

/// Quantum budget for a single scheduling turn. A configured quantum of `0`
/// maps to `Unbounded` (run until yield/death/sleep); any other configured
/// quantum (fixed or the per-turn random draw for negative `-q`/`-Q`
/// values) maps to `Fixed`.
#[derive(Clone, Copy)]
pub enum Quanta {
    Unbounded,
    Fixed(i32),
}

/// Everything the evaluator needs beyond the two slabs: the flat
/// instruction array and per-run I/O. The sleeping-thread list (`sList`) and
/// newly spawned threads are reported back to the caller rather than owned
/// here, since both scheduler disciplines and the interpreter's run loop
/// need to see them.
pub struct Machine<'a> {
    pub code: &'a CompiledFile,
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
    pub spawned: Vec<Spawned>,
}

impl<'a> Machine<'a> {
    pub fn new(
        code: &'a CompiledFile,
        stdin: &'a mut dyn Read,
        stdout: &'a mut dyn Write,
        stderr: &'a mut dyn Write,
    ) -> Self {
        Machine { code, stdin, stdout, stderr, spawned: Vec::new() }
    }

    /// Runs `tid` for up to `quanta` cost units. Mutates `threads`/`processes`
    /// in place and returns how the turn ended plus any woken sleepers
    /// (`(segment, cell)` pairs satisfied by a `^` this turn — the caller
    /// matches these against its sleep list, since `Machine` doesn't own it).
    ///
    /// `cost` is local to this call and starts at 1 every time, but is *not*
    /// reset between instructions within the call: only `=` (or the
    /// zero-cost cases — `#`, an undefined procedure call) ever assigns it a
    /// new value. So `= n` makes every instruction for the rest of this turn
    /// charge `n` ticks, not just the very next one, until another `=`
    /// changes it again — and it reverts to `1` only because the next
    /// *turn* gets a fresh `cost` here, never mid-turn.
    pub fn run_turn(
        &mut self,
        threads: &mut ThreadTable,
        processes: &mut ProcessTable,
        tid: usize,
        quanta: Quanta,
    ) -> (TurnOutcome, Vec<(SegmentRef, usize)>) {
        let mut cost: i32 = 1;
        let mut remaining = match quanta {
            Quanta::Unbounded => 0,
            Quanta::Fixed(n) => n,
        };
        let mut woken = Vec::new();

        loop {
            if let Quanta::Fixed(_) = quanta {
                if remaining <= 0 {
                    return (TurnOutcome::Yielded, woken);
                }
            }

            if let Some(outcome) = self.step(threads, processes, tid, &mut cost, remaining, &mut woken) {
                return (outcome, woken);
            }

            remaining -= cost;
        }
    }

    /// Executes one instruction. Returns `Some(outcome)` if the thread's
    /// turn ends here, `None` to keep looping within the same turn.
    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        threads: &mut ThreadTable,
        processes: &mut ProcessTable,
        tid: usize,
        cost: &mut i32,
        quanta_left: i32,
        woken: &mut Vec<(SegmentRef, usize)>,
    ) -> Option<TurnOutcome> {
        let pc = threads.get(tid).expect("live thread").pc;
        let instr = self.code.instructions[pc];
        let run = instr.imm;
        let next_pc = pc + 1;
        threads.get_mut(tid).unwrap().pc = next_pc;

        match instr.op {
            Op::Add => {
                let t = threads.get(tid).unwrap();
                t.segment.borrow_mut().add(t.dp, run as u8);
            }
            Op::Sub => {
                let t = threads.get(tid).unwrap();
                t.segment.borrow_mut().sub(t.dp, run as u8);
            }
            Op::Right => {
                let t = threads.get_mut(tid).unwrap();
                t.dp = wrap_dp(t.dp as i64 + run as i64);
            }
            Op::Left => {
                let t = threads.get_mut(tid).unwrap();
                t.dp = wrap_dp(t.dp as i64 - run as i64);
            }
            Op::Output => {
                let t = threads.get(tid).unwrap();
                let byte = t.segment.borrow().get(t.dp);
                for _ in 0..run {
                    let _ = self.stdout.write_all(&[byte]);
                }
            }
            Op::Input => {
                let t = threads.get(tid).unwrap();
                let (segment, dp) = (t.segment.clone(), t.dp);
                for _ in 0..run {
                    let mut buf = [0u8; 1];
                    if self.stdin.read_exact(&mut buf).is_ok() {
                        segment.borrow_mut().set(dp, buf[0]);
                    }
                }
            }
            Op::WhileNZEnter | Op::IfZero => {
                let t = threads.get(tid).unwrap();
                if t.segment.borrow().get(t.dp) == 0 {
                    threads.get_mut(tid).unwrap().pc = next_pc + run as usize;
                }
            }
            Op::UntilZEnter => {
                let t = threads.get(tid).unwrap();
                if t.segment.borrow().get(t.dp) != 0 {
                    threads.get_mut(tid).unwrap().pc = next_pc + run as usize;
                }
            }
            Op::WhileNZBack => {
                let t = threads.get(tid).unwrap();
                if t.segment.borrow().get(t.dp) != 0 {
                    threads.get_mut(tid).unwrap().pc = next_pc - run as usize;
                }
            }
            Op::UntilZBack => {
                let t = threads.get(tid).unwrap();
                if t.segment.borrow().get(t.dp) == 0 {
                    threads.get_mut(tid).unwrap().pc = next_pc - run as usize;
                }
            }
            Op::ProcDef => {
                let name = self.code.instructions[next_pc].op.source_byte();
                let t = threads.get_mut(tid).unwrap();
                if let Some(slot) = proc_slot(name) {
                    t.procs[slot] = Some(next_pc + 1);
                }
                t.pc = next_pc + run as usize;
            }
            Op::Else => {
                threads.get_mut(tid).unwrap().pc = next_pc + run as usize;
            }
            Op::EndIf => {}
            Op::Zero => {
                let t = threads.get(tid).unwrap();
                t.segment.borrow_mut().set(t.dp, 0);
            }
            Op::Cost => {
                *cost = run;
            }
            Op::Swap => {
                let pid = threads.get(tid).unwrap().process;
                let pcb = processes.get(pid).expect("thread's process is alive");
                let t = threads.get_mut(tid).unwrap();
                if same_segment(&t.segment, &pcb.segment) {
                    t.segment = pcb.parent_alias.clone();
                } else {
                    t.segment = pcb.segment.clone();
                }
            }
            Op::SpawnThread => {
                let pid = threads.get(tid).unwrap().process;
                let (dp, segment, procs, call_stack) = {
                    let t = threads.get(tid).unwrap();
                    (t.dp, t.segment.clone(), t.procs, t.call_stack.clone())
                };
                let child_slot = wrap_dp(dp as i64 + 1);
                segment.borrow_mut().set(dp, 0);
                segment.borrow_mut().set(child_slot, 1);

                let mut child = Tcb::new(pid, next_pc, child_slot, segment);
                child.procs = procs;
                child.call_stack = call_stack;
                let child_tid = threads.insert(child);
                if let Some(pcb) = processes.get_mut(pid) {
                    pcb.threads += 1;
                }
                self.spawned.push(Spawned { tid: child_tid, process: pid });
            }
            Op::SpawnProcess => {
                let pid = threads.get(tid).unwrap().process;
                let (dp, parent_home, seed, procs, call_stack) = {
                    let t = threads.get(tid).unwrap();
                    let parent_home =
                        processes.get(pid).expect("thread's process is alive").segment.clone();
                    (t.dp, parent_home, t.segment.clone(), t.procs, t.call_stack.clone())
                };
                let child_slot = wrap_dp(dp as i64 + 1);
                seed.borrow_mut().set(dp, 0);
                seed.borrow_mut().set(child_slot, 1);

                let new_segment = new_segment();
                new_segment.borrow_mut().copy_from(&seed.borrow());
                let new_pid = processes.insert(Pcb::new(new_segment.clone(), parent_home));

                let mut child = Tcb::new(new_pid, next_pc, child_slot, new_segment);
                child.procs = procs;
                child.call_stack = call_stack;
                let child_tid = threads.insert(child);
                processes.get_mut(new_pid).unwrap().threads += 1;
                self.spawned.push(Spawned { tid: child_tid, process: new_pid });
            }
            Op::Yield => return Some(TurnOutcome::Yielded),
            Op::Separate => return Some(TurnOutcome::Died),
            Op::Debug => {
                *cost = 0;
                let t = threads.get(tid).unwrap();
                let window = t.segment.borrow().window(t.dp, 16);
                // `brains4.c`'s `case '#'` reads `me->pc - Gimem` *after*
                // `me->pc++` already ran, i.e. the index of the instruction
                // following `#`, not `#`'s own index.
                let _ = write!(self.stderr, "{} {} {}", next_pc, t.dp, quanta_left);
                for byte in window {
                    let _ = write!(self.stderr, " {byte:02x}");
                }
                let _ = writeln!(self.stderr);
            }
            Op::Up => {
                let t = threads.get(tid).unwrap();
                let (segment, dp) = (t.segment.clone(), t.dp);
                segment.borrow_mut().add(dp, run as u8);
                for _ in 0..run {
                    woken.push((segment.clone(), dp));
                }
            }
            Op::Down => {
                let t = threads.get(tid).unwrap();
                let have = t.segment.borrow().get(t.dp);
                if (have as i32) < run {
                    threads.get_mut(tid).unwrap().pc = pc;
                    return Some(TurnOutcome::Slept);
                }
                t.segment.borrow_mut().sub(t.dp, run as u8);
            }
            Op::ProcReturn => {
                let t = threads.get_mut(tid).unwrap();
                match t.pop_call() {
                    Some(return_pc) => t.pc = return_pc,
                    None => return Some(TurnOutcome::Died),
                }
            }
            Op::BreakMark | Op::ContinueMark => {
                unreachable!("resolved away by the compiler's backfill pass")
            }
            Op::Call(_) => {
                let name = instr.op.source_byte();
                if let Some(slot) = proc_slot(name) {
                    let target = threads.get(tid).unwrap().procs[slot];
                    if let Some(target) = target {
                        let tail_call = matches!(
                            self.code.instructions.get(next_pc).map(|i| i.op),
                            Some(Op::ProcReturn)
                        );
                        if tail_call {
                            threads.get_mut(tid).unwrap().pc = target;
                        } else {
                            let pushed = threads.get_mut(tid).unwrap().push_call(next_pc);
                            if pushed {
                                threads.get_mut(tid).unwrap().pc = target;
                            } else {
                                let _ = writeln!(self.stderr, "err: no mem for call");
                            }
                        }
                    } else {
                        *cost = 0;
                    }
                } else {
                    *cost = 0;
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::memory::new_segment;

    fn run_source(src: &[u8], turns: usize) -> (ThreadTable, ProcessTable, Vec<u8>) {
        let code = compile(src).expect("compiles");
        let mut threads = ThreadTable::new();
        let mut processes = ProcessTable::new();
        let segment = new_segment();
        let pid = processes.insert(Pcb::new(segment.clone(), segment.clone()));
        processes.get_mut(pid).unwrap().threads = 1;
        let tid = threads.insert(Tcb::new(pid, code.programs[0], 0, segment));

        let mut stdin: &[u8] = &[];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        {
            let mut machine = Machine::new(&code, &mut stdin, &mut stdout, &mut stderr);
            for _ in 0..turns {
                let (outcome, _woken) =
                    machine.run_turn(&mut threads, &mut processes, tid, Quanta::Fixed(1000));
                if matches!(outcome, TurnOutcome::Died) {
                    break;
                }
            }
        }
        (threads, processes, stdout)
    }

    #[test]
    fn add_and_output_roundtrip() {
        let (_, _, out) = run_source(b"+++++.@", 1);
        assert_eq!(out, vec![5]);
    }

    #[test]
    fn while_loop_zeroes_cell_via_bracket_minus() {
        let (threads, _, _) = run_source(b"+++++[-]@", 1);
        let t = &threads.get(0).unwrap();
        assert_eq!(t.segment.borrow().get(0), 0);
    }

    #[test]
    fn tick_minus_matches_bracket_minus() {
        let (a, _, _) = run_source(b"+++++[-]@", 1);
        let (b, _, _) = run_source(b"+++++[-`]@", 1);
        assert_eq!(a.get(0).unwrap().segment.borrow().get(0), b.get(0).unwrap().segment.borrow().get(0));
    }

    #[test]
    fn down_blocks_when_cell_too_small() {
        let code = compile(b"_@").unwrap();
        let mut threads = ThreadTable::new();
        let mut processes = ProcessTable::new();
        let segment = new_segment();
        let pid = processes.insert(Pcb::new(segment.clone(), segment.clone()));
        let tid = threads.insert(Tcb::new(pid, code.programs[0], 0, segment));
        let mut stdin: &[u8] = &[];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut machine = Machine::new(&code, &mut stdin, &mut stdout, &mut stderr);
        let (outcome, _) = machine.run_turn(&mut threads, &mut processes, tid, Quanta::Fixed(10));
        assert!(matches!(outcome, TurnOutcome::Slept));
        // pc rewound to the `_` itself so the retry re-evaluates the same check.
        assert_eq!(threads.get(tid).unwrap().pc, code.programs[0]);
    }

    #[test]
    fn cost_set_by_equals_persists_across_instructions_in_the_same_turn() {
        // `=====` sets cost to 5 (five `=` coalesce into Cost(5)); that cost
        // must keep charging every later instruction this turn, not just the
        // one right after it. With quanta = 9, Cost(5) + Add(3) alone already
        // spend 10 > 9, so the turn yields before `.` ever runs and `@` never
        // gets a chance to kill the thread. A per-instruction reset to 1
        // would instead let all four instructions (Cost, Add, Output,
        // Separate) run within the same budget and emit a byte.
        let code = compile(b"=====+++.@").unwrap();
        let mut threads = ThreadTable::new();
        let mut processes = ProcessTable::new();
        let segment = new_segment();
        let pid = processes.insert(Pcb::new(segment.clone(), segment.clone()));
        processes.get_mut(pid).unwrap().threads = 1;
        let tid = threads.insert(Tcb::new(pid, code.programs[0], 0, segment));
        let mut stdin: &[u8] = &[];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut machine = Machine::new(&code, &mut stdin, &mut stdout, &mut stderr);
        let (outcome, _) = machine.run_turn(&mut threads, &mut processes, tid, Quanta::Fixed(9));
        assert!(matches!(outcome, TurnOutcome::Yielded));
        assert!(stdout.is_empty());
    }

    #[test]
    fn if_else_fallthrough_costs_no_extra_tick_for_endif() {
        // `(+)$` with a nonzero cell takes the then-branch without a skip:
        // `IfZero`, `Add`, `ProcReturn` - three instructions, three ticks to
        // die. `)` is never compiled to a dispatchable instruction (see
        // `compiler.rs`'s `b')'` arm), so there's no fourth, wasted tick for
        // a no-op `EndIf` in between `Add` and `ProcReturn` the way there
        // would be if the compiler kept `)` as a real word.
        let code = compile(b"(+)$").unwrap();
        let mut threads = ThreadTable::new();
        let mut processes = ProcessTable::new();
        let segment = new_segment();
        segment.borrow_mut().set(0, 1);
        let pid = processes.insert(Pcb::new(segment.clone(), segment.clone()));
        processes.get_mut(pid).unwrap().threads = 1;
        let tid = threads.insert(Tcb::new(pid, code.programs[0], 0, segment));
        let mut stdin: &[u8] = &[];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut machine = Machine::new(&code, &mut stdin, &mut stdout, &mut stderr);
        let (outcome, _) = machine.run_turn(&mut threads, &mut processes, tid, Quanta::Fixed(3));
        assert!(matches!(outcome, TurnOutcome::Died));
    }

    #[test]
    fn up_reports_a_woken_cell() {
        let code = compile(b"^@").unwrap();
        let mut threads = ThreadTable::new();
        let mut processes = ProcessTable::new();
        let segment = new_segment();
        let pid = processes.insert(Pcb::new(segment.clone(), segment.clone()));
        let tid = threads.insert(Tcb::new(pid, code.programs[0], 0, segment));
        let mut stdin: &[u8] = &[];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut machine = Machine::new(&code, &mut stdin, &mut stdout, &mut stderr);
        let (_, woken) = machine.run_turn(&mut threads, &mut processes, tid, Quanta::Fixed(10));
        assert_eq!(woken.len(), 1);
    }

    #[test]
    fn spawn_thread_creates_a_sibling_sharing_the_segment() {
        let code = compile(b"&@").unwrap();
        let mut threads = ThreadTable::new();
        let mut processes = ProcessTable::new();
        let segment = new_segment();
        let pid = processes.insert(Pcb::new(segment.clone(), segment.clone()));
        processes.get_mut(pid).unwrap().threads = 1;
        let tid = threads.insert(Tcb::new(pid, code.programs[0], 0, segment.clone()));
        let mut stdin: &[u8] = &[];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut machine = Machine::new(&code, &mut stdin, &mut stdout, &mut stderr);
        machine.run_turn(&mut threads, &mut processes, tid, Quanta::Fixed(1));
        assert_eq!(machine.spawned.len(), 1);
        assert_eq!(processes.get(pid).unwrap().threads, 2);
        assert_eq!(segment.borrow().get(0), 0);
        assert_eq!(segment.borrow().get(1), 1);
    }
}
