//! Source filter, recursive-descent encoder, and break/continue backfill.
//!
//! A small stateful reader feeds a recursive dispatch that builds up a flat,
//! densely packed instruction array: source characters go in, encoded words
//! come out, one instruction array shared by every program in the file.

use crate::error::CompileError;
use crate::instruction::{Instruction, Op};

/// Everything a file compiles to: one flat, globally-addressable instruction
/// array shared by every top-level program in the file (indices are stable,
/// global addresses), plus the entry point of each top-level program, plus
/// an optional raw byte tail captured after a `!`.
#[derive(Debug, Default)]
pub struct CompiledFile {
    pub instructions: Vec<Instruction>,
    pub programs: Vec<usize>,
    pub stdin_tail: Option<Vec<u8>>,
}

pub fn compile(source: &[u8]) -> Result<CompiledFile, CompileError> {
    let mut reader = Reader::new(source);
    let mut instructions = Vec::new();
    let mut programs = Vec::new();
    let mut stdin_tail = None;

    while reader.has_more() {
        let start = instructions.len();
        programs.push(start);
        let outcome = compile_scope(&mut reader, &mut instructions, Scope::Top)?;
        if outcome.program_end_bang {
            stdin_tail = Some(reader.raw_tail());
            break;
        }
    }

    Ok(CompiledFile { instructions, programs, stdin_tail })
}

/// Returns the slot index of a procedure table entry for a name character,
/// or `None` if the character can't name a procedure.
pub fn proc_slot(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'A'..=b'Z' => Some((c - b'A') as usize + 10),
        b'a'..=b'z' => Some((c - b'a') as usize + 36),
        _ => None,
    }
}

pub const PROC_TABLE_SIZE: usize = 62;

fn is_alphabet(c: u8) -> bool {
    matches!(
        c,
        b'+' | b'-'
            | b'<'
            | b'>'
            | b'.'
            | b','
            | b'['
            | b']'
            | b'{'
            | b'}'
            | b'('
            | b'|'
            | b')'
            | b':'
            | b';'
            | b'$'
            | b'\''
            | b'`'
            | b'^'
            | b'_'
            | b'%'
            | b'&'
            | b'#'
            | b'~'
            | b'*'
            | b'@'
            | b'='
            | b'!'
    ) || c.is_ascii_alphanumeric()
}

fn repeatable_op(c: u8) -> Option<Op> {
    match c {
        b'+' => Some(Op::Add),
        b'-' => Some(Op::Sub),
        b'>' => Some(Op::Right),
        b'<' => Some(Op::Left),
        b'^' => Some(Op::Up),
        b'_' => Some(Op::Down),
        b',' => Some(Op::Input),
        b'.' => Some(Op::Output),
        b'~' => Some(Op::Swap),
        b'=' => Some(Op::Cost),
        _ => None,
    }
}

/// A cursor over the raw byte stream that only ever yields alphabet bytes,
/// with a one-character pushback.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn next(&mut self) -> Option<u8> {
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            self.pos += 1;
            if is_alphabet(c) {
                return Some(c);
            }
        }
        None
    }

    /// Valid only immediately after a `next()` that returned `Some`.
    fn unget(&mut self) {
        self.pos -= 1;
    }

    fn has_more(&mut self) -> bool {
        if self.next().is_some() {
            self.unget();
            true
        } else {
            false
        }
    }

    /// The raw, unfiltered remainder of the stream, used to seed stdin after
    /// a `!`. `pos` already sits just past the `!` that triggered this.
    fn raw_tail(&self) -> Vec<u8> {
        self.bytes[self.pos..].to_vec()
    }
}

/// What kind of enclosing construct a recursive compile is filling in.
/// Each variant carries the position of the instruction this scope will
/// backpatch; whether a loop encloses this scope (`While`/`Until` always
/// do, `IfElse` inherits it, `Proc` and `Top` never do) is tracked
/// separately by `in_loop`.
#[derive(Clone, Copy)]
enum Scope {
    Top,
    While(usize),
    Until(usize),
    /// `patch` is whichever instruction (the `(` or, once seen, the `|`)
    /// still needs its exit distance filled in when this scope closes.
    /// `seen_else` tracks whether a `|` has already been consumed in this
    /// `(...)`: a second one is a compile error, not a second else-branch.
    IfElse { patch: usize, in_loop: bool, seen_else: bool },
    Proc(usize),
}

impl Scope {
    fn in_loop(&self) -> bool {
        match self {
            Scope::While(_) | Scope::Until(_) => true,
            Scope::IfElse { in_loop, .. } => *in_loop,
            Scope::Top | Scope::Proc(_) => false,
        }
    }

    fn unmatched_error(&self) -> CompileError {
        match self {
            Scope::Top => unreachable!("top level has no unmatched opener"),
            Scope::While(_) => CompileError::UnmatchedWhile,
            Scope::Until(_) => CompileError::UnmatchedUntil,
            Scope::IfElse { .. } => CompileError::UnmatchedIf,
            Scope::Proc(_) => CompileError::UnmatchedProc,
        }
    }
}

struct Outcome {
    /// Did this scope (or one of its `(...)` children) contain a break or
    /// continue not yet resolved against an enclosing loop? Only meaningful
    /// to the caller when the caller is itself a loop or an if/else.
    break_pending: bool,
    /// Only set when `scope` was `Top`: did the program end via `!` (as
    /// opposed to `@` or end of file)?
    program_end_bang: bool,
}

/// `PC += distance` lands exactly on `target`, given the fetch-then-dispatch
/// convention (`pc` has already advanced past `from` by the time the jump
/// immediate is applied).
fn forward_distance(from: usize, target: usize) -> i32 {
    target as i32 - from as i32 - 1
}

fn compile_scope(
    reader: &mut Reader,
    instr: &mut Vec<Instruction>,
    scope: Scope,
) -> Result<Outcome, CompileError> {
    let mut scope = scope;
    let in_loop = scope.in_loop();
    let mut break_pending = false;

    loop {
        let c = match reader.next() {
            Some(c) => c,
            None => {
                return match scope {
                    Scope::Top => {
                        instr.push(Instruction::new(Op::Separate, 0));
                        Ok(Outcome { break_pending: false, program_end_bang: false })
                    }
                    _ => Err(scope.unmatched_error()),
                };
            }
        };

        if let Some(op) = repeatable_op(c) {
            let mut rl = 1i32;
            while let Some(n) = reader.next() {
                if n == c {
                    rl += 1;
                } else {
                    reader.unget();
                    break;
                }
            }
            instr.push(Instruction::new(op, rl));
            if c == b'~' && rl % 2 == 0 {
                instr.pop();
            }
            continue;
        }

        match c {
            b'[' => {
                let open = instr.len();
                instr.push(Instruction::new(Op::WhileNZEnter, 0));
                compile_scope(reader, instr, Scope::While(open))?;
                finish_loop(instr, open, true);
            }
            b'{' => {
                let open = instr.len();
                instr.push(Instruction::new(Op::UntilZEnter, 0));
                compile_scope(reader, instr, Scope::Until(open))?;
                finish_loop(instr, open, false);
            }
            b'(' => {
                let open = instr.len();
                instr.push(Instruction::new(Op::IfZero, 0));
                let outcome = compile_scope(
                    reader,
                    instr,
                    Scope::IfElse { patch: open, in_loop, seen_else: false },
                )?;
                break_pending |= outcome.break_pending;
            }
            b':' => {
                let open = instr.len();
                instr.push(Instruction::new(Op::ProcDef, 0));
                compile_scope(reader, instr, Scope::Proc(open))?;
            }
            b'$' => instr.push(Instruction::new(Op::ProcReturn, 0)),
            b'\'' => {
                if !in_loop {
                    return Err(CompileError::BreakOutsideLoop);
                }
                break_pending = true;
                instr.push(Instruction::new(Op::BreakMark, 0));
            }
            b'`' => {
                if !in_loop {
                    return Err(CompileError::ContinueOutsideLoop);
                }
                break_pending = true;
                instr.push(Instruction::new(Op::ContinueMark, 0));
            }
            b'&' => instr.push(Instruction::new(Op::SpawnThread, 0)),
            b'%' => instr.push(Instruction::new(Op::SpawnProcess, 0)),
            b'*' => instr.push(Instruction::new(Op::Yield, 0)),
            b'#' => instr.push(Instruction::new(Op::Debug, 0)),
            b']' => {
                return match scope {
                    Scope::While(open) => {
                        instr.push(Instruction::new(Op::WhileNZBack, 0));
                        let close = instr.len() - 1;
                        backfill(instr, open, close);
                        Ok(Outcome { break_pending, program_end_bang: false })
                    }
                    _ => Err(CompileError::StrayWhileClose),
                };
            }
            b'}' => {
                return match scope {
                    Scope::Until(open) => {
                        instr.push(Instruction::new(Op::UntilZBack, 0));
                        let close = instr.len() - 1;
                        backfill(instr, open, close);
                        Ok(Outcome { break_pending, program_end_bang: false })
                    }
                    _ => Err(CompileError::StrayUntilClose),
                };
            }
            b'|' => match scope {
                Scope::IfElse { seen_else: true, .. } => return Err(CompileError::DuplicateElse),
                Scope::IfElse { patch, in_loop: il, seen_else: false } => {
                    instr.push(Instruction::new(Op::Else, 0));
                    let bar = instr.len() - 1;
                    let dist = forward_distance(patch, bar + 1);
                    instr[patch].imm = dist;
                    scope = Scope::IfElse { patch: bar, in_loop: il, seen_else: true };
                }
                _ => return Err(CompileError::StrayIfClose),
            },
            b')' => {
                return match scope {
                    // `)` is never dispatched: `brains4.c`'s `case ')'`
                    // retracts the just-written `)` word (`cp--`) before
                    // patching `(`'s/`|`'s distance, so the if/else construct
                    // falls straight through to whatever comes next with no
                    // extra instruction (and no extra tick) in between.
                    Scope::IfElse { patch, .. } => {
                        let target = instr.len();
                        let dist = forward_distance(patch, target);
                        instr[patch].imm = dist;
                        Ok(Outcome { break_pending, program_end_bang: false })
                    }
                    _ => Err(CompileError::StrayIfClose),
                };
            }
            b';' => {
                return match scope {
                    Scope::Proc(open) => {
                        instr.push(Instruction::new(Op::ProcReturn, 0));
                        let close = instr.len() - 1;
                        let dist = forward_distance(open, close + 1);
                        instr[open].imm = dist;
                        Ok(Outcome { break_pending: false, program_end_bang: false })
                    }
                    _ => Err(CompileError::StrayProcClose),
                };
            }
            b'@' => {
                return match scope {
                    Scope::Top => {
                        instr.push(Instruction::new(Op::Separate, 0));
                        Ok(Outcome { break_pending: false, program_end_bang: false })
                    }
                    _ => Err(scope.unmatched_error()),
                };
            }
            b'!' => {
                return match scope {
                    Scope::Top => {
                        instr.push(Instruction::new(Op::Separate, 0));
                        Ok(Outcome { break_pending: false, program_end_bang: true })
                    }
                    _ => Err(scope.unmatched_error()),
                };
            }
            c if proc_slot(c).is_some() => {
                instr.push(Instruction::new(Op::Call(c as char), 0));
            }
            _ => unreachable!("reader only yields alphabet bytes"),
        }
    }
}

/// Backpatches the entry/back-edge distance and, for a `While` loop, runs
/// the leading-elision and `[-]`/`[-`]` collapse peepholes.
fn finish_loop(instr: &mut Vec<Instruction>, open: usize, is_while: bool) {
    let close = instr.len() - 1;
    let dist = (close - open) as i32;
    instr[open].imm = dist;
    instr[close].imm = dist;
    let np = instr.len();
    let preceding: Option<Op> = if open == 0 { None } else { Some(instr[open - 1].op) };

    if is_while {
        let elide = open == 0
            || matches!(preceding, Some(Op::WhileNZBack) | Some(Op::Zero) | Some(Op::Separate));
        if elide {
            instr.truncate(open);
        } else if np - open == 3 && instr[open + 1] == Instruction::new(Op::Sub, 1) {
            instr.truncate(open);
            instr.push(Instruction::new(Op::Zero, 0));
        }
    } else {
        let elide = open > 0 && matches!(preceding, Some(Op::UntilZBack));
        if elide {
            instr.truncate(open);
        }
    }
}

/// Rewrites break/continue placeholders recorded within `[open+1, close)`
/// into concrete forward jumps now that `close` (the loop's own back-edge
/// instruction) is known.
fn backfill(instr: &mut [Instruction], open: usize, close: usize) {
    for idx in (open + 1)..close {
        match instr[idx].op {
            Op::BreakMark => {
                instr[idx].op = Op::Else;
                instr[idx].imm = close as i32 - idx as i32;
            }
            Op::ContinueMark => {
                instr[idx].op = Op::Else;
                instr[idx].imm = close as i32 - idx as i32 - 1;
            }
            _ => {}
        }
    }
}
