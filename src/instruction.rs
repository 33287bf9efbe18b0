//! The encoded instruction word: an opcode byte plus a signed 24-bit
//! immediate — the unit the compiler emits and the evaluator dispatches on.

use std::fmt;

/// One slot in the global instruction array.
///
/// The immediate carries a run length for repeatable ops (`+ - < > ^ _ , . ~ =`)
/// or a relative jump offset for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub imm: i32,
}

impl Instruction {
    pub fn new(op: Op, imm: i32) -> Self {
        Instruction { op, imm }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.op, self.imm)
    }
}

/// Opcodes. Each variant corresponds to one source character except `Zero`,
/// the compiler's synthetic reduction of `[-]`/`[-`]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Right,
    Left,
    Output,
    Input,
    Up,
    Down,
    Swap,
    Cost,
    WhileNZEnter,
    WhileNZBack,
    UntilZEnter,
    UntilZBack,
    IfZero,
    Else,
    EndIf,
    ProcDef,
    ProcReturn,
    SpawnThread,
    SpawnProcess,
    Yield,
    Separate,
    Debug,
    /// Synthetic: `cell <- 0`. Compiler's reduction of `[-]`/`[-`]`.
    Zero,
    /// Transient placeholder for `'` (break), rewritten to `Else` once the
    /// enclosing loop's backfill runs. Never reaches the evaluator.
    BreakMark,
    /// Transient placeholder for `` ` `` (continue), same lifetime as `BreakMark`.
    ContinueMark,
    /// A bare character that isn't one of the control ops above: either a
    /// procedure call (if `char` names a defined slot at dispatch time) or
    /// a procedure's own name token, sitting inert right after `ProcDef`.
    Call(char),
}

impl Op {
    /// The source character this op was compiled from. Used by `ProcDef`'s
    /// dispatch to recover the name character sitting in the next slot,
    /// whatever kind of token that happens to be — the character after `:`
    /// is never required to be alphanumeric; `:+++;` compiles fine and
    /// simply never registers a slot, since `+` isn't a valid name.
    pub fn source_byte(&self) -> u8 {
        match self {
            Op::Add => b'+',
            Op::Sub => b'-',
            Op::Right => b'>',
            Op::Left => b'<',
            Op::Output => b'.',
            Op::Input => b',',
            Op::Up => b'^',
            Op::Down => b'_',
            Op::Swap => b'~',
            Op::Cost => b'=',
            Op::WhileNZEnter => b'[',
            Op::WhileNZBack => b']',
            Op::UntilZEnter => b'{',
            Op::UntilZBack => b'}',
            Op::IfZero => b'(',
            Op::Else => b'|',
            Op::EndIf => b')',
            Op::ProcDef => b':',
            Op::ProcReturn => b';',
            Op::SpawnThread => b'&',
            Op::SpawnProcess => b'%',
            Op::Yield => b'*',
            Op::Separate => b'@',
            Op::Debug => b'#',
            Op::Zero => b'"',
            Op::BreakMark => b'\'',
            Op::ContinueMark => b'`',
            Op::Call(c) => *c as u8,
        }
    }
}
