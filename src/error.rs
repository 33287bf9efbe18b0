//! Compile-time errors: malformed programs, not interpreter bugs.
//!
//! Runtime advisories (spawn failure, full call stack, deadlock) are not
//! modeled here — those are contained signals, not propagating errors, so
//! they never reach a `Result`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unmatched '[': while-loop never closed")]
    UnmatchedWhile,
    #[error("unmatched '{{': until-loop never closed")]
    UnmatchedUntil,
    #[error("unmatched '(': if never closed")]
    UnmatchedIf,
    #[error("unmatched ':': procedure definition never closed")]
    UnmatchedProc,
    #[error("']' without a matching '['")]
    StrayWhileClose,
    #[error("'}}' without a matching '{{'")]
    StrayUntilClose,
    #[error("'|' or ')' without a matching '('")]
    StrayIfClose,
    #[error("second '|' inside the same '(...)': an if can have at most one else")]
    DuplicateElse,
    #[error("';' without a matching ':'")]
    StrayProcClose,
    #[error("'\\'' (break) used outside of a loop")]
    BreakOutsideLoop,
    #[error("'`' (continue) used outside of a loop")]
    ContinueOutsideLoop,
}
