//! Error types returned by the backend's public entry points.
//!
//! Per the contract this backend honours, most input-invalidity conditions
//! (a reused SSA id with a different kind, a malformed `PX_COPY`, an operand
//! pattern with no matching encoding row) are programmer/contract errors: the
//! input violated the IL contract and recovery is meaningless, so internal
//! passes reach for `panic!`/`debug_assert!` rather than threading a
//! `Result` through every helper. `CodegenError` exists for the smaller set
//! of conditions a caller can reasonably recover from.

use failure_derive::Fail;

/// Errors produced while compiling a function or module.
#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The IL violated a contract the backend assumes (reused SSA id with a
    /// different kind, reference to an undefined block, etc). Carried as an
    /// error variant for completeness even though every current caller of
    /// this variant panics instead of returning it (see module docs).
    #[fail(display = "invalid input: {}", _0)]
    Verifier(String),

    /// A requested feature is recognized but not implemented for this
    /// backend (for example the non-AT&T syntax option). This is a
    /// diagnostic, not a hard failure: emission proceeds regardless.
    #[fail(display = "unsupported: {}", _0)]
    Unsupported(String),

    /// An internal implementation limit was exceeded (e.g. more than
    /// `u16::MAX` virtual registers in a single function).
    #[fail(display = "implementation limit exceeded: {}", _0)]
    ImplLimitExceeded(String),
}

/// Convenience alias used throughout the crate.
pub type CodegenResult<T> = Result<T, CodegenError>;
