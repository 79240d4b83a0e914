//! Top-level error type for the `nucleus` binary.
//!
//! Collects failures from every layer into one enum that `main`
//! matches on to pick an exit code (§6). Not `anyhow`: `brain::main`
//! propagates a closed `BrainError` all the way up and prints+exits
//! rather than reaching for a catch-all error type elsewhere in this
//! codebase, and this crate's taxonomy is fully enumerated by §7, so
//! the same precedent applies here.

use thiserror::Error;

use nucleus_core::ErrorKind;

/// Failures that can terminate the `nucleus` process, or be converted
/// into a JSON-RPC error response for a single request.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NucleusError {
    /// BrainRoot could not be created or is not writable.
    #[error("brain root unavailable: {0}")]
    BrainRootUnavailable(String),

    /// A startup invariant was violated (e.g. a broken audit chain
    /// under `--strict`).
    #[error("invariant violated at startup: {0}")]
    InvariantViolated(String),

    /// A single request or dispatch failed with a recoverable error
    /// kind; carried through for the server to turn into a JSON-RPC
    /// error response.
    #[error(transparent)]
    Kind(#[from] ErrorKind),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// An I/O failure outside any more specific category.
    #[error("io error: {0}")]
    Io(String),
}

impl NucleusError {
    /// The process exit code this error maps to, per §6: `2` for an
    /// unrecoverable init failure, `3` for an invariant violation,
    /// anything else falls back to `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            NucleusError::BrainRootUnavailable(_) => 2,
            NucleusError::InvariantViolated(_) => 3,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for NucleusError {
    fn from(err: std::io::Error) -> Self {
        NucleusError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable_per_variant() {
        assert_eq!(NucleusError::BrainRootUnavailable("x".into()).exit_code(), 2);
        assert_eq!(NucleusError::InvariantViolated("x".into()).exit_code(), 3);
        assert_eq!(NucleusError::Config("x".into()).exit_code(), 1);
    }
}
