//! Errors raised while running an effect.

use crate::pass::{PassError, Program};
use crate::pool::PoolError;

/// Why an effect could not produce its frame.
///
/// Every variant is fatal for the current frame only: the orchestrator
/// copies the source through and tries again next frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    /// A temporary image could not be allocated.
    #[error(transparent)]
    Allocation(#[from] PoolError),

    /// A pass or blit failed.
    #[error(transparent)]
    Pass(#[from] PassError),

    /// The bound material belongs to a different effect.
    #[error("effect needs the {expected} program but the bound material is {found}")]
    ProgramMismatch { expected: Program, found: Program },
}

/// Fail with [`EffectError::ProgramMismatch`] unless `found` is `expected`.
pub(crate) fn expect_program(found: Program, expected: Program) -> Result<(), EffectError> {
    if found == expected {
        Ok(())
    } else {
        Err(EffectError::ProgramMismatch { expected, found })
    }
}
