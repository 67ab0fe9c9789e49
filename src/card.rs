//! SDIFFCARD / SINTERCARD / SUNIONCARD: the size of a set algebra result,
//! computed by the host's own set commands so semantics and errors match.

use crate::error::{KvError, Result};
use crate::types::SetOp;

/// The host's plain set algebra over set-typed keys
pub trait SetAlgebra {
    fn sdiff(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>>;
    fn sinter(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>>;
    fn sunion(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>>;
}

impl SetOp {
    /// Lowercase name of the cardinality command built on this operation
    pub fn card_command(&self) -> &'static str {
        match self {
            SetOp::Diff => "sdiffcard",
            SetOp::Inter => "sintercard",
            SetOp::Union => "sunioncard",
        }
    }
}

/// Number of members the host set operation would return.
///
/// Host errors (wrong type, storage failures) are returned unchanged.
pub fn cardinality<S: SetAlgebra + ?Sized>(store: &S, op: SetOp, keys: &[&str]) -> Result<i64> {
    if keys.is_empty() {
        return Err(KvError::Arity(op.card_command().to_string()));
    }

    let members = match op {
        SetOp::Diff => store.sdiff(keys)?,
        SetOp::Inter => store.sinter(keys)?,
        SetOp::Union => store.sunion(keys)?,
    };
    Ok(members.len() as i64)
}
