use primitives::{codec, ConditionId, PageId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Selector binary form: {0}")]
    Codec(#[from] codec::Error),
    #[error("Unknown creative weight strategy type {0}")]
    UnknownStrategy(u32),
    #[error("Reduction rate {0} is outside of (0, 1]")]
    InvalidReductionRate(f32),
    #[error("Page {page} references unknown condition {condition}")]
    UnknownCondition {
        page: PageId,
        condition: ConditionId,
    },
}
