use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid Folgezettel ID `{0}`")]
    InvalidId(String),

    #[error("no free child ID left under `{parent}`")]
    AllocationExhausted { parent: String },
}
