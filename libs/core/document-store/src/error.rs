use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("BSON encoding error: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("BSON decoding error: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    #[error("Document has no string _id")]
    MissingId,

    #[error("Cannot apply update to '{path}': {reason}")]
    InvalidUpdate { path: String, reason: String },
}

impl StoreError {
    pub(crate) fn invalid_update(path: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidUpdate {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
