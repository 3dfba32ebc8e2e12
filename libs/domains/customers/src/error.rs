use document_store::StoreError;
use event_bus::HandlerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Document does not match the customer read model: {0}")]
    Document(#[from] serde_json::Error),
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;

/// Store outages are retried; a document that no longer decodes never will be.
impl From<ProjectionError> for HandlerError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::Store(StoreError::InvalidUpdate { .. }) => {
                HandlerError::Conversion(err.to_string())
            }
            ProjectionError::Store(_) => HandlerError::Infrastructure(err.to_string()),
            ProjectionError::Document(_) => HandlerError::Conversion(err.to_string()),
        }
    }
}
