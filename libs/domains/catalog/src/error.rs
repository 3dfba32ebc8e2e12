use document_store::StoreError;
use event_bus::HandlerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Document does not match the catalog read model: {0}")]
    Document(#[from] serde_json::Error),
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;

impl From<ProjectionError> for HandlerError {
    fn from(err: ProjectionError) -> Self {
        match &err {
            ProjectionError::Store(StoreError::InvalidUpdate { .. }) | ProjectionError::Document(_) => {
                HandlerError::Conversion(err.to_string())
            }
            ProjectionError::Store(_) => HandlerError::Infrastructure(err.to_string()),
        }
    }
}
