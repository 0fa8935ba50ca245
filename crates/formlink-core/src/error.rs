use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormlinkError {
    #[error("unknown action kind: {0}")]
    UnknownActionKind(String),

    #[error("invalid relationship direction '{0}': expected ab, ba or equal")]
    InvalidDirection(String),

    #[error("malformed relationship type '{0}': expected '<type_id>_<ab|ba|equal>'")]
    InvalidRelationshipType(String),

    #[error("action name must not be empty (position {0})")]
    EmptyActionName(usize),

    #[error("duplicate action name: {0}")]
    DuplicateAction(String),

    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: String, id: u64 },

    #[error("crm error: {0}")]
    Crm(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FormlinkError>;
