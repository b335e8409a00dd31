use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of [`Error`] for callers that only need to branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    MixedUpdate,
    NotFound,
    Driver,
    Other,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("can not query on nested fields: {0}")]
    NestedField(String),
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
    #[error("projection mixes included and excluded fields")]
    MixedProjection,
    #[error("invalid schema for {0}: {1}")]
    InvalidSchema(String, String),
    #[error("the update has a mix between fields and commands")]
    MixedUpdate,
    #[error("invalid update operator {0}: operand must be a document")]
    InvalidUpdate(String),
    #[error("the update is empty")]
    EmptyUpdate,
    #[error("no documents found")]
    NotFound,
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("driver call timed out after {0:?}")]
    Timeout(Duration),
    #[error("bson serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),
    #[error("bson deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),
    #[error("connector with name {0} does not exist")]
    ConnectorNotFound(String),
    #[error("the model {0} is not registered")]
    ModelNotRegistered(String),
    #[error("database value is required for connector {0}")]
    MissingDatabase(String),
    #[error("invalid connection uri: {0}")]
    InvalidConnectionUri(String),
}

impl Error {
    /// Wraps a storage-engine failure that has no richer representation.
    pub fn driver(message: impl Into<String>) -> Self {
        Error::Driver(message.into().into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownField(_) | Error::NestedField(_) => ErrorKind::Schema,
            Error::MixedUpdate => ErrorKind::MixedUpdate,
            Error::NotFound => ErrorKind::NotFound,
            Error::Driver(_) | Error::Timeout(_) => ErrorKind::Driver,
            _ => ErrorKind::Other,
        }
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(error: mongodb::error::Error) -> Self {
        Error::Driver(Box::new(error))
    }
}
