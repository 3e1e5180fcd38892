use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publisher is closed")]
    Closed,
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for PublishError {
    fn from(err: sqlx::Error) -> Self {
        PublishError::Publish(err.to_string())
    }
}

#[cfg(feature = "rabbitmq")]
impl From<lapin::Error> for PublishError {
    fn from(err: lapin::Error) -> Self {
        PublishError::Publish(err.to_string())
    }
}
