pub use faro_shared::ids::*;

/// Errores del dominio
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Partition {partition} is leased by {owner}")]
    LeaseHeld {
        partition: PartitionId,
        owner: InstanceId,
    },

    #[error("Stale fencing token for {partition}: presented {presented}, current {current}")]
    StaleFencingToken {
        partition: PartitionId,
        presented: FencingToken,
        current: FencingToken,
    },

    #[error(
        "Cursor regression for {partition}/{consumer}: stored {stored}, attempted {attempted}"
    )]
    CursorRegression {
        partition: PartitionId,
        consumer: ConsumerId,
        stored: RecordId,
        attempted: RecordId,
    },

    #[error("Delivery transport error: {0}")]
    Transport(String),

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

impl DispatchError {
    /// Storage-layer failures are fatal to every worker touching that
    /// store; everything else is scoped to one record or one partition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::Database(_) | DispatchError::InfrastructureError { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
