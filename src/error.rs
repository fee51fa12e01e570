use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
  #[error("{op}: store unreachable: {message}")]
  Connectivity { op: &'static str, message: String },

  #[error("claim: {0}")]
  Claim(String),

  #[error("{op}: {source}")]
  Serialization {
    op: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("{op}: task {task_id} not found")]
  NotFound { op: &'static str, task_id: String },

  #[error("{op}: constraint violated: {message}")]
  Constraint { op: &'static str, message: String },

  #[error("{op}: {message}")]
  Storage { op: &'static str, message: String },

  #[error("processor panicked: {0}")]
  TaskPanicked(String),

  #[error("task {task_id} failed: {message}")]
  TaskFailed { task_id: String, message: String },

  #[error("broker is already consuming")]
  AlreadyConsuming,
}

impl QueueError {
  /// Classifies a driver error, tagging it with the operation that hit it.
  pub fn from_sqlx(op: &'static str, err: sqlx::Error) -> Self {
    match err {
      sqlx::Error::Io(_)
      | sqlx::Error::Tls(_)
      | sqlx::Error::PoolTimedOut
      | sqlx::Error::PoolClosed
      | sqlx::Error::WorkerCrashed => QueueError::Connectivity {
        op,
        message: err.to_string(),
      },
      sqlx::Error::RowNotFound => QueueError::NotFound {
        op,
        task_id: String::new(),
      },
      sqlx::Error::Database(ref db) if db.is_unique_violation() => QueueError::Constraint {
        op,
        message: db.message().to_string(),
      },
      other => QueueError::Storage {
        op,
        message: other.to_string(),
      },
    }
  }

  pub fn serialization(op: &'static str, source: serde_json::Error) -> Self {
    QueueError::Serialization { op, source }
  }

  pub fn is_connectivity(&self) -> bool {
    matches!(self, QueueError::Connectivity { .. })
  }
}

/// Why `start_consuming` returned, and whether the caller should re-invoke it.
#[derive(Debug, Error)]
#[error("consuming stopped (retry: {retry}): {source}")]
pub struct ConsumeError {
  pub retry: bool,
  #[source]
  pub source: QueueError,
}

impl ConsumeError {
  pub fn should_retry(&self) -> bool {
    self.retry
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pool_timeouts_are_connectivity_errors() {
    let err = QueueError::from_sqlx("claim", sqlx::Error::PoolTimedOut);
    assert!(err.is_connectivity());
    assert!(err.to_string().starts_with("claim: store unreachable"));
  }

  #[test]
  fn other_driver_errors_keep_the_operation_name() {
    let err = QueueError::from_sqlx("publish", sqlx::Error::Protocol("bad frame".into()));
    assert!(matches!(err, QueueError::Storage { op: "publish", .. }));
  }
}
