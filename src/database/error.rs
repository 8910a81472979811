use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    ConnectionFailed { message: String },
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    ForeignKeyViolation { constraint: String },
    PoolTimeout,
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolTimeout,
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionFailed {
                message: e.to_string(),
            },
            sqlx::Error::Database(db) => {
                let constraint = db.constraint().unwrap_or_default().to_string();
                if db.is_unique_violation() {
                    DatabaseErrorKind::UniqueViolation { constraint }
                } else if db.is_foreign_key_violation() {
                    DatabaseErrorKind::ForeignKeyViolation { constraint }
                } else {
                    DatabaseErrorKind::Unknown {
                        message: db.message().to_string(),
                    }
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };
        Self { kind }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionFailed { .. } | DatabaseErrorKind::PoolTimeout
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "deposit" => {
                AppError::domain(DomainError::DepositNotFound {
                    deposit_id: id.clone(),
                })
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "transaction" => {
                AppError::domain(DomainError::TransactionNotFound {
                    transaction_id: id.clone(),
                })
            }
            _ => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn pool_timeout_is_retryable_infrastructure_error() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }

    #[test]
    fn missing_transaction_maps_to_404() {
        let app: AppError = DatabaseError::not_found("transaction", "abc").into();
        assert_eq!(app.status_code(), 404);
    }
}
