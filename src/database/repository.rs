use crate::database::error::DatabaseError;
use async_trait::async_trait;

/// Generic CRUD surface shared by the Postgres repositories.
///
/// Settlement records are never deleted, so there is no `delete` here.
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError>;

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError>;
}

pub(crate) fn parse_uuid(id: &str) -> Result<uuid::Uuid, DatabaseError> {
    uuid::Uuid::parse_str(id).map_err(|e| {
        DatabaseError::new(crate::database::error::DatabaseErrorKind::Unknown {
            message: format!("Invalid UUID: {}", e),
        })
    })
}
