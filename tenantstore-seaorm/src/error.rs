//! Mapping of SeaORM errors onto collaborator errors.

use sea_orm::DbErr;
use tenantstore_core::BackendError;

/// Convert a SeaORM error into the cache's collaborator error.
pub fn backend_error(err: DbErr) -> BackendError {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => BackendError::Connection(err.to_string()),
        DbErr::Exec(_) | DbErr::Query(_) => BackendError::Query(err.to_string()),
        other => BackendError::Other(other.to_string()),
    }
}
