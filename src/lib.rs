//! tenantstore: one lazily provisioned database connection per tenant.
//!
//! The cache lives in [`tenantstore_core`] and is always available. The
//! request dispatch glue, the SeaORM backend and the in-memory test doubles
//! are behind the `dispatch`, `seaorm` and `testing` features.

// Re-export core functionality
pub use tenantstore_core::*;

// Re-export optional crates
#[cfg(feature = "dispatch")]
pub use tenantstore_dispatch as dispatch;

#[cfg(feature = "seaorm")]
pub use tenantstore_seaorm as seaorm;

#[cfg(feature = "testing")]
pub use tenantstore_testing as testing;

/// Prelude for common imports.
pub mod prelude {
    pub use tenantstore_core::prelude::*;

    #[cfg(feature = "dispatch")]
    pub use tenantstore_dispatch::prelude::*;

    #[cfg(feature = "seaorm")]
    pub use tenantstore_seaorm::{PoolOptions, SchemaProvisioner, SeaOrmFactory};
}
