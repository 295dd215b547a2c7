//! External collaborators: the prediction oracle and storage backends.

pub mod prediction {
    pub use crate::prediction::*;
}

pub mod postgres {
    pub use crate::db::*;
    pub use crate::db_storage::*;
}

pub mod memory {
    pub use crate::memory_store::*;
}
