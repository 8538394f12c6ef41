pub mod schema;
pub mod table;

pub use table::{HarvestStatus, RoleTable, StoreError};
