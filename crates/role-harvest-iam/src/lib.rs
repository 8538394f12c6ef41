pub mod response;
pub mod role_source;

pub use role_source::{DEFAULT_API_BASE, IamRoleSource, IamRoleSourceConfig};
