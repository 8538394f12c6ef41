pub mod show;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use role_harvest_store::RoleTable;

use crate::config::AppConfig;

/// Open the configured destination table.
pub fn open_table(config: &AppConfig) -> Result<RoleTable> {
    let dir = config.warehouse_dir()?;
    RoleTable::open(&dir, &config.dataset, &config.table).with_context(|| {
        format!(
            "failed to open {}.{} in {}",
            config.dataset,
            config.table,
            dir.display()
        )
    })
}
