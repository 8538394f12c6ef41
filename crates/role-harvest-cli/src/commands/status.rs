use anyhow::Result;
use role_harvest::TableSink;
use role_harvest_store::HarvestStatus;

use crate::config::AppConfig;

/// Print when the destination last completed a harvest pass.
pub fn run(config: &AppConfig) -> Result<()> {
    let table = super::open_table(config)?;
    let destination = table.destination();

    match table.last_harvest()? {
        HarvestStatus::NeverHarvested => {
            println!("{destination}: never harvested. Run `role-harvest sync` to populate it.");
        }
        HarvestStatus::Fresh { days_old, roles } => {
            println!("{destination}: {roles} roles, last harvested {days_old} day(s) ago.");
        }
        HarvestStatus::Stale { days_old, roles } => {
            println!(
                "{destination}: {roles} roles, last harvested {days_old} days ago (stale). Run `role-harvest sync` to refresh."
            );
        }
    }

    Ok(())
}
