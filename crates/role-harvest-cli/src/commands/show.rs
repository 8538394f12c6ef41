use anyhow::{Result, bail};
use role_harvest::{RoleName, RoleRecord, TableSink};

use crate::config::AppConfig;

/// Print one stored role.
pub fn run(config: &AppConfig, name: &str) -> Result<()> {
    let table = super::open_table(config)?;

    match table.get_role(&RoleName::new(name))? {
        Some(role) => {
            print!("{}", format_role(&role));
            Ok(())
        }
        None => bail!("role {name} not found in {}", table.destination()),
    }
}

pub fn format_role(role: &RoleRecord) -> String {
    let mut out = format!("{}\n", role.name());
    out.push_str(&format!("  title:       {}\n", role.title()));
    if !role.description().is_empty() {
        out.push_str(&format!("  description: {}\n", role.description()));
    }
    out.push_str(&format!("  stage:       {}\n", role.stage()));
    out.push_str(&format!("  etag:        {}\n", role.etag()));
    if role.deleted() {
        out.push_str("  deleted:     true\n");
    }
    out.push_str(&format!(
        "  permissions: {}\n",
        role.included_permissions().len()
    ));
    for permission in role.included_permissions() {
        out.push_str(&format!("    {permission}\n"));
    }
    out
}
