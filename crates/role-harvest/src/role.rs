use std::fmt;

use serde::Deserialize;

use crate::source::SourceError;

/// Fully qualified role identifier as issued by the IAM service
/// (e.g. `roles/viewer` or `organizations/123/roles/auditor`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lightweight entry produced while listing. Carries only the identifier;
/// everything else comes from the detail lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSummary {
    pub name: RoleName,
}

impl RoleSummary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RoleName::new(name),
        }
    }
}

/// One page of a role listing.
#[derive(Debug, Clone, Default)]
pub struct RolePage {
    pub roles: Vec<RoleSummary>,
    /// Cursor for the next page. `None` (or empty) ends the listing.
    pub next_page_token: Option<String>,
}

/// A role exactly as the remote API returns it. Any field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRole {
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub deleted: Option<bool>,
    pub etag: Option<String>,
    pub included_permissions: Option<Vec<String>>,
    pub stage: Option<String>,
}

impl RawRole {
    /// Build the canonical record, coercing every absent field to its zero
    /// value. Fails only when the role has no name.
    pub fn into_record(self) -> Result<RoleRecord, SourceError> {
        let name = self.name.unwrap_or_default();
        if name.is_empty() {
            return Err(SourceError::Parse("role without a name".into()));
        }

        Ok(RoleRecord {
            name: RoleName::new(name),
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            deleted: self.deleted.unwrap_or_default(),
            etag: self.etag.unwrap_or_default(),
            included_permissions: self.included_permissions.unwrap_or_default(),
            stage: self.stage.unwrap_or_default(),
        })
    }
}

/// Canonical in-memory shape of one role. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    name: RoleName,
    title: String,
    description: String,
    deleted: bool,
    etag: String,
    included_permissions: Vec<String>,
    stage: String,
}

impl RoleRecord {
    pub fn name(&self) -> &RoleName {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn included_permissions(&self) -> &[String] {
        &self.included_permissions
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_zero_values() {
        let raw: RawRole =
            serde_json::from_str(r#"{"name":"roles/viewer","title":"Viewer"}"#).unwrap();
        let record = raw.into_record().unwrap();

        assert_eq!(record.name().as_str(), "roles/viewer");
        assert_eq!(record.title(), "Viewer");
        assert_eq!(record.description(), "");
        assert!(record.included_permissions().is_empty());
        assert!(!record.deleted());
        assert_eq!(record.etag(), "");
        assert_eq!(record.stage(), "");
    }

    #[test]
    fn camel_case_fields_are_read() {
        let raw: RawRole = serde_json::from_str(
            r#"{
                "name": "roles/storage.admin",
                "title": "Storage Admin",
                "description": "Full control",
                "deleted": true,
                "etag": "AA==",
                "includedPermissions": ["storage.buckets.get", "storage.buckets.list"],
                "stage": "GA"
            }"#,
        )
        .unwrap();
        let record = raw.into_record().unwrap();

        assert!(record.deleted());
        assert_eq!(record.etag(), "AA==");
        assert_eq!(record.stage(), "GA");
        assert_eq!(
            record.included_permissions(),
            ["storage.buckets.get", "storage.buckets.list"]
        );
    }

    #[test]
    fn permission_order_is_preserved() {
        let raw = RawRole {
            name: Some("roles/x".into()),
            included_permissions: Some(vec!["z.b".into(), "a.a".into(), "m.c".into()]),
            ..Default::default()
        };
        let record = raw.into_record().unwrap();
        assert_eq!(record.included_permissions(), ["z.b", "a.a", "m.c"]);
    }

    #[test]
    fn nameless_role_is_rejected() {
        let result = RawRole::default().into_record();
        assert!(matches!(result, Err(SourceError::Parse(_))));

        let result = RawRole {
            name: Some(String::new()),
            ..Default::default()
        }
        .into_record();
        assert!(matches!(result, Err(SourceError::Parse(_))));
    }

    #[test]
    fn explicit_nulls_are_defaulted() {
        let raw: RawRole = serde_json::from_str(
            r#"{"name":"roles/a","description":null,"includedPermissions":null}"#,
        )
        .unwrap();
        let record = raw.into_record().unwrap();
        assert_eq!(record.description(), "");
        assert!(record.included_permissions().is_empty());
    }
}
