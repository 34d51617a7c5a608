use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of change a changelog entry records. Stored as the payload's `type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangelogType {
    Baseline,
    Migrate,
    MigrateSdl,
    MigrateGhost,
    Data,
}

impl ChangelogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangelogType::Baseline => "BASELINE",
            ChangelogType::Migrate => "MIGRATE",
            ChangelogType::MigrateSdl => "MIGRATE_SDL",
            ChangelogType::MigrateGhost => "MIGRATE_GHOST",
            ChangelogType::Data => "DATA",
        }
    }
}

impl fmt::Display for ChangelogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The document stored in `changelog.payload`. Keys are camelCase and unset
/// optional keys are left out, so documents written by other producers with
/// the same shape decode cleanly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogPayload {
    #[serde(rename = "type")]
    pub change_type: ChangelogType,
    #[serde(default, skip_serializing_if = "ChangedResources::is_empty")]
    pub changed_resources: ChangedResources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ChangelogPayload {
    pub fn new(change_type: ChangelogType) -> Self {
        Self {
            change_type,
            changed_resources: ChangedResources::default(),
            revision: None,
            task_run: None,
            issue: None,
            sheet: None,
            version: None,
        }
    }

    pub fn with_resources(mut self, changed_resources: ChangedResources) -> Self {
        self.changed_resources = changed_resources;
        self
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(document: &str) -> serde_json::Result<Self> {
        serde_json::from_str(document)
    }
}

/// Resources touched by a change, grouped database > schema > object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<ChangedResourceDatabase>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedResourceDatabase {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<ChangedResourceSchema>,
}

/// Engines without schemas use the empty name, which is not written out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedResourceSchema {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<ChangedResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<ChangedResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<ChangedResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub procedures: Vec<ChangedResource>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedResource {
    pub name: String,
}

impl ChangedResources {
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    pub fn add_table(&mut self, database: &str, schema: &str, table: &str) -> &mut Self {
        let tables = &mut self.schema_mut(database, schema).tables;
        push_unique(tables, table);
        self
    }

    pub fn add_view(&mut self, database: &str, schema: &str, view: &str) -> &mut Self {
        let views = &mut self.schema_mut(database, schema).views;
        push_unique(views, view);
        self
    }

    pub fn has_table(&self, database: &str, schema: &str, table: &str) -> bool {
        self.databases
            .iter()
            .filter(|d| d.name == database)
            .flat_map(|d| d.schemas.iter())
            .filter(|s| s.name == schema)
            .any(|s| s.tables.iter().any(|t| t.name == table))
    }

    fn schema_mut(&mut self, database: &str, schema: &str) -> &mut ChangedResourceSchema {
        let db_index = match self.databases.iter().position(|d| d.name == database) {
            Some(index) => index,
            None => {
                self.databases.push(ChangedResourceDatabase {
                    name: database.to_string(),
                    schemas: Vec::new(),
                });
                self.databases.len() - 1
            }
        };
        let schemas = &mut self.databases[db_index].schemas;
        let schema_index = match schemas.iter().position(|s| s.name == schema) {
            Some(index) => index,
            None => {
                schemas.push(ChangedResourceSchema {
                    name: schema.to_string(),
                    ..Default::default()
                });
                schemas.len() - 1
            }
        };
        &mut schemas[schema_index]
    }
}

fn push_unique(resources: &mut Vec<ChangedResource>, name: &str) {
    if !resources.iter().any(|r| r.name == name) {
        resources.push(ChangedResource {
            name: name.to_string(),
        });
    }
}

/// Field level changes to apply to a stored payload without rewriting it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PayloadPatch {
    pub revision: Option<i64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encodes_camel_case_and_skips_unset_fields() -> anyhow::Result<()> {
        let mut resources = ChangedResources::default();
        resources.add_table("db1", "public", "t1");
        let payload = ChangelogPayload {
            task_run: Some("projects/p/rollouts/1/stages/1/tasks/1/taskRuns/1".to_string()),
            ..ChangelogPayload::new(ChangelogType::Migrate).with_resources(resources)
        };

        let value: serde_json::Value = serde_json::from_str(&payload.encode()?)?;
        assert_eq!(
            value,
            json!({
                "type": "MIGRATE",
                "changedResources": {
                    "databases": [
                        {
                            "name": "db1",
                            "schemas": [ { "name": "public", "tables": [ { "name": "t1" } ] } ]
                        }
                    ]
                },
                "taskRun": "projects/p/rollouts/1/stages/1/tasks/1/taskRuns/1"
            })
        );
        Ok(())
    }

    #[test]
    fn decodes_minimal_document() -> anyhow::Result<()> {
        let payload = ChangelogPayload::decode(r#"{"type":"BASELINE"}"#)?;
        assert_eq!(payload, ChangelogPayload::new(ChangelogType::Baseline));
        Ok(())
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(ChangelogPayload::decode(r#"{"type":"SOMETHING_ELSE"}"#).is_err());
    }

    #[test]
    fn add_table_groups_by_database_and_schema() {
        let mut resources = ChangedResources::default();
        resources
            .add_table("db1", "public", "t2")
            .add_table("db1", "public", "t3")
            .add_table("db1", "public", "t2")
            .add_table("db2", "", "t1");

        assert_eq!(resources.databases.len(), 2);
        assert_eq!(resources.databases[0].schemas.len(), 1);
        assert_eq!(resources.databases[0].schemas[0].tables.len(), 2);
        assert!(resources.has_table("db1", "public", "t3"));
        assert!(resources.has_table("db2", "", "t1"));
        assert!(!resources.has_table("db2", "public", "t1"));
    }

    #[test]
    fn empty_schema_name_is_omitted() -> anyhow::Result<()> {
        let mut resources = ChangedResources::default();
        resources.add_table("mysql_db", "", "orders");
        let value = serde_json::to_value(&resources)?;
        assert_eq!(
            value,
            json!({
                "databases": [
                    { "name": "mysql_db", "schemas": [ { "tables": [ { "name": "orders" } ] } ] }
                ]
            })
        );
        Ok(())
    }
}
