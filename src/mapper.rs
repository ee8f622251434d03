use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::MigrationError;
use crate::model::destination::{FieldPatch, FieldPatchSet};
use crate::model::source::{SourceIssue, SourceUser};
use crate::providers::FieldTracker;
use crate::retry::RetryPolicy;

const COMPONENTS_FIELD: &str = "components";

/// Sections of the mapping file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Users,
    Priorities,
    Types,
    Statuses,
    Relationships,
    CustomFields,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Users,
        Section::Priorities,
        Section::Types,
        Section::Statuses,
        Section::Relationships,
        Section::CustomFields,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Users => "users",
            Section::Priorities => "priorities",
            Section::Types => "types",
            Section::Statuses => "statuses",
            Section::Relationships => "relationships",
            Section::CustomFields => "custom_fields",
        }
    }

    /// Custom field keys are attribute paths and keep their case.
    fn fold(&self, key: &str) -> String {
        match self {
            Section::CustomFields => key.to_string(),
            _ => key.to_lowercase(),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .with_context(|| format!("Unknown section: {s}"))
    }
}

/// Static translation tables from source values to destination values.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    sections: BTreeMap<Section, BTreeMap<String, String>>,
}

impl MappingTable {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let document: toml::Table = toml::from_str(contents).context("Invalid mapping TOML")?;
        let mut table = MappingTable::default();
        for (name, entries) in document {
            let section: Section = name.parse()?;
            let toml::Value::Table(entries) = entries else {
                bail!("Section '{name}' must be a table of key = \"value\" pairs");
            };
            for (key, value) in entries {
                let value = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Integer(i) => i.to_string(),
                    other => bail!("Value of '{key}' in section '{name}' must be a string, got {other}"),
                };
                table.insert(section, &key, value);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, section: Section, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section)
            .or_default()
            .insert(section.fold(key), value.into());
    }

    pub fn translate(&self, section: Section, key: &str) -> Result<&str, MigrationError> {
        let folded = section.fold(key);
        self.sections
            .get(&section)
            .and_then(|entries| entries.get(&folded))
            .map(String::as_str)
            .ok_or(MigrationError::UnmappedValue {
                table: section.as_str(),
                key: folded,
            })
    }

    /// `(source path, destination field)` pairs in path order.
    pub fn custom_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sections
            .get(&Section::CustomFields)
            .into_iter()
            .flat_map(|entries| entries.iter())
            .map(|(path, field)| (path.as_str(), field.as_str()))
    }

    pub fn len(&self, section: Section) -> usize {
        self.sections.get(&section).map_or(0, BTreeMap::len)
    }
}

pub fn load_mapping(path: &Path) -> Result<MappingTable> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Can't read mapping file: '{}'", path.display()))?;
    let table = MappingTable::from_toml_str(&contents)
        .with_context(|| format!("Failed to parse mapping file '{}'", path.display()))?;
    info!(
        path = %path.display(),
        users = table.len(Section::Users),
        statuses = table.len(Section::Statuses),
        custom_fields = table.len(Section::CustomFields),
        "loaded field mapping"
    );
    Ok(table)
}

/// Read access to a tree of named fields, as needed to walk a dotted path.
pub trait FieldAccess: Sized {
    fn field(&self, name: &str) -> Option<&Self>;
    fn elements(&self) -> Option<&[Self]>;
    fn is_null(&self) -> bool;
}

impl FieldAccess for Value {
    fn field(&self, name: &str) -> Option<&Value> {
        self.as_object()?.get(name)
    }

    fn elements(&self) -> Option<&[Value]> {
        self.as_array().map(Vec::as_slice)
    }

    fn is_null(&self) -> bool {
        Value::is_null(self)
    }
}

#[derive(Debug, PartialEq)]
pub enum Resolved<'a, T> {
    Missing,
    Scalar(&'a T),
    Sequence(Vec<&'a T>),
}

impl<'a, T: FieldAccess> Resolved<'a, T> {
    fn from_node(node: Option<&'a T>) -> Self {
        match node {
            None => Resolved::Missing,
            Some(node) if node.is_null() => Resolved::Missing,
            Some(node) => match node.elements() {
                Some(items) => Resolved::Sequence(items.iter().filter(|i| !i.is_null()).collect()),
                None => Resolved::Scalar(node),
            },
        }
    }

    fn into_vec(self) -> Vec<&'a T> {
        match self {
            Resolved::Missing => Vec::new(),
            Resolved::Scalar(node) => vec![node],
            Resolved::Sequence(items) => items,
        }
    }
}

/// Walk a dot-separated path from `root`. Once a sequence is met, the rest
/// of the path applies to each element; nulls are dropped and nested
/// sequences flattened.
pub fn resolve_path<'a, T: FieldAccess>(root: &'a T, path: &str) -> Resolved<'a, T> {
    let mut current = Resolved::from_node(Some(root));
    for segment in path.split('.') {
        current = match current {
            Resolved::Missing => return Resolved::Missing,
            Resolved::Scalar(node) => Resolved::from_node(node.field(segment)),
            Resolved::Sequence(items) => Resolved::Sequence(
                items
                    .into_iter()
                    .flat_map(|item| Resolved::from_node(item.field(segment)).into_vec())
                    .collect(),
            ),
        };
    }
    current
}

/// Add/remove patch turning `current` into `desired`, or `None` when they
/// already hold the same values.
pub fn diff_values(desired: &[Value], current: &[Value]) -> Option<FieldPatch> {
    let add = distinct(desired.iter().filter(|v| !current.contains(v)));
    let remove = distinct(current.iter().filter(|v| !desired.contains(v)));
    if add.is_empty() && remove.is_empty() {
        return None;
    }
    Some(FieldPatch::Diff { add, remove })
}

fn distinct<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

/// Component references come back as objects carrying an `id`.
fn component_id_of(value: &Value) -> Option<u64> {
    let id = value.get("id").unwrap_or(value);
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Translates source values into destination values.
///
/// Owns the run-scoped caches of the destination user and component
/// directories; both are fetched on first use and never refreshed.
pub struct FieldMapper {
    table: MappingTable,
    users: OnceCell<HashMap<String, u64>>,
    components: OnceCell<HashMap<String, u64>>,
}

impl FieldMapper {
    pub fn new(table: MappingTable) -> Self {
        Self {
            table,
            users: OnceCell::new(),
            components: OnceCell::new(),
        }
    }

    pub fn translate(&self, section: Section, key: &str) -> Result<String, MigrationError> {
        self.table.translate(section, key).map(str::to_string)
    }

    pub fn issue_type(&self, name: &str) -> Result<String, MigrationError> {
        self.translate(Section::Types, name)
    }

    pub fn priority(&self, name: &str) -> Result<String, MigrationError> {
        self.translate(Section::Priorities, name)
    }

    pub fn status(&self, name: &str) -> Result<String, MigrationError> {
        self.translate(Section::Statuses, name)
    }

    pub fn relationship(&self, name: &str) -> Result<String, MigrationError> {
        self.translate(Section::Relationships, name)
    }

    /// Destination uid for a source user; `None` when the source has no user.
    pub async fn resolve_user(
        &self,
        user: Option<&SourceUser>,
        tracker: &dyn FieldTracker,
        retry: &RetryPolicy,
    ) -> Result<Option<u64>, MigrationError> {
        let Some(user) = user else {
            return Ok(None);
        };
        let login = self.translate(Section::Users, &user.display_name)?;
        let directory = self.user_directory(tracker, retry).await?;
        directory
            .get(&login)
            .copied()
            .map(Some)
            .ok_or(MigrationError::UnknownUser(login))
    }

    async fn user_directory(
        &self,
        tracker: &dyn FieldTracker,
        retry: &RetryPolicy,
    ) -> Result<&HashMap<String, u64>, MigrationError> {
        self.users
            .get_or_try_init(|| async {
                let users = retry
                    .run("fetch user directory", || async { Ok(tracker.users().await?) })
                    .await?;
                info!(count = users.len(), "fetched destination user directory");
                let mut directory = HashMap::new();
                for user in users {
                    if let Some(display) = user.display {
                        directory.entry(display).or_insert(user.uid);
                    }
                    directory.insert(user.login, user.uid);
                }
                Ok(directory)
            })
            .await
    }

    async fn component_directory(
        &self,
        tracker: &dyn FieldTracker,
        retry: &RetryPolicy,
    ) -> Result<&HashMap<String, u64>, MigrationError> {
        self.components
            .get_or_try_init(|| async {
                let components = retry
                    .run("fetch component directory", || async {
                        Ok(tracker.components().await?)
                    })
                    .await?;
                info!(count = components.len(), "fetched destination component directory");
                Ok(components.into_iter().map(|c| (c.name, c.id)).collect())
            })
            .await
    }

    /// Patches bringing the destination custom fields in line with `source`.
    ///
    /// `current` holds the destination issue's present field values.
    pub async fn custom_field_patches(
        &self,
        source: &SourceIssue,
        current: &Value,
        tracker: &dyn FieldTracker,
        retry: &RetryPolicy,
    ) -> Result<FieldPatchSet, MigrationError> {
        let mut patches = FieldPatchSet::default();

        for (path, field) in self.table.custom_fields() {
            let values = match resolve_path(&source.fields, path) {
                Resolved::Missing => continue,
                Resolved::Scalar(value) => {
                    patches.insert(field, FieldPatch::Replace(value.clone()));
                    continue;
                }
                Resolved::Sequence(values) => values,
            };

            let existing = current
                .get(field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let (desired, existing) = if field == COMPONENTS_FIELD {
                let directory = self.component_directory(tracker, retry).await?;
                let desired = values
                    .iter()
                    .map(|value| {
                        let name = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                        directory
                            .get(&name)
                            .map(|id| Value::from(*id))
                            .ok_or(MigrationError::UnmappedValue {
                                table: COMPONENTS_FIELD,
                                key: name,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let existing = existing
                    .iter()
                    .filter_map(component_id_of)
                    .map(Value::from)
                    .collect::<Vec<_>>();
                (desired, existing)
            } else {
                (values.into_iter().cloned().collect::<Vec<_>>(), existing)
            };

            match diff_values(&desired, &existing) {
                Some(patch) => patches.insert(field, patch),
                None => debug!(field, "multi-valued field already up to date"),
            }
        }

        Ok(patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::destination::{DirectoryComponent, DirectoryUser};
    use crate::providers::tests::{source_issue, FakeTracker};
    use serde_json::json;

    fn table() -> MappingTable {
        MappingTable::from_toml_str(
            r#"
            [users]
            "John Smith" = "jsmith"
            "Ghost" = "ghost"

            [types]
            Bug = "bug"
            Epic = "epic"

            [priorities]
            Major = "normal"

            [statuses]
            Open = "open"
            "In Progress" = "inProgress"

            [relationships]
            blocks = "depends on"

            [custom_fields]
            "labels" = "tags"
            "components.name" = "components"
            "customfield_10016" = "storyPoints"
            "fixVersions.name" = "fixVersions"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let table = table();
        assert_eq!(table.translate(Section::Types, "BUG").unwrap(), "bug");
        assert_eq!(table.translate(Section::Statuses, "in progress").unwrap(), "inProgress");
        assert_eq!(table.translate(Section::Users, "JOHN SMITH").unwrap(), "jsmith");
    }

    #[test]
    fn custom_field_paths_keep_case() {
        let table = table();
        assert_eq!(table.translate(Section::CustomFields, "labels").unwrap(), "tags");
        assert!(table.translate(Section::CustomFields, "LABELS").is_err());
    }

    #[test]
    fn unmapped_values_fail_loudly() {
        let err = table().translate(Section::Types, "Story").unwrap_err();
        match err {
            MigrationError::UnmappedValue { table, key } => {
                assert_eq!(table, "types");
                assert_eq!(key, "story");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_mapped_value_translates() {
        let mapper = FieldMapper::new(table());
        for name in ["Bug", "Epic"] {
            assert!(mapper.issue_type(name).is_ok());
        }
        assert_eq!(mapper.priority("major").unwrap(), "normal");
        assert_eq!(mapper.status("Open").unwrap(), "open");
        assert_eq!(mapper.relationship("Blocks").unwrap(), "depends on");
        assert!(mapper.relationship("clones").is_err());
    }

    #[test]
    fn unknown_section_is_rejected() {
        let err = MappingTable::from_toml_str("[resolutions]\nDone = \"fixed\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown section: resolutions"));
    }

    #[test]
    fn non_string_value_is_rejected() {
        assert!(MappingTable::from_toml_str("[types]\nBug = [\"bug\"]\n").is_err());
    }

    #[test]
    fn load_mapping_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.toml");
        std::fs::write(&path, "[statuses]\nDone = \"closed\"\n").unwrap();
        let table = load_mapping(&path).unwrap();
        assert_eq!(table.translate(Section::Statuses, "done").unwrap(), "closed");
        assert!(load_mapping(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn resolves_nested_scalar() {
        let fields = json!({ "reporter": { "name": "jdoe" } });
        assert_eq!(resolve_path(&fields, "reporter.name"), Resolved::Scalar(&json!("jdoe")));
        assert_eq!(resolve_path(&fields, "reporter.email"), Resolved::Missing);
        assert_eq!(resolve_path(&fields, "assignee.name"), Resolved::Missing);
    }

    #[test]
    fn resolves_through_sequences_and_drops_nulls() {
        let fields = json!({
            "components": [
                { "name": "Backend" },
                { "id": "3" },
                { "name": null },
                { "name": "Frontend" }
            ]
        });
        match resolve_path(&fields, "components.name") {
            Resolved::Sequence(values) => {
                assert_eq!(values, vec![&json!("Backend"), &json!("Frontend")]);
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn flattens_nested_sequences() {
        let fields = json!({
            "sprints": [
                { "goals": [{ "name": "a" }, { "name": "b" }] },
                { "goals": [{ "name": "c" }] }
            ]
        });
        match resolve_path(&fields, "sprints.goals.name") {
            Resolved::Sequence(values) => {
                assert_eq!(values, vec![&json!("a"), &json!("b"), &json!("c")]);
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn null_field_is_missing() {
        let fields = json!({ "customfield_10016": null });
        assert_eq!(resolve_path(&fields, "customfield_10016"), Resolved::Missing);
    }

    #[test]
    fn diff_adds_and_removes() {
        let current = vec![json!(1), json!(2), json!(3)];
        let desired = vec![json!(2), json!(3), json!(4)];
        assert_eq!(
            diff_values(&desired, &current),
            Some(FieldPatch::Diff {
                add: vec![json!(4)],
                remove: vec![json!(1)],
            })
        );
    }

    #[test]
    fn diff_of_equal_sets_is_empty() {
        let current = vec![json!(3), json!(1), json!(2)];
        let desired = vec![json!(1), json!(2), json!(3), json!(1)];
        assert_eq!(diff_values(&desired, &current), None);
    }

    #[tokio::test]
    async fn resolves_users_through_cached_directory() {
        let tracker = FakeTracker::new("PROJ");
        tracker.add_user(DirectoryUser {
            uid: 1130000012345,
            login: "jsmith".into(),
            display: Some("John Smith".into()),
        });
        let mapper = FieldMapper::new(table());
        let retry = RetryPolicy::immediate(1);
        let user = SourceUser {
            display_name: "John Smith".into(),
        };

        let first = mapper.resolve_user(Some(&user), &tracker, &retry).await.unwrap();
        let second = mapper.resolve_user(Some(&user), &tracker, &retry).await.unwrap();

        assert_eq!(first, Some(1130000012345));
        assert_eq!(second, first);
        assert_eq!(tracker.calls("users"), 1);
    }

    #[tokio::test]
    async fn absent_user_is_not_an_error() {
        let tracker = FakeTracker::new("PROJ");
        let mapper = FieldMapper::new(table());
        let resolved = mapper
            .resolve_user(None, &tracker, &RetryPolicy::immediate(1))
            .await
            .unwrap();
        assert_eq!(resolved, None);
        assert_eq!(tracker.calls("users"), 0);
    }

    #[tokio::test]
    async fn user_missing_from_directory_is_fatal() {
        let tracker = FakeTracker::new("PROJ");
        let mapper = FieldMapper::new(table());
        let user = SourceUser {
            display_name: "Ghost".into(),
        };
        let err = mapper
            .resolve_user(Some(&user), &tracker, &RetryPolicy::immediate(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnknownUser(login) if login == "ghost"));
    }

    #[tokio::test]
    async fn unmapped_user_is_fatal() {
        let tracker = FakeTracker::new("PROJ");
        let mapper = FieldMapper::new(table());
        let user = SourceUser {
            display_name: "Stranger".into(),
        };
        let err = mapper
            .resolve_user(Some(&user), &tracker, &RetryPolicy::immediate(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnmappedValue { table: "users", .. }));
    }

    #[tokio::test]
    async fn builds_custom_field_patches() {
        let tracker = FakeTracker::new("PROJ");
        tracker.add_component(DirectoryComponent { id: 1, name: "Backend".into() });
        tracker.add_component(DirectoryComponent { id: 2, name: "Frontend".into() });
        tracker.add_component(DirectoryComponent { id: 3, name: "Docs".into() });
        let mapper = FieldMapper::new(table());

        let mut issue = source_issue("PROJ-1");
        issue.fields = json!({
            "labels": ["backend", "urgent"],
            "components": [{ "name": "Backend" }, { "name": "Frontend" }],
            "customfield_10016": 5,
            "fixVersions": []
        });
        let current = json!({
            "tags": ["urgent", "legacy"],
            "components": [
                { "id": "1", "display": "Backend" },
                { "id": "3", "display": "Docs" }
            ]
        });

        let patches = mapper
            .custom_field_patches(&issue, &current, &tracker, &RetryPolicy::immediate(1))
            .await
            .unwrap();

        assert_eq!(
            patches.get("tags"),
            Some(&FieldPatch::Diff {
                add: vec![json!("backend")],
                remove: vec![json!("legacy")],
            })
        );
        assert_eq!(
            patches.get("components"),
            Some(&FieldPatch::Diff {
                add: vec![json!(2)],
                remove: vec![json!(3)],
            })
        );
        assert_eq!(patches.get("storyPoints"), Some(&FieldPatch::Replace(json!(5))));
        // Empty on both sides: nothing to do.
        assert_eq!(patches.get("fixVersions"), None);
        assert_eq!(patches.len(), 3);
    }

    #[tokio::test]
    async fn unknown_component_is_fatal() {
        let tracker = FakeTracker::new("PROJ");
        let mapper = FieldMapper::new(table());
        let mut issue = source_issue("PROJ-1");
        issue.fields = json!({ "components": [{ "name": "Mystery" }] });

        let err = mapper
            .custom_field_patches(&issue, &json!({}), &tracker, &RetryPolicy::immediate(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnmappedValue { table: "components", .. }));
    }

    #[tokio::test]
    async fn up_to_date_fields_produce_no_patch() {
        let tracker = FakeTracker::new("PROJ");
        let mapper = FieldMapper::new(table());
        let mut issue = source_issue("PROJ-1");
        issue.fields = json!({ "labels": ["a", "b"] });

        let patches = mapper
            .custom_field_patches(
                &issue,
                &json!({ "tags": ["b", "a"] }),
                &tracker,
                &RetryPolicy::immediate(1),
            )
            .await
            .unwrap();
        assert!(patches.is_empty());
        assert_eq!(tracker.calls("components"), 0);
    }
}
