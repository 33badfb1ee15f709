//! Declaration parser and resource router.
//!
//! Turns the raw files of a stable batch into declared resources grouped by
//! file (handler) and kind. Malformed declarations are reported per resource
//! or per file and never abort the batch. A declaration repeating an object
//! from earlier in the same file is a per-resource error; only the same
//! object declared in two different files fails the whole batch.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;

use super::error::{DeclarativeError, Result};
use super::ids;
use super::resource::{Declaration, DeclaredResource, ResourceKind};
use super::watcher::FileBatch;

/// A declaration that could not be turned into resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceParseError {
    /// File that holds the declaration.
    pub handler: String,
    /// Zero-based position of the declaration within the file.
    pub position: usize,
    pub kind: Option<ResourceKind>,
    pub name: Option<String>,
    pub message: String,
}

impl ResourceParseError {
    pub fn health_id(&self) -> String {
        ids::parse_error_id(&self.handler, self.position)
    }

    /// Display name for health records.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} ({}#{})", self.handler, self.position),
            None => format!("{}#{}", self.handler, self.position),
        }
    }
}

/// Resources declared by one file, by kind, in declaration order.
pub type HandlerResources = BTreeMap<ResourceKind, Vec<DeclaredResource>>;

#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub handlers: BTreeMap<String, HandlerResources>,
    pub resource_errors: Vec<ResourceParseError>,
    /// Files whose structure could not be read at all, with the reason.
    pub file_errors: BTreeMap<String, String>,
}

impl ParsedBatch {
    /// All resources of `kind` across handlers, handlers in name order.
    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &DeclaredResource> {
        self.handlers
            .values()
            .filter_map(move |by_kind| by_kind.get(&kind))
            .flatten()
    }

    /// Ids of every resource of `kind` declared in this batch.
    pub fn declared_ids(&self, kind: ResourceKind) -> HashSet<String> {
        self.resources_of(kind).map(|r| r.id.clone()).collect()
    }

    pub fn resource_count(&self) -> usize {
        self.handlers
            .values()
            .flat_map(|by_kind| by_kind.values())
            .map(Vec::len)
            .sum()
    }
}

/// Checks that every YAML document in `bytes` parses.
pub fn validate_yaml(bytes: &[u8]) -> std::result::Result<(), String> {
    for document in serde_yaml::Deserializer::from_slice(bytes) {
        serde_yaml::Value::deserialize(document).map_err(|e| e.to_string())?;
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationParser;

impl DeclarationParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses every file of a batch.
    ///
    /// Fails only when the same `(kind, id)` is declared in two files.
    pub fn parse(&self, batch: &FileBatch) -> Result<ParsedBatch> {
        let mut parsed = ParsedBatch::default();
        let mut seen: HashMap<(ResourceKind, String), String> = HashMap::new();

        for (handler, bytes) in &batch.files {
            let resources = match self.parse_file(handler, bytes, &mut parsed.resource_errors) {
                Ok(resources) => resources,
                Err(e) => {
                    log::warn!("Skipping declarations in '{}': {}", handler, e);
                    parsed.file_errors.insert(handler.clone(), e.to_string());
                    continue;
                }
            };

            let mut by_kind = HandlerResources::new();
            for resource in resources {
                let key = (resource.kind, resource.id.clone());
                if let Some(first) = seen.get(&key) {
                    return Err(DeclarativeError::DuplicateResource {
                        kind: resource.kind,
                        id: resource.id,
                        first: first.clone(),
                        second: handler.clone(),
                    });
                }
                seen.insert(key, handler.clone());
                by_kind.entry(resource.kind).or_default().push(resource);
            }
            parsed.handlers.insert(handler.clone(), by_kind);
        }

        Ok(parsed)
    }

    /// Parses one file into resources, appending per-declaration failures to
    /// `errors`. Returns an error when the file structure is unreadable.
    pub fn parse_file(
        &self,
        handler: &str,
        bytes: &[u8],
        errors: &mut Vec<ResourceParseError>,
    ) -> Result<Vec<DeclaredResource>> {
        let mut resources = Vec::new();
        let mut declared: HashSet<(ResourceKind, String)> = HashSet::new();
        let mut position = 0;

        for (index, document) in serde_yaml::Deserializer::from_slice(bytes).enumerate() {
            let value =
                serde_yaml::Value::deserialize(document).map_err(|e| DeclarativeError::ParseYaml {
                    file: handler.to_string(),
                    message: e.to_string(),
                })?;

            let declarations = match value {
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::Mapping(_) => vec![value],
                serde_yaml::Value::Sequence(items) => items,
                _ => {
                    return Err(DeclarativeError::MalformedDocument {
                        file: handler.to_string(),
                        position: index,
                    })
                }
            };

            for declaration in declarations {
                let parsed = parse_declaration(declaration.clone()).and_then(|objects| {
                    let found: Vec<DeclaredResource> = objects
                        .into_iter()
                        .map(|object| DeclaredResource::new(handler, object))
                        .collect();
                    let repeated = found
                        .iter()
                        .map(|r| (r.kind, r.id.clone()))
                        .find(|key| declared.contains(key));
                    match repeated {
                        Some((kind, id)) => Err(DeclarativeError::DeclaredTwiceInFile { kind, id }),
                        None => Ok(found),
                    }
                });
                match parsed {
                    Ok(found) => {
                        declared.extend(found.iter().map(|r| (r.kind, r.id.clone())));
                        resources.extend(found);
                    }
                    Err(e) => {
                        log::warn!(
                            "Invalid declaration #{} in '{}': {}",
                            position,
                            handler,
                            e
                        );
                        errors.push(ResourceParseError {
                            handler: handler.to_string(),
                            position,
                            kind: declared_kind(&declaration),
                            name: declared_name(&declaration),
                            message: e.to_string(),
                        });
                    }
                }
                position += 1;
            }
        }

        Ok(resources)
    }
}

fn parse_declaration(value: serde_yaml::Value) -> Result<Vec<crate::model::DeclaredObject>> {
    if !value.is_mapping() {
        return Err(DeclarativeError::NotAMapping);
    }
    let tag = value
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .ok_or(DeclarativeError::MissingKind)?;
    let kind: ResourceKind = tag
        .parse()
        .map_err(|_| DeclarativeError::UnknownKind(tag.to_string()))?;
    Declaration::from_value(kind, value)?.into_objects()
}

fn declared_kind(value: &serde_yaml::Value) -> Option<ResourceKind> {
    value
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .and_then(|k| k.parse().ok())
}

fn declared_name(value: &serde_yaml::Value) -> Option<String> {
    ["name", "issuer"]
        .iter()
        .find_map(|field| value.get(*field).and_then(serde_yaml::Value::as_str))
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(files: &[(&str, &str)]) -> FileBatch {
        FileBatch {
            files: files
                .iter()
                .map(|(name, content)| (name.to_string(), content.as_bytes().to_vec()))
                .collect(),
            invalid: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_multi_document_and_sequences() {
        let parsed = DeclarationParser::new()
            .parse(&batch(&[(
                "rbac.yaml",
                r#"
kind: AccessScope
name: Hogwarts
rules:
  includedClusters: [hogwarts]
---
- kind: PermissionSet
  name: Everything
  resources:
    - resource: Access
      access: READ_WRITE_ACCESS
- kind: Role
  name: Head Master
  permissionSet: Everything
  accessScope: Hogwarts
"#,
            )]))
            .unwrap();

        assert!(parsed.resource_errors.is_empty());
        assert_eq!(parsed.resource_count(), 3);
        let by_kind = &parsed.handlers["rbac.yaml"];
        assert_eq!(by_kind[&ResourceKind::Role][0].name, "Head Master");
        assert!(parsed
            .declared_ids(ResourceKind::PermissionSet)
            .contains(&ids::permission_set_id("Everything")));
    }

    #[test]
    fn test_bad_declaration_is_isolated() {
        let parsed = DeclarationParser::new()
            .parse(&batch(&[(
                "mixed.yaml",
                r#"
- kind: Notifier
  name: slack
  type: slack
- kind: Cluster
  name: prod
- name: no-kind
- kind: Role
  name: Broken
"#,
            )]))
            .unwrap();

        assert_eq!(parsed.resource_count(), 1);
        assert_eq!(parsed.resource_errors.len(), 3);
        let unknown = &parsed.resource_errors[0];
        assert_eq!(unknown.position, 1);
        assert_eq!(unknown.name.as_deref(), Some("prod"));
        assert!(unknown.message.contains("Cluster"));
        let broken = &parsed.resource_errors[2];
        assert_eq!(broken.kind, Some(ResourceKind::Role));
        assert_eq!(broken.position, 3);
        assert_ne!(unknown.health_id(), broken.health_id());
    }

    #[test]
    fn test_scalar_document_is_a_file_error() {
        let parsed = DeclarationParser::new()
            .parse(&batch(&[
                ("scalar.yaml", "just a string\n"),
                ("ok.yaml", "kind: Notifier\nname: email\ntype: email\n"),
            ]))
            .unwrap();
        assert!(parsed.file_errors.contains_key("scalar.yaml"));
        assert!(!parsed.handlers.contains_key("scalar.yaml"));
        assert_eq!(parsed.resource_count(), 1);
    }

    #[test]
    fn test_duplicate_across_files_fails_batch() {
        let err = DeclarationParser::new()
            .parse(&batch(&[
                ("a.yaml", "kind: Notifier\nname: slack\ntype: slack\n"),
                ("b.yaml", "kind: Notifier\nname: slack\ntype: webhook\n"),
            ]))
            .unwrap_err();
        match err {
            DeclarativeError::DuplicateResource {
                kind,
                first,
                second,
                ..
            } => {
                assert_eq!(kind, ResourceKind::Notifier);
                assert_eq!(first, "a.yaml");
                assert_eq!(second, "b.yaml");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_within_file_is_a_resource_error() {
        let parsed = DeclarationParser::new()
            .parse(&batch(&[
                (
                    "notifiers.yaml",
                    r#"
- kind: Notifier
  name: slack
  type: slack
- kind: Notifier
  name: slack
  type: webhook
"#,
                ),
                ("other.yaml", "kind: Notifier
name: email
type: email
"),
            ]))
            .unwrap();

        assert_eq!(parsed.resource_count(), 2);
        assert_eq!(parsed.resource_errors.len(), 1);
        let error = &parsed.resource_errors[0];
        assert_eq!(error.handler, "notifiers.yaml");
        assert_eq!(error.position, 1);
        assert_eq!(error.kind, Some(ResourceKind::Notifier));
        assert!(error.message.contains("already declared"));
        let kept = &parsed.handlers["notifiers.yaml"][&ResourceKind::Notifier][0];
        assert_eq!(kept.object.kind(), ResourceKind::Notifier);
    }

    #[test]
    fn test_provider_restating_default_group_is_accepted() {
        let parsed = DeclarationParser::new()
            .parse(&batch(&[(
                "provider.yaml",
                r#"
kind: AuthProvider
name: Owlery
uiEndpoint: hogwarts.example.com
minimumRole: Head Master
groups:
  - key: ""
    value: ""
    role: Head Master
"#,
            )]))
            .unwrap();
        assert!(parsed.resource_errors.is_empty());
        assert_eq!(parsed.declared_ids(ResourceKind::Group).len(), 1);
    }

    #[test]
    fn test_empty_documents_are_ignored() {
        let parsed = DeclarationParser::new()
            .parse(&batch(&[("empty.yaml", "---\n---\n")]))
            .unwrap();
        assert_eq!(parsed.resource_count(), 0);
        assert!(parsed.file_errors.is_empty());
    }

    #[test]
    fn test_validate_yaml() {
        assert!(validate_yaml(b"kind: Role\nname: a\n").is_ok());
        assert!(validate_yaml(b"kind: [unclosed\n").is_err());
    }
}
