//! Server and client component manifests.
//!
//! Both tables are live [`Object`]s: the same objects are exported by the
//! `bun:bake/server` and `bun:bake/client` synthetic modules, so application
//! code observes every update without re-importing.
//!
//! Server manifest keys are `"{id}#{exportName}"`, for both insertion and
//! removal.

use indexmap::IndexMap;
use serde::Serialize;

use crate::value::{Object, Value};

/// Specifier prefix the client manifest uses to point at SSR modules.
pub const SSR_SPECIFIER_PREFIX: &str = "ssr:";

/// Key of one component export in the server manifest.
#[must_use]
pub fn server_manifest_key(id: &str, export_name: &str) -> String {
    format!("{id}#{export_name}")
}

/// `serverManifest[key]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerManifestEntry {
    pub id: String,
    pub name: String,
    /// Always empty; chunk splitting is not implemented.
    pub chunks: Vec<String>,
}

impl ServerManifestEntry {
    fn to_value(&self) -> Value {
        Value::Object(Object::from_entries([
            ("id", Value::from(self.id.as_str())),
            ("name", Value::from(self.name.as_str())),
            (
                "chunks",
                Value::Array(self.chunks.iter().map(|c| Value::from(c.as_str())).collect()),
            ),
        ]))
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let chunks = match obj.get("chunks")? {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => return None,
        };
        Some(Self {
            id: obj.get("id")?.as_str()?.to_string(),
            name: obj.get("name")?.as_str()?.to_string(),
            chunks,
        })
    }
}

/// `clientManifest[id][name]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientManifestEntry {
    pub specifier: String,
    pub name: String,
}

impl ClientManifestEntry {
    fn to_value(&self) -> Value {
        Value::Object(Object::from_entries([
            ("specifier", Value::from(self.specifier.as_str())),
            ("name", Value::from(self.name.as_str())),
        ]))
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            specifier: obj.get("specifier")?.as_str()?.to_string(),
            name: obj.get("name")?.as_str()?.to_string(),
        })
    }
}

/// The pair of manifests owned by one registry.
#[derive(Debug, Clone, Default)]
pub struct Manifests {
    server: Object,
    client: Object,
}

impl Manifests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live `serverManifest` object.
    #[must_use]
    pub fn server_manifest(&self) -> Object {
        self.server.clone()
    }

    /// The live `clientManifest` object.
    #[must_use]
    pub fn client_manifest(&self) -> Object {
        self.client.clone()
    }

    /// Record every export of component module `id`.
    ///
    /// Entries from a previous registration of `id` are removed first, so an
    /// export that disappeared across an update does not linger.
    pub fn add_component<S: AsRef<str>>(&self, id: &str, export_names: &[S]) {
        self.remove_component(id);

        let exports = Object::new();
        for name in export_names {
            let name = name.as_ref();
            let server_entry = ServerManifestEntry {
                id: id.to_string(),
                name: name.to_string(),
                chunks: Vec::new(),
            };
            self.server
                .set(server_manifest_key(id, name), server_entry.to_value());

            let client_entry = ClientManifestEntry {
                specifier: format!("{SSR_SPECIFIER_PREFIX}{id}"),
                name: name.to_string(),
            };
            exports.set(name, client_entry.to_value());
        }
        self.client.set(id, exports);
    }

    /// Remove component `id` from both manifests. Returns the number of
    /// server manifest entries removed.
    pub fn remove_component(&self, id: &str) -> usize {
        let Some(Value::Object(exports)) = self.client.remove(id) else {
            return 0;
        };
        exports
            .keys()
            .iter()
            .filter(|name| self.server.remove(&server_manifest_key(id, name)).is_some())
            .count()
    }

    #[must_use]
    pub fn server_entry(&self, key: &str) -> Option<ServerManifestEntry> {
        ServerManifestEntry::from_value(&self.server.get(key)?)
    }

    #[must_use]
    pub fn client_entries(&self, id: &str) -> Option<IndexMap<String, ClientManifestEntry>> {
        let exports = self.client.get(id)?;
        let exports = exports.as_object()?;
        Some(
            exports
                .entries()
                .into_iter()
                .filter_map(|(name, v)| ClientManifestEntry::from_value(&v).map(|e| (name, e)))
                .collect(),
        )
    }

    /// Component ids present in the client manifest.
    #[must_use]
    pub fn component_ids(&self) -> Vec<String> {
        self.client.keys()
    }

    #[must_use]
    pub fn server_keys(&self) -> Vec<String> {
        self.server.keys()
    }

    /// Both manifests as JSON, for diagnostics.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "serverManifest": Value::Object(self.server.clone()).to_json(),
            "clientManifest": Value::Object(self.client.clone()).to_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_component_entries() {
        let manifests = Manifests::new();
        manifests.add_component("comp1", &["Foo", "Bar"]);

        let entries = manifests.client_entries("comp1").unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["Foo", "Bar"]);
        assert_eq!(
            entries["Foo"],
            ClientManifestEntry {
                specifier: "ssr:comp1".to_string(),
                name: "Foo".to_string(),
            }
        );

        assert_eq!(manifests.server_keys(), vec!["comp1#Foo", "comp1#Bar"]);
        assert_eq!(
            manifests.server_entry("comp1#Bar").unwrap(),
            ServerManifestEntry {
                id: "comp1".to_string(),
                name: "Bar".to_string(),
                chunks: Vec::new(),
            }
        );
    }

    #[test]
    fn test_remove_is_symmetric_with_add() {
        let manifests = Manifests::new();
        manifests.add_component("a", &["X", "Y"]);
        manifests.add_component("b", &["Z"]);

        assert_eq!(manifests.remove_component("a"), 2);
        assert_eq!(manifests.server_keys(), vec!["b#Z"]);
        assert_eq!(manifests.component_ids(), vec!["b"]);
        assert_eq!(manifests.remove_component("a"), 0);
    }

    #[test]
    fn test_re_adding_drops_stale_exports() {
        let manifests = Manifests::new();
        manifests.add_component("a", &["Old", "Kept"]);
        manifests.add_component("a", &["Kept"]);

        assert_eq!(manifests.server_keys(), vec!["a#Kept"]);
        assert_eq!(manifests.client_entries("a").unwrap().len(), 1);
    }

    #[test]
    fn test_live_objects_are_shared() {
        let manifests = Manifests::new();
        let server = manifests.server_manifest();
        manifests.add_component("c", &["default"]);

        assert!(server.contains_key("c#default"));
    }
}
