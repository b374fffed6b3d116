//! JSON graph snapshots: data-only bundles for driving a registry without a
//! JavaScript engine.
//!
//! ## Format
//!
//! ```json
//! {
//!   "modules": {
//!     "server.js": { "esm": true, "render": true },
//!     "page.js":   { "exports": { "title": "Home" }, "requires": ["layout.js"] },
//!     "broken.js": { "throws": "SyntaxError: Unexpected token" }
//!   }
//! }
//! ```
//!
//! A hot-update patch file uses the same format.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::rc::Rc;

use crate::error::Error;
use crate::graph::{HotPatch, InputGraph, Loader};
use crate::record::{ModuleId, ModuleRecord};
use crate::registry::ModuleRegistry;
use crate::value::{Function, Value};

/// One module of a snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleSnapshot {
    pub esm: bool,
    pub exports: serde_json::Map<String, serde_json::Value>,
    /// Required, in order, before exports are populated.
    pub requires: Vec<ModuleId>,
    /// Export an echo `render` that answers with the route metadata as JSON.
    pub render: bool,
    /// Fail with this message instead of populating exports.
    pub throws: Option<String>,
}

/// A whole snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphSnapshot {
    pub modules: IndexMap<ModuleId, ModuleSnapshot>,
}

impl GraphSnapshot {
    pub fn parse(source: &str) -> Result<Self, Error> {
        serde_json::from_str(source).map_err(|e| Error::snapshot(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::snapshot(format!("{}: {e}", path.display())))?;
        Self::parse(&source)
    }

    #[must_use]
    pub fn into_graph(self) -> InputGraph {
        self.into_patch().into_iter().collect()
    }

    #[must_use]
    pub fn into_patch(self) -> HotPatch {
        self.modules
            .into_iter()
            .map(|(id, module)| (id, Rc::new(SnapshotLoader(module)) as Rc<dyn Loader>))
            .collect()
    }
}

/// Loader backed by a [`ModuleSnapshot`].
pub struct SnapshotLoader(pub ModuleSnapshot);

impl Loader for SnapshotLoader {
    fn execute(&self, registry: &ModuleRegistry, module: &ModuleRecord) -> Result<(), Error> {
        let snapshot = &self.0;
        if let Some(message) = &snapshot.throws {
            return Err(Error::thrown(message.clone()));
        }

        module.set_esm(snapshot.esm);
        for dep in &snapshot.requires {
            registry.require(module, dep, None)?;
        }

        let exports = module.exports();
        for (name, value) in &snapshot.exports {
            exports.set(name.clone(), Value::from_json(value));
        }
        if snapshot.render {
            exports.set("render", echo_render());
        }
        Ok(())
    }
}

/// `render(req, meta)` that responds with `{method, uri, meta}` as JSON.
fn echo_render() -> Function {
    Function::new("render", |args| {
        let Some(Value::Request(req)) = args.first() else {
            return Err(Error::type_error("render expects a Request"));
        };
        let meta = args.get(1).cloned().unwrap_or_default();
        let body = serde_json::json!({
            "method": req.method().as_str(),
            "uri": req.uri().to_string(),
            "meta": meta.to_json(),
        });

        http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(body.to_string()))
            .map(Value::from)
            .map_err(|e| Error::thrown(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BakeConfig;
    use crate::registry::LoadMode;
    use crate::server::RouteModules;
    use serde_json::json;

    const SNAPSHOT: &str = r#"{
        "modules": {
            "server.js": { "esm": true, "render": true },
            "layout.js": { "exports": { "name": "root" } },
            "page.js": { "esm": true, "exports": { "title": "Home" }, "requires": ["layout.js"] },
            "broken.js": { "throws": "SyntaxError: Unexpected token" }
        }
    }"#;

    #[test]
    fn test_parse_keeps_order() {
        let snapshot = GraphSnapshot::parse(SNAPSHOT).unwrap();
        let ids: Vec<_> = snapshot.modules.keys().cloned().collect();

        assert_eq!(ids, vec!["server.js", "layout.js", "page.js", "broken.js"]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = GraphSnapshot::parse(r#"{"modules": {"a": {"export": {}}}}"#).unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }

    #[test]
    fn test_loader_populates_and_requires() {
        let graph = GraphSnapshot::parse(SNAPSHOT).unwrap().into_graph();
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph);

        let page = reg.load_module("page.js", LoadMode::AssertPresent).unwrap();
        assert!(page.is_esm());
        assert_eq!(Value::Object(page.exports()).to_json(), json!({"title": "Home"}));

        let layout = reg.lookup("layout.js").unwrap();
        assert_eq!(layout.dependent_ids(), vec!["page.js"]);
        assert!(!layout.has_update_callback("page.js"));
    }

    #[test]
    fn test_loader_throws() {
        let graph = GraphSnapshot::parse(SNAPSHOT).unwrap().into_graph();
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph);

        let err = reg.load_module("broken.js", LoadMode::AssertPresent).unwrap_err();
        assert_eq!(err.to_string(), "SyntaxError: Unexpected token");
    }

    #[test]
    fn test_echo_render() {
        let graph = GraphSnapshot::parse(SNAPSHOT).unwrap().into_graph();
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph);
        let req = http::Request::builder()
            .uri("/blog/hello")
            .body(Bytes::new())
            .unwrap();
        let route = RouteModules::new("page.js").with_layout("layout.js");

        let res = futures::executor::block_on(reg.render_route(req, &route, None)).unwrap();
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();

        assert_eq!(body["uri"], "/blog/hello");
        assert_eq!(body["meta"]["pageModule"], json!({"title": "Home"}));
        assert_eq!(body["meta"]["layouts"][0]["name"], "root");
        assert_eq!(body["meta"]["scripts"], json!(["/_bun/client.js"]));
        assert_eq!(body["meta"]["params"], json!(null));
    }
}
