//! The module registry: lazy, memoized, cycle-safe module instantiation.
//!
//! A registry is an explicit context created by [`ModuleRegistry::bootstrap`];
//! separate registries (for example the server graph and the SSR graph) never
//! share records.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::config::{BakeConfig, Side};
use crate::error::Error;
use crate::graph::InputGraph;
use crate::hmr::EventBus;
use crate::manifest::Manifests;
use crate::record::{ModuleId, ModuleRecord, ModuleState, UpdateCallback};
use crate::value::{Function, Object, Promise, Value};

/// Runtime helpers the bundler emits imports of.
pub const WRAP_MODULE: &str = "bun:wrap";
/// Server-side manifests module.
pub const SERVER_MODULE: &str = "bun:bake/server";
/// Client-side manifests module.
pub const CLIENT_MODULE: &str = "bun:bake/client";

/// How a missing loader is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// A statically known import; a miss is a bundler bug.
    AssertPresent,
    /// A user `import()`; a miss means the specifier was not statically
    /// enumerable.
    UserDynamic,
}

/// Options of a dynamic `import(specifier, options)`.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Import attributes (`with: { type: "json" }`).
    pub with: IndexMap<String, String>,
}

/// Process-wide map of module id to live record, plus the input graph and
/// manifests it serves.
pub struct ModuleRegistry {
    config: BakeConfig,
    graph: InputGraph,
    records: RefCell<HashMap<ModuleId, Rc<ModuleRecord>>>,
    manifests: Manifests,
    pub(crate) events: EventBus,
    server_side_reload: Rc<RefCell<Option<Function>>>,
}

impl ModuleRegistry {
    /// Create a registry over `graph` and register the synthetic modules for
    /// `config.side` before any user code runs.
    #[must_use]
    pub fn bootstrap(config: BakeConfig, graph: InputGraph) -> Self {
        let registry = Self {
            config,
            graph,
            records: RefCell::new(HashMap::new()),
            manifests: Manifests::new(),
            events: EventBus::default(),
            server_side_reload: Rc::new(RefCell::new(None)),
        };

        registry.register_synthetic(WRAP_MODULE, wrap_helpers());
        match registry.config.side {
            Side::Server => {
                registry.register_synthetic(
                    SERVER_MODULE,
                    Object::from_entries([
                        ("serverManifest", Value::Object(registry.manifests.server_manifest())),
                        ("clientManifest", Value::Object(registry.manifests.client_manifest())),
                    ]),
                );
            }
            Side::Client => {
                let slot = Rc::clone(&registry.server_side_reload);
                let on_server_side_reload = Function::new("onServerSideReload", move |args| {
                    match args.first() {
                        Some(Value::Function(cb)) => *slot.borrow_mut() = Some(cb.clone()),
                        Some(v) if v.is_nullish() => *slot.borrow_mut() = None,
                        None => *slot.borrow_mut() = None,
                        Some(other) => {
                            return Err(Error::type_error(format!(
                                "onServerSideReload expects a function, got {}",
                                other.type_name()
                            )))
                        }
                    }
                    Ok(Value::Undefined)
                });
                registry.register_synthetic(
                    CLIENT_MODULE,
                    Object::from_entries([
                        ("clientManifest", Value::Object(registry.manifests.client_manifest())),
                        ("onServerSideReload", Value::Function(on_server_side_reload)),
                    ]),
                );
            }
        }

        debug!(
            side = registry.config.side.as_str(),
            modules = registry.graph.len(),
            "Registry bootstrapped"
        );
        registry
    }

    fn register_synthetic(&self, id: &str, exports: Object) {
        self.graph.insert_synthetic(id);
        self.records
            .borrow_mut()
            .insert(id.to_string(), Rc::new(ModuleRecord::synthetic(id, exports)));
    }

    #[must_use]
    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    #[must_use]
    pub fn graph(&self) -> &InputGraph {
        &self.graph
    }

    #[must_use]
    pub fn manifests(&self) -> &Manifests {
        &self.manifests
    }

    /// The live record for `id`, if one was ever created. No side effects.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Rc<ModuleRecord>> {
        self.records.borrow().get(id).cloned()
    }

    /// Ids with a live record, sorted.
    #[must_use]
    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self.records.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Instantiate `id`, or return its existing record.
    ///
    /// The record is inserted before the loader runs, so a cyclic load of the
    /// same id from inside the loader observes the partially populated record.
    /// A failed initial load is cached: later loads return the same error
    /// without running the loader again.
    pub fn load_module(&self, id: &str, mode: LoadMode) -> Result<Rc<ModuleRecord>, Error> {
        if let Some(record) = self.lookup(id) {
            return match record.state() {
                ModuleState::Failed => Err(record
                    .failure()
                    .unwrap_or_else(|| Error::thrown(format!("module '{id}' failed to load")))),
                ModuleState::Loading => {
                    trace!(id, "Cyclic load observed partial exports");
                    Ok(record)
                }
                ModuleState::Loaded => Ok(record),
            };
        }

        let Some(loader) = self.graph.get(id) else {
            return Err(match mode {
                LoadMode::AssertPresent => {
                    debug!(id, available = ?self.graph.ids(), "Bundled module missing from graph");
                    Error::InternalGraph { id: id.to_string() }
                }
                LoadMode::UserDynamic => Error::DynamicSpecifier { id: id.to_string() },
            });
        };

        let record = Rc::new(ModuleRecord::new(id));
        self.records
            .borrow_mut()
            .insert(id.to_string(), Rc::clone(&record));

        debug!(id, "Instantiating module");
        match loader.execute(self, &record) {
            Ok(()) => {
                record.mark_loaded();
                Ok(record)
            }
            Err(e) => {
                debug!(id, error = %e, "Module failed to load");
                record.mark_failed(e.clone());
                Err(e)
            }
        }
    }

    /// `require(id)` from inside `importer`'s body.
    ///
    /// Registers `on_reload` under `importer` in the target's dependents,
    /// replacing any earlier registration by the same importer.
    pub fn require(
        &self,
        importer: &ModuleRecord,
        id: &str,
        on_reload: Option<UpdateCallback>,
    ) -> Result<Rc<ModuleRecord>, Error> {
        let record = self.load_module(id, LoadMode::AssertPresent)?;
        record.register_dependent(importer.id(), on_reload);
        Ok(record)
    }

    /// A static `import` from inside `importer`'s body. Returns the module's
    /// namespace.
    pub fn import_sync(
        &self,
        importer: &ModuleRecord,
        id: &str,
        on_reload: Option<UpdateCallback>,
    ) -> Result<Object, Error> {
        Ok(self.require(importer, id, on_reload)?.namespace())
    }

    /// A user `import(specifier)`.
    ///
    /// Every body is already in the bundle, so the returned promise is settled
    /// before this returns. No dependent is registered for `importer`.
    pub fn dynamic_import(
        &self,
        importer: &ModuleRecord,
        specifier: &str,
        options: &ImportOptions,
    ) -> Promise {
        trace!(
            importer = importer.id(),
            specifier,
            attributes = ?options.with,
            "Dynamic import"
        );
        Promise::settled(
            self.load_module(specifier, LoadMode::UserDynamic)
                .map(|record| Value::Object(record.namespace())),
        )
    }

    /// Load `id` as a root (no importer) and return its namespace.
    pub fn load_exports(&self, id: &str) -> Result<Object, Error> {
        Ok(self.load_module(id, LoadMode::AssertPresent)?.namespace())
    }

    /// Invoke the callback client code passed to `onServerSideReload`.
    /// Returns `false` when none is registered.
    pub fn server_side_reload(&self) -> Result<bool, Error> {
        let cb = self.server_side_reload.borrow().clone();
        match cb {
            Some(cb) => {
                cb.call(&[])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn wrap_helpers() -> Object {
    let name = Function::new("__name", |args| {
        let target = args.first().cloned().unwrap_or_default();
        match (&target, args.get(1).and_then(Value::as_str)) {
            (Value::Function(f), Some(name)) => Ok(Value::Function(f.with_name(name))),
            _ => Ok(target),
        }
    });
    Object::from_entries([("__name", Value::Function(name))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::loader;
    use std::cell::Cell;

    fn registry(graph: InputGraph) -> ModuleRegistry {
        ModuleRegistry::bootstrap(BakeConfig::default(), graph)
    }

    #[test]
    fn test_lookup_has_no_side_effects() {
        let reg = registry(InputGraph::new().with("a", loader(|_, _| Ok(()))));

        assert!(reg.lookup("a").is_none());
        assert!(reg.lookup("a").is_none());
    }

    #[test]
    fn test_synthetic_modules_are_preloaded() {
        let reg = registry(InputGraph::new());

        let server = reg.lookup(SERVER_MODULE).unwrap();
        assert_eq!(server.state(), ModuleState::Loaded);
        assert!(server.is_esm());
        assert!(server.exports().contains_key("serverManifest"));
        assert!(reg.lookup(CLIENT_MODULE).is_none());
        assert!(reg.graph().contains(WRAP_MODULE));
    }

    #[test]
    fn test_client_side_reload_callback() {
        let reg = ModuleRegistry::bootstrap(
            BakeConfig::default().with_side(Side::Client),
            InputGraph::new(),
        );
        assert!(!reg.server_side_reload().unwrap());

        let calls = Rc::new(Cell::new(0));
        let calls_in_cb = Rc::clone(&calls);
        let cb = Function::new("reload", move |_| {
            calls_in_cb.set(calls_in_cb.get() + 1);
            Ok(Value::Undefined)
        });
        let client = reg.load_exports(CLIENT_MODULE).unwrap();
        let register = client.get("onServerSideReload").unwrap();
        register.as_function().unwrap().call(&[cb.into()]).unwrap();

        assert!(reg.server_side_reload().unwrap());
        assert_eq!(calls.get(), 1);
        assert!(reg.lookup(SERVER_MODULE).is_none());
    }

    #[test]
    fn test_wrap_name_helper() {
        let reg = registry(InputGraph::new());
        let wrap = reg.load_exports(WRAP_MODULE).unwrap();
        let name = wrap.get("__name").unwrap();
        let f = Function::new("anonymous", |_| Ok(Value::Null));

        let named = name
            .as_function()
            .unwrap()
            .call(&[f.into(), "Component".into()])
            .unwrap();
        assert_eq!(named.as_function().unwrap().name(), "Component");
    }

    #[test]
    fn test_missing_modes_are_distinct() {
        let reg = registry(InputGraph::new());

        let err = reg.load_module("nope", LoadMode::AssertPresent).unwrap_err();
        assert!(matches!(err, Error::InternalGraph { .. }));

        let err = reg.load_module("nope", LoadMode::UserDynamic).unwrap_err();
        assert!(matches!(err, Error::DynamicSpecifier { .. }));
        assert!(reg.lookup("nope").is_none());
    }
}
