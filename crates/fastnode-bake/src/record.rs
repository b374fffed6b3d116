//! One instantiated module: exports, lifecycle state, and dependents.

use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::value::{Object, Value};

/// Build-time-stable module identifier (may be minified).
pub type ModuleId = String;

/// Callback a consumer registers to receive a module's fresh exports after a
/// hot replacement.
pub type UpdateCallback = Rc<dyn Fn(&Object)>;

/// Hook run with the module's persistent `data` before its loader re-runs.
pub type DisposeCallback = Box<dyn FnOnce(&Object)>;

/// Lifecycle of a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// The loader is running; exports may be partial.
    Loading,
    Loaded,
    /// The initial load threw; the error is cached.
    Failed,
}

/// Everything `replace_module` needs to roll a failed replacement back.
pub(crate) struct Generation {
    exports: Object,
    namespace: Option<Object>,
    is_esm: bool,
    state: ModuleState,
    failure: Option<Error>,
}

/// A live module instance.
///
/// Records are never freed and keep their identity across hot replacements;
/// only the `exports` object is swapped.
pub struct ModuleRecord {
    id: ModuleId,
    exports: RefCell<Object>,
    state: Cell<ModuleState>,
    is_esm: Cell<bool>,
    failure: RefCell<Option<Error>>,
    /// Interop namespace for non-ESM exports. Cleared whenever `exports` is
    /// replaced.
    namespace: RefCell<Option<Object>>,
    dependents: RefCell<IndexMap<ModuleId, Option<UpdateCallback>>>,
    dispose: RefCell<Vec<DisposeCallback>>,
    data: Object,
}

impl ModuleRecord {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            exports: RefCell::new(Object::new()),
            state: Cell::new(ModuleState::Loading),
            is_esm: Cell::new(false),
            failure: RefCell::new(None),
            namespace: RefCell::new(None),
            dependents: RefCell::new(IndexMap::new()),
            dispose: RefCell::new(Vec::new()),
            data: Object::new(),
        }
    }

    /// A pre-populated, already loaded ES module.
    pub(crate) fn synthetic(id: &str, exports: Object) -> Self {
        let record = Self::new(id);
        record.set_exports(exports);
        record.set_esm(true);
        record.state.set(ModuleState::Loaded);
        record
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current exports object (an alias, not a copy).
    #[must_use]
    pub fn exports(&self) -> Object {
        self.exports.borrow().clone()
    }

    /// Replace the exports object wholesale (`module.exports = ...`).
    pub fn set_exports(&self, exports: Object) {
        *self.exports.borrow_mut() = exports;
        self.namespace.borrow_mut().take();
    }

    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.state.get()
    }

    #[must_use]
    pub fn is_esm(&self) -> bool {
        self.is_esm.get()
    }

    /// Loaders for true ES sources set this before returning.
    pub fn set_esm(&self, is_esm: bool) {
        if self.is_esm.replace(is_esm) != is_esm {
            self.namespace.borrow_mut().take();
        }
    }

    /// The cached error of a failed initial load.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.failure.borrow().clone()
    }

    /// The ES-module-shaped view of this module.
    ///
    /// ES modules expose `exports` directly. Anything else gets
    /// `{...exports, default: exports}`, built once and cached until the
    /// exports object is replaced.
    #[must_use]
    pub fn namespace(&self) -> Object {
        if self.is_esm() {
            return self.exports();
        }
        if let Some(ns) = self.namespace.borrow().as_ref() {
            return ns.clone();
        }
        let exports = self.exports();
        let ns = Object::from_entries(exports.entries());
        ns.set("default", Value::Object(exports));
        *self.namespace.borrow_mut() = Some(ns.clone());
        ns
    }

    /// Data that survives hot replacement.
    #[must_use]
    pub fn data(&self) -> Object {
        self.data.clone()
    }

    /// Run `cb` with [`Self::data`] before the next replacement re-runs the
    /// loader.
    pub fn on_dispose(&self, cb: impl FnOnce(&Object) + 'static) {
        self.dispose.borrow_mut().push(Box::new(cb));
    }

    /// Ids of the modules that required this one, in registration order.
    #[must_use]
    pub fn dependent_ids(&self) -> Vec<ModuleId> {
        self.dependents.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn has_update_callback(&self, consumer: &str) -> bool {
        matches!(self.dependents.borrow().get(consumer), Some(Some(_)))
    }

    pub(crate) fn register_dependent(&self, consumer: &str, on_reload: Option<UpdateCallback>) {
        self.dependents
            .borrow_mut()
            .insert(consumer.to_string(), on_reload);
    }

    /// Registered callbacks, detached from the record so they may re-enter it.
    pub(crate) fn update_callbacks(&self) -> Vec<(ModuleId, UpdateCallback)> {
        self.dependents
            .borrow()
            .iter()
            .filter_map(|(id, cb)| cb.as_ref().map(|cb| (id.clone(), Rc::clone(cb))))
            .collect()
    }

    pub(crate) fn mark_loaded(&self) {
        self.state.set(ModuleState::Loaded);
        self.failure.borrow_mut().take();
    }

    pub(crate) fn mark_failed(&self, error: Error) {
        self.state.set(ModuleState::Failed);
        *self.failure.borrow_mut() = Some(error);
    }

    pub(crate) fn run_dispose(&self) {
        let hooks = std::mem::take(&mut *self.dispose.borrow_mut());
        for hook in hooks {
            hook(&self.data);
        }
    }

    /// Start a new generation: fresh exports, no namespace, `Loading`.
    /// Returns the previous generation.
    pub(crate) fn begin_generation(&self) -> Generation {
        Generation {
            exports: self.exports.replace(Object::new()),
            namespace: self.namespace.borrow_mut().take(),
            is_esm: self.is_esm.get(),
            state: self.state.replace(ModuleState::Loading),
            failure: self.failure.borrow().clone(),
        }
    }

    pub(crate) fn restore_generation(&self, previous: Generation) {
        *self.exports.borrow_mut() = previous.exports;
        *self.namespace.borrow_mut() = previous.namespace;
        self.is_esm.set(previous.is_esm);
        self.state.set(previous.state);
        *self.failure.borrow_mut() = previous.failure;
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("is_esm", &self.is_esm.get())
            .field("exports", &*self.exports.borrow())
            .field("dependents", &self.dependent_ids())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_namespace_wraps_commonjs_exports() {
        let record = ModuleRecord::new("cjs");
        record.exports().set("x", 1);

        let ns = record.namespace();
        assert_eq!(ns.get("x").and_then(|v| v.as_f64()), Some(1.0));
        let default = ns.get("default").unwrap();
        assert!(default.as_object().unwrap().ptr_eq(&record.exports()));

        // Cached until exports are replaced.
        assert!(ns.ptr_eq(&record.namespace()));
        record.set_exports(Object::new());
        assert!(!ns.ptr_eq(&record.namespace()));
    }

    #[test]
    fn test_namespace_is_exports_for_esm() {
        let record = ModuleRecord::new("esm");
        record.set_esm(true);

        assert!(record.namespace().ptr_eq(&record.exports()));
    }

    #[test]
    fn test_generation_restore() {
        let record = ModuleRecord::new("m");
        record.exports().set("v", 1);
        record.mark_loaded();
        let original = record.exports();

        let previous = record.begin_generation();
        assert_eq!(record.state(), ModuleState::Loading);
        assert!(record.exports().is_empty());

        record.restore_generation(previous);
        assert_eq!(record.state(), ModuleState::Loaded);
        assert!(record.exports().ptr_eq(&original));
    }

    #[test]
    fn test_dispose_hooks_run_once_with_data() {
        let record = ModuleRecord::new("m");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in_hook = Rc::clone(&seen);
        record.on_dispose(move |data| {
            data.set("count", 1);
            seen_in_hook.borrow_mut().push("disposed");
        });

        record.run_dispose();
        record.run_dispose();

        assert_eq!(*seen.borrow(), vec!["disposed"]);
        assert!(record.data().contains_key("count"));
    }

    #[test]
    fn test_register_dependent_overwrites() {
        let record = ModuleRecord::new("dep");
        record.register_dependent("a", None);
        record.register_dependent("b", Some(Rc::new(|_: &Object| {})));
        record.register_dependent("a", Some(Rc::new(|_: &Object| {})));

        assert_eq!(record.dependent_ids(), vec!["a", "b"]);
        assert!(record.has_update_callback("a"));
        assert_eq!(record.update_callbacks().len(), 2);
    }
}
