//! Hot module replacement.
//!
//! Provides:
//! - In-place re-execution of a module's loader (`replace_module`)
//! - Patch application with per-module failure isolation (`replace_modules`)
//! - Dependent notification through registered update callbacks
//! - `bun:*` update events (with `vite:*` aliases)
//!
//! Dependents are notified, never re-executed: only the callbacks they passed
//! to `require`/`import_sync` run. Patches apply in their own enumeration
//! order with no dependency sort.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::str::FromStr;
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::graph::{HotPatch, Loader};
use crate::record::ModuleId;
use crate::registry::ModuleRegistry;
use crate::value::{Object, Value};

/// Update lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HmrEvent {
    /// Before any module of a patch is replaced.
    BeforeUpdate,
    /// After every module of a patch was attempted.
    AfterUpdate,
    /// A module's replacement was abandoned. Payload: `{id, message}`.
    Error,
}

impl HmrEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeforeUpdate => "bun:beforeUpdate",
            Self::AfterUpdate => "bun:afterUpdate",
            Self::Error => "bun:error",
        }
    }
}

impl FromStr for HmrEvent {
    type Err = Error;

    /// Parse `bun:*` names; `vite:*` is accepted for compatibility.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s
            .strip_prefix("bun:")
            .or_else(|| s.strip_prefix("vite:"))
            .unwrap_or(s);
        match name {
            "beforeUpdate" => Ok(Self::BeforeUpdate),
            "afterUpdate" => Ok(Self::AfterUpdate),
            "error" => Ok(Self::Error),
            _ => Err(Error::type_error(format!("unknown HMR event '{s}'"))),
        }
    }
}

/// Handle returned by [`ModuleRegistry::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EventHandler = Rc<dyn Fn(&Value)>;

#[derive(Default)]
pub(crate) struct EventBus {
    next_id: Cell<u64>,
    handlers: RefCell<Vec<(HandlerId, HmrEvent, EventHandler)>>,
}

impl EventBus {
    fn on(&self, event: HmrEvent, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, event, handler));
        id
    }

    fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(hid, _, _)| *hid != id);
        handlers.len() != before
    }

    fn emit(&self, event: HmrEvent, payload: &Value) {
        // Handlers may subscribe or unsubscribe while running.
        let matching: Vec<EventHandler> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .map(|(_, _, h)| Rc::clone(h))
            .collect();
        for handler in matching {
            handler(payload);
        }
    }
}

/// Outcome of applying a hot-update patch.
#[derive(Debug, Default)]
pub struct ReplaceReport {
    /// Ids re-executed successfully, in patch order.
    pub applied: Vec<ModuleId>,
    /// Ids installed into the graph without a live record to replace.
    pub installed: Vec<ModuleId>,
    /// Ids whose replacement was abandoned.
    pub failed: Vec<(ModuleId, Error)>,
}

impl ReplaceReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "applied": self.applied,
            "installed": self.installed,
            "failed": self
                .failed
                .iter()
                .map(|(id, e)| serde_json::json!({ "id": id, "message": e.to_string() }))
                .collect::<Vec<_>>(),
        })
    }
}

impl ModuleRegistry {
    /// Subscribe to an update event.
    pub fn on(&self, event: HmrEvent, handler: impl Fn(&Value) + 'static) -> HandlerId {
        self.events.on(event, Rc::new(handler))
    }

    /// Unsubscribe. Returns `false` if the handler was already removed.
    pub fn off(&self, id: HandlerId) -> bool {
        self.events.off(id)
    }

    /// Apply a hot-update patch.
    ///
    /// Every loader is installed into the input graph first, so later
    /// first-time loads use the new code. Then each id with a live record is
    /// replaced in patch order. A failing id is logged and skipped; the
    /// remaining ids still apply.
    pub fn replace_modules(&self, patch: HotPatch) -> ReplaceReport {
        self.events.emit(HmrEvent::BeforeUpdate, &Value::Undefined);

        for (id, loader) in &patch {
            self.graph().insert(id.clone(), Rc::clone(loader));
        }

        let mut report = ReplaceReport::default();
        for (id, loader) in &patch {
            match self.replace_module(id, loader) {
                Ok(true) => report.applied.push(id.clone()),
                Ok(false) => report.installed.push(id.clone()),
                Err(e) => {
                    error!(id = %id, error = %e, "Hot update failed; keeping previous version");
                    let payload = Object::from_entries([
                        ("id", Value::from(id.as_str())),
                        ("message", Value::from(e.to_string())),
                    ]);
                    self.events.emit(HmrEvent::Error, &Value::Object(payload));
                    report.failed.push((id.clone(), e));
                }
            }
        }

        debug!(
            applied = report.applied.len(),
            installed = report.installed.len(),
            failed = report.failed.len(),
            "Hot update applied"
        );
        self.events.emit(HmrEvent::AfterUpdate, &Value::Undefined);
        report
    }

    /// Re-run `loader` in place for the live record of `id`.
    ///
    /// Returns `Ok(false)` if `id` was never loaded. On success the record
    /// keeps its identity, gets a fresh `exports` object, and every dependent
    /// callback is invoked once with it. On failure the previous exports are
    /// restored and no dependent is notified.
    pub fn replace_module(&self, id: &str, loader: &Rc<dyn Loader>) -> Result<bool, Error> {
        let Some(record) = self.lookup(id) else {
            return Ok(false);
        };

        record.run_dispose();
        let previous = record.begin_generation();

        if let Err(e) = loader.execute(self, &record) {
            record.restore_generation(previous);
            return Err(e);
        }
        record.mark_loaded();
        debug!(id, "Module replaced");

        let exports = record.exports();
        for (consumer, cb) in record.update_callbacks() {
            trace!(id, consumer = %consumer, "Notifying dependent");
            cb(&exports);
        }
        Ok(true)
    }
}
