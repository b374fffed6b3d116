//! The bundler-supplied input graph: module id to loader.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;
use crate::record::{ModuleId, ModuleRecord};
use crate::registry::ModuleRegistry;

/// A bundled module body.
///
/// `execute` runs synchronously. It populates `module.exports()` (or replaces
/// it with [`ModuleRecord::set_exports`]), marks true ES sources with
/// [`ModuleRecord::set_esm`], and may load other modules through `registry`.
pub trait Loader {
    fn execute(&self, registry: &ModuleRegistry, module: &ModuleRecord) -> Result<(), Error>;
}

/// Adapts a closure into a [`Loader`].
pub struct FnLoader<F>(pub F);

impl<F> Loader for FnLoader<F>
where
    F: Fn(&ModuleRegistry, &ModuleRecord) -> Result<(), Error>,
{
    fn execute(&self, registry: &ModuleRegistry, module: &ModuleRecord) -> Result<(), Error> {
        (self.0)(registry, module)
    }
}

/// Wrap a closure as a shareable loader.
pub fn loader<F>(f: F) -> Rc<dyn Loader>
where
    F: Fn(&ModuleRegistry, &ModuleRecord) -> Result<(), Error> + 'static,
{
    Rc::new(FnLoader(f))
}

/// Loader for ids whose record is created by bootstrap. It only runs if the
/// synthetic record is somehow missing, which means the graph was built
/// without bootstrapping.
struct SyntheticLoader;

impl Loader for SyntheticLoader {
    fn execute(&self, _registry: &ModuleRegistry, module: &ModuleRecord) -> Result<(), Error> {
        Err(Error::InternalGraph {
            id: module.id().to_string(),
        })
    }
}

/// Hot-update payload: new loaders, applied in enumeration order.
pub type HotPatch = IndexMap<ModuleId, Rc<dyn Loader>>;

/// Mutable id → loader map.
#[derive(Default)]
pub struct InputGraph {
    loaders: RefCell<IndexMap<ModuleId, Rc<dyn Loader>>>,
}

impl InputGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, id: impl Into<ModuleId>, loader: Rc<dyn Loader>) -> Self {
        self.insert(id, loader);
        self
    }

    pub fn insert(&self, id: impl Into<ModuleId>, loader: Rc<dyn Loader>) {
        self.loaders.borrow_mut().insert(id.into(), loader);
    }

    pub(crate) fn insert_synthetic(&self, id: &str) {
        self.insert(id, Rc::new(SyntheticLoader));
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Rc<dyn Loader>> {
        self.loaders.borrow().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.loaders.borrow().contains_key(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ModuleId> {
        self.loaders.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loaders.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loaders.borrow().is_empty()
    }
}

impl FromIterator<(ModuleId, Rc<dyn Loader>)> for InputGraph {
    fn from_iter<T: IntoIterator<Item = (ModuleId, Rc<dyn Loader>)>>(iter: T) -> Self {
        Self {
            loaders: RefCell::new(iter.into_iter().collect()),
        }
    }
}

impl fmt::Debug for InputGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputGraph").field("ids", &self.ids()).finish()
    }
}
