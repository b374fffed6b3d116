#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Module registry and hot-replacement runtime for fullstack dev mode.
//!
//! A bundler hands over an [`InputGraph`] of module loaders. The
//! [`ModuleRegistry`] instantiates modules lazily, memoizes them, survives
//! import cycles, and lets the dev server swap module bodies in place
//! ([`ModuleRegistry::replace_modules`]). The server bridge renders routes
//! and keeps the server/client component manifests current.

pub mod config;
pub mod error;
pub mod graph;
pub mod hmr;
pub mod manifest;
pub mod record;
pub mod registry;
pub mod server;
pub mod snapshot;
pub mod value;
pub mod version;

pub use config::{BakeConfig, Side};
pub use error::Error;
pub use graph::{loader, FnLoader, HotPatch, InputGraph, Loader};
pub use hmr::{HandlerId, HmrEvent, ReplaceReport};
pub use manifest::{ClientManifestEntry, Manifests, ServerManifestEntry};
pub use record::{ModuleId, ModuleRecord, ModuleState, UpdateCallback};
pub use registry::{ImportOptions, LoadMode, ModuleRegistry};
pub use server::{RouteModules, UpdateReport};
pub use snapshot::{GraphSnapshot, ModuleSnapshot, SnapshotLoader};
pub use value::{Function, Object, Promise, Request, Response, Value};
pub use version::VERSION;
