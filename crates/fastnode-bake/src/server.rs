//! Server bridge: route rendering and combined hot-update / manifest upkeep.

use indexmap::IndexMap;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::graph::HotPatch;
use crate::hmr::ReplaceReport;
use crate::record::ModuleId;
use crate::registry::{LoadMode, ModuleRegistry};
use crate::value::{Object, Request, Response, Value};

/// Modules that make up one route.
#[derive(Debug, Clone, Default)]
pub struct RouteModules {
    pub page: ModuleId,
    /// Innermost first; the last entry is the root layout.
    pub layouts: Vec<ModuleId>,
}

impl RouteModules {
    #[must_use]
    pub fn new(page: impl Into<ModuleId>) -> Self {
        Self {
            page: page.into(),
            layouts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: impl Into<ModuleId>) -> Self {
        self.layouts.push(layout.into());
        self
    }
}

/// Outcome of [`ModuleRegistry::register_update`].
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub replace: ReplaceReport,
    /// Component ids that could not be added to the manifests.
    pub manifest_failed: Vec<(ModuleId, Error)>,
}

impl UpdateReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.replace.is_ok() && self.manifest_failed.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "replace": self.replace.to_json(),
            "manifestFailed": self
                .manifest_failed
                .iter()
                .map(|(id, e)| serde_json::json!({ "id": id, "message": e.to_string() }))
                .collect::<Vec<_>>(),
        })
    }
}

impl ModuleRegistry {
    /// Render one request through the server entrypoint's `render` export.
    ///
    /// `render(req, {styles, scripts, layouts, pageModule, modulepreload, params})`
    /// must return a `Response`, or a promise of one.
    pub async fn handle_request(
        &self,
        req: Request,
        route: &RouteModules,
        client_entry_url: &str,
        styles: &[String],
        params: Option<&IndexMap<String, String>>,
    ) -> Result<Response, Error> {
        let main = &self.config().main;
        let server = self.load_module(main, LoadMode::AssertPresent)?;
        let render = match server.namespace().get("render") {
            None | Some(Value::Undefined) => {
                return Err(Error::MissingRender { main: main.clone() })
            }
            Some(Value::Function(f)) => f,
            Some(other) => {
                return Err(Error::RenderNotCallable {
                    main: main.clone(),
                    found: other.type_name(),
                })
            }
        };

        let page = self.load_exports(&route.page)?;
        let layouts = route
            .layouts
            .iter()
            .map(|id| self.load_exports(id).map(Value::Object))
            .collect::<Result<Vec<_>, _>>()?;
        let params = params.map_or(Value::Null, |p| {
            Value::Object(Object::from_entries(
                p.iter().map(|(k, v)| (k.clone(), Value::from(v.as_str()))),
            ))
        });

        let metadata = Object::from_entries([
            (
                "styles",
                Value::Array(styles.iter().map(|s| Value::from(s.as_str())).collect()),
            ),
            ("scripts", Value::Array(vec![Value::from(client_entry_url)])),
            ("layouts", Value::Array(layouts)),
            ("pageModule", Value::Object(page)),
            ("modulepreload", Value::Array(Vec::new())),
            ("params", params),
        ]);

        debug!(page = %route.page, uri = %req.uri(), "Rendering route");
        let mut result = render.call(&[Value::Request(Rc::new(req)), Value::Object(metadata)])?;
        if let Value::Promise(pending) = result {
            result = pending.await?;
        }
        match result {
            Value::Response(res) => Ok(into_owned(res)),
            other => Err(Error::NotAResponse {
                found: other.type_name(),
            }),
        }
    }

    /// [`Self::handle_request`] with the configured client entry and styles.
    pub async fn render_route(
        &self,
        req: Request,
        route: &RouteModules,
        params: Option<&IndexMap<String, String>>,
    ) -> Result<Response, Error> {
        let config = self.config();
        self.handle_request(req, route, &config.client_entry_url, &config.styles, params)
            .await
    }

    /// Apply a hot update and keep the component manifests in step with it.
    ///
    /// 1. `replace_modules(modules)`.
    /// 2. Each id in `add` is loaded and every name in its namespace is
    ///    recorded. A failing id is logged and skipped.
    /// 3. Each id in `delete` is removed from both manifests.
    pub fn register_update<S: AsRef<str>>(
        &self,
        modules: HotPatch,
        add: &[S],
        delete: &[S],
    ) -> UpdateReport {
        let mut report = UpdateReport {
            replace: self.replace_modules(modules),
            manifest_failed: Vec::new(),
        };

        for id in add {
            let id = id.as_ref();
            match self.load_exports(id) {
                Ok(namespace) => self.manifests().add_component(id, &namespace.keys()),
                Err(e) => {
                    warn!(id, error = %e, "Failed to add component to manifest");
                    report.manifest_failed.push((id.to_string(), e));
                }
            }
        }

        for id in delete {
            let removed = self.manifests().remove_component(id.as_ref());
            debug!(id = id.as_ref(), removed, "Removed component from manifest");
        }

        report
    }
}

fn into_owned(res: Rc<Response>) -> Response {
    Rc::try_unwrap(res).unwrap_or_else(|shared| {
        let mut owned = Response::new(shared.body().clone());
        *owned.status_mut() = shared.status();
        *owned.version_mut() = shared.version();
        *owned.headers_mut() = shared.headers().clone();
        owned
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BakeConfig;
    use crate::graph::{loader, InputGraph};
    use crate::value::{Function, Promise};
    use bytes::Bytes;
    use futures::executor::block_on;

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    fn graph_with_server(render: Value) -> InputGraph {
        InputGraph::new()
            .with(
                "server.js",
                loader(move |_, m| {
                    m.set_esm(true);
                    m.exports().set("render", render.clone());
                    Ok(())
                }),
            )
            .with(
                "page.js",
                loader(|_, m| {
                    m.exports().set("title", "home");
                    Ok(())
                }),
            )
    }

    #[test]
    fn test_missing_render_is_contract_error() {
        let graph = InputGraph::new().with("server.js", loader(|_, _| Ok(())));
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph);

        let err = block_on(reg.render_route(request("/"), &RouteModules::new("page.js"), None))
            .unwrap_err();
        assert!(matches!(err, Error::MissingRender { .. }));
    }

    #[test]
    fn test_non_callable_render_is_contract_error() {
        let reg = ModuleRegistry::bootstrap(
            BakeConfig::default(),
            graph_with_server(Value::from("not a function")),
        );

        let err = block_on(reg.render_route(request("/"), &RouteModules::new("page.js"), None))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RenderNotCallable {
                found: "a string",
                ..
            }
        ));
    }

    #[test]
    fn test_non_response_result_is_contract_error() {
        let render = Function::new("render", |_| Ok(Value::from("<html>")));
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph_with_server(render.into()));

        let err = block_on(reg.render_route(request("/"), &RouteModules::new("page.js"), None))
            .unwrap_err();
        assert!(matches!(err, Error::NotAResponse { found: "a string" }));
    }

    #[test]
    fn test_render_awaits_promise() {
        let render = Function::new("render", |_| {
            let res = http::Response::builder()
                .status(201)
                .body(Bytes::from_static(b"ok"))
                .unwrap();
            Ok(Value::Promise(Promise::resolved(res.into())))
        });
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph_with_server(render.into()));

        let res = block_on(reg.render_route(request("/"), &RouteModules::new("page.js"), None))
            .unwrap();
        assert_eq!(res.status(), 201);
        assert_eq!(res.body().as_ref(), b"ok");
    }

    #[test]
    fn test_missing_page_is_internal_error() {
        let render = Function::new("render", |_| Ok(Value::Null));
        let reg = ModuleRegistry::bootstrap(BakeConfig::default(), graph_with_server(render.into()));

        let err = block_on(reg.render_route(request("/"), &RouteModules::new("gone.js"), None))
            .unwrap_err();
        assert!(err.is_internal());
    }
}
