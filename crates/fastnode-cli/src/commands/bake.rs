//! `howth bake` command implementation.
//!
//! Drives a [`ModuleRegistry`] from a JSON graph snapshot: load modules,
//! apply hot updates, and render routes through the server entrypoint.

use bytes::Bytes;
use fastnode_bake::{
    BakeConfig, GraphSnapshot, HotPatch, LoadMode, ModuleRegistry, RouteModules, Value,
};
use indexmap::IndexMap;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Inputs shared by every bake subcommand.
#[derive(Debug, Clone)]
pub struct BakeContext {
    pub cwd: PathBuf,
    /// Explicit config file; `bake.config.json` in `cwd` otherwise.
    pub config: Option<PathBuf>,
    pub snapshot: PathBuf,
}

/// `howth bake update` action.
#[derive(Debug, Clone, Default)]
pub struct UpdateAction {
    /// Modules to instantiate before the patch, so it has live records to replace.
    pub preload: Vec<String>,
    pub patch: Option<PathBuf>,
    pub add: Vec<String>,
    pub delete: Vec<String>,
}

/// `howth bake render` action.
#[derive(Debug, Clone)]
pub struct RenderAction {
    pub page: String,
    /// Innermost first.
    pub layouts: Vec<String>,
    pub url: String,
    pub params: Vec<(String, String)>,
}

#[derive(Serialize)]
struct ModuleResultJson {
    id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ModuleErrorJson>,
}

#[derive(Serialize)]
struct ModuleErrorJson {
    message: String,
    /// True when the graph itself is inconsistent rather than user code failing.
    internal: bool,
}

#[derive(Serialize)]
struct RenderResultJson {
    status: u16,
    headers: IndexMap<String, String>,
    body: serde_json::Value,
}

fn resolve(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn open_registry(ctx: &BakeContext) -> Result<ModuleRegistry> {
    let config = BakeConfig::load(&ctx.cwd, ctx.config.as_deref()).into_diagnostic()?;
    let snapshot_path = resolve(&ctx.cwd, &ctx.snapshot);
    let graph = GraphSnapshot::from_file(&snapshot_path)
        .into_diagnostic()?
        .into_graph();
    debug!(snapshot = %snapshot_path.display(), main = %config.main, "Opening registry");
    Ok(ModuleRegistry::bootstrap(config, graph))
}

fn module_result(registry: &ModuleRegistry, id: &str) -> ModuleResultJson {
    match registry.load_exports(id) {
        Ok(namespace) => ModuleResultJson {
            id: id.to_string(),
            ok: true,
            namespace: Some(Value::Object(namespace).to_json()),
            error: None,
        },
        Err(e) => ModuleResultJson {
            id: id.to_string(),
            ok: false,
            namespace: None,
            error: Some(ModuleErrorJson {
                message: e.to_string(),
                internal: e.is_internal(),
            }),
        },
    }
}

fn print_modules(results: &[ModuleResultJson]) {
    for result in results {
        match (&result.namespace, &result.error) {
            (Some(ns), _) => println!("{}: {ns}", result.id),
            (None, Some(e)) if e.internal => println!("{}: internal error: {}", result.id, e.message),
            (None, Some(e)) => println!("{}: error: {}", result.id, e.message),
            (None, None) => println!("{}: <empty>", result.id),
        }
    }
}

/// `howth bake load <snapshot> <ids..>`: print each module's namespace.
pub fn load(ctx: &BakeContext, ids: &[String], json: bool) -> Result<()> {
    let registry = open_registry(ctx)?;
    let results: Vec<ModuleResultJson> = ids.iter().map(|id| module_result(&registry, id)).collect();
    let ok = results.iter().all(|r| r.ok);

    if json {
        let out = serde_json::json!({ "ok": ok, "modules": results });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        print_modules(&results);
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// `howth bake update`: apply a patch plus manifest changes, then print the
/// report, the manifests, and the preloaded modules' current namespaces.
pub fn update(ctx: &BakeContext, action: &UpdateAction, json: bool) -> Result<()> {
    let registry = open_registry(ctx)?;
    for id in &action.preload {
        if let Err(e) = registry.load_module(id, LoadMode::AssertPresent) {
            warn!(id = %id, error = %e, "Preload failed");
        }
    }

    let patch = match &action.patch {
        Some(path) => GraphSnapshot::from_file(&resolve(&ctx.cwd, path))
            .into_diagnostic()?
            .into_patch(),
        None => HotPatch::new(),
    };
    let report = registry.register_update(patch, &action.add, &action.delete);
    let modules: Vec<ModuleResultJson> = action
        .preload
        .iter()
        .map(|id| module_result(&registry, id))
        .collect();

    if json {
        let out = serde_json::json!({
            "ok": report.is_ok(),
            "report": report.to_json(),
            "manifests": registry.manifests().to_json(),
            "modules": modules,
        });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        let replace = &report.replace;
        println!("applied:   {}", replace.applied.join(", "));
        println!("installed: {}", replace.installed.join(", "));
        for (id, e) in &replace.failed {
            println!("failed:    {id}: {e}");
        }
        for (id, e) in &report.manifest_failed {
            println!("manifest:  {id}: {e}");
        }
        println!("components: {}", registry.manifests().component_ids().join(", "));
        print_modules(&modules);
    }

    if !report.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

/// `howth bake render`: run one request through the server entrypoint.
pub fn render(ctx: &BakeContext, action: &RenderAction, json: bool) -> Result<()> {
    let registry = open_registry(ctx)?;

    let route = action
        .layouts
        .iter()
        .fold(RouteModules::new(action.page.as_str()), |route, layout| {
            route.with_layout(layout.as_str())
        });
    let params: Option<IndexMap<String, String>> = if action.params.is_empty() {
        None
    } else {
        Some(action.params.iter().cloned().collect())
    };
    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri(action.url.as_str())
        .body(Bytes::new())
        .map_err(|e| miette::miette!("Invalid URL '{}': {}", action.url, e))?;

    let res = futures::executor::block_on(registry.render_route(req, &route, params.as_ref()))
        .into_diagnostic()?;

    let body_text = String::from_utf8_lossy(res.body()).into_owned();
    if json {
        let headers = res
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = serde_json::from_str(&body_text).unwrap_or(serde_json::Value::String(body_text));
        let out = RenderResultJson {
            status: res.status().as_u16(),
            headers,
            body,
        };
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        println!("{:?} {}", res.version(), res.status());
        for (k, v) in res.headers() {
            println!("{}: {}", k, String::from_utf8_lossy(v.as_bytes()));
        }
        println!();
        println!("{body_text}");
    }
    Ok(())
}

/// Parse a `key=value` route parameter.
pub fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("slug=hello=world").unwrap(),
            ("slug".to_string(), "hello=world".to_string())
        );
        assert!(parse_param("=x").is_err());
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn test_resolve_relative_to_cwd() {
        let cwd = Path::new("/work");
        assert_eq!(resolve(cwd, Path::new("graph.json")), PathBuf::from("/work/graph.json"));
        assert_eq!(resolve(cwd, Path::new("/abs.json")), PathBuf::from("/abs.json"));
    }
}
