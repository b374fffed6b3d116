use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Error;
use crate::record::ModuleId;

/// Config file looked up in the project root.
pub const CONFIG_FILE: &str = "bake.config.json";

/// Which module graph a registry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Server,
    Client,
}

impl Side {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

/// Runtime configuration for a bake registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BakeConfig {
    /// Server entrypoint; must export `render`.
    pub main: ModuleId,

    pub side: Side,

    /// Script URL handed to `render` as the only client script.
    pub client_entry_url: String,

    /// Stylesheets handed to `render` for every route.
    pub styles: Vec<String>,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            main: "server.js".to_string(),
            side: Side::default(),
            client_entry_url: "/_bun/client.js".to_string(),
            styles: Vec::new(),
        }
    }
}

impl BakeConfig {
    /// Create a new config with the given server entrypoint.
    #[must_use]
    pub fn new(main: impl Into<ModuleId>) -> Self {
        Self {
            main: main.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    #[must_use]
    pub fn with_client_entry_url(mut self, url: impl Into<String>) -> Self {
        self.client_entry_url = url.into();
        self
    }

    #[must_use]
    pub fn with_styles(mut self, styles: Vec<String>) -> Self {
        self.styles = styles;
        self
    }

    /// Load configuration from `root`.
    ///
    /// If `config_path` is `Some`, that file must exist. Otherwise
    /// `bake.config.json` is used when present and defaults apply when not.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self, Error> {
        let path = match config_path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => root.join(p),
            None => {
                let candidate = root.join(CONFIG_FILE);
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: PathBuf::from(path),
            source: Arc::new(e),
        })?;
        serde_json::from_str(&source).map_err(|e| Error::ConfigParse {
            path: PathBuf::from(path),
            source: Arc::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = BakeConfig::load(dir.path(), None).unwrap();

        assert_eq!(config.main, "server.js");
        assert_eq!(config.side, Side::Server);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "main": "framework/server.tsx", "side": "client", "styles": ["/app.css"] }"#,
        )
        .unwrap();

        let config = BakeConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.main, "framework/server.tsx");
        assert_eq!(config.side, Side::Client);
        assert_eq!(config.styles, vec!["/app.css"]);
        assert_eq!(config.client_entry_url, "/_bun/client.js");
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = BakeConfig::load(dir.path(), Some(Path::new("nope.json"))).unwrap_err();

        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ main: ").unwrap();

        let err = BakeConfig::load(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_builder() {
        let config = BakeConfig::new("entry.js")
            .with_side(Side::Client)
            .with_client_entry_url("/client.js")
            .with_styles(vec!["/a.css".to_string()]);

        assert_eq!(config.main, "entry.js");
        assert_eq!(config.side.as_str(), "client");
        assert_eq!(config.client_entry_url, "/client.js");
    }
}
