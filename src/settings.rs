//! The settings store: client identity and the opaque local configuration tree.
//!
//! Loading this tree from files or environment variables — schema validation,
//! precedence across sources — is the binary entry point's job; this module
//! only defines the opaque, read-only tree the agent core consults.

use serde::Deserialize;
use serde_json::Value;

use crate::check::Check;
use crate::error::{AgentError, Result};

/// Parsed `client.*` settings: identity, subscriptions, and socket binding.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub name: String,
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub redact: Vec<String>,
    #[serde(default)]
    pub socket: SocketSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

/// The opaque nested settings tree handed to the command templater and the
/// dispatcher's local-check lookup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client: ClientSettings,
    tree: Value,
}

impl Settings {
    /// Build a `Settings` from a raw JSON tree. The tree must contain a
    /// `client` object deserializable into [`ClientSettings`]; `client.name`
    /// and `client.subscriptions` are required.
    pub fn from_value(tree: Value) -> Result<Self> {
        let client_value = tree.get("client").cloned().ok_or_else(|| {
            AgentError::InvalidSettings("missing required `client` section".into())
        })?;
        let client: ClientSettings = serde_json::from_value(client_value)
            .map_err(|e| AgentError::InvalidSettings(format!("`client`: {e}")))?;
        if client.name.is_empty() {
            return Err(AgentError::InvalidSettings("`client.name` is empty".into()));
        }
        if client.subscriptions.is_empty() {
            return Err(AgentError::InvalidSettings(
                "`client.subscriptions` is empty".into(),
            ));
        }
        Ok(Self { client, tree })
    }

    /// The raw `client` section as received, before typed parsing. Used by
    /// the keepalive engine, which announces the full client block rather
    /// than just the fields [`ClientSettings`] cares about.
    pub fn client_tree(&self) -> &Value {
        self.tree
            .get("client")
            .expect("presence of `client` enforced by from_value")
    }

    /// Walk a dotted path (`"db.name"`) against the settings tree. Returns
    /// `None` if any segment is missing or the path resolves to `Value::Null`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = &self.tree;
        for segment in path.split('.') {
            cur = cur.get(segment)?;
        }
        if cur.is_null() {
            None
        } else {
            Some(cur)
        }
    }

    /// Look up `checks.<name>` and deserialize it into a [`Check`]. This is
    /// the membership predicate the dispatcher and safe-mode logic consult.
    pub fn local_check(&self, name: &str) -> Option<Check> {
        let value = self.tree.get("checks")?.get(name)?.clone();
        let mut check: Check = serde_json::from_value(value).ok()?;
        check.name = name.to_string();
        Some(check)
    }

    /// All local checks with `standalone == true`, for the scheduler.
    pub fn standalone_checks(&self) -> Vec<Check> {
        let Some(checks) = self.tree.get("checks").and_then(Value::as_object) else {
            return Vec::new();
        };
        checks
            .iter()
            .filter_map(|(name, value)| {
                let mut check: Check = serde_json::from_value(value.clone()).ok()?;
                check.name = name.clone();
                check.is_standalone().then_some(check)
            })
            .collect()
    }
}
