//! The extension registry: lookup of named in-process check
//! runners. The registry implementation is an external collaborator; this
//! module defines the trait boundary and a simple in-memory reference
//! registry used by the crate's own tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::check::Check;

/// An in-process check runner registered by name. Extensions are assumed to
/// return promptly: the core does not impose a timeout on them.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Run the extension against `request`, returning `(output, status)`.
    /// Errors raised here are the extension's own responsibility — the core
    /// does not wrap or catch them.
    async fn safe_run(&self, request: &Check) -> (String, i64);
}

/// Lookup of named extensions.
pub trait ExtensionRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<&(dyn Extension)>;
}

/// A simple name -> extension map, sufficient for tests and for small
/// deployments that register extensions at startup rather than dynamically.
#[derive(Default)]
pub struct InMemoryExtensionRegistry {
    extensions: HashMap<String, Box<dyn Extension>>,
}

impl InMemoryExtensionRegistry {
    pub fn new() -> Self {
        Self {
            extensions: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, extension: Box<dyn Extension>) {
        self.extensions.insert(name.into(), extension);
    }
}

impl ExtensionRegistry for InMemoryExtensionRegistry {
    fn get(&self, name: &str) -> Option<&(dyn Extension)> {
        self.extensions.get(name).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::status;

    struct EchoExtension;

    #[async_trait]
    impl Extension for EchoExtension {
        async fn safe_run(&self, request: &Check) -> (String, i64) {
            (format!("ran {}", request.name), status::OK)
        }
    }

    #[tokio::test]
    async fn registers_and_runs_extension() {
        let mut registry = InMemoryExtensionRegistry::new();
        registry.register("echo", Box::new(EchoExtension));

        let ext = registry.get("echo").expect("extension registered");
        let request = Check {
            name: "echo".into(),
            ..Default::default()
        };
        let (output, status) = ext.safe_run(&request).await;
        assert_eq!(output, "ran echo");
        assert_eq!(status, 0);
    }

    #[test]
    fn missing_extension_returns_none() {
        let registry = InMemoryExtensionRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
