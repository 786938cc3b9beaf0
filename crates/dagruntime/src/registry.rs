use crate::loader::{self, ScriptEntry};
use dagcore::{Component, ComponentDescriptor, ComponentLoadError, NodeError, Params};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Factory trait for built-in components
pub trait ComponentFactory: Send + Sync {
    /// Schema of the component this factory produces
    fn descriptor(&self) -> ComponentDescriptor;

    /// Create an instance from validated parameters
    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError>;
}

/// Where a registered component's logic comes from.
#[derive(Clone)]
pub enum ComponentSource {
    /// Compiled into this binary; runs in a worker process or in-process
    Builtin(Arc<dyn ComponentFactory>),
    /// External command described by a descriptor file
    Script(ScriptEntry),
}

impl ComponentSource {
    pub fn location(&self) -> Option<&Path> {
        match self {
            ComponentSource::Builtin(_) => None,
            ComponentSource::Script(entry) => Some(&entry.path),
        }
    }
}

impl fmt::Debug for ComponentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentSource::Builtin(_) => f.write_str("Builtin"),
            ComponentSource::Script(entry) => f.debug_tuple("Script").field(&entry.path).finish(),
        }
    }
}

/// What to do when a key is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Last registration wins; a warning is logged
    #[default]
    Replace,
    /// First registration wins; the newcomer is skipped with a warning
    KeepFirst,
    /// The newcomer is rejected as a load failure
    Reject,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(ConflictPolicy::Replace),
            "keep-first" | "keep_first" => Ok(ConflictPolicy::KeepFirst),
            "reject" => Ok(ConflictPolicy::Reject),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredComponent {
    pub descriptor: Arc<ComponentDescriptor>,
    pub source: ComponentSource,
}

/// Outcome of scanning a component tree
#[derive(Debug, Default)]
pub struct ScanReport {
    pub registered: Vec<String>,
    pub failures: Vec<ComponentLoadError>,
}

/// Lookup table of available components, keyed by `"category/name"`.
///
/// Read-only once built; share it behind an `Arc`.
#[derive(Default)]
pub struct ComponentRegistry {
    components: HashMap<String, RegisteredComponent>,
    policy: ConflictPolicy,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ConflictPolicy) -> Self {
        Self {
            components: HashMap::new(),
            policy,
        }
    }

    /// Register a built-in component factory
    pub fn register(&mut self, factory: Arc<dyn ComponentFactory>) {
        let descriptor = factory.descriptor();
        let key = descriptor.key();
        tracing::debug!("Registering component: {}", key);
        let entry = RegisteredComponent {
            descriptor: Arc::new(descriptor),
            source: ComponentSource::Builtin(factory),
        };
        if let Err(e) = self.insert(key, entry) {
            tracing::error!("{}", e);
        }
    }

    /// Recursively load script components under `root`.
    ///
    /// Per-file failures are logged and collected; they never stop the scan.
    pub fn scan(&mut self, root: impl AsRef<Path>) -> ScanReport {
        let root = root.as_ref();
        let mut report = ScanReport::default();

        for loaded in loader::scan_tree(root) {
            let result = loaded.and_then(|script| {
                let key = script.descriptor.key();
                let entry = RegisteredComponent {
                    descriptor: Arc::new(script.descriptor),
                    source: ComponentSource::Script(script.entry),
                };
                self.insert(key.clone(), entry).map(|_| key)
            });
            match result {
                Ok(key) => report.registered.push(key),
                Err(e) => {
                    tracing::error!(path = %e.path().display(), "Failed to load component: {}", e);
                    report.failures.push(e);
                }
            }
        }

        tracing::info!(
            root = %root.display(),
            registered = report.registered.len(),
            failed = report.failures.len(),
            "Component scan finished"
        );
        report
    }

    fn insert(&mut self, key: String, entry: RegisteredComponent) -> Result<(), ComponentLoadError> {
        if let Some(existing) = self.components.get(&key) {
            let origin = entry
                .source
                .location()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("<builtin>"));
            // Rescanning the same file refreshes it.
            let same_file = existing.source.location().is_some()
                && existing.source.location() == entry.source.location();
            if !same_file {
                match self.policy {
                    ConflictPolicy::Replace => {
                        tracing::warn!(key = %key, path = %origin.display(), "Duplicate component key, replacing");
                    }
                    ConflictPolicy::KeepFirst => {
                        tracing::warn!(key = %key, path = %origin.display(), "Duplicate component key, keeping first");
                        return Ok(());
                    }
                    ConflictPolicy::Reject => {
                        return Err(ComponentLoadError::Duplicate { key, path: origin });
                    }
                }
            }
        }
        self.components.insert(key, entry);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.components.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&RegisteredComponent> {
        self.components.get(key)
    }

    pub fn descriptor(&self, key: &str) -> Option<Arc<ComponentDescriptor>> {
        self.components.get(key).map(|c| c.descriptor.clone())
    }

    pub fn source(&self, key: &str) -> Option<&ComponentSource> {
        self.components.get(key).map(|c| &c.source)
    }

    /// All registered keys, sorted
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.components.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
