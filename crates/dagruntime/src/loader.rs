//! Discovery of script components described by `*.component.json` files.

use dagcore::{ComponentDescriptor, ComponentLoadError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_SUFFIX: &str = ".component.json";

/// Where a script component lives and how to start it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    /// The descriptor file the component was loaded from
    pub path: PathBuf,
    /// Program followed by its arguments
    pub command: Vec<String>,
}

impl ScriptEntry {
    /// Scripts run with their descriptor's directory as working directory.
    pub fn working_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[derive(Debug, Clone)]
pub struct ScriptComponent {
    pub descriptor: ComponentDescriptor,
    pub entry: ScriptEntry,
}

#[derive(Deserialize)]
struct ScriptDefinition {
    #[serde(flatten)]
    descriptor: ComponentDescriptor,
    command: Vec<String>,
}

/// Parse one descriptor file.
pub fn load_file(path: &Path) -> Result<ScriptComponent, ComponentLoadError> {
    let text = std::fs::read_to_string(path).map_err(|e| ComponentLoadError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let malformed = |message: String| ComponentLoadError::Malformed {
        path: path.to_path_buf(),
        message,
    };

    let def: ScriptDefinition = serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))?;
    if def.descriptor.category.trim().is_empty() {
        return Err(malformed("category is empty".to_string()));
    }
    if def.descriptor.name.trim().is_empty() {
        return Err(malformed("name is empty".to_string()));
    }
    if def.command.first().map_or(true, |p| p.trim().is_empty()) {
        return Err(malformed("command is empty".to_string()));
    }

    Ok(ScriptComponent {
        descriptor: def.descriptor,
        entry: ScriptEntry {
            path: path.to_path_buf(),
            command: def.command,
        },
    })
}

/// Recursively load every descriptor under `root`, in sorted path order.
///
/// Each file is loaded on its own; a bad file yields an error entry and the
/// walk carries on.
pub fn scan_tree(root: &Path) -> Vec<Result<ScriptComponent, ComponentLoadError>> {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    collect(root, &mut files, &mut errors);
    files.sort();

    errors
        .into_iter()
        .map(Err)
        .chain(files.iter().map(|f| load_file(f)))
        .collect()
}

fn collect(dir: &Path, files: &mut Vec<PathBuf>, errors: &mut Vec<ComponentLoadError>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(ComponentLoadError::Read {
                path: dir.to_path_buf(),
                message: e.to_string(),
            });
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect(&path, files, errors);
        } else if name.ends_with(DESCRIPTOR_SUFFIX) {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_command_and_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("double.component.json");
        std::fs::write(
            &path,
            r#"{"category": "math", "name": "Double",
                "outputs": [{"name": "x"}],
                "command": ["python3", "double.py"]}"#,
        )
        .unwrap();

        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.descriptor.key(), "math/Double");
        assert_eq!(loaded.entry.command, vec!["python3", "double.py"]);
        assert_eq!(loaded.entry.working_dir(), dir.path());
    }

    #[test]
    fn empty_command_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.component.json");
        std::fs::write(&path, r#"{"category": "x", "name": "y", "command": []}"#).unwrap();
        assert!(matches!(
            load_file(&path),
            Err(ComponentLoadError::Malformed { .. })
        ));
    }

    #[test]
    fn walk_skips_hidden_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let def = r#"{"category": "c", "name": "n", "command": ["sh"]}"#;
        std::fs::write(nested.join("n.component.json"), def).unwrap();
        std::fs::write(dir.path().join(".git").join("h.component.json"), def).unwrap();
        std::fs::write(dir.path().join("readme.json"), "{}").unwrap();

        let results = scan_tree(dir.path());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }
}
