//! `stencild import`: load `Template` documents into the store.

use std::path::{Path, PathBuf};

use anyhow::Context;
use stencil_state::{ResourceStore, Template, TypedStore};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
}

/// A single file, or every `*.json` file under a directory in name order.
pub fn template_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        anyhow::bail!("{} is neither a file nor a directory", path.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "json")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Create each template, or replace the stored one with the same name.
/// Templates without a namespace land in `default_namespace`.
pub fn import_templates(
    store: &dyn ResourceStore,
    path: &Path,
    default_namespace: &str,
) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for file in template_files(path)? {
        let raw = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        let mut template: Template = serde_json::from_str(&raw)
            .with_context(|| format!("parsing template {}", file.display()))?;

        let meta = &mut template.metadata;
        if meta.namespace.is_empty() {
            meta.namespace = default_namespace.to_string();
        }
        meta.uid.clear();
        meta.resource_version = 0;
        let (namespace, name) = (meta.namespace.clone(), meta.name.clone());

        match store.create_typed(&template) {
            Ok(created) => {
                info!(%namespace, %name, uid = %created.metadata.uid, "template created");
                summary.created += 1;
            }
            Err(e) if e.is_already_exists() => {
                let existing = store
                    .get_typed::<Template>(&namespace, &name)?
                    .with_context(|| format!("template {namespace}/{name} vanished during import"))?;
                template.metadata.uid = existing.metadata.uid;
                template.metadata.resource_version = existing.metadata.resource_version;
                template.metadata.creation_timestamp = existing.metadata.creation_timestamp;
                store.update_typed(&template)?;
                debug!(%namespace, %name, "template replaced");
                summary.updated += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("storing {}", file.display()));
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stencil_state::StateStore;

    fn write(dir: &Path, rel: &str, value: serde_json::Value) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
    }

    fn template(name: &str, message: &str) -> serde_json::Value {
        json!({
            "kind": "Template",
            "metadata": {"name": name},
            "message": message,
            "objects": [],
            "parameters": [{"name": "USER", "required": true}]
        })
    }

    #[test]
    fn walks_json_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.json", template("b", ""));
        write(dir.path(), "nested/a.json", template("a", ""));
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let files = template_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().unwrap() == "json"));
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(template_files(Path::new("/nonexistent/templates")).is_err());
    }

    #[test]
    fn import_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_in_memory().unwrap();
        write(dir.path(), "db.json", template("db", "first"));

        let summary = import_templates(&store, dir.path(), "stencil").unwrap();
        assert_eq!(summary, ImportSummary { created: 1, updated: 0 });
        let first: Template = store.get_typed("stencil", "db").unwrap().unwrap();
        assert_eq!(first.message, "first");
        assert_eq!(first.parameters[0].name, "USER");

        write(dir.path(), "db.json", template("db", "second"));
        let summary = import_templates(&store, &dir.path().join("db.json"), "stencil").unwrap();
        assert_eq!(summary, ImportSummary { created: 0, updated: 1 });

        let second: Template = store.get_typed("stencil", "db").unwrap().unwrap();
        assert_eq!(second.message, "second");
        assert_eq!(second.metadata.uid, first.metadata.uid);
    }

    #[test]
    fn explicit_namespace_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_in_memory().unwrap();
        write(
            dir.path(),
            "t.json",
            json!({"metadata": {"name": "t", "namespace": "other"}}),
        );

        import_templates(&store, dir.path(), "stencil").unwrap();
        assert!(store.get_typed::<Template>("other", "t").unwrap().is_some());
        assert!(store.get_typed::<Template>("stencil", "t").unwrap().is_none());
    }

    #[test]
    fn malformed_file_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_in_memory().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let err = import_templates(&store, dir.path(), "stencil").unwrap_err();
        assert!(format!("{err:#}").contains("bad.json"));
    }
}
