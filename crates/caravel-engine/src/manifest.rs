use std::fs;
use std::path::Path;

use caravel_domain::ResourceDocument;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ManifestError;

/// Load an ordered sequence of resource documents from one YAML source.
///
/// Multiple documents separated by `---` stay in source order, since later
/// documents in a node may reference earlier ones (a namespace declared
/// before the workloads placed into it). Blank documents between separators
/// are skipped.
///
/// # Errors
///
/// Returns an error when the source cannot be read, is not valid YAML, is
/// missing identity fields, or yields zero documents.
pub fn load_documents(path: &Path) -> Result<Vec<ResourceDocument>, ManifestError> {
    let raw = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut documents = Vec::new();
    for (index, deserializer) in serde_yaml::Deserializer::from_str(&raw).enumerate() {
        let value = Value::deserialize(deserializer).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if value.is_null() {
            continue;
        }

        let Value::Mapping(mapping) = value else {
            return Err(ManifestError::NotAMapping {
                path: path.to_path_buf(),
                index,
            });
        };

        let document =
            ResourceDocument::from_mapping(mapping).map_err(|source| ManifestError::Document {
                path: path.to_path_buf(),
                index,
                source,
            })?;
        documents.push(document);
    }

    if documents.is_empty() {
        return Err(ManifestError::EmptyManifest {
            path: path.to_path_buf(),
        });
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;

    use super::load_documents;
    use crate::error::ManifestError;

    #[test]
    fn splits_concatenated_documents_in_source_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("application.yaml");
        fs::write(
            &path,
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: abshop\n---\napiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: mesh-proxy\n  namespace: abshop\n",
        )
        .expect("write manifest");

        let documents = load_documents(&path).expect("load");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].kind(), "Namespace");
        assert_eq!(documents[1].kind(), "ServiceAccount");
        assert_eq!(documents[1].namespace(), Some("abshop"));
    }

    #[test]
    fn skips_blank_separator_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gateway.yaml");
        fs::write(
            &path,
            "---\nkind: Service\nmetadata:\n  name: gateway\n---\n",
        )
        .expect("write manifest");

        let documents = load_documents(&path).expect("load");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name(), "gateway");
    }

    #[test]
    fn rejects_invalid_yaml() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("broken.yaml");
        fs::write(&path, "kind: [unterminated\n").expect("write manifest");

        let error = load_documents(&path).expect_err("must fail");
        assert!(matches!(error, ManifestError::Parse { .. }));
    }

    #[test]
    fn rejects_empty_sources() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("empty.yaml");
        fs::write(&path, "---\n").expect("write manifest");

        let error = load_documents(&path).expect_err("must fail");
        assert!(matches!(error, ManifestError::EmptyManifest { .. }));
    }

    #[test]
    fn rejects_documents_missing_identity() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("anonymous.yaml");
        fs::write(&path, "kind: Namespace\nmetadata: {}\n").expect("write manifest");

        let error = load_documents(&path).expect_err("must fail");
        assert!(matches!(error, ManifestError::Document { index: 0, .. }));
    }
}
