use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentValidationError {
    #[error("document has no kind field")]
    MissingKind,
    #[error("{kind} document has no metadata.name")]
    MissingName { kind: String },
}

/// One structured resource document, treated as opaque data except for the
/// identity fields and the container image paths the engine rewrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceDocument(Mapping);

impl ResourceDocument {
    /// Wrap a parsed mapping, requiring the identity fields the engine needs
    /// to reference the document by name.
    ///
    /// # Errors
    ///
    /// Returns an error when `kind` or `metadata.name` is absent or not a
    /// string.
    pub fn from_mapping(mapping: Mapping) -> Result<Self, DocumentValidationError> {
        let document = Self(mapping);
        let Some(kind) = document.string_field(&["kind"]) else {
            return Err(DocumentValidationError::MissingKind);
        };
        if document.string_field(&["metadata", "name"]).is_none() {
            return Err(DocumentValidationError::MissingName {
                kind: kind.to_string(),
            });
        }
        Ok(document)
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.string_field(&["kind"]).unwrap_or_default()
    }

    #[must_use]
    pub fn api_version(&self) -> Option<&str> {
        self.string_field(&["apiVersion"])
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.string_field(&["metadata", "name"]).unwrap_or_default()
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.string_field(&["metadata", "namespace"])
    }

    #[must_use]
    pub fn identity(&self) -> DocumentIdentity {
        DocumentIdentity {
            kind: self.kind().to_string(),
            name: self.name().to_string(),
            namespace: self.namespace().map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    #[must_use]
    pub fn as_mapping_mut(&mut self) -> &mut Mapping {
        &mut self.0
    }

    /// Serialize back into a single YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying mapping cannot be serialized.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.0)
    }

    fn string_field(&self, path: &[&str]) -> Option<&str> {
        let mut current = self.0.get(path.first()?)?;
        for key in &path[1..] {
            current = current.get(key)?;
        }
        current.as_str()
    }
}

/// Identity triple used to reference a document in reports and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentIdentity {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(formatter, "{}/{} ({namespace})", self.kind, self.name),
            None => write!(formatter, "{}/{}", self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::{DocumentValidationError, ResourceDocument};

    fn parse(raw: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(raw).expect("valid yaml mapping")
    }

    #[test]
    fn exposes_identity_fields() {
        let document = ResourceDocument::from_mapping(parse(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: frontend\n  namespace: abshop\n",
        ))
        .expect("valid document");

        assert_eq!(document.kind(), "Deployment");
        assert_eq!(document.api_version(), Some("apps/v1"));
        assert_eq!(document.name(), "frontend");
        assert_eq!(document.namespace(), Some("abshop"));
        assert_eq!(document.identity().to_string(), "Deployment/frontend (abshop)");
    }

    #[test]
    fn rejects_documents_without_kind() {
        let error = ResourceDocument::from_mapping(parse("metadata:\n  name: thing\n"))
            .expect_err("kind is required");
        assert!(matches!(error, DocumentValidationError::MissingKind));
    }

    #[test]
    fn rejects_documents_without_name() {
        let error = ResourceDocument::from_mapping(parse("kind: Namespace\nmetadata: {}\n"))
            .expect_err("name is required");
        assert!(matches!(
            error,
            DocumentValidationError::MissingName { kind } if kind == "Namespace"
        ));
    }
}
