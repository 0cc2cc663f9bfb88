use std::io;
use std::path::PathBuf;

use caravel_domain::{DocumentValidationError, DomainValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest source: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse manifest source {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document {index} in {path} is not a mapping")]
    NotAMapping { path: PathBuf, index: usize },
    #[error("document {index} in {path} is invalid")]
    Document {
        path: PathBuf,
        index: usize,
        #[source]
        source: DocumentValidationError,
    },
    #[error("manifest source yielded no documents: {path}")]
    EmptyManifest { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("no container named \"{container}\" in any workload document")]
    ContainerNotFound { container: String },
    #[error("{count} containers named \"{container}\" match across workload documents")]
    AmbiguousContainer { container: String, count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node \"{id}\" is already registered")]
    DuplicateNode { id: String },
    #[error("edge references unknown node index {index}")]
    UnknownNode { index: usize },
    #[error("node \"{id}\" cannot depend on itself")]
    SelfDependency { id: String },
    #[error("dependency cycle detected among: {nodes}")]
    Cycle { nodes: String },
    #[error("{message}")]
    Invariant { message: String },
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("manifest root does not exist: {root}")]
    RootDoesNotExist { root: PathBuf },
    #[error("manifest root must be a directory: {root}")]
    RootIsNotDirectory { root: PathBuf },
    #[error("failed while walking service manifests")]
    Walk {
        #[source]
        source: walkdir::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("image binding failed for node \"{node}\"")]
    Bind {
        node: String,
        #[source]
        source: BindError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Validation(#[from] DomainValidationError),
    #[error("no image reference available for service \"{service}\" (supply --image or --build-root)")]
    MissingImage { service: String },
    #[error(transparent)]
    Artifact(#[from] crate::cluster::ArtifactError),
}
