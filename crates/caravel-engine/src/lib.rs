mod apply;
mod binder;
mod cluster;
mod error;
mod graph;
mod manifest;
mod plan;
mod topology;

pub use apply::{CancelToken, RunOptions, run};
pub use binder::bind_image;
pub use cluster::{ArtifactBuilder, ArtifactError, ClusterClient, ClusterError, ReadyStatus};
pub use error::{BindError, GraphError, ManifestError, TopologyError};
pub use graph::{DependencyGraph, NodeHandle};
pub use manifest::load_documents;
pub use plan::build_plan;
pub use topology::{GraphAssembler, ImageResolution, assemble_demo};
