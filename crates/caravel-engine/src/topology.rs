use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use caravel_domain::{ContainerName, ImageBinding, ImageReference, NodeId, ReadinessProbe};
use walkdir::WalkDir;

use crate::binder::bind_image;
use crate::cluster::ArtifactBuilder;
use crate::error::TopologyError;
use crate::graph::{DependencyGraph, NodeHandle};
use crate::manifest::load_documents;

const CONTROLLER_SOURCE: &str = "mesh/controller.yaml";
const APPLICATION_SOURCE: &str = "application.yaml";
const GATEWAY_SOURCE: &str = "gateway.yaml";
const SERVICES_DIR: &str = "services";

const CONTROLLER_NODE: &str = "mesh-controller";
const APPLICATION_NODE: &str = "application";
const GATEWAY_NODE: &str = "gateway";

// Dependents of the controller assume its pods are live, not merely that the
// install was accepted, so the controller node is a readiness gate.
const CONTROLLER_NAMESPACE: &str = "mesh-system";
const CONTROLLER_SELECTOR: &str = "app.kubernetes.io/name=mesh-controller";
const CONTROLLER_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Services deployed from stock images, with no artifact of their own.
const UNBOUND_SERVICES: &[&str] = &["redis"];
/// Services whose manifest container name differs from the service name.
const CONTAINER_OVERRIDES: &[(&str, &str)] = &[("loadgen", "loadtester")];
/// Services that route through the gateway and must apply after it.
const GATEWAY_DEPENDENT_SERVICES: &[&str] = &["frontend"];

/// Caller-facing builder for deployment graphs: load a source, optionally
/// bind an image, register the node, declare edges.
#[derive(Debug, Default)]
pub struct GraphAssembler {
    graph: DependencyGraph,
}

impl GraphAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest source into a new node, rewriting the bound container
    /// image first when a binding is supplied.
    ///
    /// # Errors
    ///
    /// Returns an error when loading, binding, or node registration fails.
    pub fn create_node(
        &mut self,
        id: NodeId,
        source: &Path,
        binding: Option<ImageBinding>,
    ) -> Result<NodeHandle, TopologyError> {
        let mut documents = load_documents(source)?;
        let mut images = Vec::new();
        if let Some(binding) = binding {
            bind_image(&mut documents, &binding.container, &binding.reference).map_err(
                |source| TopologyError::Bind {
                    node: id.to_string(),
                    source,
                },
            )?;
            images.push(binding);
        }

        let handle = self.graph.add_node(id, documents)?;
        self.graph.record_images(handle, images);
        Ok(handle)
    }

    /// Declare that `dependent` applies only after `dependency` is applied.
    ///
    /// # Errors
    ///
    /// Returns an error for self-edges or unknown handles.
    pub fn depends_on(
        &mut self,
        dependent: NodeHandle,
        dependency: NodeHandle,
    ) -> Result<(), TopologyError> {
        self.graph.add_edge(dependent, dependency)?;
        Ok(())
    }

    pub fn readiness_gate(&mut self, handle: NodeHandle, probe: ReadinessProbe) {
        self.graph.set_readiness_gate(handle, probe);
    }

    #[must_use]
    pub fn finish(self) -> DependencyGraph {
        self.graph
    }
}

/// How image references are resolved for services under active development:
/// explicit pins win, then an artifact build from `build_root/<service>`,
/// then a plan-only placeholder (or an error when resolution is required).
pub struct ImageResolution<'a> {
    pins: BTreeMap<String, ImageReference>,
    build_root: Option<PathBuf>,
    builder: Option<&'a dyn ArtifactBuilder>,
    require_resolved: bool,
}

impl<'a> ImageResolution<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pins: BTreeMap::new(),
            build_root: None,
            builder: None,
            require_resolved: false,
        }
    }

    #[must_use]
    pub fn pin(mut self, service: &str, reference: ImageReference) -> Self {
        self.pins.insert(service.to_string(), reference);
        self
    }

    #[must_use]
    pub fn with_builder(mut self, build_root: PathBuf, builder: &'a dyn ArtifactBuilder) -> Self {
        self.build_root = Some(build_root);
        self.builder = Some(builder);
        self
    }

    /// Refuse placeholders: every bound service must resolve to a real
    /// reference. Set for execute mode so an unbuilt image is never applied.
    #[must_use]
    pub fn require_resolved(mut self) -> Self {
        self.require_resolved = true;
        self
    }

    fn resolve(&self, service: &str) -> Result<ImageReference, TopologyError> {
        if let Some(reference) = self.pins.get(service) {
            return Ok(reference.clone());
        }
        if let (Some(build_root), Some(builder)) = (&self.build_root, self.builder) {
            return Ok(builder.build(&build_root.join(service))?);
        }
        if self.require_resolved {
            return Err(TopologyError::MissingImage {
                service: service.to_string(),
            });
        }
        Ok(ImageReference::placeholder(service))
    }
}

impl Default for ImageResolution<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble the demo shop topology from a manifest root.
///
/// Shape: the mesh controller installs first and gates on pod readiness;
/// the application payload (namespaces, identities, mesh resources) depends
/// on the controller; the gateway and every service under `services/` depend
/// on the application; the frontend additionally depends on the gateway.
///
/// # Errors
///
/// Returns an error when the root is invalid or any source fails to load,
/// bind, or register.
pub fn assemble_demo(
    root: &Path,
    images: &ImageResolution<'_>,
) -> Result<DependencyGraph, TopologyError> {
    if !root.exists() {
        return Err(TopologyError::RootDoesNotExist {
            root: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(TopologyError::RootIsNotDirectory {
            root: root.to_path_buf(),
        });
    }

    let mut assembler = GraphAssembler::new();

    let controller = assembler.create_node(
        NodeId::try_from(CONTROLLER_NODE)?,
        &root.join(CONTROLLER_SOURCE),
        None,
    )?;
    assembler.readiness_gate(
        controller,
        ReadinessProbe {
            namespace: Some(CONTROLLER_NAMESPACE.to_string()),
            selector: CONTROLLER_SELECTOR.to_string(),
            timeout: CONTROLLER_READY_TIMEOUT,
        },
    );

    let application = assembler.create_node(
        NodeId::try_from(APPLICATION_NODE)?,
        &root.join(APPLICATION_SOURCE),
        None,
    )?;
    assembler.depends_on(application, controller)?;

    let gateway = assembler.create_node(
        NodeId::try_from(GATEWAY_NODE)?,
        &root.join(GATEWAY_SOURCE),
        None,
    )?;
    assembler.depends_on(gateway, application)?;

    for source in discover_service_sources(&root.join(SERVICES_DIR))? {
        let Some(service) = source.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let service = service.to_string();

        let binding = if UNBOUND_SERVICES.contains(&service.as_str()) {
            None
        } else {
            let container = CONTAINER_OVERRIDES
                .iter()
                .find(|(name, _)| *name == service)
                .map_or(service.as_str(), |(_, container)| *container);
            Some(ImageBinding {
                container: ContainerName::try_from(container)?,
                reference: images.resolve(&service)?,
            })
        };

        let node = assembler.create_node(NodeId::try_from(service.as_str())?, &source, binding)?;
        assembler.depends_on(node, application)?;
        if GATEWAY_DEPENDENT_SERVICES.contains(&service.as_str()) {
            assembler.depends_on(node, gateway)?;
        }
    }

    Ok(assembler.finish())
}

fn discover_service_sources(services_dir: &Path) -> Result<Vec<PathBuf>, TopologyError> {
    if !services_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(services_dir).max_depth(1) {
        let entry = entry.map_err(|source| TopologyError::Walk { source })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|extension| extension == "yaml" || extension == "yml")
        {
            sources.push(path.to_path_buf());
        }
    }

    sources.sort();
    Ok(sources)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use caravel_domain::ImageReference;

    use super::{ImageResolution, assemble_demo};
    use crate::cluster::{ArtifactBuilder, ArtifactError};
    use crate::error::TopologyError;
    use crate::plan::build_plan;

    struct RecordingBuilder {
        contexts: Mutex<Vec<PathBuf>>,
    }

    impl ArtifactBuilder for RecordingBuilder {
        fn build(&self, context_dir: &Path) -> Result<ImageReference, ArtifactError> {
            self.contexts.lock().expect("lock").push(context_dir.to_path_buf());
            let name = context_dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            ImageReference::try_from(format!("registry.local/{name}@sha256:feedface"))
                .map_err(|_| ArtifactError::EmptyReference {
                    context: context_dir.display().to_string(),
                })
        }
    }

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    fn deployment(name: &str, container: &str) -> String {
        format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\n  namespace: abshop\nspec:\n  template:\n    spec:\n      containers:\n        - name: {container}\n          image: placeholder:dev\n"
        )
    }

    fn demo_root() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(
            &root.join("mesh/controller.yaml"),
            &format!(
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: mesh-system\n---\n{}",
                deployment("mesh-controller", "controller")
            ),
        );
        write(
            &root.join("application.yaml"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: abshop\n",
        );
        write(
            &root.join("gateway.yaml"),
            &deployment("gateway", "envoy"),
        );
        write(
            &root.join("services/frontend.yaml"),
            &deployment("frontend", "frontend"),
        );
        write(
            &root.join("services/redis.yaml"),
            &deployment("redis", "redis"),
        );
        write(
            &root.join("services/loadgen.yaml"),
            &deployment("loadgen", "loadtester"),
        );
        temp
    }

    #[test]
    fn assembles_the_demo_shape() {
        let temp = demo_root();
        let graph = assemble_demo(temp.path(), &ImageResolution::new()).expect("assemble");
        let plan = build_plan(&graph);

        assert!(!plan.has_errors());
        assert_eq!(
            plan.execution_order
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec![
                "mesh-controller",
                "application",
                "gateway",
                "frontend",
                "loadgen",
                "redis"
            ]
        );

        let controller = &plan.nodes[0];
        assert!(controller.readiness_gate);

        let frontend = plan
            .nodes
            .iter()
            .find(|node| node.id.as_str() == "frontend")
            .expect("frontend planned");
        assert_eq!(
            frontend
                .depends_on
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["application", "gateway"]
        );

        let redis = plan
            .nodes
            .iter()
            .find(|node| node.id.as_str() == "redis")
            .expect("redis planned");
        assert!(redis.images.is_empty(), "redis deploys a stock image");
    }

    #[test]
    fn unresolved_images_become_placeholders_in_plan_mode() {
        let temp = demo_root();
        let graph = assemble_demo(temp.path(), &ImageResolution::new()).expect("assemble");
        let plan = build_plan(&graph);

        assert!(plan.has_pending_images());
        let loadgen = plan
            .nodes
            .iter()
            .find(|node| node.id.as_str() == "loadgen")
            .expect("loadgen planned");
        assert_eq!(loadgen.images[0].container.as_str(), "loadtester");
        assert!(loadgen.images[0].reference.is_placeholder());
    }

    #[test]
    fn pinned_references_are_bound_into_workloads() {
        let temp = demo_root();
        let images = ImageResolution::new().pin(
            "frontend",
            ImageReference::try_from("registry.local/frontend:v2").expect("valid reference"),
        );
        let graph = assemble_demo(temp.path(), &images).expect("assemble");

        let handle = graph
            .handle(&"frontend".try_into().expect("valid id"))
            .expect("frontend registered");
        let rendered = graph.nodes[handle.0].documents[0].to_yaml().expect("serialize");
        assert!(rendered.contains("image: registry.local/frontend:v2"));
    }

    #[test]
    fn builder_resolves_from_service_build_contexts() {
        let temp = demo_root();
        let builder = RecordingBuilder {
            contexts: Mutex::new(Vec::new()),
        };
        let images = ImageResolution::new()
            .with_builder(PathBuf::from("/src"), &builder)
            .require_resolved();
        let graph = assemble_demo(temp.path(), &images).expect("assemble");
        assert_eq!(graph.len(), 6);

        let contexts = builder.contexts.lock().expect("lock");
        assert!(contexts.contains(&PathBuf::from("/src/frontend")));
        assert!(contexts.contains(&PathBuf::from("/src/loadgen")));
        assert!(!contexts.contains(&PathBuf::from("/src/redis")));
    }

    #[test]
    fn execute_mode_requires_resolved_references() {
        let temp = demo_root();
        let images = ImageResolution::new().require_resolved();
        let error = assemble_demo(temp.path(), &images).expect_err("must fail");
        assert!(matches!(error, TopologyError::MissingImage { .. }));
    }

    #[test]
    fn missing_roots_are_rejected() {
        let error = assemble_demo(Path::new("/nonexistent/demo"), &ImageResolution::new())
            .expect_err("must fail");
        assert!(matches!(error, TopologyError::RootDoesNotExist { .. }));
    }
}
