use caravel_domain::{ContainerName, ImageReference, ResourceDocument};
use serde_yaml::Value;

use crate::error::BindError;

/// Workload kinds that carry the recognized pod-template shape
/// (`spec.template.spec.containers`).
const WORKLOAD_KINDS: [&str; 4] = ["Deployment", "StatefulSet", "DaemonSet", "Job"];

/// Rewrite the image field of the container matching `container` inside the
/// node's workload documents.
///
/// A document set without any workload document is left untouched, since
/// some nodes carry no runnable unit (namespace-only payloads). A workload
/// set where the name matches nothing or more than one container is a hard
/// error: a silent no-op would deploy an unbuilt image.
///
/// # Errors
///
/// Returns an error when a workload document is present but the container
/// name matches zero or multiple containers.
pub fn bind_image(
    documents: &mut [ResourceDocument],
    container: &ContainerName,
    reference: &ImageReference,
) -> Result<(), BindError> {
    let mut workload_seen = false;
    let mut matches: Vec<(usize, usize)> = Vec::new();

    for (document_index, document) in documents.iter().enumerate() {
        if !is_workload(document) {
            continue;
        }
        workload_seen = true;

        for (container_index, name) in container_names(document) {
            if container.matches(name) {
                matches.push((document_index, container_index));
            }
        }
    }

    if !workload_seen {
        return Ok(());
    }

    match matches.as_slice() {
        [] => Err(BindError::ContainerNotFound {
            container: container.to_string(),
        }),
        [(document_index, container_index)] => {
            set_container_image(
                &mut documents[*document_index],
                *container_index,
                reference,
            );
            Ok(())
        }
        _ => Err(BindError::AmbiguousContainer {
            container: container.to_string(),
            count: matches.len(),
        }),
    }
}

fn is_workload(document: &ResourceDocument) -> bool {
    WORKLOAD_KINDS.contains(&document.kind())
}

fn container_names(document: &ResourceDocument) -> Vec<(usize, &str)> {
    pod_containers(document).map_or_else(Vec::new, |containers| {
        containers
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                entry.get("name").and_then(Value::as_str).map(|name| (index, name))
            })
            .collect()
    })
}

fn pod_containers(document: &ResourceDocument) -> Option<&Vec<Value>> {
    document
        .as_mapping()
        .get("spec")?
        .get("template")?
        .get("spec")?
        .get("containers")?
        .as_sequence()
}

fn set_container_image(
    document: &mut ResourceDocument,
    container_index: usize,
    reference: &ImageReference,
) {
    let Some(containers) = document
        .as_mapping_mut()
        .get_mut("spec")
        .and_then(|spec| spec.get_mut("template"))
        .and_then(|template| template.get_mut("spec"))
        .and_then(|pod_spec| pod_spec.get_mut("containers"))
        .and_then(Value::as_sequence_mut)
    else {
        return;
    };

    if let Some(Value::Mapping(entry)) = containers.get_mut(container_index) {
        entry.insert(
            Value::from("image"),
            Value::from(reference.as_str()),
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use caravel_domain::{ContainerName, ImageReference, ResourceDocument};

    use super::bind_image;
    use crate::error::BindError;

    fn document(raw: &str) -> ResourceDocument {
        ResourceDocument::from_mapping(serde_yaml::from_str(raw).expect("valid yaml"))
            .expect("valid document")
    }

    fn frontend_deployment() -> ResourceDocument {
        document(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: frontend\nspec:\n  replicas: 2\n  template:\n    spec:\n      containers:\n        - name: frontend\n          image: placeholder:dev\n          ports:\n            - containerPort: 8080\n        - name: mesh-proxy\n          image: envoy:v1.20\n",
        )
    }

    fn name(value: &str) -> ContainerName {
        ContainerName::try_from(value).expect("valid container name")
    }

    fn reference(value: &str) -> ImageReference {
        ImageReference::try_from(value).expect("valid image reference")
    }

    #[test]
    fn rewrites_only_the_matching_container_image() {
        let mut documents = vec![frontend_deployment()];
        bind_image(&mut documents, &name("Frontend"), &reference("registry.local/frontend:v2"))
            .expect("bind");

        let rendered = documents[0].to_yaml().expect("serialize");
        assert!(rendered.contains("image: registry.local/frontend:v2"));
        assert!(rendered.contains("image: envoy:v1.20"));
        assert!(rendered.contains("replicas: 2"));
        assert!(rendered.contains("containerPort: 8080"));
    }

    #[test]
    fn nodes_without_workloads_are_untouched() {
        let mut documents = vec![document("kind: Namespace\nmetadata:\n  name: abshop\n")];
        let before = documents.clone();

        bind_image(&mut documents, &name("frontend"), &reference("ref"))
            .expect("no workload means no-op");
        assert_eq!(documents, before);
    }

    #[test]
    fn missing_container_is_an_error() {
        let mut documents = vec![frontend_deployment()];
        let error = bind_image(&mut documents, &name("backend"), &reference("ref"))
            .expect_err("must fail");
        assert!(matches!(error, BindError::ContainerNotFound { container } if container == "backend"));
    }

    #[test]
    fn multiple_matches_are_an_error() {
        let mut documents = vec![frontend_deployment(), frontend_deployment()];
        let error = bind_image(&mut documents, &name("frontend"), &reference("ref"))
            .expect_err("must fail");
        assert!(matches!(error, BindError::AmbiguousContainer { count: 2, .. }));
    }
}
