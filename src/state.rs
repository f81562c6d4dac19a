use serde::Serialize;

/// One container flagged as running an unpinned image.
///
/// Only built by the namespace scanner for containers that pass
/// [`crate::image_reference::is_unpinned`]; fields are never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    namespace: String,
    pod: String,
    container: String,
    image: String,
}

impl Workload {
    pub(crate) fn new(namespace: &str, pod: &str, container: &ContainerRecord) -> Self {
        Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.name.clone(),
            image: container.image.clone(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

/// Pod as returned by the cluster client, reduced to what the scanner reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodRecord {
    pub name: String,
    pub containers: Vec<ContainerRecord>,
    pub init_containers: Vec<ContainerRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
}

impl ContainerRecord {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }
}

impl PodRecord {
    pub fn new(name: impl Into<String>, containers: Vec<ContainerRecord>) -> Self {
        Self {
            name: name.into(),
            containers,
            init_containers: Vec::new(),
        }
    }

    pub fn with_init_containers(mut self, init_containers: Vec<ContainerRecord>) -> Self {
        self.init_containers = init_containers;
        self
    }

    /// Containers to evaluate, init containers first when requested.
    pub fn containers(&self, include_init: bool) -> impl Iterator<Item = &ContainerRecord> {
        let init: &[ContainerRecord] = if include_init {
            &self.init_containers
        } else {
            &[]
        };
        init.iter().chain(self.containers.iter())
    }

    pub fn container_count(&self, include_init: bool) -> usize {
        self.containers(include_init).count()
    }
}
