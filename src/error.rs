use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Underlying error reported by the cluster client for a failed query.
pub type QueryCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory, pass --kubeconfig explicitly")]
    HomeNotFound,
    #[error("kubeconfig file {0} does not exist")]
    KubeconfigMissing(PathBuf),
    #[error("failed to load kubeconfig {path}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },
    #[error("failed to build Kubernetes client")]
    Client(#[source] kube::Error),
    #[error("failed to read settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid namespace pattern {pattern}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Cluster API call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    ListNamespaces,
    ListPods,
    CountContainers,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPhase::ListNamespaces => write!(f, "list-namespaces"),
            QueryPhase::ListPods => write!(f, "list-pods"),
            QueryPhase::CountContainers => write!(f, "count-containers"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{phase} failed{}: {cause}", namespace_suffix(.namespace))]
pub struct ClusterQueryError {
    pub phase: QueryPhase,
    pub namespace: Option<String>,
    #[source]
    pub cause: QueryCause,
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    match namespace {
        Some(ns) => format!(" in namespace {}", ns),
        None => String::new(),
    }
}

impl ClusterQueryError {
    pub fn new(phase: QueryPhase, cause: impl Into<QueryCause>) -> Self {
        Self {
            phase,
            namespace: None,
            cause: cause.into(),
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }
}

/// Failure of a single namespace scan. Never fatal for the scan as a whole.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Query(#[from] ClusterQueryError),
    #[error("scan of namespace {namespace} was cancelled before it completed")]
    Cancelled { namespace: String },
    #[error("scan task for namespace {namespace} terminated abnormally: {message}")]
    Aborted { namespace: String, message: String },
}

impl ScanError {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            ScanError::Query(e) => e.namespace.as_deref(),
            ScanError::Cancelled { namespace } | ScanError::Aborted { namespace, .. } => {
                Some(namespace)
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled { .. })
    }
}
