use crate::error::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::info;

const DEFAULT_CONCURRENCY: usize = 16;
pub(crate) const DEFAULT_BUFFER_CAPACITY: usize = 2000;
const DEFAULT_PAGE_SIZE: u32 = 500;
const DEFAULT_QPS: u32 = 25;
const DEFAULT_BURST: u32 = 50;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// Maximum number of namespaces scanned at the same time.
    pub concurrency: usize,
    pub timeout_seconds: Option<u64>,
    pub buffer: BufferSetting,
    pub page_size: u32,
    pub include_init_containers: bool,
    /// Glob patterns of namespaces that are never scanned.
    pub exclude_namespaces: Vec<String>,
    /// Sustained Kubernetes API requests per second.
    pub qps: u32,
    /// Requests allowed above `qps` in a single burst.
    pub burst: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_seconds: None,
            buffer: BufferSetting::Fixed(DEFAULT_BUFFER_CAPACITY),
            page_size: DEFAULT_PAGE_SIZE,
            include_init_containers: false,
            exclude_namespaces: Vec::new(),
            qps: DEFAULT_QPS,
            burst: DEFAULT_BURST,
        }
    }
}

/// Capacity of the result conduit: a fixed value, or estimated from a cluster-wide container count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBufferSetting")]
pub enum BufferSetting {
    Auto,
    Fixed(usize),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBufferSetting {
    Capacity(usize),
    Keyword(String),
}

impl TryFrom<RawBufferSetting> for BufferSetting {
    type Error = String;

    fn try_from(raw: RawBufferSetting) -> Result<Self, Self::Error> {
        match raw {
            RawBufferSetting::Capacity(0) => Err("buffer capacity must be at least 1".to_string()),
            RawBufferSetting::Capacity(n) => Ok(BufferSetting::Fixed(n)),
            RawBufferSetting::Keyword(k) if k == "auto" => Ok(BufferSetting::Auto),
            RawBufferSetting::Keyword(k) => Err(format!(
                "buffer must be 'auto' or a positive number, got '{}'",
                k
            )),
        }
    }
}

impl Settings {
    pub fn with_overrides(
        mut self,
        concurrency: Option<usize>,
        timeout_seconds: Option<u64>,
    ) -> Self {
        if let Some(concurrency) = concurrency {
            self.concurrency = concurrency;
        }
        if timeout_seconds.is_some() {
            self.timeout_seconds = timeout_seconds;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.concurrency > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "concurrency must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if let BufferSetting::Fixed(capacity) = self.buffer
            && capacity > Semaphore::MAX_PERMITS
        {
            return Err(ConfigError::Invalid(format!(
                "buffer capacity must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("pageSize must be at least 1".to_string()));
        }
        if self.timeout_seconds == Some(0) {
            return Err(ConfigError::Invalid(
                "timeoutSeconds must be at least 1".to_string(),
            ));
        }
        if self
            .timeout()
            .is_some_and(|timeout| Instant::now().checked_add(timeout).is_none())
        {
            return Err(ConfigError::Invalid(
                "timeoutSeconds is too large".to_string(),
            ));
        }
        if self.qps == 0 || self.burst == 0 {
            return Err(ConfigError::Invalid(
                "qps and burst must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Point in time at which the scan is cut short, if a timeout is set.
    ///
    /// A timeout too large to represent means no deadline.
    pub fn deadline(&self, now: Instant) -> Option<Instant> {
        self.timeout().and_then(|timeout| now.checked_add(timeout))
    }

    pub fn namespace_filter(&self) -> Result<NamespaceFilter, ConfigError> {
        NamespaceFilter::new(&self.exclude_namespaces)
    }
}

/// Loads scanner settings, falling back to defaults when no file is given.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };

    info!("Loading settings from file {}", path.display());
    let yaml_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let expanded = expand_env_vars(&yaml_str)?;

    // An empty document deserializes to unit, not to a map of defaults.
    if expanded.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml_ng::from_str(&expanded).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Kubeconfig to use: the explicit path if given, otherwise `~/.kube/config`.
pub fn resolve_kubeconfig(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(path),
        None => dirs::home_dir()
            .map(|home| home.join(".kube").join("config"))
            .ok_or(ConfigError::HomeNotFound),
    }
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first variable that is not set.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)}").map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let mut missing: Option<String> = None;
    let result = re.replace_all(input, |caps: &regex::Captures| match env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingEnvVar(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Namespaces excluded from the scan by glob pattern.
#[derive(Debug)]
pub struct NamespaceFilter {
    excluded: GlobSet,
}

impl NamespaceFilter {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        let excluded = builder.build().map_err(|source| ConfigError::Pattern {
            pattern: patterns.join(","),
            source,
        })?;
        Ok(Self { excluded })
    }

    pub fn allows(&self, namespace: &str) -> bool {
        !self.excluded.is_match(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn write_settings(yaml: &str) -> tempfile::NamedTempFile {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), yaml).expect("Failed to write to temp file");
        tmp_file
    }

    #[test]
    fn test_settings_expand_excluded_namespace_from_env() {
        unsafe {
            env::set_var("KU_PLATFORM_NAMESPACE", "platform-*");
        }
        let tmp_file = write_settings("excludeNamespaces:\n  - ${KU_PLATFORM_NAMESPACE}\n");

        let settings = load_settings(Some(tmp_file.path())).expect("Should load settings");
        unsafe {
            env::remove_var("KU_PLATFORM_NAMESPACE");
        }

        assert_eq!(settings.exclude_namespaces, vec!["platform-*"]);
        let filter = settings.namespace_filter().expect("Pattern should compile");
        assert!(!filter.allows("platform-ingress"));
        assert!(filter.allows("shop"));
    }

    #[test]
    fn test_settings_expand_numeric_values_from_env() {
        unsafe {
            env::set_var("KU_SCAN_CONCURRENCY", "6");
            env::set_var("KU_SCAN_TIMEOUT", "90");
        }
        let tmp_file = write_settings(
            "concurrency: ${KU_SCAN_CONCURRENCY}\ntimeoutSeconds: ${KU_SCAN_TIMEOUT}\n",
        );

        let settings = load_settings(Some(tmp_file.path())).expect("Should load settings");
        unsafe {
            env::remove_var("KU_SCAN_CONCURRENCY");
            env::remove_var("KU_SCAN_TIMEOUT");
        }

        assert_eq!(settings.concurrency, 6);
        assert_eq!(settings.timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_settings_with_unset_env_var() {
        let tmp_file = write_settings("excludeNamespaces:\n  - ${KU_UNSET_NAMESPACE}\n");

        let err = load_settings(Some(tmp_file.path())).expect_err("Should fail");

        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "KU_UNSET_NAMESPACE"));
        assert_eq!(err.to_string(), "missing environment variable: KU_UNSET_NAMESPACE");
    }

    #[test]
    fn test_dollar_without_braces_is_kept() {
        let tmp_file = write_settings("excludeNamespaces:\n  - $literal\n");
        let settings = load_settings(Some(tmp_file.path())).expect("Should load settings");
        assert_eq!(settings.exclude_namespaces, vec!["$literal"]);
    }

    #[test]
    fn test_validate_rejects_concurrency_above_semaphore_limit() {
        let settings = Settings::default().with_overrides(Some(usize::MAX), None);
        let err = settings.validate().expect_err("Should reject concurrency");
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.starts_with("concurrency")));

        let at_limit = Settings::default().with_overrides(Some(Semaphore::MAX_PERMITS), None);
        at_limit.validate().expect("Limit itself is allowed");
    }

    #[test]
    fn test_validate_rejects_buffer_above_semaphore_limit() {
        let tmp_file = write_settings(&format!("buffer: {}\n", usize::MAX));
        let settings = load_settings(Some(tmp_file.path())).expect("Should parse buffer");
        assert_eq!(settings.buffer, BufferSetting::Fixed(usize::MAX));

        let err = settings.validate().expect_err("Should reject buffer");
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.starts_with("buffer")));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_timeout() {
        let settings = Settings::default().with_overrides(None, Some(u64::MAX));
        let err = settings.validate().expect_err("Should reject timeout");
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.starts_with("timeoutSeconds")));
        assert_eq!(settings.deadline(Instant::now()), None);
    }

    #[test]
    fn test_deadline_from_timeout() {
        let now = Instant::now();
        let settings = Settings::default().with_overrides(None, Some(30));
        assert_eq!(settings.deadline(now), Some(now + Duration::from_secs(30)));
        assert_eq!(Settings::default().deadline(now), None);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let settings = Settings {
            qps: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let settings = Settings {
            burst: 0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_settings_file() {
        let yaml_content = r#"
        concurrency: 4
        timeoutSeconds: 30
        buffer: auto
        pageSize: 100
        includeInitContainers: true
        excludeNamespaces:
          - kube-*
          - monitoring
        qps: 10
        burst: 20
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, yaml_content).expect("Failed to write to temp file");

        let settings = load_settings(Some(path)).expect("Should load settings");

        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.buffer, BufferSetting::Auto);
        assert_eq!(settings.page_size, 100);
        assert!(settings.include_init_containers);
        assert_eq!(settings.exclude_namespaces, vec!["kube-*", "monitoring"]);
        assert_eq!(settings.qps, 10);
        assert_eq!(settings.burst, 20);
        settings.validate().expect("Settings should be valid");
    }

    #[test]
    fn test_load_settings_partial_file_uses_defaults() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "buffer: 250\n").expect("Failed to write to temp file");

        let settings = load_settings(Some(tmp_file.path())).expect("Should load settings");

        assert_eq!(settings.buffer, BufferSetting::Fixed(250));
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.timeout(), None);
        assert_eq!(settings.qps, DEFAULT_QPS);
        assert_eq!(settings.burst, DEFAULT_BURST);
    }

    #[test]
    fn test_load_settings_empty_file() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let settings = load_settings(Some(tmp_file.path())).expect("Should load settings");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_without_file() {
        let settings = load_settings(None).expect("Should use defaults");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_rejects_invalid_buffer() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "buffer: lots\n").expect("Failed to write to temp file");
        let err = load_settings(Some(tmp_file.path())).expect_err("Should reject buffer");
        assert!(matches!(err, ConfigError::Parse { .. }));

        fs::write(tmp_file.path(), "buffer: 0\n").expect("Failed to write to temp file");
        let err = load_settings(Some(tmp_file.path())).expect_err("Should reject buffer");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_settings_missing_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = load_settings(Some(&dir.path().join("nope.yaml"))).expect_err("Should fail");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_overrides_and_validation() {
        let settings = Settings::default().with_overrides(Some(2), Some(10));
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.timeout_seconds, Some(10));
        settings.validate().expect("Settings should be valid");

        let unchanged = Settings::default().with_overrides(None, None);
        assert_eq!(unchanged, Settings::default());

        let zero = Settings::default().with_overrides(Some(0), None);
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_resolve_kubeconfig_prefers_explicit_path() {
        let path =
            resolve_kubeconfig(Some(PathBuf::from("/tmp/kubeconfig"))).expect("Should resolve");
        assert_eq!(path, PathBuf::from("/tmp/kubeconfig"));
    }

    #[test]
    fn test_namespace_filter() {
        let filter = NamespaceFilter::new(&["kube-*".to_string(), "monitoring".to_string()])
            .expect("Patterns should compile");
        assert!(!filter.allows("kube-system"));
        assert!(!filter.allows("kube-public"));
        assert!(!filter.allows("monitoring"));
        assert!(filter.allows("default"));
        assert!(filter.allows("monitoring-2"));

        let empty = NamespaceFilter::new(&[]).expect("Empty filter should compile");
        assert!(empty.allows("kube-system"));
    }

    #[test]
    fn test_namespace_filter_invalid_pattern() {
        let err = NamespaceFilter::new(&["team-[".to_string()]).expect_err("Should fail");
        assert!(matches!(err, ConfigError::Pattern { ref pattern, .. } if pattern == "team-["));
    }
}
