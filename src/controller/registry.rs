//! Versioned stage pipelines
//!
//! The registry is built once at startup and shared read-only. Each version key
//! maps to its stages sorted by their `order`; the same stage tree also carries
//! the defaulting and validation hooks admission calls into.

use std::collections::BTreeMap;

use tracing::debug;

use crate::controller::module::{Module, Stage};
use crate::controller::validation::FieldError;
use crate::crd::Cluster;

/// Accumulates stages per version; [`RegistryBuilder::build`] freezes them
#[derive(Default)]
pub struct RegistryBuilder {
    pipelines: BTreeMap<String, Vec<Stage>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one stage for `version`; stages may arrive in any order
    pub fn register(mut self, version: &str, stage: Stage) -> Self {
        self.pipelines
            .entry(version.to_string())
            .or_default()
            .push(stage);
        self
    }

    pub fn build(self) -> Registry {
        let pipelines = self
            .pipelines
            .into_iter()
            .map(|(version, mut stages)| {
                // Stable: equal orders keep registration order
                stages.sort_by_key(Stage::order);
                debug!(
                    %version,
                    stages = ?stages.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
                    "Registered control-plane pipeline"
                );
                (version, stages)
            })
            .collect();
        Registry { pipelines }
    }
}

/// Immutable version -> ordered stages table
pub struct Registry {
    pipelines: BTreeMap<String, Vec<Stage>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Stages for a version, in reconcile order
    pub fn lookup(&self, version: &str) -> Option<&[Stage]> {
        self.pipelines.get(version).map(Vec::as_slice)
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Highest registered version, comparing the numeric components
    /// (`x86-1.18.4` > `arm-1.18.1`); ties fall back to the string order
    pub fn default_version(&self) -> Option<&str> {
        self.versions()
            .max_by(|a, b| version_key(a).cmp(&version_key(b)).then_with(|| a.cmp(b)))
    }

    /// Fill an empty version with the default, then apply every stage's defaults
    pub fn apply_defaults(&self, cluster: &mut Cluster) {
        if cluster.spec.cluster_version.is_empty()
            && let Some(version) = self.default_version()
        {
            cluster.spec.cluster_version = version.to_string();
        }
        if let Some(stages) = self.pipelines.get(&cluster.spec.cluster_version) {
            for stage in stages {
                stage.apply_defaults(&mut cluster.spec);
            }
        }
    }

    /// Validation for a new Cluster: errors from every stage are reported together
    pub fn validate_create(&self, cluster: &Cluster) -> Vec<FieldError> {
        match self.lookup(cluster.version()) {
            Some(stages) => stages
                .iter()
                .flat_map(|s| s.validate_create(cluster))
                .collect(),
            None => vec![self.unknown_version(cluster.version())],
        }
    }

    /// Validation for an update, run against the new object's pipeline
    pub fn validate_update(&self, old: &Cluster, new: &Cluster) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if old.version() != new.version() {
            errors.push(FieldError::immutable("spec.clusterVersion", new.version()));
        }
        match self.lookup(new.version()) {
            Some(stages) => {
                errors.extend(stages.iter().flat_map(|s| s.validate_update(old, new)));
            }
            None => errors.push(self.unknown_version(new.version())),
        }
        errors
    }

    fn unknown_version(&self, version: &str) -> FieldError {
        let known = self.versions().collect::<Vec<_>>().join(", ");
        FieldError::invalid(
            "spec.clusterVersion",
            version,
            &format!("unsupported version, expected one of: {}", known),
        )
    }
}

/// Numeric components of the release part (`arm-1.18.1` -> `[1, 18, 1]`)
fn version_key(version: &str) -> Vec<u64> {
    version
        .rsplit_once('-')
        .map_or(version, |(_, release)| release)
        .trim_start_matches('v')
        .split('.')
        .filter_map(|part| part.parse().ok())
        .collect()
}
