use crate::ann_matrix::AnnMatrix;
use crate::ontology::CellTypeUniverse;
use anyhow::anyhow;
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

///
/// One data set loader: fetches and lightly reshapes a raw source into
/// an annotated matrix. The estimator core only relies on the feature
/// identifiers, the mapped-feature flag, and the label column the
/// loader fills in.
///
pub trait DatasetLoader: Send + Sync {
    /// Stable identifier, e.g. `human_colon_2020_10x_james_001`
    fn id(&self) -> &str;

    fn species(&self) -> &str;

    fn organ(&self) -> &str;

    /// Load one sample from `source_location`
    ///
    /// * `source_location` - directory holding the raw files
    /// * `sample_id` - sample within the data set, when there are several
    fn load(&self, source_location: &Path, sample_id: Option<&str>) -> anyhow::Result<AnnMatrix>;
}

///
/// An ordered source-label to target-label mapping declared by a
/// loader, checked against the active universe before use so that a
/// stale table fails at registration rather than mid-training.
///
#[derive(Debug, Clone, Default)]
pub struct ClassMap {
    entries: Vec<(Box<str>, Box<str>)>,
}

impl ClassMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_label: &str, target_label: &str) {
        self.entries.push((source_label.into(), target_label.into()));
    }

    pub fn target(&self, source_label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(src, _)| src.as_ref() == source_label)
            .map(|(_, tgt)| tgt.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every target label must be a leaf class or resolvable through
    /// an ontology grouping of `universe`.
    pub fn validate(&self, universe: &CellTypeUniverse) -> anyhow::Result<()> {
        for (source, target) in self.entries.iter() {
            if universe.leaf_position(target).is_none()
                && universe.ontology_positions(target).is_none()
            {
                return Err(anyhow!(
                    "class map target \"{}\" (from \"{}\") not in the universe",
                    target,
                    source
                ));
            }
        }
        Ok(())
    }
}

///
/// Loaders aggregated by anatomical grouping
///
pub struct DatasetGroup {
    name: Box<str>,
    loaders: Vec<Arc<dyn DatasetLoader>>,
}

impl DatasetGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            loaders: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, loader: Arc<dyn DatasetLoader>) {
        self.loaders.push(loader);
    }

    pub fn loaders(&self) -> &[Arc<dyn DatasetLoader>] {
        &self.loaders
    }
}

///
/// Collaborators register their data set groups here at process start;
/// there is no import-probing fallback, an unregistered group simply
/// does not exist.
///
#[derive(Default)]
pub struct DatasetRegistry {
    groups: BTreeMap<Box<str>, DatasetGroup>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_group(&mut self, group: DatasetGroup) {
        info!(
            "registered group \"{}\" with {} loaders",
            group.name(),
            group.loaders().len()
        );
        self.groups.insert(group.name().into(), group);
    }

    pub fn group(&self, name: &str) -> Option<&DatasetGroup> {
        self.groups.get(name)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(|key| key.as_ref()).collect()
    }

    /// Find a loader by its stable identifier across all groups
    pub fn loader(&self, id: &str) -> Option<Arc<dyn DatasetLoader>> {
        self.groups
            .values()
            .flat_map(|group| group.loaders().iter())
            .find(|loader| loader.id() == id)
            .cloned()
    }
}
