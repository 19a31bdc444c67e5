use std::collections::HashMap;

///
/// An alias-to-leaf-class mapping: resolves a coarse or ambiguous
/// label into one or more leaf classes of the universe. Groupings are
/// probed in the order they were registered.
///
#[derive(Debug, Clone)]
pub struct OntologyGrouping {
    name: Box<str>,
    aliases: HashMap<Box<str>, Vec<Box<str>>>,
}

impl OntologyGrouping {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            aliases: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `alias` as matching the given leaf classes
    pub fn insert(&mut self, alias: &str, leaves: Vec<Box<str>>) {
        self.aliases.insert(alias.into(), leaves);
    }

    pub fn leaves(&self, alias: &str) -> Option<&[Box<str>]> {
        self.aliases.get(alias).map(|v| v.as_slice())
    }
}

///
/// The cell type universe one classifier is trained over: an ordered
/// list of leaf class identifiers plus prioritized ontology groupings
/// for resolving labels that are not leaf classes themselves.
///
#[derive(Debug, Clone)]
pub struct CellTypeUniverse {
    ids: Vec<Box<str>>,
    ontologies: Vec<OntologyGrouping>,
}

impl CellTypeUniverse {
    pub fn new(ids: Vec<Box<str>>, ontologies: Vec<OntologyGrouping>) -> Self {
        Self { ids, ontologies }
    }

    pub fn ids(&self) -> &[Box<str>] {
        &self.ids
    }

    pub fn num_types(&self) -> usize {
        self.ids.len()
    }

    pub fn ontologies(&self) -> &[OntologyGrouping] {
        &self.ontologies
    }

    /// Whether an explicit "unknown" class is part of the universe
    pub fn has_unknown(&self) -> bool {
        self.ids.iter().any(|x| x.eq_ignore_ascii_case("unknown"))
    }

    /// Width of the one-hot target space: one column per leaf class,
    /// plus a trailing unknown column when none is declared.
    pub fn num_output_classes(&self) -> usize {
        if self.has_unknown() {
            self.num_types()
        } else {
            self.num_types() + 1
        }
    }

    /// Position of `label` among the leaf classes, if it is one
    pub fn leaf_position(&self, label: &str) -> Option<usize> {
        self.ids.iter().position(|x| x.as_ref() == label)
    }

    /// Resolve `label` through the ontology groupings, first match
    /// wins; returns leaf positions within the universe ordering.
    pub fn ontology_positions(&self, label: &str) -> Option<Vec<usize>> {
        for grouping in self.ontologies.iter() {
            if let Some(leaves) = grouping.leaves(label) {
                let positions = self
                    .ids
                    .iter()
                    .enumerate()
                    .filter(|(_, id)| leaves.contains(id))
                    .map(|(pos, _)| pos)
                    .collect::<Vec<_>>();
                return Some(positions);
            }
        }
        None
    }
}
