use crate::common_io::read_lines;
use anyhow::anyhow;
use std::collections::HashMap;

///
/// The reference feature space a trained model expects as input: an
/// ordered list of unique gene identifiers with O(1) lookup from
/// identifier to position. Immutable once constructed; shared
/// read-only by every estimator using the same model topology.
///
#[derive(Debug, Clone)]
pub struct GenomeContainer {
    id: Box<str>,
    ensembl_ids: Vec<Box<str>>,
    symbols: Vec<Box<str>>,
    positions: HashMap<Box<str>, usize>,
}

impl GenomeContainer {
    /// Build a genome container from parallel identifier lists
    ///
    /// * `id` - a tag naming this reference (e.g., assembly + release)
    /// * `ensembl_ids` - ordered gene identifiers, must be unique
    /// * `symbols` - gene symbols, same length as `ensembl_ids`
    pub fn new(
        id: &str,
        ensembl_ids: Vec<Box<str>>,
        symbols: Vec<Box<str>>,
    ) -> anyhow::Result<Self> {
        if ensembl_ids.len() != symbols.len() {
            return Err(anyhow!(
                "{} identifiers vs. {} symbols",
                ensembl_ids.len(),
                symbols.len()
            ));
        }

        let mut positions = HashMap::with_capacity(ensembl_ids.len());
        for (pos, gene) in ensembl_ids.iter().enumerate() {
            if positions.insert(gene.clone(), pos).is_some() {
                return Err(anyhow!("duplicate gene identifier: {}", gene));
            }
        }

        Ok(Self {
            id: id.into(),
            ensembl_ids,
            symbols,
            positions,
        })
    }

    /// Read a two-column (identifier, symbol) tsv file, gzipped or not
    pub fn from_tsv_file(id: &str, tsv_file: &str) -> anyhow::Result<Self> {
        let mut ensembl_ids = vec![];
        let mut symbols = vec![];

        for line in read_lines(tsv_file)? {
            let mut words = line.split_whitespace();
            let gene = words
                .next()
                .ok_or(anyhow!("empty line in {}", tsv_file))?;
            let symbol = words.next().unwrap_or(gene);
            ensembl_ids.push(gene.into());
            symbols.push(symbol.into());
        }

        Self::new(id, ensembl_ids, symbols)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn num_genes(&self) -> usize {
        self.ensembl_ids.len()
    }

    pub fn ensembl_ids(&self) -> &[Box<str>] {
        &self.ensembl_ids
    }

    pub fn symbols(&self) -> &[Box<str>] {
        &self.symbols
    }

    /// Position of `gene` in the reference ordering, if present
    pub fn position(&self, gene: &str) -> Option<usize> {
        self.positions.get(gene).copied()
    }

    pub fn contains(&self, gene: &str) -> bool {
        self.positions.contains_key(gene)
    }
}
