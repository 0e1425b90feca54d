//!
//! Labeled sequences
//!
//! ## Contract
//!
//! * `Dataset`: read-only access to rows (id, observed, hidden)
//!
//! ## Implementations
//!
//! * `SequenceSet`: owned rows
//! * `Subset`: a selection of rows of another dataset, without copying
//!
//! Sequences are stored as alphabet indices (see `states::Alphabet`).
//!
use crate::error::{Error, Result};
use crate::states::StatesDescription;
use std::io::BufRead;
use std::sync::Arc;

///
/// Read-only access to a set of labeled sequences.
///
pub trait Dataset: Sync {
    /// number of rows
    fn len(&self) -> usize;
    /// observed symbols of the row
    fn observed(&self, i: usize) -> &[u8];
    /// hidden symbols of the row (same length as observed)
    fn hidden(&self, i: usize) -> &[u8];
    /// name of the row
    fn id(&self, i: usize) -> &str;
    /// alphabets of the rows
    fn states(&self) -> &Arc<StatesDescription>;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// sum of the lengths of all rows
    fn total_length(&self) -> usize {
        (0..self.len()).map(|i| self.observed(i).len()).sum()
    }
    ///
    /// Rows `indices` of this dataset.
    ///
    fn select(&self, indices: Vec<usize>) -> Subset<'_, Self>
    where
        Self: Sized,
    {
        Subset::new(self, indices)
    }
    ///
    /// Rows whose index satisfies the predicate.
    ///
    fn filter<F: Fn(usize) -> bool>(&self, predicate: F) -> Subset<'_, Self>
    where
        Self: Sized,
    {
        let indices = (0..self.len()).filter(|&i| predicate(i)).collect();
        Subset::new(self, indices)
    }
}

///
/// Owned collection of labeled sequences.
///
#[derive(Clone, Debug)]
pub struct SequenceSet {
    states: Arc<StatesDescription>,
    ids: Vec<String>,
    observed: Vec<Vec<u8>>,
    hidden: Vec<Vec<u8>>,
}

impl SequenceSet {
    pub fn new(states: Arc<StatesDescription>) -> Self {
        SequenceSet {
            states,
            ids: Vec::new(),
            observed: Vec::new(),
            hidden: Vec::new(),
        }
    }
    ///
    /// Append a row of alphabet indices.
    ///
    /// Panics if observed and hidden lengths differ.
    ///
    pub fn push(&mut self, id: String, observed: Vec<u8>, hidden: Vec<u8>) {
        assert_eq!(
            observed.len(),
            hidden.len(),
            "observed/hidden length mismatch in row {}",
            id
        );
        debug_assert!(observed
            .iter()
            .all(|&o| (o as usize) < self.states.n_observed()));
        debug_assert!(hidden.iter().all(|&h| (h as usize) < self.states.n_hidden()));
        self.ids.push(id);
        self.observed.push(observed);
        self.hidden.push(hidden);
    }
    ///
    /// Append a row of raw symbols (e.g. `b"ACGT"`, `b"xxii"`).
    ///
    pub fn push_symbols(&mut self, id: &str, observed: &[u8], hidden: &[u8]) -> Result<()> {
        let o = self.states.observed().encode(observed)?;
        let h = self.states.hidden().encode(hidden)?;
        self.push(id.to_string(), o, h);
        Ok(())
    }
    ///
    /// Copy of an arbitrary dataset.
    ///
    pub fn from_dataset<D: Dataset>(data: &D) -> Self {
        let mut set = SequenceSet::new(data.states().clone());
        for i in 0..data.len() {
            set.push(
                data.id(i).to_string(),
                data.observed(i).to_vec(),
                data.hidden(i).to_vec(),
            );
        }
        set
    }
    ///
    /// Append all rows of `other`. The alphabets must be the same.
    ///
    pub fn merge<D: Dataset>(&mut self, other: &D) -> Result<()> {
        if self.states != *other.states() {
            return Err(Error::IncompatibleStates(
                self.states.to_string(),
                other.states().to_string(),
            ));
        }
        for i in 0..other.len() {
            self.push(
                other.id(i).to_string(),
                other.observed(i).to_vec(),
                other.hidden(i).to_vec(),
            );
        }
        Ok(())
    }
    ///
    /// Parse tab-separated rows `id<TAB>observed<TAB>hidden`.
    ///
    /// Empty lines and lines starting with `#` are skipped.
    ///
    pub fn from_tsv_reader<R: BufRead>(states: Arc<StatesDescription>, reader: R) -> Result<Self> {
        let mut set = SequenceSet::new(states);
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split('\t').collect();
            if columns.len() != 3 {
                return Err(Error::Parse {
                    line: n + 1,
                    message: format!("expected 3 columns, found {}", columns.len()),
                });
            }
            if columns[1].len() != columns[2].len() {
                return Err(Error::Parse {
                    line: n + 1,
                    message: "observed and hidden lengths differ".to_string(),
                });
            }
            set.push_symbols(columns[0], columns[1].as_bytes(), columns[2].as_bytes())
                .map_err(|e| Error::Parse {
                    line: n + 1,
                    message: e.to_string(),
                })?;
        }
        Ok(set)
    }
    ///
    /// `from_tsv_reader` of the file
    ///
    pub fn from_tsv_file<P: AsRef<std::path::Path>>(
        states: Arc<StatesDescription>,
        path: P,
    ) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        SequenceSet::from_tsv_reader(states, std::io::BufReader::new(file))
    }
}

impl Dataset for SequenceSet {
    fn len(&self) -> usize {
        self.ids.len()
    }
    fn observed(&self, i: usize) -> &[u8] {
        &self.observed[i]
    }
    fn hidden(&self, i: usize) -> &[u8] {
        &self.hidden[i]
    }
    fn id(&self, i: usize) -> &str {
        &self.ids[i]
    }
    fn states(&self) -> &Arc<StatesDescription> {
        &self.states
    }
}

///
/// Rows of another dataset, selected by index.
///
/// Row `i` of the subset is row `indices[i]` of the source.
///
#[derive(Clone, Debug)]
pub struct Subset<'a, D: Dataset> {
    source: &'a D,
    indices: Vec<usize>,
}

impl<'a, D: Dataset> Subset<'a, D> {
    pub fn new(source: &'a D, indices: Vec<usize>) -> Self {
        assert!(indices.iter().all(|&i| i < source.len()));
        Subset { source, indices }
    }
    /// index in the source dataset of the row `i` of this subset
    pub fn source_index(&self, i: usize) -> usize {
        self.indices[i]
    }
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<'a, D: Dataset> Dataset for Subset<'a, D> {
    fn len(&self) -> usize {
        self.indices.len()
    }
    fn observed(&self, i: usize) -> &[u8] {
        self.source.observed(self.indices[i])
    }
    fn hidden(&self, i: usize) -> &[u8] {
        self.source.hidden(self.indices[i])
    }
    fn id(&self, i: usize) -> &str {
        self.source.id(self.indices[i])
    }
    fn states(&self) -> &Arc<StatesDescription> {
        self.source.states()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states() -> Arc<StatesDescription> {
        StatesDescription::get("ACGT", "xi", None).unwrap()
    }

    #[test]
    fn tsv_parse() {
        let text = "# comment\ns1\tTCGAGT\txxiixi\n\ns2\tAC\tii\n";
        let set = SequenceSet::from_tsv_reader(states(), text.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.id(0), "s1");
        assert_eq!(set.observed(0), &[3, 1, 2, 0, 2, 3]);
        assert_eq!(set.hidden(0), &[0, 0, 1, 1, 0, 1]);
        assert_eq!(set.total_length(), 8);

        let bad = "s1\tTCG\txx\n";
        let e = SequenceSet::from_tsv_reader(states(), bad.as_bytes());
        assert!(matches!(e, Err(Error::Parse { line: 1, .. })));
        let bad = "s1\tTCN\txxx\n";
        let e = SequenceSet::from_tsv_reader(states(), bad.as_bytes());
        assert!(matches!(e, Err(Error::Parse { line: 1, .. })));
    }

    #[test]
    fn subset_and_merge() {
        let mut set = SequenceSet::new(states());
        for (i, s) in ["AC", "GT", "AA", "CC"].iter().enumerate() {
            set.push_symbols(&format!("s{}", i), s.as_bytes(), b"xi").unwrap();
        }
        let odd = set.filter(|i| i % 2 == 1);
        assert_eq!(odd.len(), 2);
        assert_eq!(odd.id(1), "s3");
        assert_eq!(odd.source_index(1), 3);

        let mut merged = SequenceSet::from_dataset(&odd);
        merged.merge(&set.select(vec![0])).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.id(2), "s0");

        let other = SequenceSet::new(StatesDescription::get("ACGT", "ei", None).unwrap());
        assert!(matches!(
            merged.merge(&other),
            Err(Error::IncompatibleStates(_, _))
        ));
    }

    #[test]
    #[should_panic]
    fn length_mismatch_is_fatal() {
        let mut set = SequenceSet::new(states());
        set.push("s".to_string(), vec![0, 1], vec![0]);
    }
}
