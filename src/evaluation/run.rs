//!
//! Resumable decoding of a fixed set of rows
//!
use super::quality::PredictionQuality;
use crate::dataset::Dataset;
use crate::decoder::{Decoder, Listener};
use crate::error::{Error, Result};
use crate::states::Alphabet;
use fixedbitset::FixedBitSet;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// `kind` tag of run snapshots
pub const RUN_KIND: &str = "AlgorithmRun";

///
/// Decoding progress over the rows `indices` of a dataset.
///
/// `unprocessed[j]` is set while row `indices[j]` has not been decoded.
/// Rows whose decoding failed or was interrupted stay unprocessed and
/// are retried by the next `run`.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlgorithmRun {
    name: String,
    indices: Vec<usize>,
    unprocessed: FixedBitSet,
    n_processed: usize,
    quality: PredictionQuality,
}

impl AlgorithmRun {
    pub fn new(name: &str, indices: Vec<usize>, hidden: Alphabet) -> Self {
        let mut unprocessed = FixedBitSet::with_capacity(indices.len());
        unprocessed.insert_range(..);
        AlgorithmRun {
            name: name.to_string(),
            indices,
            unprocessed,
            n_processed: 0,
            quality: PredictionQuality::new(hidden),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// dataset rows of this run
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
    pub fn n_processed(&self) -> usize {
        self.n_processed
    }
    pub fn n_remaining(&self) -> usize {
        self.unprocessed.count_ones(..)
    }
    pub fn is_complete(&self) -> bool {
        self.n_remaining() == 0
    }
    pub fn quality(&self) -> &PredictionQuality {
        &self.quality
    }
    /// dataset rows not decoded yet
    pub fn remaining_indices(&self) -> Vec<usize> {
        self.unprocessed.ones().map(|j| self.indices[j]).collect()
    }
    ///
    /// Decode the unprocessed rows with `decoder`.
    ///
    /// `checkpoint` is called with the run after every `save_every`
    /// completed rows and once at the end; its errors are logged and do
    /// not stop decoding.
    ///
    pub fn run<M: Decoder, D: Dataset>(
        &mut self,
        decoder: &M,
        data: &D,
        save_every: usize,
        checkpoint: &mut dyn FnMut(&AlgorithmRun) -> Result<()>,
    ) -> Result<()> {
        if let Some(&i) = self.indices.iter().find(|&&i| i >= data.len()) {
            return Err(Error::InvalidParameter(format!(
                "run {} refers to row {} of a dataset of {} rows",
                self.name,
                i,
                data.len()
            )));
        }
        let positions: Vec<usize> = self.unprocessed.ones().collect();
        if positions.is_empty() {
            info!("run {} is already complete", self.name);
            return Ok(());
        }
        info!(
            "run {}: decoding {} of {} sequences",
            self.name,
            positions.len(),
            self.indices.len()
        );
        let subset = data.select(positions.iter().map(|&j| self.indices[j]).collect());
        let mut listener = RunListener {
            run: self,
            data,
            positions,
            save_every: save_every.max(1),
            since_save: 0,
            checkpoint,
        };
        decoder.run_set(&subset, &mut listener)?;
        info!(
            "run {}: {} processed, {} remaining",
            self.name,
            self.n_processed,
            self.n_remaining()
        );
        Ok(())
    }
}

///
/// Updates a run as rows complete.
///
struct RunListener<'r, 'c, D> {
    run: &'r mut AlgorithmRun,
    data: &'r D,
    /// row of the decoded subset -> position in `run.indices`
    positions: Vec<usize>,
    save_every: usize,
    since_save: usize,
    checkpoint: &'c mut dyn FnMut(&AlgorithmRun) -> Result<()>,
}

impl<'r, 'c, D: Dataset> RunListener<'r, 'c, D> {
    fn save(&mut self) {
        if let Err(e) = (self.checkpoint)(&*self.run) {
            warn!("checkpoint of run {} failed: {}", self.run.name, e);
        }
        self.since_save = 0;
    }
}

impl<'r, 'c, D: Dataset> Listener for RunListener<'r, 'c, D> {
    fn on_sequence(&mut self, index: usize, predicted: Option<&[u8]>) {
        let j = self.positions[index];
        let reference = self.data.hidden(self.run.indices[j]);
        self.run.quality.add_sequence(reference, predicted);
        self.run.unprocessed.set(j, false);
        self.run.n_processed += 1;
        self.since_save += 1;
        if self.since_save >= self.save_every {
            self.save();
        }
    }
    fn on_failure(&mut self, index: usize, message: &str) {
        let j = self.positions[index];
        warn!(
            "run {}: row {} left unprocessed: {}",
            self.run.name, self.run.indices[j], message
        );
    }
    fn on_finished(&mut self) {
        self.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MarkovChain;
    use crate::mocks::mock_labeled_set;
    use crate::params::DecoderParams;
    use crate::threaded::ThreadedAlgorithm;
    use crate::viterbi::ViterbiAlgorithm;

    fn decoder() -> ViterbiAlgorithm<MarkovChain> {
        let data = mock_labeled_set(20, 100, 0);
        let mut v = ViterbiAlgorithm::new(
            MarkovChain::new(data.states().clone(), 1, 1, 1e-4),
            DecoderParams::default(),
        );
        v.train_set(&data).unwrap();
        v
    }

    #[test]
    fn run_with_checkpoints() {
        let data = mock_labeled_set(10, 50, 1);
        let hidden = data.states().hidden().clone();
        let mut run = AlgorithmRun::new("test", (0..10).collect(), hidden);
        assert_eq!(run.n_remaining(), 10);
        let mut n_saved = Vec::new();
        run.run(&decoder(), &data, 3, &mut |r| {
            n_saved.push(r.n_processed());
            Ok(())
        })
        .unwrap();
        assert!(run.is_complete());
        assert_eq!(run.quality().n_sequences(), 10);
        assert_eq!(n_saved, vec![3, 6, 9, 10]);

        // a complete run does nothing
        let mut called = false;
        run.run(&decoder(), &data, 3, &mut |_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(!called);
    }

    #[test]
    fn interrupted_run_resumes() {
        let data = mock_labeled_set(8, 50, 2);
        let hidden = data.states().hidden().clone();
        let mut run = AlgorithmRun::new("test", vec![1, 3, 5, 7], hidden);
        let threaded = ThreadedAlgorithm::new(decoder());
        threaded.interrupt().interrupt();
        run.run(&threaded, &data, 1, &mut |_| Ok(())).unwrap();
        assert_eq!(run.n_processed(), 0);
        assert_eq!(run.remaining_indices(), vec![1, 3, 5, 7]);

        threaded.interrupt().clear();
        run.run(&threaded, &data, 1, &mut |_| Ok(())).unwrap();
        assert!(run.is_complete());
        assert_eq!(run.n_processed(), 4);
    }

    #[test]
    fn failing_checkpoint_does_not_stop() {
        let data = mock_labeled_set(4, 30, 3);
        let hidden = data.states().hidden().clone();
        let mut run = AlgorithmRun::new("test", (0..4).collect(), hidden);
        run.run(&decoder(), &data, 1, &mut |_| {
            Err(Error::InvalidParameter("disk full".to_string()))
        })
        .unwrap();
        assert!(run.is_complete());
    }

    #[test]
    fn rows_out_of_range() {
        let data = mock_labeled_set(2, 30, 3);
        let hidden = data.states().hidden().clone();
        let mut run = AlgorithmRun::new("test", vec![0, 5], hidden);
        assert!(run.run(&decoder(), &data, 1, &mut |_| Ok(())).is_err());
    }
}
