//!
//! Decoder/trainer contract
//!
//! Every decoding model (`ViterbiAlgorithm`, `GeneViterbiAlgorithm`,
//! `ThreadedAlgorithm`, `MarkovMixture`) implements `Decoder`. Evaluation
//! jobs depend on this trait only.
//!
use crate::dataset::Dataset;
use crate::error::Result;
use crate::states::StatesDescription;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

///
/// Trainable model predicting the hidden sequence of an observed one.
///
/// `Clone` duplicates the model with its learned state;
/// `duplicate_hyperparameters_only` keeps only the configuration.
///
pub trait Decoder: Clone + Send + Sync {
    fn states(&self) -> &Arc<StatesDescription>;
    /// learn one labeled sequence
    fn train(&mut self, observed: &[u8], hidden: &[u8]);
    /// learn every row of the dataset
    fn train_set<D: Dataset>(&mut self, data: &D) -> Result<()> {
        for i in 0..data.len() {
            self.train(data.observed(i), data.hidden(i));
        }
        Ok(())
    }
    /// forget all learned state
    fn reset(&mut self);
    ///
    /// Most likely hidden sequence, or `None` if the model refuses to
    /// decode this input.
    ///
    fn run(&self, observed: &[u8]) -> Option<Vec<u8>>;
    ///
    /// Decode every row. Results are in row order; the listener sees every
    /// row that was attempted, then `on_finished`.
    ///
    fn run_set<D: Dataset>(&self, data: &D, listener: &mut dyn Listener) -> Result<Vec<Option<Vec<u8>>>> {
        let mut results = Vec::with_capacity(data.len());
        for i in 0..data.len() {
            let predicted = self.run(data.observed(i));
            listener.on_sequence(i, predicted.as_deref());
            results.push(predicted);
        }
        listener.on_finished();
        Ok(results)
    }
    fn duplicate_hyperparameters_only(&self) -> Self;
    fn repr(&self) -> String;
}

///
/// Receiver of per-sequence progress, called on the thread driving the job.
///
pub trait Listener {
    /// row `index` was decoded (`None` = refusal)
    fn on_sequence(&mut self, _index: usize, _predicted: Option<&[u8]>) {}
    /// decoding of row `index` failed
    fn on_failure(&mut self, _index: usize, _message: &str) {}
    /// no more callbacks follow
    fn on_finished(&mut self) {}
}

/// Listener ignoring everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl Listener for NoopListener {}

///
/// Listener forwarding to closures.
///
pub struct FnListener<F: FnMut(usize, Option<&[u8]>)> {
    on_sequence: F,
}

impl<F: FnMut(usize, Option<&[u8]>)> FnListener<F> {
    pub fn new(on_sequence: F) -> Self {
        FnListener { on_sequence }
    }
}

impl<F: FnMut(usize, Option<&[u8]>)> Listener for FnListener<F> {
    fn on_sequence(&mut self, index: usize, predicted: Option<&[u8]>) {
        (self.on_sequence)(index, predicted)
    }
}

///
/// Shared "interrupted by user" flag.
///
/// Clones share the same flag.
///
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Interrupt::default()
    }
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_shared() {
        let a = Interrupt::new();
        let b = a.clone();
        assert!(!b.is_interrupted());
        a.interrupt();
        assert!(b.is_interrupted());
        b.clear();
        assert!(!a.is_interrupted());
    }

    #[test]
    fn fn_listener() {
        let mut seen = Vec::new();
        {
            let mut l = FnListener::new(|i, p: Option<&[u8]>| seen.push((i, p.is_some())));
            l.on_sequence(0, None);
            l.on_sequence(1, Some(&[0, 1]));
            l.on_finished();
        }
        assert_eq!(seen, vec![(0, false), (1, true)]);
    }
}
