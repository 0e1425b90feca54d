//!
//! Parallel per-sequence decoding
//!
//! `ThreadedAlgorithm` wraps a decoder and decodes the rows of a dataset
//! on the global rayon pool. Results stream back to the calling thread,
//! which alone runs the listener callbacks.
//!
use crate::dataset::Dataset;
use crate::decoder::{Decoder, Interrupt, Listener};
use crate::error::{Error, Result};
use crate::states::StatesDescription;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;

///
/// Configure the size of the global worker pool.
///
/// `None` uses the available parallelism. The pool can be configured
/// only once per process; later calls keep the existing pool and log a
/// warning. Returns the number of worker threads.
///
pub fn init_worker_pool(n_threads: Option<usize>) -> usize {
    let builder = rayon::ThreadPoolBuilder::new().num_threads(n_threads.unwrap_or(0));
    if let Err(e) = builder.build_global() {
        warn!("worker pool already configured: {}", e);
    }
    let n = rayon::current_num_threads();
    info!("worker pool has {} threads", n);
    n
}

/// message of a caught panic
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum Outcome {
    Decoded(Option<Vec<u8>>),
    Failed(String),
}

///
/// Decoder running `run_set` in parallel.
///
/// Training is delegated unchanged (single-threaded). Snapshots of it
/// are snapshots of the wrapped decoder.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadedAlgorithm<D> {
    inner: D,
    #[serde(skip)]
    interrupt: Interrupt,
}

impl<D: Decoder> ThreadedAlgorithm<D> {
    pub fn new(inner: D) -> Self {
        ThreadedAlgorithm {
            inner,
            interrupt: Interrupt::new(),
        }
    }
    ///
    /// Share an interruption flag with the owning job.
    ///
    pub fn with_interrupt(inner: D, interrupt: Interrupt) -> Self {
        ThreadedAlgorithm { inner, interrupt }
    }
    pub fn inner(&self) -> &D {
        &self.inner
    }
    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }
    pub fn into_inner(self) -> D {
        self.inner
    }
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

impl<D: Decoder> Decoder for ThreadedAlgorithm<D> {
    fn states(&self) -> &Arc<StatesDescription> {
        self.inner.states()
    }
    fn train(&mut self, observed: &[u8], hidden: &[u8]) {
        self.inner.train(observed, hidden);
    }
    fn train_set<S: Dataset>(&mut self, data: &S) -> Result<()> {
        self.inner.train_set(data)
    }
    fn reset(&mut self) {
        self.inner.reset();
    }
    fn run(&self, observed: &[u8]) -> Option<Vec<u8>> {
        self.inner.run(observed)
    }
    ///
    /// Decode every row in parallel.
    ///
    /// * Rows are decoded in arbitrary order, results are in row order.
    /// * A panicking row is reported through `on_failure` and left `None`.
    /// * Rows not yet started when the interrupt flag is raised are
    ///   skipped without any callback and left `None`.
    /// * Fails only if the dataset is not empty and every row failed.
    ///
    /// Called from a worker of a rayon pool, the rows are decoded one by
    /// one on that worker: blocking it on the pool can deadlock a pool of
    /// one thread.
    ///
    fn run_set<S: Dataset>(&self, data: &S, listener: &mut dyn Listener) -> Result<Vec<Option<Vec<u8>>>> {
        let n = data.len();
        let mut results: Vec<Option<Vec<u8>>> = vec![None; n];
        let mut n_failed = 0;
        let inner = &self.inner;
        let interrupt = &self.interrupt;
        let decode = move |i: usize| match catch_unwind(AssertUnwindSafe(|| inner.run(data.observed(i)))) {
            Ok(predicted) => Outcome::Decoded(predicted),
            Err(payload) => Outcome::Failed(panic_message(payload)),
        };
        let mut record = |i: usize, outcome: Outcome| match outcome {
            Outcome::Decoded(predicted) => {
                listener.on_sequence(i, predicted.as_deref());
                results[i] = predicted;
            }
            Outcome::Failed(message) => {
                warn!("decoding of {} ({}) failed: {}", i, data.id(i), message);
                listener.on_failure(i, &message);
                n_failed += 1;
            }
        };

        if rayon::current_thread_index().is_some() {
            debug!("run_set called from a pool worker, decoding on the caller");
            for i in 0..n {
                if interrupt.is_interrupted() {
                    break;
                }
                record(i, decode(i));
            }
        } else {
            let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
            std::thread::scope(|scope| {
                scope.spawn(move || {
                    (0..n).into_par_iter().for_each_with(tx, |tx, i| {
                        if interrupt.is_interrupted() {
                            return;
                        }
                        // the receiver lives until every sender is dropped
                        let _ = tx.send((i, decode(i)));
                    });
                });
                for (i, outcome) in rx.iter() {
                    record(i, outcome);
                }
            });
        }
        listener.on_finished();

        if n > 0 && n_failed == n {
            return Err(Error::AllTasksFailed(n));
        }
        Ok(results)
    }
    fn duplicate_hyperparameters_only(&self) -> Self {
        ThreadedAlgorithm {
            inner: self.inner.duplicate_hyperparameters_only(),
            interrupt: Interrupt::new(),
        }
    }
    fn repr(&self) -> String {
        format!("ThreadedAlgorithm({})", self.inner.repr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MarkovChain;
    use crate::decoder::{FnListener, NoopListener};
    use crate::mocks::{mock_labeled_set, mock_states};
    use crate::params::DecoderParams;
    use crate::viterbi::ViterbiAlgorithm;

    fn viterbi() -> ViterbiAlgorithm<MarkovChain> {
        let data = mock_labeled_set(30, 100, 0);
        let chain = MarkovChain::new(data.states().clone(), 2, 1, 1e-4);
        let mut v = ViterbiAlgorithm::new(chain, DecoderParams::default());
        v.train_set(&data).unwrap();
        v
    }

    #[test]
    fn threaded_equals_sequential() {
        let v = viterbi();
        let t = ThreadedAlgorithm::new(v.clone());
        let test = mock_labeled_set(40, 80, 3);
        let sequential = v.run_set(&test, &mut NoopListener).unwrap();
        let mut seen = vec![false; test.len()];
        let mut listener = FnListener::new(|i, _: Option<&[u8]>| seen[i] = true);
        let parallel = t.run_set(&test, &mut listener).unwrap();
        assert_eq!(sequential, parallel);
        assert!(seen.iter().all(|&x| x));
    }

    #[test]
    fn run_set_inside_a_single_thread_pool() {
        let v = viterbi();
        let t = ThreadedAlgorithm::new(v.clone());
        let test = mock_labeled_set(10, 80, 4);
        let sequential = v.run_set(&test, &mut NoopListener).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let nested = pool.install(|| t.run_set(&test, &mut NoopListener)).unwrap();
        assert_eq!(sequential, nested);
    }

    #[test]
    fn interrupted_rows_are_skipped() {
        let t = ThreadedAlgorithm::new(viterbi());
        t.interrupt().interrupt();
        let test = mock_labeled_set(5, 50, 3);
        let mut n_called = 0;
        let mut listener = FnListener::new(|_, _: Option<&[u8]>| n_called += 1);
        let results = t.run_set(&test, &mut listener).unwrap();
        assert!(results.iter().all(|r| r.is_none()));
        assert_eq!(n_called, 0);
    }

    /// decoder that panics on long inputs
    #[derive(Clone)]
    struct Fragile(Arc<StatesDescription>);

    impl Decoder for Fragile {
        fn states(&self) -> &Arc<StatesDescription> {
            &self.0
        }
        fn train(&mut self, _: &[u8], _: &[u8]) {}
        fn reset(&mut self) {}
        fn run(&self, observed: &[u8]) -> Option<Vec<u8>> {
            assert!(observed.len() < 3, "too long");
            Some(vec![0; observed.len()])
        }
        fn duplicate_hyperparameters_only(&self) -> Self {
            self.clone()
        }
        fn repr(&self) -> String {
            "Fragile".to_string()
        }
    }

    struct Counter {
        ok: usize,
        failed: usize,
        finished: bool,
    }

    impl Listener for Counter {
        fn on_sequence(&mut self, _: usize, _: Option<&[u8]>) {
            self.ok += 1;
        }
        fn on_failure(&mut self, _: usize, message: &str) {
            assert!(message.contains("too long"));
            self.failed += 1;
        }
        fn on_finished(&mut self) {
            self.finished = true;
        }
    }

    #[test]
    fn failures_are_isolated() {
        let states = mock_states();
        let mut data = crate::dataset::SequenceSet::new(states.clone());
        data.push_symbols("short", b"AC", b"xi").unwrap();
        data.push_symbols("long", b"ACGT", b"xiii").unwrap();
        let t = ThreadedAlgorithm::new(Fragile(states.clone()));
        let mut counter = Counter {
            ok: 0,
            failed: 0,
            finished: false,
        };
        let results = t.run_set(&data, &mut counter).unwrap();
        assert_eq!(results, vec![Some(vec![0, 0]), None]);
        assert_eq!((counter.ok, counter.failed, counter.finished), (1, 1, true));

        let only_long = data.select(vec![1]);
        let e = t.run_set(&only_long, &mut NoopListener);
        assert!(matches!(e, Err(Error::AllTasksFailed(1))));
    }
}
