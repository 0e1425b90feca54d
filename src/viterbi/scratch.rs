//!
//! Reusable buffers of the Viterbi recursion
//!
//! Each worker thread owns one `ViterbiScratch` (a genuine thread-local)
//! that grows to the largest problem it has seen and is reused by later
//! calls. Callers that manage their own buffers use `decode_with`.
//!
use std::cell::RefCell;

/// marker of an unset back-pointer
pub const NO_POINTER: usize = usize::MAX;

///
/// DP buffers: scores of the current and next step, and one back-pointer
/// row per step.
///
#[derive(Debug, Default, Clone)]
pub struct ViterbiScratch {
    pub(crate) current: Vec<f64>,
    pub(crate) next: Vec<f64>,
    pub(crate) back: Vec<usize>,
}

impl ViterbiScratch {
    pub fn new() -> Self {
        ViterbiScratch::default()
    }
    ///
    /// Reset buffers for `n_states` DP states and `n_steps` transitions.
    ///
    pub(crate) fn prepare(&mut self, n_states: usize, n_steps: usize) {
        self.current.clear();
        self.current.resize(n_states, f64::NEG_INFINITY);
        self.next.clear();
        self.next.resize(n_states, f64::NEG_INFINITY);
        self.back.clear();
        self.back.resize(n_states * n_steps, NO_POINTER);
    }
    /// number of back-pointer slots currently allocated
    pub fn capacity(&self) -> usize {
        self.back.capacity()
    }
}

thread_local! {
    static SCRATCH: RefCell<ViterbiScratch> = RefCell::new(ViterbiScratch::new());
}

///
/// Run `f` with the scratch of the current thread.
///
/// Must not be nested.
///
pub fn with_thread_scratch<R, F: FnOnce(&mut ViterbiScratch) -> R>(f: F) -> R {
    SCRATCH.with(|s| f(&mut s.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_is_reused() {
        let cap = with_thread_scratch(|s| {
            s.prepare(8, 100);
            assert_eq!(s.back.len(), 800);
            assert!(s.current.iter().all(|x| *x == f64::NEG_INFINITY));
            s.capacity()
        });
        with_thread_scratch(|s| {
            assert!(s.capacity() >= cap);
            s.prepare(2, 3);
            assert_eq!(s.back.len(), 6);
            assert!(s.back.iter().all(|&b| b == NO_POINTER));
        });
    }
}
