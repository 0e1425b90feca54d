//!
//! Maximum a posteriori decoding of hidden sequences
//!
//! ## Recursion
//!
//! For a chain of order `k` and dependency length `d`, the input of
//! length `n` is trimmed to `m = k + floor((n - k) / d) * d` and the DP runs
//! over positions `k, k+d, ..., m-d`. A DP state is the hidden part of
//! the last `k` complete states (the observed part is fixed by the input),
//! optionally paired with a phase (see `gene`).
//!
//! ```text
//! V_0[t]        = ln P_init(o[0:k], t)
//! V_{s+1}[t'']  = max_{t, h : t'' = suffix_k(t h)} V_s[t] + ln P_trans(t h | o)
//! ```
//!
//! Back-pointers store the composed hidden index `t h` (and the previous
//! phase), from which both the previous tail and the decoded head are
//! recovered.
//!
pub mod gene;
pub mod scratch;

use crate::chain::ChainModel;
use crate::decoder::Decoder;
use crate::params::DecoderParams;
use crate::states::StatesDescription;
use scratch::{with_thread_scratch, ViterbiScratch, NO_POINTER};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// number of codon phases
pub const N_PHASES: usize = 3;

///
/// Constraint on the number of occurrences of one hidden symbol in the
/// decoded path.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CodingConstraint {
    /// hidden symbol index counted
    pub coding: u8,
}

///
/// Core Viterbi recursion shared by every decoder.
///
/// Returns the decoded hidden sequence (same length as `observed`) and its
/// log-probability, or `None` if
///
/// * `observed` is shorter than the order or longer than `max_length`,
/// * no window fits in the input (order 0 and `n < dep_length`), or
/// * every path has zero probability (or no path satisfies the constraint).
///
pub(crate) fn decode_chain<C: ChainModel>(
    chain: &C,
    observed: &[u8],
    max_length: usize,
    constraint: Option<CodingConstraint>,
    scratch: &mut ViterbiScratch,
) -> Option<(Vec<u8>, f64)> {
    let n = observed.len();
    let (k, d) = (chain.order(), chain.dep_length());
    if n < k || n > max_length {
        return None;
    }
    let n_steps = (n - k) / d;
    let m = k + n_steps * d;
    if m == 0 {
        return if n == 0 { Some((Vec::new(), 0.0)) } else { None };
    }

    let f = chain.factory();
    let n_tails = f.n_hidden(k);
    let n_heads = f.n_hidden(d);
    let n_phases = if constraint.is_some() { N_PHASES } else { 1 };
    let n_states = n_tails * n_phases;

    // occurrences of the coding symbol (mod 3) in each tail/head
    let count = |index: usize, length: usize| -> usize {
        match constraint {
            Some(c) => {
                f.hidden_symbols(index, length)
                    .iter()
                    .filter(|&&s| s == c.coding)
                    .count()
                    % N_PHASES
            }
            None => 0,
        }
    };
    let tail_counts: Vec<usize> = (0..n_tails).map(|t| count(t, k)).collect();
    let head_counts: Vec<usize> = (0..n_heads).map(|h| count(h, d)).collect();

    scratch.prepare(n_states, n_steps);

    // initialization
    let o_init = f.observed_from(observed, 0, k);
    let mut alive = false;
    for t in 0..n_tails {
        let p = chain.initial_p(f.fragment(o_init, t, k));
        if p > 0.0 {
            scratch.current[t * n_phases + tail_counts[t]] = p.ln();
            alive = true;
        }
    }
    if !alive {
        return None;
    }

    // recursion
    for s in 0..n_steps {
        let pos = k + s * d;
        let o_tail = f.observed_from(observed, pos - k, k);
        let o_head = f.observed_from(observed, pos, d);
        scratch.next.iter_mut().for_each(|x| *x = f64::NEG_INFINITY);
        let back = &mut scratch.back[s * n_states..(s + 1) * n_states];
        alive = false;
        for t in 0..n_tails {
            for phase in 0..n_phases {
                let score = scratch.current[t * n_phases + phase];
                if score == f64::NEG_INFINITY {
                    continue;
                }
                let tail = f.fragment(o_tail, t, k);
                for h in 0..n_heads {
                    let p = chain.trans_p(tail, f.fragment(o_head, h, d));
                    if p <= 0.0 {
                        continue;
                    }
                    let candidate = score + p.ln();
                    let composed = t * n_heads + h;
                    let next_tail = composed % n_tails;
                    let next_phase = (phase + head_counts[h]) % n_phases;
                    let j = next_tail * n_phases + next_phase;
                    if candidate > scratch.next[j] {
                        scratch.next[j] = candidate;
                        back[j] = composed * n_phases + phase;
                        alive = true;
                    }
                }
            }
        }
        if !alive {
            return None;
        }
        std::mem::swap(&mut scratch.current, &mut scratch.next);
    }

    // termination
    let mut best: Option<(usize, f64)> = None;
    for t in 0..n_tails {
        for phase in 0..n_phases {
            if constraint.is_some() && phase != 0 {
                continue;
            }
            let score = scratch.current[t * n_phases + phase];
            if score > f64::NEG_INFINITY && best.map_or(true, |(_, b)| score > b) {
                best = Some((t * n_phases + phase, score));
            }
        }
    }
    let (mut state, score) = best?;

    // traceback
    let mut hidden = vec![0u8; n];
    for s in (0..n_steps).rev() {
        let pointer = scratch.back[s * n_states + state];
        debug_assert_ne!(pointer, NO_POINTER);
        let (composed, prev_phase) = (pointer / n_phases, pointer % n_phases);
        let pos = k + s * d;
        let head = f.hidden_symbols(composed % n_heads, d);
        hidden[pos..pos + d].copy_from_slice(&head);
        state = (composed / n_heads) * n_phases + prev_phase;
    }
    let init = f.hidden_symbols(state / n_phases, k);
    hidden[..k].copy_from_slice(&init);

    // untrimmed tail of the input
    if m < n {
        let mut fill = hidden[m - 1];
        if let Some(c) = constraint {
            if fill == c.coding {
                fill = if c.coding == 0 { 1 } else { 0 };
            }
        }
        hidden[m..].iter_mut().for_each(|x| *x = fill);
    }
    Some((hidden, score))
}

///
/// Viterbi decoder of a Markov chain.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViterbiAlgorithm<C> {
    chain: C,
    params: DecoderParams,
}

impl<C: ChainModel> ViterbiAlgorithm<C> {
    pub fn new(chain: C, params: DecoderParams) -> Self {
        ViterbiAlgorithm { chain, params }
    }
    pub fn chain(&self) -> &C {
        &self.chain
    }
    pub fn chain_mut(&mut self) -> &mut C {
        &mut self.chain
    }
    pub fn params(&self) -> &DecoderParams {
        &self.params
    }
    ///
    /// `run` with caller-provided buffers.
    ///
    pub fn decode_with(&self, observed: &[u8], scratch: &mut ViterbiScratch) -> Option<Vec<u8>> {
        decode_chain(&self.chain, observed, self.params.max_length, None, scratch).map(|(h, _)| h)
    }
    ///
    /// Decoded hidden sequence and its log-probability.
    ///
    pub fn decode_scored(&self, observed: &[u8]) -> Option<(Vec<u8>, f64)> {
        with_thread_scratch(|scratch| {
            decode_chain(&self.chain, observed, self.params.max_length, None, scratch)
        })
    }
}

impl<C: ChainModel> Decoder for ViterbiAlgorithm<C> {
    fn states(&self) -> &Arc<StatesDescription> {
        self.chain.states()
    }
    fn train(&mut self, observed: &[u8], hidden: &[u8]) {
        self.chain.train(observed, hidden, 1.0);
    }
    fn reset(&mut self) {
        self.chain.reset();
    }
    fn run(&self, observed: &[u8]) -> Option<Vec<u8>> {
        with_thread_scratch(|scratch| self.decode_with(observed, scratch))
    }
    fn duplicate_hyperparameters_only(&self) -> Self {
        ViterbiAlgorithm {
            chain: self.chain.duplicate_hyperparameters_only(),
            params: self.params.clone(),
        }
    }
    fn repr(&self) -> String {
        format!(
            "ViterbiAlgorithm({}, max_length={})",
            self.chain.repr(),
            self.params.max_length
        )
    }
}
