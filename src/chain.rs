//!
//! Variable-order Markov chains over complete states
//!
//! A complete state is a pair (observed symbol, hidden symbol). A chain of
//! order `k` and dependency length `d` models
//!
//! ```text
//! P(x) = P_init(x[0:k]) * prod_{i = k, k+d, k+2d, ...} P_trans(x[i:i+d] | x[i-k:i])
//! ```
//!
//! where `x[a:b]` are complete-state fragments (see `fragment`).
//!
//! * `ChainModel`: the interface used by decoders and mixtures
//! * `MarkovChain`: counts-based maximum likelihood chain
//! * `fallthru::FallthruChain`: chain with backoff to lower orders
//!
pub mod fallthru;
pub mod table;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::fragment::{Fragment, FragmentFactory};
use crate::params::ChainParams;
use crate::prob::Prob;
use crate::states::StatesDescription;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use table::FragmentTable;

///
/// Trainable probabilistic model over complete-state sequences.
///
/// Training mutates the model and is not meant for concurrent writers.
/// Everything taking `&self` is read-only and can be shared between
/// decoding threads.
///
pub trait ChainModel: Clone + Send + Sync + std::fmt::Debug {
    fn states(&self) -> &Arc<StatesDescription>;
    /// conditioning length
    fn order(&self) -> usize;
    /// length of the predicted fragment
    fn dep_length(&self) -> usize;
    /// factory able to build fragments of length `order + dep_length`
    fn factory(&self) -> &FragmentFactory;
    /// per-term floor of `estimate`
    fn log_floor_prob(&self) -> f64;
    ///
    /// Probability that a sequence starts with `tail` (length `order`).
    ///
    fn initial_p(&self, tail: Fragment) -> f64;
    ///
    /// Probability of `head` (length `dep_length`) following `tail`
    /// (length `order`).
    ///
    fn trans_p(&self, tail: Fragment, head: Fragment) -> f64;
    ///
    /// Accumulate the statistics of one sequence with `weight >= 0`.
    ///
    fn train(&mut self, observed: &[u8], hidden: &[u8], weight: f64);
    /// forget all statistics
    fn reset(&mut self);
    /// number of sequences (with positive weight) trained on
    fn n_digested(&self) -> usize;
    ///
    /// Log-likelihood of the observed sequence alone, with the hidden
    /// symbols summed out of both tail and head counts.
    ///
    fn estimate_observed(&self, observed: &[u8]) -> f64;
    ///
    /// Copy with the same hyperparameters and no statistics.
    ///
    fn duplicate_hyperparameters_only(&self) -> Self;
    /// human readable summary
    fn repr(&self) -> String;

    /// train on every row with weight 1
    fn train_set<D: Dataset>(&mut self, data: &D) {
        for i in 0..data.len() {
            self.train(data.observed(i), data.hidden(i), 1.0);
        }
    }
    /// train on every row with the given per-row weight
    fn train_weighted<D: Dataset>(&mut self, data: &D, weights: &[f64]) {
        assert_eq!(data.len(), weights.len());
        for (i, &w) in weights.iter().enumerate() {
            self.train(data.observed(i), data.hidden(i), w);
        }
    }
    ///
    /// Log-likelihood of a complete-state sequence.
    ///
    /// Every term (initial and each transition) is floored at
    /// `log_floor_prob`, so the result is always finite. The floor is an
    /// approximation for unseen events, not a smoothed estimate.
    ///
    fn estimate(&self, observed: &[u8], hidden: &[u8]) -> f64 {
        assert_eq!(observed.len(), hidden.len());
        let floor = self.log_floor_prob();
        let (order, dep) = (self.order(), self.dep_length());
        let n = observed.len();
        if n < order {
            return floor.ln();
        }
        let f = self.factory();
        let mut p = Prob::floored(self.initial_p(f.from_seqs(observed, hidden, 0, order)), floor);
        let mut pos = order;
        while pos + dep <= n {
            let tail = f.from_seqs(observed, hidden, pos - order, order);
            let head = f.from_seqs(observed, hidden, pos, dep);
            p *= Prob::floored(self.trans_p(tail, head), floor);
            pos += dep;
        }
        p.to_log_value()
    }
}

///
/// Maximum likelihood Markov chain.
///
/// ## Tables
///
/// * `initial[total_index(tail)]`: weighted count of sequences starting with `tail`
/// * `transitions[total_index(tail)][total_index(head)]`: weighted count of
///   `tail -> head`. Each row has one extra slot at the end holding the row sum.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ChainFields")]
pub struct MarkovChain {
    states: Arc<StatesDescription>,
    order: usize,
    dep_length: usize,
    log_floor_prob: f64,
    factory: FragmentFactory,
    initial: FragmentTable<f64>,
    transitions: FragmentTable<Vec<f64>>,
    /// weighted sequence length distribution
    lengths: BTreeMap<usize, f64>,
    /// total weight of the digested sequences
    digested_weight: f64,
    n_digested: usize,
}

/// serialized form of `MarkovChain`, checked on load
#[derive(Deserialize)]
struct ChainFields {
    #[serde(deserialize_with = "crate::states::deserialize_interned")]
    states: Arc<StatesDescription>,
    order: usize,
    dep_length: usize,
    log_floor_prob: f64,
    factory: FragmentFactory,
    initial: FragmentTable<f64>,
    transitions: FragmentTable<Vec<f64>>,
    lengths: BTreeMap<usize, f64>,
    digested_weight: f64,
    n_digested: usize,
}

fn is_count(x: f64) -> bool {
    x.is_finite() && x >= 0.0
}

impl TryFrom<ChainFields> for MarkovChain {
    type Error = String;
    ///
    /// Every table must have the shape implied by the alphabets, `order`
    /// and `dep_length`, so that lookups on the loaded chain cannot panic.
    ///
    fn try_from(c: ChainFields) -> std::result::Result<Self, String> {
        let f = &c.factory;
        if c.dep_length == 0 {
            return Err("dep_length must be positive".to_string());
        }
        if !f.is_consistent()
            || f.n_observed_states() != c.states.n_observed()
            || f.n_hidden_states() != c.states.n_hidden()
            || c.order.checked_add(c.dep_length) != Some(f.max_length())
        {
            return Err(format!(
                "fragment factory does not match order {} dep_length {} ({})",
                c.order, c.dep_length, c.states
            ));
        }
        if !(c.log_floor_prob > 0.0 && c.log_floor_prob <= 1.0) {
            return Err(format!("log_floor_prob {}", c.log_floor_prob));
        }
        let n_tails = f.n_fragments(c.order);
        if c.initial.size() != n_tails || c.transitions.size() != n_tails {
            return Err(format!(
                "table sizes {} and {} (expected {})",
                c.initial.size(),
                c.transitions.size(),
                n_tails
            ));
        }
        let row_length = f.n_fragments(c.dep_length) + 1;
        if let Some((i, row)) = c.transitions.iter().find(|(_, row)| row.len() != row_length) {
            return Err(format!(
                "transition row {} has {} slots (expected {})",
                i,
                row.len(),
                row_length
            ));
        }
        let counts_ok = is_count(c.digested_weight)
            && c.initial.iter().all(|(_, &x)| is_count(x))
            && c.transitions.iter().all(|(_, row)| row.iter().all(|&x| is_count(x)))
            && c.lengths.values().all(|&x| is_count(x));
        if !counts_ok {
            return Err("negative or non-finite count".to_string());
        }
        Ok(MarkovChain {
            states: c.states,
            order: c.order,
            dep_length: c.dep_length,
            log_floor_prob: c.log_floor_prob,
            factory: c.factory,
            initial: c.initial,
            transitions: c.transitions,
            lengths: c.lengths,
            digested_weight: c.digested_weight,
            n_digested: c.n_digested,
        })
    }
}

impl MarkovChain {
    pub fn new(
        states: Arc<StatesDescription>,
        order: usize,
        dep_length: usize,
        log_floor_prob: f64,
    ) -> MarkovChain {
        assert!(dep_length > 0, "dep_length must be positive");
        let factory = FragmentFactory::new(states.n_observed(), states.n_hidden(), order + dep_length);
        let n_tails = factory.n_fragments(order);
        MarkovChain {
            states,
            order,
            dep_length,
            log_floor_prob,
            initial: FragmentTable::new(n_tails),
            transitions: FragmentTable::new(n_tails),
            factory,
            lengths: BTreeMap::new(),
            digested_weight: 0.0,
            n_digested: 0,
        }
    }
    ///
    /// Build from validated parameters. The `approximation` field is
    /// ignored here; see `FallthruChain::from_params`.
    ///
    pub fn from_params(states: Arc<StatesDescription>, params: &ChainParams) -> Result<MarkovChain> {
        params.validate()?;
        Ok(MarkovChain::new(
            states,
            params.order,
            params.dep_length,
            params.log_floor_prob,
        ))
    }
    /// number of slots of a transition row (without the sum slot)
    fn n_heads(&self) -> usize {
        self.factory.n_fragments(self.dep_length)
    }
    ///
    /// Weighted count of the transition `tail -> head`.
    ///
    pub fn trans_count(&self, tail: Fragment, head: Fragment) -> f64 {
        match self.transitions.get(self.factory.total_index(tail)) {
            Some(row) => row[self.factory.total_index(head)],
            None => 0.0,
        }
    }
    ///
    /// Weighted count of transitions leaving `tail` (row sum).
    ///
    pub fn tail_count(&self, tail: Fragment) -> f64 {
        match self.transitions.get(self.factory.total_index(tail)) {
            Some(row) => row[row.len() - 1],
            None => 0.0,
        }
    }
    ///
    /// Tails with at least one recorded transition.
    ///
    pub fn seen_tails(&self) -> Vec<Fragment> {
        self.transitions
            .iter()
            .filter(|(_, row)| row[row.len() - 1] > 0.0)
            .map(|(i, _)| self.factory.from_total_index(i, self.order))
            .collect()
    }
    /// number of tails with an initial count
    pub fn n_initial_fragments(&self) -> usize {
        self.initial.n_occupied()
    }
    ///
    /// Fraction of the digested weight with sequence length `length`.
    ///
    pub fn length_p(&self, length: usize) -> f64 {
        if self.digested_weight <= 0.0 {
            return 0.0;
        }
        self.lengths.get(&length).copied().unwrap_or(0.0) / self.digested_weight
    }
    pub fn digested_weight(&self) -> f64 {
        self.digested_weight
    }
}

impl ChainModel for MarkovChain {
    fn states(&self) -> &Arc<StatesDescription> {
        &self.states
    }
    fn order(&self) -> usize {
        self.order
    }
    fn dep_length(&self) -> usize {
        self.dep_length
    }
    fn factory(&self) -> &FragmentFactory {
        &self.factory
    }
    fn log_floor_prob(&self) -> f64 {
        self.log_floor_prob
    }
    fn initial_p(&self, tail: Fragment) -> f64 {
        if self.digested_weight <= 0.0 {
            return 0.0;
        }
        match self.initial.get(self.factory.total_index(tail)) {
            Some(&count) => count / self.digested_weight,
            None => 0.0,
        }
    }
    fn trans_p(&self, tail: Fragment, head: Fragment) -> f64 {
        match self.transitions.get(self.factory.total_index(tail)) {
            Some(row) => {
                let total = row[row.len() - 1];
                if total > 0.0 {
                    row[self.factory.total_index(head)] / total
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
    ///
    /// Sequences shorter than `order` and zero weights are ignored.
    ///
    fn train(&mut self, observed: &[u8], hidden: &[u8], weight: f64) {
        assert_eq!(observed.len(), hidden.len());
        assert!(weight >= 0.0, "negative training weight {}", weight);
        let n = observed.len();
        if n < self.order || weight == 0.0 {
            return;
        }
        let (order, dep) = (self.order, self.dep_length);
        let n_heads = self.n_heads();

        let init = self.factory.from_seqs(observed, hidden, 0, order);
        *self
            .initial
            .get_or_insert_with(self.factory.total_index(init), || 0.0) += weight;

        let mut pos = order;
        while pos + dep <= n {
            let tail = self.factory.from_seqs(observed, hidden, pos - order, order);
            let head = self.factory.from_seqs(observed, hidden, pos, dep);
            let h = self.factory.total_index(head);
            let row = self
                .transitions
                .get_or_insert_with(self.factory.total_index(tail), || vec![0.0; n_heads + 1]);
            row[h] += weight;
            row[n_heads] += weight;
            pos += dep;
        }

        *self.lengths.entry(n).or_insert(0.0) += weight;
        self.digested_weight += weight;
        self.n_digested += 1;
    }
    fn reset(&mut self) {
        self.initial.clear();
        self.transitions.clear();
        self.lengths.clear();
        self.digested_weight = 0.0;
        self.n_digested = 0;
    }
    fn n_digested(&self) -> usize {
        self.n_digested
    }
    fn estimate_observed(&self, observed: &[u8]) -> f64 {
        let floor = self.log_floor_prob;
        let (order, dep) = (self.order, self.dep_length);
        let n = observed.len();
        if n < order {
            return floor.ln();
        }
        let f = &self.factory;
        let init_o = f.observed_from(observed, 0, order);
        let p_init: f64 = (0..f.n_hidden(order))
            .map(|h| self.initial_p(f.fragment(init_o, h, order)))
            .sum();
        let mut p = Prob::floored(p_init, floor);
        let mut pos = order;
        while pos + dep <= n {
            let tail_o = f.observed_from(observed, pos - order, order);
            let head_o = f.observed_from(observed, pos, dep);
            let mut num = 0.0;
            let mut den = 0.0;
            for ht in 0..f.n_hidden(order) {
                let tail = f.fragment(tail_o, ht, order);
                if let Some(row) = self.transitions.get(f.total_index(tail)) {
                    den += row[row.len() - 1];
                    for hh in 0..f.n_hidden(dep) {
                        num += row[f.total_index(f.fragment(head_o, hh, dep))];
                    }
                }
            }
            let p_trans = if den > 0.0 { num / den } else { 0.0 };
            p *= Prob::floored(p_trans, floor);
            pos += dep;
        }
        p.to_log_value()
    }
    fn duplicate_hyperparameters_only(&self) -> Self {
        MarkovChain::new(
            self.states.clone(),
            self.order,
            self.dep_length,
            self.log_floor_prob,
        )
    }
    fn repr(&self) -> String {
        format!(
            "MarkovChain(order={}, dep_length={}, {}, n_digested={}, n_tails={})",
            self.order,
            self.dep_length,
            self.states,
            self.n_digested,
            self.transitions.n_occupied()
        )
    }
}

///
/// Check that parameters of chains to be combined agree.
///
pub(crate) fn check_same_states<C: ChainModel>(chains: &[C]) -> Result<()> {
    if let Some(first) = chains.first() {
        for c in chains.iter().skip(1) {
            if c.states() != first.states() {
                return Err(Error::IncompatibleStates(
                    first.states().to_string(),
                    c.states().to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{mock_labeled_set, mock_states};
    use approx::assert_abs_diff_eq;

    fn scenario_chain() -> (MarkovChain, Vec<u8>, Vec<u8>) {
        let states = StatesDescription::get("ACGT", "xi", None).unwrap();
        let o = states.observed().encode(b"TCGAGT").unwrap();
        let h = states.hidden().encode(b"xxiixi").unwrap();
        let mut chain = MarkovChain::new(states, 1, 1, 1e-4);
        chain.train(&o, &h, 1.0);
        (chain, o, h)
    }

    #[test]
    fn first_order_scenario() {
        let (chain, o, h) = scenario_chain();
        let f = chain.factory().clone();
        // T=3 C=1 G=2 A=0 / x=0 i=1
        assert_eq!(chain.n_initial_fragments(), 1);
        assert_abs_diff_eq!(chain.initial_p(f.fragment(3, 0, 1)), 1.0);
        assert_eq!(chain.initial_p(f.fragment(3, 1, 1)), 0.0);
        assert_abs_diff_eq!(chain.trans_p(f.fragment(1, 0, 1), f.fragment(2, 1, 1)), 1.0);
        assert_eq!(chain.trans_p(f.fragment(1, 0, 1), f.fragment(2, 0, 1)), 0.0);
        // every complete-state tail is followed by a single head
        assert_abs_diff_eq!(chain.estimate(&o, &h), 0.0);
        // G is followed once by A and once by T: two choices of 1/2
        assert_abs_diff_eq!(chain.estimate_observed(&o), 0.25f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(chain.length_p(6), 1.0);
        assert_eq!(chain.n_digested(), 1);
    }

    #[test]
    fn estimate_is_floored() {
        let (chain, _, _) = scenario_chain();
        let states = chain.states().clone();
        let o = states.observed().encode(b"AAA").unwrap();
        let h = states.hidden().encode(b"xxx").unwrap();
        // unseen initial and two unseen transitions
        assert_abs_diff_eq!(chain.estimate(&o, &h), 3.0 * 1e-4f64.ln(), epsilon = 1e-9);
        assert!(chain.estimate(&[], &[]).is_finite());
    }

    #[test]
    fn transition_rows_are_normalized() {
        let data = mock_labeled_set(30, 50, 3);
        for (order, dep) in [(0, 1), (1, 1), (2, 1), (2, 3), (3, 2)] {
            let mut chain = MarkovChain::new(data.states().clone(), order, dep, 1e-4);
            chain.train_set(&data);
            let f = chain.factory().clone();
            let tails = chain.seen_tails();
            assert!(!tails.is_empty());
            for tail in tails {
                let s: f64 = (0..f.n_fragments(dep))
                    .map(|i| chain.trans_p(tail, f.from_total_index(i, dep)))
                    .sum();
                assert_abs_diff_eq!(s, 1.0, epsilon = 1e-9);
            }
            let init: f64 = (0..f.n_fragments(order))
                .map(|i| chain.initial_p(f.from_total_index(i, order)))
                .sum();
            assert_abs_diff_eq!(init, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn weights_and_reset() {
        let states = mock_states();
        let mut chain = MarkovChain::new(states.clone(), 1, 1, 1e-4);
        let o = states.observed().encode(b"ACGT").unwrap();
        let h = states.hidden().encode(b"xxii").unwrap();
        chain.train(&o, &h, 0.0);
        assert_eq!(chain.n_digested(), 0);
        chain.train(&o[..0], &h[..0], 1.0);
        assert_eq!(chain.n_digested(), 0);
        chain.train(&o, &h, 0.5);
        assert_eq!(chain.n_digested(), 1);
        assert_abs_diff_eq!(chain.digested_weight(), 0.5);
        let f = chain.factory().clone();
        assert_abs_diff_eq!(chain.trans_count(f.fragment(0, 0, 1), f.fragment(1, 0, 1)), 0.5);
        assert_abs_diff_eq!(chain.initial_p(f.fragment(0, 0, 1)), 1.0);

        let clear = chain.duplicate_hyperparameters_only();
        assert_eq!(clear.n_digested(), 0);
        assert_eq!(clear.order(), 1);
        chain.reset();
        assert_eq!(chain.n_digested(), 0);
        assert_eq!(chain.seen_tails().len(), 0);
        assert_eq!(chain.initial_p(f.fragment(0, 0, 1)), 0.0);
    }

    #[test]
    fn chain_serialize() {
        let (chain, o, h) = scenario_chain();
        let json = serde_json::to_string(&chain).unwrap();
        let back: MarkovChain = serde_json::from_str(&json).unwrap();
        assert_eq!(back.estimate(&o, &h), chain.estimate(&o, &h));
        assert!(Arc::ptr_eq(back.states(), chain.states()));
        println!("{}", back.repr());
    }

    /// re-serialize `chain` after editing its JSON form
    fn edited(chain: &MarkovChain, edit: impl FnOnce(&mut serde_json::Value)) -> serde_json::Value {
        let mut value = serde_json::to_value(chain).unwrap();
        edit(&mut value);
        value
    }

    #[test]
    fn inconsistent_chains_are_rejected() {
        let (chain, _, _) = scenario_chain();
        let cases = [
            // every transition row emptied
            edited(&chain, |v| {
                for entry in v["transitions"]["entries"].as_array_mut().unwrap() {
                    entry[1] = serde_json::json!([]);
                }
            }),
            // initial table of the wrong size
            edited(&chain, |v| v["initial"]["size"] = serde_json::json!(3)),
            // order that the factory was not built for
            edited(&chain, |v| v["order"] = serde_json::json!(2)),
            edited(&chain, |v| v["dep_length"] = serde_json::json!(0)),
            edited(&chain, |v| v["digested_weight"] = serde_json::json!(-1.0)),
            // alphabets of another size
            edited(&chain, |v| v["states"]["hidden"] = serde_json::json!("xyz")),
        ];
        for value in cases {
            assert!(serde_json::from_value::<MarkovChain>(value).is_err());
        }
        assert!(serde_json::from_value::<MarkovChain>(edited(&chain, |_| ())).is_ok());
    }
}
