//!
//! Weighted mixtures of Markov chains
//!
//! * `Mixture<T>`: components with non-negative weights summing to 1
//! * `ChainMixture<C>`: `Mixture` of chains, with likelihoods and responsibilities
//! * `MarkovMixture<C>`: decoder choosing the best component per sequence,
//!   trained by EM
//!
use crate::chain::{check_same_states, ChainModel};
use crate::dataset::Dataset;
use crate::decoder::Decoder;
use crate::em::{random_split_mixture, EMAlgorithm};
use crate::error::{Error, Result};
use crate::params::{DecoderParams, EmParams};
use crate::prob::{lp, Prob};
use crate::states::StatesDescription;
use crate::viterbi::decode_chain;
use crate::viterbi::scratch::with_thread_scratch;
use itertools::Itertools;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// tolerance of `sum(weights) == 1`
const WEIGHT_TOLERANCE: f64 = 1e-9;

///
/// Components with weights.
///
/// Invariants: `components.len() == weights.len()`, every weight is
/// non-negative and they sum to 1.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mixture<T> {
    components: Vec<T>,
    weights: Vec<f64>,
}

fn normalized(weights: Vec<f64>) -> Result<Vec<f64>> {
    if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
        return Err(Error::InvalidWeights(format!(
            "weights must be finite and non-negative: {:?}",
            weights
        )));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(Error::InvalidWeights(format!(
            "weights sum to {}: {:?}",
            total, weights
        )));
    }
    Ok(weights.into_iter().map(|w| w / total).collect())
}

impl<T> Mixture<T> {
    ///
    /// Mixture with `weights` normalized to sum 1.
    ///
    pub fn new(components: Vec<T>, weights: Vec<f64>) -> Result<Self> {
        if components.len() != weights.len() {
            return Err(Error::InvalidWeights(format!(
                "{} components but {} weights",
                components.len(),
                weights.len()
            )));
        }
        Ok(Mixture {
            components,
            weights: normalized(weights)?,
        })
    }
    /// equal weights
    pub fn uniform(components: Vec<T>) -> Result<Self> {
        let weights = vec![1.0; components.len()];
        Mixture::new(components, weights)
    }
    pub fn len(&self) -> usize {
        self.components.len()
    }
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
    pub fn components(&self) -> &[T] {
        &self.components
    }
    pub fn component(&self, index: usize) -> &T {
        &self.components[index]
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn weight(&self, index: usize) -> f64 {
        self.weights[index]
    }
    /// iterator of `(component, weight)`
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> + '_ {
        self.components.iter().zip(self.weights.iter().copied())
    }
    ///
    /// Replace the weights (normalized).
    ///
    pub fn set_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.len() {
            return Err(Error::InvalidWeights(format!(
                "{} components but {} weights",
                self.len(),
                weights.len()
            )));
        }
        self.weights = normalized(weights)?;
        Ok(())
    }
    ///
    /// Replace the components and weights at once.
    ///
    pub fn replace(&mut self, components: Vec<T>, weights: Vec<f64>) -> Result<()> {
        *self = Mixture::new(components, weights)?;
        Ok(())
    }
    ///
    /// Add a component with `weight` in `[0, 1]`; the weights of the others
    /// are scaled by `1 - weight`.
    ///
    /// The first component of an empty mixture gets weight 1.
    ///
    pub fn add(&mut self, component: T, weight: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::InvalidWeights(format!(
                "weight of a new component must be in [0, 1], got {}",
                weight
            )));
        }
        if self.is_empty() {
            self.components.push(component);
            self.weights.push(1.0);
            return Ok(());
        }
        if weight == 1.0 {
            warn!("component added with weight 1: the others get weight 0");
        }
        self.weights.iter_mut().for_each(|w| *w *= 1.0 - weight);
        self.components.push(component);
        self.weights.push(weight);
        Ok(())
    }
    ///
    /// Remove a component and renormalize the rest.
    ///
    /// The last component cannot be deleted. If every remaining weight is
    /// zero, the remaining components become uniform.
    ///
    pub fn delete(&mut self, index: usize) -> Result<T> {
        if index >= self.len() {
            return Err(Error::InvalidParameter(format!(
                "component {} does not exist ({} components)",
                index,
                self.len()
            )));
        }
        if self.len() == 1 {
            return Err(Error::InvalidParameter(
                "cannot delete the only component of a mixture".to_string(),
            ));
        }
        let component = self.components.remove(index);
        self.weights.remove(index);
        let total: f64 = self.weights.iter().sum();
        if total > 0.0 {
            self.weights.iter_mut().for_each(|w| *w /= total);
        } else {
            let n = self.weights.len() as f64;
            self.weights.iter_mut().for_each(|w| *w = 1.0 / n);
        }
        Ok(component)
    }
    /// index of the component with the lowest weight (first one on ties)
    pub fn lowest_weight_index(&self) -> Option<usize> {
        self.weights
            .iter()
            .position_min_by(|a, b| a.total_cmp(b))
    }
    /// check the weight invariant
    pub fn is_normalized(&self) -> bool {
        self.weights.len() == self.components.len()
            && self.weights.iter().all(|&w| w >= 0.0)
            && (self.weights.iter().sum::<f64>() - 1.0).abs() < WEIGHT_TOLERANCE
    }
}

///
/// Mixture of Markov chains.
///
pub type ChainMixture<C> = Mixture<C>;

impl<C: ChainModel> Mixture<C> {
    ///
    /// Mixture of `n` empty copies of `template`, with equal weights.
    ///
    pub fn from_template(template: &C, n: usize) -> Result<Self> {
        let components = (0..n)
            .map(|_| template.duplicate_hyperparameters_only())
            .collect();
        Mixture::uniform(components)
    }
    /// alphabets of the components
    pub fn states(&self) -> Option<&Arc<StatesDescription>> {
        self.components.first().map(|c| c.states())
    }
    ///
    /// `ln w_k + ln P_k(x)` for every component `k`.
    ///
    pub fn log_likelihoods(&self, observed: &[u8], hidden: &[u8]) -> Vec<f64> {
        self.iter()
            .map(|(c, w)| w.ln() + c.estimate(observed, hidden))
            .collect()
    }
    ///
    /// Posterior probability of each component given the sequence.
    ///
    /// Computed as a softmax with the maximum subtracted. Components of
    /// weight 0 get responsibility 0.
    ///
    pub fn responsibilities(&self, observed: &[u8], hidden: &[u8]) -> Vec<f64> {
        let lls: Vec<Prob> = self
            .log_likelihoods(observed, hidden)
            .into_iter()
            .map(lp)
            .collect();
        Prob::normalize(&lls)
    }
    ///
    /// `ln sum_k w_k P_k(x)`
    ///
    pub fn log_likelihood(&self, observed: &[u8], hidden: &[u8]) -> f64 {
        self.log_likelihoods(observed, hidden)
            .into_iter()
            .map(lp)
            .sum::<Prob>()
            .to_log_value()
    }
    ///
    /// `ln sum_k w_k P_k(x)` of the observed sequence alone.
    ///
    pub fn log_likelihood_observed(&self, observed: &[u8]) -> f64 {
        self.iter()
            .map(|(c, w)| lp(w.ln() + c.estimate_observed(observed)))
            .sum::<Prob>()
            .to_log_value()
    }
    ///
    /// Posterior probability of each component given the observed
    /// sequence only, `w_k P_k(x) / sum_j w_j P_j(x)`.
    ///
    pub fn observed_responsibilities(&self, observed: &[u8]) -> Vec<f64> {
        let total = self.log_likelihood_observed(observed);
        self.iter()
            .map(|(c, w)| {
                if w <= 0.0 {
                    0.0
                } else {
                    (w.ln() + c.estimate_observed(observed) - total).exp()
                }
            })
            .collect()
    }
    ///
    /// Sum of `log_likelihood` over the rows.
    ///
    /// Rows are evaluated in parallel but summed in row order, so the
    /// result does not depend on the number of threads.
    ///
    pub fn total_log_likelihood<D: Dataset>(&self, data: &D) -> f64 {
        let lls: Vec<f64> = (0..data.len())
            .into_par_iter()
            .map(|i| self.log_likelihood(data.observed(i), data.hidden(i)))
            .collect();
        lls.iter().sum()
    }
    ///
    /// `responsibilities` of every row (in parallel), `r[i][k]`.
    ///
    pub fn responsibilities_set<D: Dataset>(&self, data: &D) -> Vec<Vec<f64>> {
        (0..data.len())
            .into_par_iter()
            .map(|i| self.responsibilities(data.observed(i), data.hidden(i)))
            .collect()
    }
    /// `reset` every component and make the weights uniform
    pub fn reset(&mut self) {
        self.components.iter_mut().for_each(|c| c.reset());
        let n = self.len() as f64;
        self.weights.iter_mut().for_each(|w| *w = 1.0 / n);
    }
    /// true if no component has digested any sequence
    pub fn is_untrained(&self) -> bool {
        self.components.iter().all(|c| c.n_digested() == 0)
    }
    ///
    /// Empty components with the same hyperparameters and uniform weights.
    ///
    pub fn duplicate_hyperparameters_only(&self) -> Self {
        let n = self.len() as f64;
        Mixture {
            components: self
                .components
                .iter()
                .map(|c| c.duplicate_hyperparameters_only())
                .collect(),
            weights: vec![1.0 / n; self.len()],
        }
    }
    pub fn repr(&self) -> String {
        format!(
            "ChainMixture(n={}, weights=[{}], component={})",
            self.len(),
            self.weights.iter().map(|w| format!("{:.3}", w)).join(","),
            self.components
                .first()
                .map(|c| c.repr())
                .unwrap_or_default()
        )
    }
}

///
/// Decoder over a mixture of chains.
///
/// Components are weighted by their posterior given the observed
/// sequence (`Mixture::observed_responsibilities`). Each component of
/// nonzero posterior decodes the sequence and the path maximizing
/// `ln P(k | x) + ln P_k(path | x)` is returned.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarkovMixture<C> {
    mixture: Mixture<C>,
    decoder: DecoderParams,
    em: EmParams,
}

impl<C: ChainModel + Serialize> MarkovMixture<C> {
    pub fn new(mixture: Mixture<C>, decoder: DecoderParams, em: EmParams) -> Result<Self> {
        if mixture.is_empty() {
            return Err(Error::InvalidWeights("empty mixture".to_string()));
        }
        check_same_states(mixture.components())?;
        Ok(MarkovMixture {
            mixture,
            decoder,
            em,
        })
    }
    ///
    /// `n_components` empty copies of `template`.
    ///
    pub fn from_template(
        template: &C,
        n_components: usize,
        decoder: DecoderParams,
        em: EmParams,
    ) -> Result<Self> {
        MarkovMixture::new(Mixture::from_template(template, n_components)?, decoder, em)
    }
    pub fn mixture(&self) -> &Mixture<C> {
        &self.mixture
    }
    pub fn set_mixture(&mut self, mixture: Mixture<C>) -> Result<()> {
        check_same_states(mixture.components())?;
        self.mixture = mixture;
        Ok(())
    }
    ///
    /// Best decoded path, its score `ln P(k | x) + ln P_k(path | x)` and
    /// the index of the component `k` that produced it.
    ///
    /// `P_k(path | x)` is the Viterbi probability divided by
    /// `estimate_observed`, so both terms are floored approximations.
    ///
    pub fn decode_scored(&self, observed: &[u8]) -> Option<(Vec<u8>, f64, usize)> {
        let posteriors = self.mixture.observed_responsibilities(observed);
        with_thread_scratch(|scratch| {
            let mut best: Option<(Vec<u8>, f64, usize)> = None;
            for (k, chain) in self.mixture.components().iter().enumerate() {
                if posteriors[k] <= 0.0 {
                    continue;
                }
                if let Some((hidden, score)) =
                    decode_chain(chain, observed, self.decoder.max_length, None, scratch)
                {
                    let score = posteriors[k].ln() + score - chain.estimate_observed(observed);
                    if best.as_ref().map_or(true, |(_, b, _)| score > *b) {
                        best = Some((hidden, score, k));
                    }
                }
            }
            best
        })
    }
}

impl<C: ChainModel + Serialize> Decoder for MarkovMixture<C> {
    fn states(&self) -> &Arc<StatesDescription> {
        self.mixture.component(0).states()
    }
    ///
    /// Add the sequence to every component with its responsibility as
    /// weight (with the mixture weights when untrained).
    ///
    fn train(&mut self, observed: &[u8], hidden: &[u8]) {
        let r = if self.mixture.is_untrained() {
            self.mixture.weights().to_vec()
        } else {
            self.mixture.responsibilities(observed, hidden)
        };
        for (c, w) in self.mixture.components.iter_mut().zip(r) {
            c.train(observed, hidden, w);
        }
    }
    ///
    /// Fit by EM. An untrained mixture is first initialized by a random
    /// split of the rows (seeded by `em.seed`).
    ///
    fn train_set<D: Dataset>(&mut self, data: &D) -> Result<()> {
        if data.is_empty() {
            warn!("MarkovMixture trained on an empty dataset");
            return Ok(());
        }
        let initial = if self.mixture.is_untrained() {
            random_split_mixture(self.mixture.component(0), self.mixture.len(), data, self.em.seed)?
        } else {
            self.mixture.clone()
        };
        let mut em = EMAlgorithm::new(initial, data, self.em.clone());
        let history = em.ordinary_run()?;
        debug!("EM history {:?}", history);
        self.mixture = em.into_mixture();
        Ok(())
    }
    fn reset(&mut self) {
        self.mixture.reset();
    }
    fn run(&self, observed: &[u8]) -> Option<Vec<u8>> {
        self.decode_scored(observed).map(|(hidden, _, _)| hidden)
    }
    fn duplicate_hyperparameters_only(&self) -> Self {
        MarkovMixture {
            mixture: self.mixture.duplicate_hyperparameters_only(),
            decoder: self.decoder.clone(),
            em: self.em.clone(),
        }
    }
    fn repr(&self) -> String {
        format!(
            "MarkovMixture({}, max_length={}, em_rounds={})",
            self.mixture.repr(),
            self.decoder.max_length,
            self.em.n_rounds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MarkovChain;
    use crate::mocks::{mock_labeled_set, mock_states, mock_two_source_set};
    use crate::viterbi::ViterbiAlgorithm;
    use approx::assert_abs_diff_eq;

    #[test]
    fn weights_stay_normalized() {
        let mut m = Mixture::new(vec!['a', 'b', 'c'], vec![2.0, 1.0, 1.0]).unwrap();
        assert!(m.is_normalized());
        assert_abs_diff_eq!(m.weight(0), 0.5);
        m.add('d', 0.2).unwrap();
        assert!(m.is_normalized());
        assert_abs_diff_eq!(m.weight(0), 0.4);
        assert_abs_diff_eq!(m.weight(3), 0.2);
        assert_eq!(m.lowest_weight_index(), Some(3));
        assert_eq!(m.delete(0).unwrap(), 'a');
        assert!(m.is_normalized());
        assert_eq!(m.len(), 3);
        m.add('e', 0.0).unwrap();
        m.add('f', 1.0).unwrap();
        assert!(m.is_normalized());
        assert_abs_diff_eq!(m.weight(4), 1.0);
        m.delete(4).unwrap();
        // every remaining weight was zero
        assert!(m.is_normalized());
        assert_abs_diff_eq!(m.weight(0), 0.25);
        while m.len() > 1 {
            m.delete(0).unwrap();
            assert!(m.is_normalized());
        }
        assert!(m.delete(0).is_err());
    }

    #[test]
    fn invalid_weights() {
        assert!(Mixture::new(vec![1, 2], vec![1.0]).is_err());
        assert!(Mixture::new(vec![1, 2], vec![0.0, 0.0]).is_err());
        assert!(Mixture::new(vec![1, 2], vec![-1.0, 2.0]).is_err());
        assert!(Mixture::new(vec![1, 2], vec![f64::NAN, 2.0]).is_err());
        assert!(Mixture::<u8>::uniform(vec![]).is_err());
        let mut m = Mixture::uniform(vec![1]).unwrap();
        assert!(m.add(2, 1.5).is_err());
        assert!(m.set_weights(vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn responsibilities_sum_to_one() {
        let data = mock_two_source_set(20, 100, 0);
        let template = MarkovChain::new(mock_states(), 1, 1, 1e-4);
        let m = random_split_mixture(&template, 3, &data, 1).unwrap();
        for i in 0..data.len() {
            let r = m.responsibilities(data.observed(i), data.hidden(i));
            assert_abs_diff_eq!(r.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            // log-sum-exp is at least the best term
            let lls = m.log_likelihoods(data.observed(i), data.hidden(i));
            let best = lls.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let ll = m.log_likelihood(data.observed(i), data.hidden(i));
            assert!(ll >= best - 1e-9);
            assert!(ll <= best + (3f64).ln() + 1e-9);
        }
    }

    #[test]
    fn single_component_mixture_decodes_like_viterbi() {
        let data = mock_labeled_set(30, 100, 0);
        let mut chain = MarkovChain::new(data.states().clone(), 2, 1, 1e-4);
        chain.train_set(&data);
        let v = ViterbiAlgorithm::new(chain.clone(), DecoderParams::default());
        let m = MarkovMixture::new(
            Mixture::uniform(vec![chain]).unwrap(),
            DecoderParams::default(),
            EmParams::default(),
        )
        .unwrap();
        let test = mock_labeled_set(5, 60, 9);
        for i in 0..test.len() {
            assert_eq!(m.run(test.observed(i)), v.run(test.observed(i)));
        }
    }

    #[test]
    fn markov_mixture_train_and_clear() {
        let data = mock_two_source_set(30, 120, 0);
        let template = MarkovChain::new(mock_states(), 1, 1, 1e-4);
        let em = EmParams {
            n_rounds: 3,
            ..EmParams::default()
        };
        let mut m = MarkovMixture::from_template(&template, 2, DecoderParams::default(), em).unwrap();
        assert!(m.mixture().is_untrained());
        m.train_set(&data).unwrap();
        assert!(!m.mixture().is_untrained());
        assert!(m.mixture().is_normalized());
        let (hidden, _, k) = m.decode_scored(data.observed(0)).unwrap();
        assert_eq!(hidden.len(), data.observed(0).len());
        assert!(k < 2);

        let clear = m.duplicate_hyperparameters_only();
        assert!(clear.mixture().is_untrained());
        assert_eq!(clear.run(data.observed(0)), None);
        println!("{}", m.repr());
    }
}
