//!
//! Markov chain with backoff to lower orders
//!
//! A `FallthruChain` of order `k` owns a main chain of order `k` and one
//! sibling chain for every order in `min_order..k`. When the main chain
//! has never seen a transition, the probability is taken from the
//! siblings (conditioning on a shorter suffix of the tail) according to
//! a `Strategy`.
//!
use super::{ChainModel, MarkovChain};
use crate::error::{Error, Result};
use crate::fragment::{Fragment, FragmentFactory};
use crate::params::ChainParams;
use crate::states::StatesDescription;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

///
/// How unseen transitions of the main chain are approximated.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// mean of the nonzero sibling probabilities
    Mean,
    /// nonzero probability of the highest order sibling
    First,
    /// constant `trans_threshold`
    Fixed,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Strategy::Mean => "mean",
            Strategy::First => "first",
            Strategy::Fixed => "fixed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Strategy {
    type Err = Error;
    fn from_str(s: &str) -> Result<Strategy> {
        match s.to_ascii_lowercase().as_str() {
            "mean" => Ok(Strategy::Mean),
            "first" => Ok(Strategy::First),
            "fixed" => Ok(Strategy::Fixed),
            _ => Err(Error::InvalidParameter(format!("unknown strategy {}", s))),
        }
    }
}

///
/// Backoff configuration.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Approximation {
    /// lowest sibling order
    pub min_order: usize,
    pub strategy: Strategy,
    /// lower bound of `initial_p`
    pub initial_threshold: f64,
    /// value of transitions unseen by the main chain and all siblings
    pub trans_threshold: f64,
}

impl Default for Approximation {
    fn default() -> Self {
        Approximation {
            min_order: 0,
            strategy: Strategy::Mean,
            initial_threshold: 1e-4,
            trans_threshold: 1e-4,
        }
    }
}

impl Approximation {
    pub fn new(min_order: usize, strategy: Strategy) -> Self {
        Approximation {
            min_order,
            strategy,
            ..Approximation::default()
        }
    }
    pub fn validate(&self, order: usize) -> Result<()> {
        if self.min_order >= order {
            return Err(Error::InvalidParameter(format!(
                "min_order ({}) must be less than order ({})",
                self.min_order, order
            )));
        }
        for (name, t) in [
            ("initial_threshold", self.initial_threshold),
            ("trans_threshold", self.trans_threshold),
        ] {
            if !(t > 0.0 && t <= 1.0) {
                return Err(Error::InvalidParameter(format!(
                    "{} must be in (0, 1], got {}",
                    name, t
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Approximation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "min_order={} strategy={} initial_threshold={} trans_threshold={}",
            self.min_order, self.strategy, self.initial_threshold, self.trans_threshold
        )
    }
}

///
/// Chain with backoff.
///
/// `siblings[i]` has order `min_order + i` and is trained on the suffix
/// of each sequence starting at `order - (min_order + i)`, so that its
/// transition windows coincide with the windows of the main chain.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "FallthruFields")]
pub struct FallthruChain {
    main: MarkovChain,
    approximation: Approximation,
    siblings: Vec<MarkovChain>,
}

/// serialized form of `FallthruChain`, checked on load
#[derive(Deserialize)]
struct FallthruFields {
    main: MarkovChain,
    approximation: Approximation,
    siblings: Vec<MarkovChain>,
}

impl TryFrom<FallthruFields> for FallthruChain {
    type Error = String;
    fn try_from(c: FallthruFields) -> std::result::Result<Self, String> {
        c.approximation
            .validate(c.main.order())
            .map_err(|e| e.to_string())?;
        let expected = c.main.order() - c.approximation.min_order;
        if c.siblings.len() != expected {
            return Err(format!("{} siblings (expected {})", c.siblings.len(), expected));
        }
        for (i, s) in c.siblings.iter().enumerate() {
            if s.order() != c.approximation.min_order + i
                || s.dep_length() != c.main.dep_length()
                || s.states() != c.main.states()
            {
                return Err(format!("sibling {} does not match the main chain: {}", i, s.repr()));
            }
        }
        Ok(FallthruChain {
            main: c.main,
            approximation: c.approximation,
            siblings: c.siblings,
        })
    }
}

impl FallthruChain {
    pub fn new(main: MarkovChain, approximation: Approximation) -> Result<FallthruChain> {
        approximation.validate(main.order())?;
        let siblings = (approximation.min_order..main.order())
            .map(|k| {
                MarkovChain::new(
                    main.states().clone(),
                    k,
                    main.dep_length(),
                    main.log_floor_prob(),
                )
            })
            .collect();
        Ok(FallthruChain {
            main: main.duplicate_hyperparameters_only(),
            approximation,
            siblings,
        })
    }
    ///
    /// Build from parameters with `approximation` set.
    ///
    pub fn from_params(states: Arc<StatesDescription>, params: &ChainParams) -> Result<FallthruChain> {
        let approximation = params.approximation.clone().ok_or_else(|| {
            Error::InvalidParameter("FallthruChain needs an approximation".to_string())
        })?;
        FallthruChain::new(MarkovChain::from_params(states, params)?, approximation)
    }
    pub fn approximation(&self) -> &Approximation {
        &self.approximation
    }
    pub fn main(&self) -> &MarkovChain {
        &self.main
    }
    pub fn siblings(&self) -> &[MarkovChain] {
        &self.siblings
    }
    /// transition probabilities of the siblings, highest order first
    fn sibling_trans_p(&self, tail: Fragment, head: Fragment) -> impl Iterator<Item = f64> + '_ {
        let f = self.main.factory();
        self.siblings
            .iter()
            .rev()
            .map(move |s| s.trans_p(f.suffix(tail, s.order()), head))
    }
}

impl ChainModel for FallthruChain {
    fn states(&self) -> &Arc<StatesDescription> {
        self.main.states()
    }
    fn order(&self) -> usize {
        self.main.order()
    }
    fn dep_length(&self) -> usize {
        self.main.dep_length()
    }
    fn factory(&self) -> &FragmentFactory {
        self.main.factory()
    }
    fn log_floor_prob(&self) -> f64 {
        self.main.log_floor_prob()
    }
    fn initial_p(&self, tail: Fragment) -> f64 {
        self.main
            .initial_p(tail)
            .max(self.approximation.initial_threshold)
    }
    fn trans_p(&self, tail: Fragment, head: Fragment) -> f64 {
        let p = self.main.trans_p(tail, head);
        if p > 0.0 {
            return p;
        }
        let threshold = self.approximation.trans_threshold;
        match self.approximation.strategy {
            Strategy::Fixed => threshold,
            Strategy::First => self
                .sibling_trans_p(tail, head)
                .find(|&p| p > 0.0)
                .unwrap_or(threshold),
            Strategy::Mean => {
                let (sum, n) = self
                    .sibling_trans_p(tail, head)
                    .filter(|&p| p > 0.0)
                    .fold((0.0, 0usize), |(s, n), p| (s + p, n + 1));
                if n > 0 {
                    sum / n as f64
                } else {
                    threshold
                }
            }
        }
    }
    fn train(&mut self, observed: &[u8], hidden: &[u8], weight: f64) {
        let order = self.main.order();
        if observed.len() < order {
            return;
        }
        self.main.train(observed, hidden, weight);
        for s in self.siblings.iter_mut() {
            let start = order - s.order();
            s.train(&observed[start..], &hidden[start..], weight);
        }
    }
    fn reset(&mut self) {
        self.main.reset();
        self.siblings.iter_mut().for_each(|s| s.reset());
    }
    fn n_digested(&self) -> usize {
        self.main.n_digested()
    }
    fn estimate_observed(&self, observed: &[u8]) -> f64 {
        self.main.estimate_observed(observed)
    }
    fn duplicate_hyperparameters_only(&self) -> Self {
        FallthruChain {
            main: self.main.duplicate_hyperparameters_only(),
            approximation: self.approximation.clone(),
            siblings: self
                .siblings
                .iter()
                .map(|s| s.duplicate_hyperparameters_only())
                .collect(),
        }
    }
    fn repr(&self) -> String {
        format!("FallthruChain({}, {})", self.main.repr(), self.approximation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// order 2 chain with siblings of order 0 and 1, trained on "ACAG"/"xxxi"
    fn trained(strategy: Strategy) -> FallthruChain {
        let states = StatesDescription::get("ACGT", "xi", None).unwrap();
        let main = MarkovChain::new(states.clone(), 2, 1, 1e-4);
        let mut chain = FallthruChain::new(main, Approximation::new(0, strategy)).unwrap();
        let o = states.observed().encode(b"ACAG").unwrap();
        let h = states.hidden().encode(b"xxxi").unwrap();
        chain.train(&o, &h, 1.0);
        chain
    }

    #[test]
    fn seen_transitions_are_not_approximated() {
        for strategy in [Strategy::Mean, Strategy::First, Strategy::Fixed] {
            let chain = trained(strategy);
            let f = chain.factory().clone();
            // AC/xx -> A/x
            let tail = f.fragment(1, 0, 2);
            assert_abs_diff_eq!(chain.trans_p(tail, f.fragment(0, 0, 1)), 1.0);
            assert_eq!(chain.siblings().len(), 2);
        }
    }

    #[test]
    fn fallthru_strategies() {
        // unseen tail GC/xx; order 1 sibling saw C/x -> A/x once
        // order 0 sibling saw A/x and G/i, once each
        let head = |chain: &FallthruChain| chain.factory().fragment(0, 0, 1);
        let tail = |chain: &FallthruChain| chain.factory().fragment(2 * 4 + 1, 0, 2);

        let chain = trained(Strategy::First);
        assert_abs_diff_eq!(chain.trans_p(tail(&chain), head(&chain)), 1.0);

        let chain = trained(Strategy::Mean);
        assert_abs_diff_eq!(chain.trans_p(tail(&chain), head(&chain)), 0.75);

        let chain = trained(Strategy::Fixed);
        assert_abs_diff_eq!(chain.trans_p(tail(&chain), head(&chain)), 1e-4);

        // never seen by anyone
        let chain = trained(Strategy::Mean);
        let f = chain.factory().clone();
        assert_abs_diff_eq!(chain.trans_p(tail(&chain), f.fragment(3, 1, 1)), 1e-4);
    }

    #[test]
    fn initial_is_floored() {
        let chain = trained(Strategy::Mean);
        let f = chain.factory().clone();
        assert_abs_diff_eq!(chain.initial_p(f.fragment(1, 0, 2)), 1.0);
        assert_abs_diff_eq!(chain.initial_p(f.fragment(3, 3, 2)), 1e-4);
        let clear = chain.duplicate_hyperparameters_only();
        assert_eq!(clear.n_digested(), 0);
        assert_eq!(clear.siblings().iter().map(|s| s.n_digested()).sum::<usize>(), 0);
    }

    #[test]
    fn invalid_approximation() {
        let states = StatesDescription::get("ACGT", "xi", None).unwrap();
        let main = MarkovChain::new(states.clone(), 2, 1, 1e-4);
        assert!(FallthruChain::new(main.clone(), Approximation::new(2, Strategy::Mean)).is_err());
        let mut params = ChainParams::new(2, 1);
        assert!(FallthruChain::from_params(states.clone(), &params).is_err());
        params.approximation = Some(Approximation::new(1, Strategy::First));
        let chain = FallthruChain::from_params(states, &params).unwrap();
        assert_eq!(chain.siblings().len(), 1);
        assert_eq!("first".parse::<Strategy>().unwrap(), Strategy::First);
    }

    #[test]
    fn mismatched_siblings_are_rejected() {
        let chain = trained(Strategy::Mean);
        let json = serde_json::to_value(&chain).unwrap();
        let back: FallthruChain = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.siblings().len(), 2);

        let mut swapped = json.clone();
        let siblings = swapped["siblings"].as_array_mut().unwrap();
        siblings.swap(0, 1);
        assert!(serde_json::from_value::<FallthruChain>(swapped).is_err());

        let mut missing = json.clone();
        missing["siblings"].as_array_mut().unwrap().pop();
        assert!(serde_json::from_value::<FallthruChain>(missing).is_err());

        let mut min_order = json;
        min_order["approximation"]["min_order"] = serde_json::json!(2);
        assert!(serde_json::from_value::<FallthruChain>(min_order).is_err());
    }
}
