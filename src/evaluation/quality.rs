//!
//! Recognition quality of predicted hidden sequences
//!
//! For every hidden state `s`, positions are classified as
//!
//! ```text
//!                 predicted s   predicted not s
//! reference s         TP             FN
//! reference not s     FP             TN
//! ```
//!
//! and maximal runs of `s` (segments) are matched exactly (same start and
//! end) between reference and prediction.
//!
//! * symbol sensitivity `TP / (TP + FN)`
//! * symbol specificity `TP / (TP + FP)`
//! * average conditional probability, mean of the four conditional
//!   probabilities `TP/(TP+FN)`, `TP/(TP+FP)`, `TN/(TN+FP)`, `TN/(TN+FN)`
//!   that are defined
//! * correlation coefficient
//!   `(TP TN - FN FP) / sqrt((TP+FN)(TN+FP)(TP+FP)(TN+FN))`
//! * segment sensitivity `matched / reference segments`
//! * segment specificity `matched / predicted segments`
//!
//! Undefined ratios (zero denominator) are `NaN`.
//!
use crate::states::Alphabet;
use serde::{Deserialize, Serialize};

///
/// Counters of one hidden state.
///
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounters {
    pub true_positive: u64,
    pub false_positive: u64,
    pub false_negative: u64,
    pub true_negative: u64,
    pub reference_segments: u64,
    pub predicted_segments: u64,
    pub matched_segments: u64,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        numerator as f64 / denominator as f64
    }
}

impl StateCounters {
    pub fn symbol_sensitivity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }
    pub fn symbol_specificity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }
    pub fn average_conditional_probability(&self) -> f64 {
        let (tp, fp, fn_, tn) = (
            self.true_positive,
            self.false_positive,
            self.false_negative,
            self.true_negative,
        );
        let terms: Vec<f64> = [
            ratio(tp, tp + fn_),
            ratio(tp, tp + fp),
            ratio(tn, tn + fp),
            ratio(tn, tn + fn_),
        ]
        .into_iter()
        .filter(|x| !x.is_nan())
        .collect();
        if terms.is_empty() {
            f64::NAN
        } else {
            terms.iter().sum::<f64>() / terms.len() as f64
        }
    }
    pub fn correlation_coefficient(&self) -> f64 {
        let tp = self.true_positive as f64;
        let fp = self.false_positive as f64;
        let fn_ = self.false_negative as f64;
        let tn = self.true_negative as f64;
        let denominator = ((tp + fn_) * (tn + fp) * (tp + fp) * (tn + fn_)).sqrt();
        if denominator == 0.0 {
            f64::NAN
        } else {
            (tp * tn - fn_ * fp) / denominator
        }
    }
    pub fn segment_sensitivity(&self) -> f64 {
        ratio(self.matched_segments, self.reference_segments)
    }
    pub fn segment_specificity(&self) -> f64 {
        ratio(self.matched_segments, self.predicted_segments)
    }
}

/// maximal runs `(start, end)` of `state`
fn segments(seq: &[u8], state: u8) -> Vec<(usize, usize)> {
    let mut v = Vec::new();
    let mut start = None;
    for (i, &s) in seq.iter().enumerate() {
        match (s == state, start) {
            (true, None) => start = Some(i),
            (false, Some(b)) => {
                v.push((b, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(b) = start {
        v.push((b, seq.len()));
    }
    v
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum Accumulator {
    /// raw counters
    Counts {
        states: Vec<StateCounters>,
        n_sequences: usize,
        n_denied: usize,
    },
    /// average of the children
    Mean(Vec<PredictionQuality>),
}

///
/// Incremental accumulator of prediction quality.
///
/// Either holds counters (filled by `add_sequence`) or is the mean of
/// child accumulators (`PredictionQuality::mean`), e.g. one per fold.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionQuality {
    hidden: Alphabet,
    accumulator: Accumulator,
}

impl PredictionQuality {
    pub fn new(hidden: Alphabet) -> Self {
        let n = hidden.len();
        PredictionQuality {
            hidden,
            accumulator: Accumulator::Counts {
                states: vec![StateCounters::default(); n],
                n_sequences: 0,
                n_denied: 0,
            },
        }
    }
    ///
    /// Mean of the children. Only children with at least one processed
    /// sequence contribute to the metrics.
    ///
    pub fn mean(hidden: Alphabet, children: Vec<PredictionQuality>) -> Self {
        PredictionQuality {
            hidden,
            accumulator: Accumulator::Mean(children),
        }
    }
    pub fn hidden(&self) -> &Alphabet {
        &self.hidden
    }
    pub fn is_mean(&self) -> bool {
        matches!(self.accumulator, Accumulator::Mean(_))
    }
    ///
    /// Account one decoded sequence; `None` is a refusal.
    ///
    /// Panics on a mean accumulator or if the lengths differ.
    ///
    pub fn add_sequence(&mut self, reference: &[u8], predicted: Option<&[u8]>) {
        let (states, n_sequences, n_denied) = match &mut self.accumulator {
            Accumulator::Counts {
                states,
                n_sequences,
                n_denied,
            } => (states, n_sequences, n_denied),
            Accumulator::Mean(_) => panic!("add_sequence on a mean of qualities"),
        };
        *n_sequences += 1;
        let predicted = match predicted {
            Some(p) => p,
            None => {
                *n_denied += 1;
                return;
            }
        };
        assert_eq!(
            reference.len(),
            predicted.len(),
            "reference and prediction lengths differ"
        );
        for (s, c) in states.iter_mut().enumerate() {
            let s = s as u8;
            for (&r, &p) in reference.iter().zip(predicted) {
                match (r == s, p == s) {
                    (true, true) => c.true_positive += 1,
                    (true, false) => c.false_negative += 1,
                    (false, true) => c.false_positive += 1,
                    (false, false) => c.true_negative += 1,
                }
            }
            let rs = segments(reference, s);
            let ps = segments(predicted, s);
            c.reference_segments += rs.len() as u64;
            c.predicted_segments += ps.len() as u64;
            // both lists are sorted by start
            let (mut i, mut j) = (0, 0);
            while i < rs.len() && j < ps.len() {
                if rs[i] == ps[j] {
                    c.matched_segments += 1;
                    i += 1;
                    j += 1;
                } else if rs[i].0 < ps[j].0 || (rs[i].0 == ps[j].0 && rs[i].1 < ps[j].1) {
                    i += 1;
                } else {
                    j += 1;
                }
            }
        }
    }
    /// number of accounted sequences (refusals included)
    pub fn n_sequences(&self) -> usize {
        match &self.accumulator {
            Accumulator::Counts { n_sequences, .. } => *n_sequences,
            Accumulator::Mean(children) => children.iter().map(|c| c.n_sequences()).sum(),
        }
    }
    /// number of refusals
    pub fn n_denied(&self) -> usize {
        match &self.accumulator {
            Accumulator::Counts { n_denied, .. } => *n_denied,
            Accumulator::Mean(children) => children.iter().map(|c| c.n_denied()).sum(),
        }
    }
    /// counters of `state`; `None` for a mean
    pub fn counters(&self, state: usize) -> Option<&StateCounters> {
        match &self.accumulator {
            Accumulator::Counts { states, .. } => states.get(state),
            Accumulator::Mean(_) => None,
        }
    }
    fn metric<F: Fn(&StateCounters) -> f64 + Copy>(&self, state: usize, f: F) -> f64 {
        match &self.accumulator {
            Accumulator::Counts { states, .. } => f(&states[state]),
            Accumulator::Mean(children) => {
                let values: Vec<f64> = children
                    .iter()
                    .filter(|c| c.n_sequences() > 0)
                    .map(|c| c.metric(state, f))
                    .filter(|x| !x.is_nan())
                    .collect();
                if values.is_empty() {
                    f64::NAN
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
        }
    }
    pub fn symbol_sensitivity(&self, state: usize) -> f64 {
        self.metric(state, StateCounters::symbol_sensitivity)
    }
    pub fn symbol_specificity(&self, state: usize) -> f64 {
        self.metric(state, StateCounters::symbol_specificity)
    }
    pub fn average_conditional_probability(&self, state: usize) -> f64 {
        self.metric(state, StateCounters::average_conditional_probability)
    }
    pub fn correlation_coefficient(&self, state: usize) -> f64 {
        self.metric(state, StateCounters::correlation_coefficient)
    }
    pub fn segment_sensitivity(&self, state: usize) -> f64 {
        self.metric(state, StateCounters::segment_sensitivity)
    }
    pub fn segment_specificity(&self, state: usize) -> f64 {
        self.metric(state, StateCounters::segment_specificity)
    }
}

impl std::fmt::Display for PredictionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "# sequences={} denied={}",
            self.n_sequences(),
            self.n_denied()
        )?;
        writeln!(f, "state\tSn\tSp\tAC\tCC\tSSn\tSSp")?;
        for s in 0..self.hidden.len() {
            writeln!(
                f,
                "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
                self.hidden.symbol(s as u8) as char,
                self.symbol_sensitivity(s),
                self.symbol_specificity(s),
                self.average_conditional_probability(s),
                self.correlation_coefficient(s),
                self.segment_sensitivity(s),
                self.segment_specificity(s),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn hidden() -> Alphabet {
        Alphabet::new("xi").unwrap()
    }

    #[test]
    fn segments_of_state() {
        assert_eq!(segments(&[0, 0, 1, 0, 1, 1], 1), vec![(2, 3), (4, 6)]);
        assert_eq!(segments(&[0, 0, 1, 0, 1, 1], 0), vec![(0, 2), (3, 4)]);
        assert_eq!(segments(&[], 0), vec![]);
    }

    #[test]
    fn symbol_and_segment_metrics() {
        let mut q = PredictionQuality::new(hidden());
        // x x i i x i
        // x i i i x x
        q.add_sequence(&[0, 0, 1, 1, 0, 1], Some(&[0, 1, 1, 1, 0, 0]));
        let c = q.counters(1).unwrap();
        assert_eq!(
            (c.true_positive, c.false_positive, c.false_negative, c.true_negative),
            (2, 1, 1, 2)
        );
        assert_abs_diff_eq!(q.symbol_sensitivity(1), 2.0 / 3.0);
        assert_abs_diff_eq!(q.symbol_specificity(1), 2.0 / 3.0);
        assert_abs_diff_eq!(q.average_conditional_probability(1), 2.0 / 3.0);
        assert_abs_diff_eq!(q.correlation_coefficient(1), 1.0 / 3.0, epsilon = 1e-12);
        // reference i segments (2,4) (5,6); predicted (1,4)
        assert_eq!(q.segment_sensitivity(1), 0.0);
        // reference x segments (0,2) (4,5); predicted (0,1) (4,6)
        assert_eq!(q.counters(0).unwrap().matched_segments, 0);

        q.add_sequence(&[0, 1], Some(&[0, 1]));
        assert_abs_diff_eq!(q.segment_sensitivity(1), 1.0 / 3.0);
        assert_abs_diff_eq!(q.segment_specificity(1), 1.0 / 2.0);
        q.add_sequence(&[0, 1], None);
        assert_eq!(q.n_sequences(), 3);
        assert_eq!(q.n_denied(), 1);
        println!("{}", q);
    }

    #[test]
    fn perfect_prediction() {
        let mut q = PredictionQuality::new(hidden());
        q.add_sequence(&[0, 1, 1, 0], Some(&[0, 1, 1, 0]));
        for s in 0..2 {
            assert_abs_diff_eq!(q.symbol_sensitivity(s), 1.0);
            assert_abs_diff_eq!(q.correlation_coefficient(s), 1.0);
            assert_abs_diff_eq!(q.segment_specificity(s), 1.0);
        }
    }

    #[test]
    fn mean_skips_empty_children() {
        let mut a = PredictionQuality::new(hidden());
        a.add_sequence(&[1, 1], Some(&[1, 1]));
        let mut b = PredictionQuality::new(hidden());
        b.add_sequence(&[1, 1], Some(&[1, 0]));
        let empty = PredictionQuality::new(hidden());
        let m = PredictionQuality::mean(hidden(), vec![a, b, empty]);
        assert!(m.is_mean());
        assert_eq!(m.n_sequences(), 2);
        assert_abs_diff_eq!(m.symbol_sensitivity(1), 0.75);
        assert!(PredictionQuality::mean(hidden(), vec![]).symbol_sensitivity(0).is_nan());
    }

    #[test]
    #[should_panic]
    fn mean_is_read_only() {
        let mut m = PredictionQuality::mean(hidden(), vec![]);
        m.add_sequence(&[0], Some(&[0]));
    }
}
