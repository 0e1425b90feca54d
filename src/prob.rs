//!
//! Log-space probability values
//!
//! Viterbi scores and mixture responsibilities are kept as `ln p` so
//! that long sequences do not underflow.
//!
use approx::AbsDiffEq;

///
/// Probability `0 <= p <= 1` stored as its natural logarithm.
///
/// `p = 0` is `ln p = -inf`.
///
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Prob(f64);

///
/// short-hand of `Prob::from_prob`
///
pub fn p(p: f64) -> Prob {
    Prob::from_prob(p)
}

///
/// short-hand of `Prob::from_log_prob`
///
pub fn lp(lp: f64) -> Prob {
    Prob::from_log_prob(lp)
}

impl Prob {
    pub fn from_prob(value: f64) -> Prob {
        Prob(value.ln())
    }
    pub fn from_log_prob(log_value: f64) -> Prob {
        Prob(log_value)
    }
    /// Probability in `[0, 1]`
    pub fn to_value(self) -> f64 {
        self.0.exp()
    }
    /// `ln p`
    pub fn to_log_value(self) -> f64 {
        self.0
    }
    /// `p == 0` (i.e. `ln p == -inf`)
    pub fn is_zero(self) -> bool {
        self.0.is_infinite() && self.0.is_sign_negative()
    }
    pub fn zero() -> Prob {
        Prob(f64::NEG_INFINITY)
    }
    pub fn one() -> Prob {
        Prob(0.0)
    }
    ///
    /// Probability floored at `floor` (given as a plain probability).
    ///
    /// Used for per-term floors of likelihood estimates, so that
    /// a single unseen transition does not make the whole score `-inf`.
    ///
    pub fn floored(value: f64, floor: f64) -> Prob {
        Prob::from_prob(value.max(floor))
    }
    ///
    /// Normalize a list of log-space weights into plain probabilities.
    ///
    /// The maximum is subtracted before exponentiation. If every input
    /// is zero, the uniform distribution is returned.
    ///
    pub fn normalize(xs: &[Prob]) -> Vec<f64> {
        let max = xs.iter().copied().max().unwrap_or_else(Prob::zero);
        if max.is_zero() {
            let n = xs.len() as f64;
            return xs.iter().map(|_| 1.0 / n).collect();
        }
        let ys: Vec<f64> = xs.iter().map(|x| (x.0 - max.0).exp()).collect();
        let total: f64 = ys.iter().sum();
        ys.into_iter().map(|y| y / total).collect()
    }
}

/// p=0 as a default value
impl Default for Prob {
    fn default() -> Self {
        Prob::zero()
    }
}

impl num_traits::Zero for Prob {
    fn zero() -> Self {
        Prob::zero()
    }
    fn is_zero(&self) -> bool {
        Prob::is_zero(*self)
    }
}

impl num_traits::One for Prob {
    fn one() -> Self {
        Prob::one()
    }
}

impl std::fmt::Display for Prob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}({:.4})", self.0, self.to_value())
    }
}

/// `px + py` in log space
///
/// ```text
/// log(exp(x) + exp(y)) = x + log(1 + exp(y-x))   (x >= y)
/// ```
impl std::ops::Add for Prob {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        let (x, y) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        if y == f64::NEG_INFINITY {
            Prob(x)
        } else {
            Prob(x + (y - x).exp().ln_1p())
        }
    }
}

/// `px * py` in log space
impl std::ops::Mul for Prob {
    type Output = Self;
    fn mul(self, other: Self) -> Self {
        Prob(self.0 + other.0)
    }
}

/// `px / py` in log space
impl std::ops::Div for Prob {
    type Output = Self;
    fn div(self, other: Self) -> Self {
        Prob(self.0 - other.0)
    }
}

impl std::ops::AddAssign for Prob {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::ops::MulAssign for Prob {
    fn mul_assign(&mut self, other: Self) {
        *self = *self * other;
    }
}

impl std::iter::Sum for Prob {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Prob::zero(), |a, b| a + b)
    }
}

impl std::iter::Product for Prob {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Prob::one(), |a, b| a * b)
    }
}

/// for `assert_abs_diff_eq` on log values
impl AbsDiffEq for Prob {
    type Epsilon = f64;
    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }
    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        f64::abs_diff_eq(&self.0, &other.0, epsilon)
    }
}

impl Eq for Prob {}

/// Log values are never NaN here, so `total_cmp` orders them as probabilities.
impl Ord for Prob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn prob_add_mul() {
        let x = p(0.3);
        let e = p(0.0);
        assert_abs_diff_eq!((x + e).to_value(), 0.3, epsilon = 1e-12);
        assert!((x * e).is_zero());
        assert_abs_diff_eq!((p(0.1) + p(0.2)).to_value(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!((p(0.5) * p(0.5)).to_value(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!((p(0.25) / p(0.5)).to_value(), 0.5, epsilon = 1e-12);
    }
    #[test]
    fn prob_sum_product() {
        let xs = vec![p(0.1), p(0.1), p(0.1)];
        let s: Prob = xs.iter().copied().sum();
        assert_abs_diff_eq!(s.to_value(), 0.3, epsilon = 1e-12);
        let m: Prob = xs.iter().copied().product();
        assert_abs_diff_eq!(m.to_value(), 0.001, epsilon = 1e-12);
        let empty: Vec<Prob> = vec![];
        assert!(empty.iter().copied().sum::<Prob>().is_zero());
    }
    #[test]
    fn prob_sort() {
        let mut ps = vec![p(0.9), p(0.2), p(0.0), p(1.0), p(0.5)];
        ps.sort();
        assert_eq!(ps, vec![p(0.0), p(0.2), p(0.5), p(0.9), p(1.0)]);
        assert_eq!(*ps.iter().max().unwrap(), Prob::one());
    }
    #[test]
    fn prob_normalize() {
        // huge negative log values must not underflow to NaN
        let xs = vec![lp(-10000.0), lp(-10000.0 + 2f64.ln()), Prob::zero()];
        let ys = Prob::normalize(&xs);
        assert_abs_diff_eq!(ys[0], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ys[1], 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(ys[2], 0.0);
        let zs = Prob::normalize(&[Prob::zero(), Prob::zero()]);
        assert_eq!(zs, vec![0.5, 0.5]);
    }
    #[test]
    fn prob_floored() {
        assert_abs_diff_eq!(Prob::floored(0.0, 1e-4).to_log_value(), 1e-4f64.ln());
        assert_abs_diff_eq!(Prob::floored(0.5, 1e-4).to_value(), 0.5, epsilon = 1e-12);
    }
}
