//!
//! Fixed-radix encoding of short complete-state subsequences
//!
//! A fragment of length `l` is a pair of integers:
//!
//! ```text
//! observed = o[0] * |O|^(l-1) + o[1] * |O|^(l-2) + ... + o[l-1]
//! hidden   = h[0] * |H|^(l-1) + h[1] * |H|^(l-2) + ... + h[l-1]
//! ```
//!
//! i.e. the rank of the observed/hidden subsequence among all
//! subsequences of length `l` in alphabet order (most significant digit
//! first). `total_index` packs both into a dense index so that tables
//! over all fragments of a length can be plain arrays.
//!
use serde::{Deserialize, Serialize};

///
/// Encoded (observed, hidden) subsequence of known length.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fragment {
    observed: usize,
    hidden: usize,
    length: usize,
}

impl Fragment {
    pub fn observed(&self) -> usize {
        self.observed
    }
    pub fn hidden(&self) -> usize {
        self.hidden
    }
    pub fn length(&self) -> usize {
        self.length
    }
}

impl std::fmt::Display for Fragment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({},{};{})", self.observed, self.hidden, self.length)
    }
}

///
/// Creates and combines fragments for fixed alphabet sizes.
///
/// Radix powers `|O|^l` and `|H|^l` are precomputed for `0 <= l <= max_length`.
/// Requests for a longer fragment are programmer errors and panic.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentFactory {
    n_observed: usize,
    n_hidden: usize,
    max_length: usize,
    observed_radix: Vec<usize>,
    hidden_radix: Vec<usize>,
}

impl FragmentFactory {
    pub fn new(n_observed: usize, n_hidden: usize, max_length: usize) -> FragmentFactory {
        assert!(n_observed > 0 && n_hidden > 0, "empty alphabet");
        let powers = |base: usize| -> Vec<usize> {
            let mut v = Vec::with_capacity(max_length + 1);
            v.push(1usize);
            for l in 1..=max_length {
                let x = v[l - 1]
                    .checked_mul(base)
                    .expect("fragment space does not fit in usize");
                v.push(x);
            }
            v
        };
        let observed_radix = powers(n_observed);
        let hidden_radix = powers(n_hidden);
        // total_index of the longest fragment must fit too
        observed_radix[max_length]
            .checked_mul(hidden_radix[max_length])
            .expect("fragment space does not fit in usize");
        FragmentFactory {
            n_observed,
            n_hidden,
            max_length,
            observed_radix,
            hidden_radix,
        }
    }
    ///
    /// True if the radix tables are those `new` builds for the alphabet
    /// sizes and `max_length`. Checked on snapshots before use.
    ///
    pub fn is_consistent(&self) -> bool {
        let powers = |radix: &[usize], base: usize| {
            radix.len().checked_sub(1) == Some(self.max_length)
                && radix[0] == 1
                && radix.windows(2).all(|w| w[0].checked_mul(base) == Some(w[1]))
        };
        self.n_observed > 0
            && self.n_hidden > 0
            && powers(&self.observed_radix, self.n_observed)
            && powers(&self.hidden_radix, self.n_hidden)
            && self.observed_radix[self.max_length]
                .checked_mul(self.hidden_radix[self.max_length])
                .is_some()
    }
    pub fn max_length(&self) -> usize {
        self.max_length
    }
    pub fn n_observed_states(&self) -> usize {
        self.n_observed
    }
    pub fn n_hidden_states(&self) -> usize {
        self.n_hidden
    }
    #[inline]
    fn check_length(&self, length: usize) {
        assert!(
            length <= self.max_length,
            "fragment length {} exceeds the factory maximum {}",
            length,
            self.max_length
        );
    }
    /// `|O|^length`: number of distinct observed subsequences
    #[inline]
    pub fn n_observed(&self, length: usize) -> usize {
        self.check_length(length);
        self.observed_radix[length]
    }
    /// `|H|^length`: number of distinct hidden subsequences
    #[inline]
    pub fn n_hidden(&self, length: usize) -> usize {
        self.check_length(length);
        self.hidden_radix[length]
    }
    /// number of distinct fragments of the length (= size of a dense table)
    #[inline]
    pub fn n_fragments(&self, length: usize) -> usize {
        self.n_observed(length) * self.n_hidden(length)
    }
    /// the fragment of length 0
    pub fn empty(&self) -> Fragment {
        Fragment {
            observed: 0,
            hidden: 0,
            length: 0,
        }
    }
    #[inline]
    pub fn fragment(&self, observed: usize, hidden: usize, length: usize) -> Fragment {
        debug_assert!(observed < self.n_observed(length));
        debug_assert!(hidden < self.n_hidden(length));
        self.check_length(length);
        Fragment {
            observed,
            hidden,
            length,
        }
    }
    ///
    /// Encode `observed[start..start+length]` and `hidden[start..start+length]`.
    ///
    pub fn from_seqs(&self, observed: &[u8], hidden: &[u8], start: usize, length: usize) -> Fragment {
        Fragment {
            observed: self.observed_from(observed, start, length),
            hidden: self.hidden_from(hidden, start, length),
            length,
        }
    }
    /// observed part of `from_seqs`
    #[inline]
    pub fn observed_from(&self, observed: &[u8], start: usize, length: usize) -> usize {
        self.check_length(length);
        observed[start..start + length]
            .iter()
            .fold(0, |acc, &s| acc * self.n_observed + s as usize)
    }
    /// hidden part of `from_seqs`
    #[inline]
    pub fn hidden_from(&self, hidden: &[u8], start: usize, length: usize) -> usize {
        self.check_length(length);
        hidden[start..start + length]
            .iter()
            .fold(0, |acc, &s| acc * self.n_hidden + s as usize)
    }
    ///
    /// Concatenation `xy`.
    ///
    #[inline]
    pub fn compose(&self, x: Fragment, y: Fragment) -> Fragment {
        let length = x.length + y.length;
        self.check_length(length);
        Fragment {
            observed: x.observed * self.observed_radix[y.length] + y.observed,
            hidden: x.hidden * self.hidden_radix[y.length] + y.hidden,
            length,
        }
    }
    ///
    /// First `length` symbols of `f`.
    ///
    #[inline]
    pub fn prefix(&self, f: Fragment, length: usize) -> Fragment {
        assert!(length <= f.length);
        let rest = f.length - length;
        Fragment {
            observed: f.observed / self.observed_radix[rest],
            hidden: f.hidden / self.hidden_radix[rest],
            length,
        }
    }
    ///
    /// Last `length` symbols of `f`.
    ///
    #[inline]
    pub fn suffix(&self, f: Fragment, length: usize) -> Fragment {
        assert!(length <= f.length);
        Fragment {
            observed: f.observed % self.observed_radix[length],
            hidden: f.hidden % self.hidden_radix[length],
            length,
        }
    }
    ///
    /// Dense index of `f` among all fragments of the same length.
    ///
    /// `0 <= total_index(f) < n_fragments(f.length())`
    ///
    #[inline]
    pub fn total_index(&self, f: Fragment) -> usize {
        f.observed + f.hidden * self.observed_radix[f.length]
    }
    /// inverse of `total_index`
    #[inline]
    pub fn from_total_index(&self, index: usize, length: usize) -> Fragment {
        let n = self.n_observed(length);
        Fragment {
            observed: index % n,
            hidden: index / n,
            length,
        }
    }
    ///
    /// Symbols (as alphabet indices) of the observed and hidden part.
    ///
    pub fn to_symbols(&self, f: Fragment) -> (Vec<u8>, Vec<u8>) {
        (
            digits(f.observed, self.n_observed, f.length),
            digits(f.hidden, self.n_hidden, f.length),
        )
    }
    /// hidden symbols of the hidden index of a fragment with the length
    pub fn hidden_symbols(&self, hidden: usize, length: usize) -> Vec<u8> {
        digits(hidden, self.n_hidden, length)
    }
}

/// base-`radix` digits of `x`, most significant first
fn digits(mut x: usize, radix: usize, length: usize) -> Vec<u8> {
    let mut v = vec![0u8; length];
    for i in (0..length).rev() {
        v[i] = (x % radix) as u8;
        x /= radix;
    }
    v
}
