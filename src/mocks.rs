//!
//! Deterministic random labeled datasets for tests and benchmarks
//!
//! All generators are seeded `Xoshiro256PlusPlus`, so the same arguments
//! always produce the same dataset.
//!
use crate::dataset::SequenceSet;
use crate::states::StatesDescription;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;

/// `ACGT` observed, `xi` hidden
pub fn mock_states() -> Arc<StatesDescription> {
    StatesDescription::get("ACGT", "xi", None).expect("valid constant alphabets")
}

/// `ACGT` observed, `nc` (noncoding/coding) hidden
pub fn mock_gene_states() -> Arc<StatesDescription> {
    StatesDescription::get("ACGT", "nc", None).expect("valid constant alphabets")
}

///
/// Emission profile: probability of each observed symbol given the hidden one.
///
type Profile = [[f64; 4]; 2];

/// `x` prefers A/T, `i` prefers C/G
const PROFILE_AT: Profile = [[0.4, 0.1, 0.1, 0.4], [0.1, 0.4, 0.4, 0.1]];
/// the opposite preference
const PROFILE_CG: Profile = [[0.1, 0.4, 0.4, 0.1], [0.4, 0.1, 0.1, 0.4]];

fn pick<R: Rng>(rng: &mut R, p: &[f64; 4]) -> u8 {
    let x: f64 = rng.gen();
    let mut acc = 0.0;
    for (i, &q) in p.iter().enumerate() {
        acc += q;
        if x < acc {
            return i as u8;
        }
    }
    3
}

///
/// One sequence of two-state segments: hidden switches with probability
/// `switch_p` at each position, observed symbols follow `profile`.
///
fn generate_labeled<R: Rng>(
    rng: &mut R,
    length: usize,
    switch_p: f64,
    profile: &Profile,
) -> (Vec<u8>, Vec<u8>) {
    let mut observed = Vec::with_capacity(length);
    let mut hidden = Vec::with_capacity(length);
    let mut h: u8 = rng.gen_range(0..2);
    for _ in 0..length {
        if rng.gen_bool(switch_p) {
            h = 1 - h;
        }
        hidden.push(h);
        observed.push(pick(rng, &profile[h as usize]));
    }
    (observed, hidden)
}

///
/// `n` sequences of `length` over `mock_states()`.
///
pub fn mock_labeled_set(n: usize, length: usize, seed: u64) -> SequenceSet {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut set = SequenceSet::new(mock_states());
    for i in 0..n {
        let (o, h) = generate_labeled(&mut rng, length, 0.05, &PROFILE_AT);
        set.push(format!("seq{}", i), o, h);
    }
    set
}

///
/// `n` sequences drawn from two sources with opposite emission profiles,
/// alternating (even rows: first source).
///
pub fn mock_two_source_set(n: usize, length: usize, seed: u64) -> SequenceSet {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut set = SequenceSet::new(mock_states());
    for i in 0..n {
        let profile = if i % 2 == 0 { &PROFILE_AT } else { &PROFILE_CG };
        let (o, h) = generate_labeled(&mut rng, length, 0.05, profile);
        set.push(format!("seq{}", i), o, h);
    }
    set
}

///
/// `n` gene-like sequences over `mock_gene_states()`:
/// noncoding flank, coding region of whole codons, noncoding flank.
///
/// Codon positions have distinct preferences (G.., .A., ..C), flanks are
/// A/T rich.
///
pub fn mock_gene_set(n: usize, seed: u64) -> SequenceSet {
    const FLANK: [f64; 4] = [0.35, 0.15, 0.15, 0.35];
    const CODON: [[f64; 4]; 3] = [
        [0.15, 0.15, 0.55, 0.15],
        [0.55, 0.15, 0.15, 0.15],
        [0.15, 0.55, 0.15, 0.15],
    ];
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut set = SequenceSet::new(mock_gene_states());
    for i in 0..n {
        let left = rng.gen_range(10..30);
        let n_codons = rng.gen_range(5..20);
        let right = rng.gen_range(10..30);
        let mut observed = Vec::new();
        let mut hidden = Vec::new();
        for _ in 0..left {
            observed.push(pick(&mut rng, &FLANK));
            hidden.push(0);
        }
        for j in 0..(3 * n_codons) {
            observed.push(pick(&mut rng, &CODON[j % 3]));
            hidden.push(1);
        }
        for _ in 0..right {
            observed.push(pick(&mut rng, &FLANK));
            hidden.push(0);
        }
        set.push(format!("gene{}", i), observed, hidden);
    }
    set
}
