//!
//! Viterbi decoding with a codon length constraint
//!
//! Coding regions of a gene are made of codons, so the number of coding
//! positions of a well-formed prediction is a multiple of three. With
//! `valid_coding_length` enabled, every DP state also carries the phase
//! (number of coding symbols on the path so far, mod 3), and only paths
//! ending in phase 0 are accepted.
//!
use super::scratch::{with_thread_scratch, ViterbiScratch};
use super::{decode_chain, CodingConstraint};
use crate::chain::ChainModel;
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::params::DecoderParams;
use crate::states::StatesDescription;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

///
/// Viterbi decoder enforcing `count(coding symbol) % 3 == 0`.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneViterbiAlgorithm<C> {
    chain: C,
    params: DecoderParams,
    /// hidden index of `params.coding_symbol`
    coding: u8,
    valid_coding_length: bool,
}

impl<C: ChainModel> GeneViterbiAlgorithm<C> {
    ///
    /// `params.coding_symbol` must be a hidden symbol of the chain, and the
    /// hidden alphabet must have another symbol to fill untrimmed positions.
    ///
    pub fn new(chain: C, params: DecoderParams, valid_coding_length: bool) -> Result<Self> {
        let symbol = params.coding_symbol.ok_or_else(|| {
            Error::InvalidParameter("GeneViterbiAlgorithm needs a coding symbol".to_string())
        })?;
        let hidden = chain.states().hidden();
        let coding = u8::try_from(symbol)
            .ok()
            .and_then(|s| hidden.index_of(s))
            .ok_or_else(|| Error::UnknownSymbol {
                symbol,
                alphabet: hidden.to_string(),
            })?;
        if hidden.len() < 2 {
            return Err(Error::InvalidAlphabet(hidden.to_string()));
        }
        Ok(GeneViterbiAlgorithm {
            chain,
            params,
            coding,
            valid_coding_length,
        })
    }
    pub fn chain(&self) -> &C {
        &self.chain
    }
    pub fn valid_coding_length(&self) -> bool {
        self.valid_coding_length
    }
    pub fn set_valid_coding_length(&mut self, enabled: bool) {
        self.valid_coding_length = enabled;
    }
    fn constraint(&self) -> Option<CodingConstraint> {
        if self.valid_coding_length {
            Some(CodingConstraint {
                coding: self.coding,
            })
        } else {
            None
        }
    }
    pub fn decode_with(&self, observed: &[u8], scratch: &mut ViterbiScratch) -> Option<Vec<u8>> {
        decode_chain(
            &self.chain,
            observed,
            self.params.max_length,
            self.constraint(),
            scratch,
        )
        .map(|(h, _)| h)
    }
    pub fn decode_scored(&self, observed: &[u8]) -> Option<(Vec<u8>, f64)> {
        with_thread_scratch(|scratch| {
            decode_chain(
                &self.chain,
                observed,
                self.params.max_length,
                self.constraint(),
                scratch,
            )
        })
    }
}

impl<C: ChainModel> Decoder for GeneViterbiAlgorithm<C> {
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
        GeneViterbiAlgorithm {
            chain: self.chain.duplicate_hyperparameters_only(),
            params: self.params.clone(),
            coding: self.coding,
            valid_coding_length: self.valid_coding_length,
        }
    }
    fn repr(&self) -> String {
        format!(
            "GeneViterbiAlgorithm({}, coding={:?}, valid_coding_length={})",
            self.chain.repr(),
            self.params.coding_symbol,
            self.valid_coding_length
        )
    }
}
