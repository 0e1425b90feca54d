//!
//! Shrinking a mixture one component at a time
//!
//! Starting from many components, EM runs to convergence, the component
//! with the lowest weight is deleted, and EM runs again, until
//! `min_components` remain.
//!
use super::EMAlgorithm;
use crate::chain::ChainModel;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::mixture::Mixture;
use crate::params::{DecrementalParams, EmParams};
use crate::snapshot::SnapshotStore;
use log::info;
use serde::Serialize;

///
/// EM with mixture shrinking.
///
pub struct DecrementalEMAlgorithm<'a, D> {
    data: &'a D,
    params: DecrementalParams,
    em: EmParams,
    checkpoint: Option<(&'a dyn SnapshotStore, String)>,
}

impl<'a, D: Dataset> DecrementalEMAlgorithm<'a, D> {
    pub fn new(data: &'a D, params: DecrementalParams, em: EmParams) -> Result<Self> {
        if params.min_components == 0 {
            return Err(Error::InvalidParameter("min_components must be >= 1".into()));
        }
        Ok(DecrementalEMAlgorithm {
            data,
            params,
            em,
            checkpoint: None,
        })
    }
    /// save the mixture after every EM round
    pub fn with_checkpoint(mut self, store: &'a dyn SnapshotStore, name: &str) -> Self {
        self.checkpoint = Some((store, name.to_string()));
        self
    }
    fn converge<C: ChainModel + Serialize>(&self, mixture: Mixture<C>) -> Result<Mixture<C>> {
        let mut em = EMAlgorithm::new(mixture, self.data, self.em.clone());
        if let Some((store, name)) = &self.checkpoint {
            em = em.with_checkpoint(*store, name);
        }
        em.ordinary_run()?;
        Ok(em.into_mixture())
    }
    ///
    /// Shrink `initial` down to `min_components`.
    ///
    /// Returns the final mixture and the total log-likelihood observed at
    /// each component count, largest count first.
    ///
    pub fn run<C: ChainModel + Serialize>(
        &mut self,
        initial: Mixture<C>,
    ) -> Result<(Mixture<C>, Vec<(usize, f64)>)> {
        let mut mixture = self.converge(initial)?;
        let mut trace = vec![(mixture.len(), mixture.total_log_likelihood(self.data))];
        while mixture.len() > self.params.min_components {
            // len > min_components >= 1, so there is a lowest weight component
            let k = match mixture.lowest_weight_index() {
                Some(k) => k,
                None => break,
            };
            info!(
                "decremental EM: deleting component {} (weight {:.4}) of {}",
                k,
                mixture.weight(k),
                mixture.len()
            );
            mixture.delete(k)?;
            mixture = self.converge(mixture)?;
            trace.push((mixture.len(), mixture.total_log_likelihood(self.data)));
        }
        Ok((mixture, trace))
    }
}
