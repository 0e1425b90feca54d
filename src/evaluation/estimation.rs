//!
//! Quality of one trained decoder on a set of rows
//!
//! The progress is saved as `<name>` and the decoder as `<name>.decoder`.
//!
use super::quality::PredictionQuality;
use super::run::AlgorithmRun;
use crate::dataset::Dataset;
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::snapshot::{self, SaveMode, SnapshotStore};
use crate::states::Alphabet;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// `kind` tag of estimation snapshots
pub const ESTIMATION_KIND: &str = "QualityEstimation";
/// `kind` tag of the decoder attached to an estimation
pub const DECODER_KIND: &str = "Decoder";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EstimationState {
    run: AlgorithmRun,
    save_every: usize,
    save_mode: SaveMode,
}

///
/// Resumable evaluation of a trained decoder.
///
#[derive(Clone, Debug)]
pub struct QualityEstimation<M> {
    name: String,
    state: EstimationState,
    decoder: Option<M>,
}

impl<M> QualityEstimation<M>
where
    M: Decoder + Serialize + DeserializeOwned,
{
    pub fn new(name: &str, indices: Vec<usize>, hidden: Alphabet, save_every: usize) -> Self {
        QualityEstimation {
            name: name.to_string(),
            state: EstimationState {
                run: AlgorithmRun::new(name, indices, hidden),
                save_every: save_every.max(1),
                save_mode: SaveMode::Full,
            },
            decoder: None,
        }
    }
    /// evaluate every row of `data`
    pub fn for_dataset<D: Dataset>(name: &str, data: &D, save_every: usize) -> Self {
        let hidden = data.states().hidden().clone();
        QualityEstimation::new(name, (0..data.len()).collect(), hidden, save_every)
    }
    pub fn key_of_decoder(name: &str) -> String {
        format!("{}.decoder", name)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn set_decoder(&mut self, decoder: M) {
        self.decoder = Some(decoder);
    }
    pub fn decoder(&self) -> Option<&M> {
        self.decoder.as_ref()
    }
    pub fn decoder_mut(&mut self) -> Option<&mut M> {
        self.decoder.as_mut()
    }
    ///
    /// How the decoder is saved. Under `SaveMode::Clear` only its
    /// hyperparameters are kept, and it has to be retrained after `resume`.
    ///
    pub fn set_save_mode(&mut self, mode: SaveMode) {
        self.state.save_mode = mode;
    }
    pub fn save_mode(&self) -> SaveMode {
        self.state.save_mode
    }
    pub fn run(&self) -> &AlgorithmRun {
        &self.state.run
    }
    pub fn quality(&self) -> &PredictionQuality {
        self.state.run.quality()
    }
    pub fn is_complete(&self) -> bool {
        self.state.run.is_complete()
    }
    ///
    /// Decode the remaining rows with the attached decoder.
    ///
    pub fn execute<D: Dataset>(&mut self, data: &D, store: &dyn SnapshotStore) -> Result<()> {
        let decoder = self.decoder.as_ref().ok_or_else(|| {
            Error::InvalidParameter(format!("estimation {} has no decoder", self.name))
        })?;
        snapshot::save_decoder(
            store,
            &QualityEstimation::<M>::key_of_decoder(&self.name),
            DECODER_KIND,
            decoder,
            self.state.save_mode,
        )?;
        let name = &self.name;
        let save_every = self.state.save_every;
        let save_mode = self.state.save_mode;
        self.state.run.run(decoder, data, save_every, &mut |run| {
            let state = EstimationState {
                run: run.clone(),
                save_every,
                save_mode,
            };
            snapshot::save(store, name, ESTIMATION_KIND, &state)
        })?;
        info!("estimation {} done\n{}", self.name, self.quality());
        Ok(())
    }
    ///
    /// Load a saved estimation. `Ok(None)` if nothing was saved under `name`.
    ///
    /// A decoder that cannot be loaded is left unset with a warning; the
    /// caller attaches one with `set_decoder` before `execute`.
    ///
    pub fn resume(store: &dyn SnapshotStore, name: &str) -> Result<Option<Self>> {
        let state: EstimationState = match snapshot::load(store, name, ESTIMATION_KIND)? {
            Some(state) => state,
            None => return Ok(None),
        };
        let key = QualityEstimation::<M>::key_of_decoder(name);
        let decoder = match snapshot::load::<M>(store, &key, DECODER_KIND) {
            Ok(Some(decoder)) => Some(decoder),
            Ok(None) => {
                warn!("estimation {}: no saved decoder", name);
                None
            }
            Err(e) => {
                warn!("estimation {}: decoder not loaded: {}", name, e);
                None
            }
        };
        info!(
            "resumed estimation {}: {} of {} sequences remaining",
            name,
            state.run.n_remaining(),
            state.run.indices().len()
        );
        Ok(Some(QualityEstimation {
            name: name.to_string(),
            state,
            decoder,
        }))
    }
}
