use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use log::{info, warn};
use seqmarkov::{
    chain::{fallthru::FallthruChain, MarkovChain},
    dataset::{Dataset, SequenceSet},
    decoder::{Decoder, Listener},
    em::{decremental::DecrementalEMAlgorithm, incremental::IncrementalEMAlgorithm},
    evaluation::CrossValidation,
    mixture::MarkovMixture,
    params::{
        ChainParams, DecoderParams, DecrementalParams, EmParams, EvaluationParams, IncrementalParams,
    },
    snapshot::{self, DirectoryStore},
    states::StatesDescription,
    threaded::{init_worker_pool, ThreadedAlgorithm},
    viterbi::{gene::GeneViterbiAlgorithm, ViterbiAlgorithm},
    Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `kind` tag of models saved by this binary
const MODEL_KIND: &str = "seqmarkov-model";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Opts {
    /// Number of worker threads (default: available parallelism)
    #[clap(short = 't', long)]
    threads: Option<usize>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct DataOpts {
    /// Observed alphabet
    #[clap(long, default_value = "ACGT")]
    observed: String,
    /// Hidden alphabet
    #[clap(long, default_value = "xi")]
    hidden: String,
    /// Complete alphabet (|observed| x |hidden| symbols) used for printing
    #[clap(long)]
    complete: Option<String>,
    /// Input TSV (id, observed, hidden)
    input: PathBuf,
}

#[derive(clap::Args, Debug)]
struct ModelOpts {
    /// Order of the chain [default: 3], overrides `--params`
    #[clap(short = 'k', long)]
    order: Option<usize>,
    /// Number of states predicted jointly [default: 1], overrides `--params`
    #[clap(short = 'd', long)]
    dep_length: Option<usize>,
    /// Number of mixture components (1 = single chain)
    #[clap(short = 'c', long, default_value_t = 1)]
    components: usize,
    /// JSON file overlaying the default parameters
    #[clap(long)]
    params: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a decoder and save it
    Train {
        #[clap(flatten)]
        data: DataOpts,
        #[clap(flatten)]
        model: ModelOpts,
        /// Snapshot directory
        #[clap(short, long)]
        store: PathBuf,
        /// Snapshot name of the model
        #[clap(short, long, default_value = "model")]
        name: String,
    },
    /// Decode sequences with a saved decoder
    Decode {
        #[clap(flatten)]
        data: DataOpts,
        /// Snapshot directory
        #[clap(short, long)]
        store: PathBuf,
        /// Snapshot name of the model
        #[clap(short, long, default_value = "model")]
        name: String,
    },
    /// Cross-validate a decoder (resumes a saved job of the same name)
    Cv {
        #[clap(flatten)]
        data: DataOpts,
        #[clap(flatten)]
        model: ModelOpts,
        /// Snapshot directory
        #[clap(short, long)]
        store: PathBuf,
        /// Name of the job
        #[clap(short, long, default_value = "cv")]
        name: String,
        /// Number of folds
        #[clap(short = 'f', long)]
        n_folds: Option<usize>,
    },
    /// Grow (or shrink) a mixture by EM and save it
    Em {
        #[clap(flatten)]
        data: DataOpts,
        #[clap(flatten)]
        model: ModelOpts,
        /// Snapshot directory
        #[clap(short, long)]
        store: PathBuf,
        /// Snapshot name of the model
        #[clap(short, long, default_value = "model")]
        name: String,
        /// Start from `components` and delete components down to this number
        #[clap(long)]
        shrink_to: Option<usize>,
    },
}

///
/// Every parameter of a job: defaults, overlaid by `--params`, then by
/// `--order` and `--dep-length`.
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct JobParams {
    chain: ChainParams,
    decoder: DecoderParams,
    em: EmParams,
    incremental: IncrementalParams,
    decremental: DecrementalParams,
    evaluation: EvaluationParams,
}

impl JobParams {
    fn load(opts: &ModelOpts) -> Result<JobParams> {
        let mut params = match &opts.params {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                serde_json::from_reader(std::io::BufReader::new(file))?
            }
            None => JobParams::default(),
        };
        if let Some(order) = opts.order {
            params.chain.order = order;
        }
        if let Some(dep_length) = opts.dep_length {
            params.chain.dep_length = dep_length;
        }
        params.chain.validate()?;
        Ok(params)
    }
}

///
/// Decoders the binary can build and save.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
enum Model {
    Viterbi(ViterbiAlgorithm<MarkovChain>),
    FallthruViterbi(ViterbiAlgorithm<FallthruChain>),
    Gene(GeneViterbiAlgorithm<MarkovChain>),
    FallthruGene(GeneViterbiAlgorithm<FallthruChain>),
    Mixture(MarkovMixture<MarkovChain>),
}

macro_rules! dispatch {
    ($model:expr, $m:ident => $body:expr) => {
        match $model {
            Model::Viterbi($m) => $body,
            Model::FallthruViterbi($m) => $body,
            Model::Gene($m) => $body,
            Model::FallthruGene($m) => $body,
            Model::Mixture($m) => $body,
        }
    };
}

impl Model {
    fn build(states: Arc<StatesDescription>, params: &JobParams, n_components: usize) -> Result<Model> {
        let decoder = params.decoder.clone();
        let gene = decoder.coding_symbol.is_some();
        let model = if n_components > 1 {
            let template = MarkovChain::from_params(states, &params.chain)?;
            Model::Mixture(MarkovMixture::from_template(
                &template,
                n_components,
                decoder,
                params.em.clone(),
            )?)
        } else if params.chain.approximation.is_some() {
            let chain = FallthruChain::from_params(states, &params.chain)?;
            if gene {
                Model::FallthruGene(GeneViterbiAlgorithm::new(chain, decoder, true)?)
            } else {
                Model::FallthruViterbi(ViterbiAlgorithm::new(chain, decoder))
            }
        } else {
            let chain = MarkovChain::from_params(states, &params.chain)?;
            if gene {
                Model::Gene(GeneViterbiAlgorithm::new(chain, decoder, true)?)
            } else {
                Model::Viterbi(ViterbiAlgorithm::new(chain, decoder))
            }
        };
        Ok(model)
    }
}

impl Decoder for Model {
    fn states(&self) -> &Arc<StatesDescription> {
        dispatch!(self, m => m.states())
    }
    fn train(&mut self, observed: &[u8], hidden: &[u8]) {
        dispatch!(self, m => m.train(observed, hidden))
    }
    fn train_set<D: Dataset>(&mut self, data: &D) -> Result<()> {
        dispatch!(self, m => m.train_set(data))
    }
    fn reset(&mut self) {
        dispatch!(self, m => m.reset())
    }
    fn run(&self, observed: &[u8]) -> Option<Vec<u8>> {
        dispatch!(self, m => m.run(observed))
    }
    fn duplicate_hyperparameters_only(&self) -> Self {
        match self {
            Model::Viterbi(m) => Model::Viterbi(m.duplicate_hyperparameters_only()),
            Model::FallthruViterbi(m) => Model::FallthruViterbi(m.duplicate_hyperparameters_only()),
            Model::Gene(m) => Model::Gene(m.duplicate_hyperparameters_only()),
            Model::FallthruGene(m) => Model::FallthruGene(m.duplicate_hyperparameters_only()),
            Model::Mixture(m) => Model::Mixture(m.duplicate_hyperparameters_only()),
        }
    }
    fn repr(&self) -> String {
        dispatch!(self, m => m.repr())
    }
}

///
/// Progress bar over decoded sequences.
///
struct ProgressListener {
    bar: ProgressBar,
    n_failed: usize,
}

impl Listener for ProgressListener {
    fn on_sequence(&mut self, _index: usize, _predicted: Option<&[u8]>) {
        self.bar.inc(1);
    }
    fn on_failure(&mut self, index: usize, message: &str) {
        self.n_failed += 1;
        warn!("sequence {} failed: {}", index, message);
        self.bar.inc(1);
    }
    fn on_finished(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn load_data(opts: &DataOpts) -> Result<SequenceSet> {
    let states = StatesDescription::get(&opts.observed, &opts.hidden, opts.complete.as_deref())?;
    let data = SequenceSet::from_tsv_file(states, &opts.input)?;
    info!(
        "loaded {} sequences ({} symbols) from {}",
        data.len(),
        data.total_length(),
        opts.input.display()
    );
    Ok(data)
}

fn train(data: &DataOpts, model: &ModelOpts, store: &Path, name: &str) -> Result<()> {
    let params = JobParams::load(model)?;
    let data = load_data(data)?;
    let mut decoder = Model::build(data.states().clone(), &params, model.components)?;
    println!("# model={}", decoder.repr());
    decoder.train_set(&data)?;
    let store = DirectoryStore::new(store)?;
    snapshot::save(&store, name, MODEL_KIND, &decoder)?;
    println!("# saved={}", store.path(name).display());
    Ok(())
}

fn decode(data: &DataOpts, store: &Path, name: &str) -> Result<()> {
    let data = load_data(data)?;
    let store = DirectoryStore::new(store)?;
    let decoder: Model = match snapshot::load(&store, name, MODEL_KIND)? {
        Some(decoder) => decoder,
        None => {
            return Err(seqmarkov::Error::InvalidParameter(format!(
                "no model {} in {}",
                name,
                store.path(name).display()
            )))
        }
    };
    println!("# model={}", decoder.repr());
    let threaded = ThreadedAlgorithm::new(decoder);
    let mut listener = ProgressListener {
        bar: ProgressBar::new(data.len() as u64),
        n_failed: 0,
    };
    let results = threaded.run_set(&data, &mut listener)?;
    let hidden = data.states().hidden();
    for (i, predicted) in results.iter().enumerate() {
        match predicted {
            Some(p) => println!("{}\t{}", data.id(i), hidden.decode_to_string(p)),
            None => println!("{}\t-", data.id(i)),
        }
    }
    println!("# n_failed={}", listener.n_failed);
    Ok(())
}

fn cross_validate(
    data: &DataOpts,
    model: &ModelOpts,
    store: &Path,
    name: &str,
    n_folds: Option<usize>,
) -> Result<()> {
    let mut params = JobParams::load(model)?;
    if let Some(n) = n_folds {
        params.evaluation.n_folds = n;
    }
    let data = load_data(data)?;
    let template = ThreadedAlgorithm::new(Model::build(
        data.states().clone(),
        &params,
        model.components,
    )?);
    println!("# model={}", template.repr());
    let store = DirectoryStore::new(store)?;
    let mut cv = match CrossValidation::resume(&store, name) {
        Ok(Some(cv)) if cv.folds().len() == data.len() => cv,
        Ok(Some(_)) => {
            warn!("saved job {} has another number of sequences, starting over", name);
            CrossValidation::new(name, data.len(), data.states().hidden().clone(), params.evaluation)?
        }
        Ok(None) => {
            CrossValidation::new(name, data.len(), data.states().hidden().clone(), params.evaluation)?
        }
        Err(e) => {
            warn!("saved job {} not loaded ({}), starting over", name, e);
            CrossValidation::new(name, data.len(), data.states().hidden().clone(), params.evaluation)?
        }
    };
    cv.execute(&template, &data, &store)?;
    println!("# training");
    print!("{}", cv.training_quality());
    println!("# control");
    print!("{}", cv.control_quality());
    Ok(())
}

fn grow_mixture(
    data: &DataOpts,
    model: &ModelOpts,
    store: &Path,
    name: &str,
    shrink_to: Option<usize>,
) -> Result<()> {
    let mut params = JobParams::load(model)?;
    let data = load_data(data)?;
    let template = MarkovChain::from_params(data.states().clone(), &params.chain)?;
    let store = DirectoryStore::new(store)?;
    let checkpoint = format!("{}.em", name);
    let mixture = match shrink_to {
        Some(min_components) => {
            params.decremental.min_components = min_components;
            let initial =
                seqmarkov::em::random_split_mixture(&template, model.components, &data, params.em.seed)?;
            let mut em = DecrementalEMAlgorithm::new(&data, params.decremental.clone(), params.em.clone())?
                .with_checkpoint(&store, &checkpoint);
            let (mixture, trace) = em.run(initial)?;
            for (n, ll) in trace {
                println!("{}\t{}", n, ll);
            }
            mixture
        }
        None => {
            params.incremental.max_components = model.components;
            let mut em = IncrementalEMAlgorithm::new(
                &template,
                &data,
                params.incremental.clone(),
                params.em.clone(),
            )?
            .with_checkpoint(&store, &checkpoint);
            em.run(None)?
        }
    };
    println!("# mixture={}", mixture.repr());
    println!("# log_likelihood={}", mixture.total_log_likelihood(&data));
    let decoder = Model::Mixture(MarkovMixture::new(mixture, params.decoder.clone(), params.em)?);
    snapshot::save(&store, name, MODEL_KIND, &decoder)?;
    println!("# saved={}", store.path(name).display());
    Ok(())
}

fn main() {
    env_logger::init();
    let opts: Opts = Opts::parse();
    println!("# started_at={}", chrono::Local::now());
    init_worker_pool(opts.threads);
    println!("# n_threads={}", rayon::current_num_threads());
    println!("# opts={:?}", opts);
    let result = match &opts.command {
        Commands::Train {
            data,
            model,
            store,
            name,
        } => train(data, model, store, name),
        Commands::Decode { data, store, name } => decode(data, store, name),
        Commands::Cv {
            data,
            model,
            store,
            name,
            n_folds,
        } => cross_validate(data, model, store, name, *n_folds),
        Commands::Em {
            data,
            model,
            store,
            name,
            shrink_to,
        } => grow_mixture(data, model, store, name, *shrink_to),
    };
    println!("# finished_at={}", chrono::Local::now());
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_opts(args: &[&str]) -> ModelOpts {
        let mut argv = vec!["seqmarkov", "train", "-s", "snapshots"];
        argv.extend_from_slice(args);
        argv.push("input.tsv");
        match Opts::try_parse_from(argv).unwrap().command {
            Commands::Train { model, .. } => model,
            _ => unreachable!(),
        }
    }

    #[test]
    fn flags_override_the_params_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"chain": {"order": 2, "dep_length": 3}}"#).unwrap();
        let file = path.to_str().unwrap();

        let params = JobParams::load(&model_opts(&[])).unwrap();
        assert_eq!((params.chain.order, params.chain.dep_length), (3, 1));
        let params = JobParams::load(&model_opts(&["--params", file])).unwrap();
        assert_eq!((params.chain.order, params.chain.dep_length), (2, 3));
        let params = JobParams::load(&model_opts(&["--params", file, "-k", "5"])).unwrap();
        assert_eq!((params.chain.order, params.chain.dep_length), (5, 3));
        let params = JobParams::load(&model_opts(&["-d", "2", "--params", file])).unwrap();
        assert_eq!((params.chain.order, params.chain.dep_length), (2, 2));
    }
}
