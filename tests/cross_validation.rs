//!
//! checkpointed evaluation jobs
//!
use seqmarkov::chain::MarkovChain;
use seqmarkov::dataset::Dataset;
use seqmarkov::decoder::{Decoder, Interrupt};
use seqmarkov::evaluation::{CrossValidation, QualityEstimation};
use seqmarkov::mocks::{mock_labeled_set, mock_states};
use seqmarkov::params::{DecoderParams, EvaluationParams};
use seqmarkov::snapshot::DirectoryStore;
use seqmarkov::threaded::ThreadedAlgorithm;
use seqmarkov::viterbi::ViterbiAlgorithm;

fn template() -> ThreadedAlgorithm<ViterbiAlgorithm<MarkovChain>> {
    ThreadedAlgorithm::new(ViterbiAlgorithm::new(
        MarkovChain::new(mock_states(), 1, 1, 1e-4),
        DecoderParams::default(),
    ))
}

#[test]
fn interrupted_cross_validation_resumes_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path()).unwrap();
    let data = mock_labeled_set(30, 80, 0);
    let params = EvaluationParams {
        n_folds: 3,
        save_every: 4,
        ..EvaluationParams::default()
    };
    let hidden = data.states().hidden().clone();

    let mut cv = CrossValidation::new("job", data.len(), hidden.clone(), params.clone()).unwrap();
    let interrupt = Interrupt::new();
    interrupt.interrupt();
    cv.set_interrupt(interrupt);
    cv.execute(&template(), &data, &store).unwrap();
    assert!(!cv.is_complete());
    assert!(store.path("job").exists());

    let mut resumed = CrossValidation::resume(&store, "job").unwrap().unwrap();
    assert_eq!(resumed.folds(), cv.folds());
    assert!(!resumed.is_complete());
    resumed.execute(&template(), &data, &store).unwrap();
    assert!(resumed.is_complete());
    assert_eq!(resumed.control_quality().n_sequences(), 30);
    assert_eq!(resumed.training_quality().n_sequences(), 60);

    // a complete job is loaded complete
    let again = CrossValidation::resume(&store, "job").unwrap().unwrap();
    assert!(again.is_complete());
    println!("{}", again.control_quality());
    let sn = again.control_quality().symbol_sensitivity(0);
    assert!(sn > 0.5 && sn <= 1.0);

    // the same seed gives the same folds
    let fresh = CrossValidation::new("other", data.len(), hidden, params).unwrap();
    assert_eq!(fresh.folds(), cv.folds());
}

#[test]
fn quality_estimation_of_a_trained_decoder() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path()).unwrap();
    let train = mock_labeled_set(20, 100, 1);
    let test = mock_labeled_set(8, 100, 2);
    let mut decoder = template();
    decoder.train_set(&train).unwrap();

    let mut estimation = QualityEstimation::for_dataset("estimation", &test, 3);
    estimation.set_decoder(decoder);
    estimation.execute(&test, &store).unwrap();
    assert!(estimation.is_complete());
    assert_eq!(estimation.quality().n_sequences(), 8);

    let resumed: QualityEstimation<ViterbiAlgorithm<MarkovChain>> =
        QualityEstimation::resume(&store, "estimation").unwrap().unwrap();
    assert!(resumed.is_complete());
    assert!(resumed.decoder().is_some());
    assert_eq!(resumed.quality(), estimation.quality());
}
