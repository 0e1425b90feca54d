//!
//! EM training of chain mixtures
//!
use approx::assert_abs_diff_eq;
use seqmarkov::chain::{ChainModel, MarkovChain};
use seqmarkov::dataset::Dataset;
use seqmarkov::decoder::{Decoder, NoopListener};
use seqmarkov::em::incremental::IncrementalEMAlgorithm;
use seqmarkov::em::{random_split_mixture, EMAlgorithm, MIXTURE_KIND};
use seqmarkov::mixture::{MarkovMixture, Mixture};
use seqmarkov::mocks::{mock_states, mock_two_source_set};
use seqmarkov::params::{DecoderParams, EmParams, IncrementalParams};
use seqmarkov::snapshot::{self, DirectoryStore};
use seqmarkov::threaded::ThreadedAlgorithm;

fn template() -> MarkovChain {
    MarkovChain::new(mock_states(), 1, 1, 1e-4)
}

#[test]
fn two_components_explain_two_sources() {
    let data = mock_two_source_set(40, 120, 0);
    let mut single = template();
    single.train_set(&data);
    let single = Mixture::uniform(vec![single]).unwrap();

    let initial = random_split_mixture(&template(), 2, &data, 1).unwrap();
    let mut em = EMAlgorithm::new(
        initial,
        &data,
        EmParams {
            n_rounds: 8,
            ..EmParams::default()
        },
    );
    let history = em.ordinary_run().unwrap();
    println!("{:?}", history);
    assert!(history[history.len() - 1] >= history[0]);
    let mixture = em.into_mixture();
    assert!(mixture.is_normalized());
    assert!(mixture.total_log_likelihood(&data) > single.total_log_likelihood(&data));
    // both sources are represented
    assert!(mixture.weights().iter().all(|&w| w > 0.1));
}

#[test]
fn em_rounds_are_saved_to_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path()).unwrap();
    let data = mock_two_source_set(10, 60, 2);
    let initial = random_split_mixture(&template(), 2, &data, 0).unwrap();
    let mut em = EMAlgorithm::new(initial, &data, EmParams::default()).with_checkpoint(&store, "em");
    em.ordinary_run().unwrap();
    let saved: Mixture<MarkovChain> = snapshot::load(&store, "em", MIXTURE_KIND).unwrap().unwrap();
    assert_eq!(saved.len(), 2);
    for (a, b) in saved.weights().iter().zip(em.mixture().weights()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
    assert_abs_diff_eq!(
        saved.total_log_likelihood(&data),
        em.mixture().total_log_likelihood(&data),
        epsilon = 1e-6
    );
}

#[test]
fn markov_mixture_decoder() {
    let train = mock_two_source_set(30, 100, 3);
    let test = mock_two_source_set(10, 100, 4);
    let mut decoder = MarkovMixture::from_template(
        &template(),
        2,
        DecoderParams::default(),
        EmParams {
            n_rounds: 5,
            ..EmParams::default()
        },
    )
    .unwrap();
    decoder.train_set(&train).unwrap();
    assert!(decoder.mixture().is_normalized());
    assert!(!decoder.mixture().is_untrained());

    let sequential = decoder.run_set(&test, &mut NoopListener).unwrap();
    let parallel = ThreadedAlgorithm::new(decoder.clone())
        .run_set(&test, &mut NoopListener)
        .unwrap();
    assert_eq!(sequential, parallel);

    let cleared = decoder.duplicate_hyperparameters_only();
    assert!(cleared.mixture().is_untrained());
    assert_eq!(cleared.mixture().len(), 2);
}

#[test]
fn incremental_em_grows_a_mixture() {
    let data = mock_two_source_set(20, 80, 5);
    let params = IncrementalParams {
        max_components: 3,
        ..IncrementalParams::default()
    };
    let em = EmParams {
        n_rounds: 3,
        ..EmParams::default()
    };
    let mut alg = IncrementalEMAlgorithm::new(&template(), &data, params, em).unwrap();
    let mixture = alg.run(None).unwrap();
    assert!(mixture.len() >= 2);
    assert!(mixture.len() <= 3);
    assert!(mixture.is_normalized());
    assert_eq!(mixture.component(0).states(), data.states());
}

#[test]
fn mixture_decoder_weighs_components_by_observed_sequence() {
    let states = mock_states();
    let encode = |o: &[u8], h: &[u8]| {
        (
            states.observed().encode(o).unwrap(),
            states.hidden().encode(h).unwrap(),
        )
    };
    let (a, x) = encode(b"AAAAAAAA", b"xxxxxxxx");
    let (c, i) = encode(b"CCCCCCCC", b"iiiiiiii");
    let (_, ai) = encode(b"AAAAAAAA", b"iiiiiiii");

    // one component per observed source
    let mut on_a = template();
    on_a.train(&a, &x, 1.0);
    let mut on_c = template();
    on_c.train(&c, &i, 1.0);
    let mixture = Mixture::new(vec![on_a.clone(), on_c], vec![0.5, 0.5]).unwrap();
    let r = mixture.observed_responsibilities(&c);
    assert_abs_diff_eq!(r[0] + r[1], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(r[1], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(mixture.log_likelihood_observed(&c), 0.5f64.ln(), epsilon = 1e-9);
    let decoder = MarkovMixture::new(mixture, DecoderParams::default(), EmParams::default()).unwrap();
    let (hidden, score, k) = decoder.decode_scored(&c).unwrap();
    assert_eq!((hidden, k), (i.clone(), 1));
    assert_abs_diff_eq!(score, 0.0, epsilon = 1e-9);
    assert_eq!(decoder.run(&a), Some(x.clone()));

    // same observed source, different labels: the weights decide
    let mut on_a_inner = template();
    on_a_inner.train(&a, &ai, 1.0);
    let mixture = Mixture::new(vec![on_a, on_a_inner], vec![0.3, 0.7]).unwrap();
    let r = mixture.observed_responsibilities(&a);
    assert_abs_diff_eq!(r[1], 0.7, epsilon = 1e-9);
    let decoder = MarkovMixture::new(mixture, DecoderParams::default(), EmParams::default()).unwrap();
    let (hidden, score, k) = decoder.decode_scored(&a).unwrap();
    assert_eq!((hidden, k), (ai, 1));
    assert_abs_diff_eq!(score, 0.7f64.ln(), epsilon = 1e-9);
}
