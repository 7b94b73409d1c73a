use pbx_core::{PbxError, RngHandle};
use pbx_model::{Dimensions, EmpiricalLayout, EmpiricalPrior, GlobalParameterState, ModelFlags};

fn dims() -> Dimensions {
    Dimensions::new(6, 3, 3, 4, 2)
}

fn sample_prior() -> EmpiricalPrior {
    EmpiricalPrior {
        alpha: (2.0, 2.0),
        dirichlet_weights: Some(vec![(1.0, 0.5), (1.5, 0.5), (2.0, 0.5), (2.5, 0.5)]),
        frequencies: None,
        exchangeabilities: Some((0..6).map(|i| (1.0 + i as f64, 1.0)).collect()),
        branch_lengths: vec![(0.0, 0.0), (3.0, 30.0), (4.0, 40.0)],
    }
}

#[test]
fn layout_follows_model_flags() {
    let flags = ModelFlags {
        dirichlet_weight_prior: true,
        fix_components: true,
        fix_exchangeabilities: false,
    };
    let single = EmpiricalLayout::from_flags(&flags, 1);
    assert!(!single.dirichlet_weights && single.frequencies && single.exchangeabilities);
    assert!(!EmpiricalLayout::from_flags(&flags, 3).frequencies);
    assert_eq!(single.buffer_len(&dims()), 2 + 6 + 4 + 12);
}

#[test]
fn posthyper_text_parses_back_in_order() {
    let prior = sample_prior();
    let text = prior.to_text();
    let parsed = EmpiricalPrior::parse(text.as_bytes(), prior.layout(), &dims()).unwrap();
    assert_eq!(parsed, prior);
}

#[test]
fn buffer_groups_shapes_before_rates() {
    let prior = sample_prior();
    let buffer = prior.to_buffer();
    assert_eq!(buffer.len(), prior.layout().buffer_len(&dims()));
    assert_eq!(&buffer[2..6], &[1.0, 1.5, 2.0, 2.5]);
    assert_eq!(&buffer[6..10], &[0.5; 4]);
    let rebuilt = EmpiricalPrior::from_buffer(&buffer, prior.layout(), &dims()).unwrap();
    assert_eq!(rebuilt, prior);
}

#[test]
fn short_inputs_are_rejected() {
    let prior = sample_prior();
    let err = EmpiricalPrior::parse("1 2 3".as_bytes(), prior.layout(), &dims()).unwrap_err();
    assert_eq!(err.info().code, "empirical-prior-truncated");
    let err = EmpiricalPrior::from_buffer(&[1.0; 5], prior.layout(), &dims()).unwrap_err();
    assert!(matches!(err, PbxError::Protocol(_)));
}

#[test]
fn log_density_is_finite_for_positive_state() {
    let mut rng = RngHandle::from_seed(4);
    let state = GlobalParameterState::initial(&dims(), &mut rng).unwrap();
    let density = sample_prior().log_density(&state);
    assert!(density.is_finite());
}
