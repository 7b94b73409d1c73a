use pbx_core::{PbxError, RngHandle};
use pbx_model::{Dimensions, GlobalParameterState};
use pbx_wire::{decode, encode};
use proptest::prelude::*;

fn state_for(dims: &Dimensions, seed: u64) -> GlobalParameterState {
    let mut rng = RngHandle::from_seed(seed);
    GlobalParameterState::initial(dims, &mut rng).unwrap()
}

proptest! {
    #[test]
    fn decode_of_encode_is_bit_identical(
        n_sites in 1usize..40,
        n_taxa in 2usize..6,
        dim in 2usize..6,
        max_components in 1usize..5,
        seed in any::<u64>(),
        alpha in prop_oneof![Just(f64::MIN_POSITIVE), 1e-300f64..1e300],
    ) {
        let dims = Dimensions::new(n_sites, n_taxa, n_taxa, dim, max_components);
        let mut state = state_for(&dims, seed);
        state.alpha = alpha;
        state.components[0].weight = -0.0;
        let vector = encode(&state);
        prop_assert_eq!(vector.ints.len(), dims.int_len());
        prop_assert_eq!(vector.doubles.len(), dims.double_len());
        let decoded = decode(&dims, &vector).unwrap();
        prop_assert_eq!(encode(&decoded).doubles.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            vector.doubles.iter().map(|v| v.to_bits()).collect::<Vec<_>>());
        prop_assert_eq!(decoded.allocation, state.allocation);
        prop_assert_eq!(decoded.component_count, state.component_count);
    }
}

#[test]
fn double_layout_places_components_before_dirichlet_weights() {
    let dims = Dimensions::new(3, 2, 2, 2, 2);
    let mut state = state_for(&dims, 9);
    state.components[0].profile = vec![0.25, 0.75];
    state.components[0].weight = 0.4;
    state.components[1].profile = vec![0.5, 0.5];
    state.components[1].weight = 0.6;
    state.dirichlet_weights = vec![7.0, 8.0];
    state.exchangeabilities = vec![3.0];
    let vector = encode(&state);
    assert_eq!(
        &vector.doubles[3..],
        &[0.1, 0.1, 3.0, 0.25, 0.75, 0.4, 0.5, 0.5, 0.6, 7.0, 8.0]
    );
    assert_eq!(vector.ints[0], 2);
}

#[test]
fn wrong_sizes_are_protocol_errors() {
    let dims = Dimensions::new(5, 3, 3, 4, 2);
    let mut vector = encode(&state_for(&dims, 1));
    vector.doubles.pop();
    let err = decode(&dims, &vector).unwrap_err();
    assert!(matches!(err, PbxError::Protocol(_)));
    assert_eq!(err.info().code, "buffer-size");

    let mut vector = encode(&state_for(&dims, 1));
    vector.ints[2] = -1;
    assert_eq!(decode(&dims, &vector).unwrap_err().info().code, "negative-index");
}

#[test]
fn canonical_hash_tracks_content() {
    let dims = Dimensions::new(5, 3, 3, 4, 2);
    let state = state_for(&dims, 2);
    let first = encode(&state).canonical_hash();
    assert_eq!(first.len(), 64);
    assert_eq!(first, encode(&state.clone()).canonical_hash());
    let mut moved = state;
    moved.alpha += 1e-12;
    assert_ne!(first, encode(&moved).canonical_hash());
}

#[test]
fn out_of_range_indices_are_protocol_errors() {
    let dims = Dimensions::new(3, 2, 2, 2, 2);
    let mut state = state_for(&dims, 4);
    state.allocation = vec![0, 1, 0];

    let mut vector = encode(&state);
    vector.ints[3] = dims.max_components as i64;
    let err = decode(&dims, &vector).unwrap_err();
    assert!(matches!(err, PbxError::Protocol(_)));
    assert_eq!(err.info().code, "allocation-range");
    assert_eq!(err.info().context.get("site").map(String::as_str), Some("2"));

    let mut vector = encode(&state);
    vector.ints[0] = 5;
    let err = decode(&dims, &vector).unwrap_err();
    assert!(matches!(err, PbxError::Protocol(_)));
    assert_eq!(err.info().code, "component-count");

    let mut vector = encode(&state);
    vector.ints[0] = 1;
    assert_eq!(decode(&dims, &vector).unwrap_err().info().code, "allocation-range");
}
