use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_model::{Dimensions, GlobalParameterState, MixtureComponent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Flat form of a [`GlobalParameterState`] exchanged on every parameter broadcast.
///
/// Double layout: `alpha, branch_alpha, branch_beta`, the branch lengths, the
/// exchangeabilities, then `(profile, weight)` for every component slot and
/// finally the Dirichlet weights. Int layout: the active component count
/// followed by the allocation of every site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    /// Integer buffer, `1 + n_sites` entries.
    pub ints: Vec<i64>,
    /// Double buffer, [`Dimensions::double_len`] entries.
    pub doubles: Vec<f64>,
}

impl ParameterVector {
    /// SHA-256 over the little-endian bytes of both buffers, hex encoded.
    pub fn canonical_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for value in &self.ints {
            hasher.update(value.to_le_bytes());
        }
        for value in &self.doubles {
            hasher.update(value.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Fails with a protocol error unless `found == expected`.
pub fn expect_len(buffer: &str, expected: usize, found: usize) -> Result<(), PbxError> {
    if expected == found {
        return Ok(());
    }
    Err(PbxError::Protocol(
        ErrorInfo::new("buffer-size", format!("{buffer} buffer has the wrong size"))
            .with_context("expected", expected)
            .with_context("found", found),
    ))
}

/// Flattens `state` in broadcast order.
pub fn encode(state: &GlobalParameterState) -> ParameterVector {
    let mut ints = Vec::with_capacity(1 + state.allocation.len());
    ints.push(state.component_count as i64);
    ints.extend(state.allocation.iter().map(|&k| k as i64));

    let mut doubles = vec![state.alpha, state.branch_alpha, state.branch_beta];
    doubles.extend_from_slice(&state.branch_lengths);
    doubles.extend_from_slice(&state.exchangeabilities);
    for component in &state.components {
        doubles.extend_from_slice(&component.profile);
        doubles.push(component.weight);
    }
    doubles.extend_from_slice(&state.dirichlet_weights);
    ParameterVector { ints, doubles }
}

/// Rebuilds a state from `vector`, checking both buffer sizes against `dims`.
///
/// A decoded state that breaks the model invariants (component count or an
/// allocation out of range) is a protocol error.
pub fn decode(dims: &Dimensions, vector: &ParameterVector) -> Result<GlobalParameterState, PbxError> {
    expect_len("parameter ints", dims.int_len(), vector.ints.len())?;
    expect_len("parameter doubles", dims.double_len(), vector.doubles.len())?;

    let component_count = to_index(vector.ints[0], "component_count")?;
    let allocation = vector.ints[1..]
        .iter()
        .map(|&k| to_index(k, "allocation"))
        .collect::<Result<Vec<_>, _>>()?;

    let doubles = &vector.doubles;
    let mut at = 3;
    let mut take = |n: usize| {
        let block = doubles[at..at + n].to_vec();
        at += n;
        block
    };
    let branch_lengths = take(dims.n_branch);
    let exchangeabilities = take(dims.n_rr);
    let components = (0..dims.max_components)
        .map(|_| {
            let mut block = take(dims.dim + 1);
            let weight = block.pop().unwrap_or_default();
            MixtureComponent {
                profile: block,
                weight,
            }
        })
        .collect();
    let dirichlet_weights = take(dims.dim);

    let state = GlobalParameterState {
        alpha: doubles[0],
        branch_alpha: doubles[1],
        branch_beta: doubles[2],
        branch_lengths,
        exchangeabilities,
        component_count,
        components,
        dirichlet_weights,
        allocation,
    };
    state
        .validate(dims)
        .map_err(|err| PbxError::Protocol(err.info().clone()))?;
    Ok(state)
}

fn to_index(value: i64, field: &str) -> Result<usize, PbxError> {
    usize::try_from(value).map_err(|_| {
        PbxError::Protocol(
            ErrorInfo::new("negative-index", format!("{field} carried a negative value"))
                .with_context("value", value),
        )
    })
}
