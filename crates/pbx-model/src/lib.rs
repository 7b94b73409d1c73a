#![deny(missing_docs)]

//! Model-side collaborators of the pbx sampler: the canonical parameter
//! state and its dimensions, the alignment store, the likelihood engine
//! contract with a star-tree reference engine, and empirical-Bayes priors.

/// Alignment storage and the narrow [`SequenceStore`] view used by workers.
pub mod alignment;
/// Empirical hyperparameters and the flags that shape them.
pub mod empirical;
/// Likelihood engine trait and the reference star-tree engine.
pub mod engine;
/// Global parameter state and model dimensions.
pub mod state;

pub use alignment::{Alignment, AlignmentDocument, SequenceStore};
pub use empirical::{EmpiricalLayout, EmpiricalPrior, GammaPair, ModelFlags};
pub use engine::{LikelihoodEngine, SiteSuffStat, StarTreeEngine};
pub use state::{Dimensions, GlobalParameterState, MixtureComponent};
