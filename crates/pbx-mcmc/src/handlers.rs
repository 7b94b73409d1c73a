use indexmap::IndexMap;
use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_model::LikelihoodEngine;
use pbx_wire::Signal;

use crate::worker::Worker;

/// What the dispatch loop does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait for the next signal.
    Continue,
    /// Leave the dispatch loop.
    Stop,
}

/// Worker-side action bound to one signal.
pub type Handler<E> = fn(&mut Worker<E>) -> Result<Flow, PbxError>;

/// Signal-to-handler table with an optional base registry consulted for
/// signals the table does not bind itself.
pub struct HandlerRegistry<E> {
    handlers: IndexMap<Signal, Handler<E>>,
    fallback: Option<Box<HandlerRegistry<E>>>,
}

impl<E: LikelihoodEngine> HandlerRegistry<E> {
    /// Empty registry without fallback.
    pub fn new() -> Self {
        Self {
            handlers: IndexMap::new(),
            fallback: None,
        }
    }

    /// Handlers every model shares.
    pub fn base() -> Self {
        let mut registry = Self::new();
        registry.register(Signal::ParameterUpdate, Worker::on_parameter_update);
        registry.register(Signal::PrepareStepping, Worker::on_prepare_stepping);
        registry.register(Signal::SetSteppingFraction, Worker::on_set_stepping_fraction);
        registry.register(Signal::SetEmpiricalFrac, Worker::on_set_empirical_frac);
        registry.register(Signal::CvScore, Worker::on_cv_score);
        registry.register(Signal::SiteLogL, Worker::on_site_logl);
        registry.register(Signal::Kill, |_| Ok(Flow::Stop));
        registry
    }

    /// CAT-GTR handlers layered over [`HandlerRegistry::base`].
    pub fn cat_gtr() -> Self {
        let mut registry = Self::new();
        registry.register(Signal::UpdateRate, Worker::on_update_rate);
        registry.register(Signal::UpdateRRate, Worker::on_update_rrate);
        registry.register(Signal::ReallocMove, Worker::on_realloc_move);
        registry.register(Signal::ProfileMove, Worker::on_profile_move);
        registry.register(Signal::SetEmpiricalPrior, Worker::on_set_empirical_prior);
        registry.register(Signal::SteppingSiteLogL, Worker::on_stepping_site_logl);
        registry.with_fallback(Self::base())
    }

    /// Delegates unbound signals to `base`.
    pub fn with_fallback(mut self, base: Self) -> Self {
        self.fallback = Some(Box::new(base));
        self
    }

    /// Binds `handler` to `signal`, replacing any previous binding here.
    pub fn register(&mut self, signal: Signal, handler: Handler<E>) {
        self.handlers.insert(signal, handler);
    }

    /// Finds the handler for `signal`, walking the fallback chain.
    pub fn resolve(&self, signal: Signal) -> Result<Handler<E>, PbxError> {
        if let Some(handler) = self.handlers.get(&signal) {
            return Ok(*handler);
        }
        match &self.fallback {
            Some(base) => base.resolve(signal),
            None => Err(PbxError::Protocol(
                ErrorInfo::new("unknown-signal", "no handler registered for signal")
                    .with_context("signal", signal),
            )),
        }
    }

    /// Every signal this registry can handle, own bindings first.
    pub fn signals(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.handlers.keys().copied().collect();
        if let Some(base) = &self.fallback {
            for signal in base.signals() {
                if !signals.contains(&signal) {
                    signals.push(signal);
                }
            }
        }
        signals
    }
}

impl<E: LikelihoodEngine> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::cat_gtr()
    }
}
