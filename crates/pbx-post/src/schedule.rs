use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use pbx_mcmc::ChainReader;
use pbx_model::GlobalParameterState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const LOG_BATCH: usize = 10;

/// Which chain positions an analysis reads: `[burnin, until)` in steps of `every`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSchedule {
    /// Number of leading snapshots discarded.
    pub burnin: usize,
    /// Stride between two retained snapshots.
    pub every: usize,
    /// Position past the last snapshot considered.
    pub until: usize,
}

impl SampleSchedule {
    /// Fills unset bounds for a chain of `size` snapshots: the burn-in
    /// defaults to a fifth of the chain and `until` to its end.
    pub fn resolve(
        size: usize,
        burnin: Option<usize>,
        every: usize,
        until: Option<usize>,
    ) -> Result<Self, PbxError> {
        if every == 0 {
            return Err(PbxError::Config(
                ErrorInfo::new("schedule-every", "sampling stride must be positive")
                    .with_hint("use --every 1 to keep every snapshot"),
            ));
        }
        Ok(Self {
            burnin: burnin.unwrap_or(size / 5),
            every,
            until: until.unwrap_or(size),
        })
    }

    /// Chain positions retained by the schedule.
    pub fn positions(&self) -> impl Iterator<Item = usize> {
        (self.burnin.min(self.until)..self.until).step_by(self.every)
    }
}

/// Feeds every scheduled snapshot to `visit` with its chain position and
/// returns how many were visited. A chain shorter than `until` simply ends
/// the walk.
pub fn for_each_sample<R, F>(
    reader: &mut R,
    schedule: &SampleSchedule,
    mut visit: F,
) -> Result<usize, PbxError>
where
    R: ChainReader + ?Sized,
    F: FnMut(usize, GlobalParameterState) -> Result<(), PbxError>,
{
    let start = schedule.burnin.min(schedule.until);
    let mut position = reader.skip(start)?;
    let mut samples = 0;
    if position < start {
        return Ok(0);
    }
    while position < schedule.until {
        let Some(state) = reader.next_snapshot()? else {
            break;
        };
        visit(position, state)?;
        samples += 1;
        position += 1;
        if samples % LOG_BATCH == 0 {
            info!(samples, position, "samples processed");
        } else {
            debug!(samples, position, "sample processed");
        }
        let stride = (schedule.every - 1).min(schedule.until - position);
        let skipped = reader.skip(stride)?;
        position += skipped;
        if skipped < stride {
            break;
        }
    }
    info!(samples, burnin = schedule.burnin, every = schedule.every, "sample walk complete");
    Ok(samples)
}

/// Fails when a walk produced no sample.
pub fn require_samples(samples: usize, schedule: &SampleSchedule) -> Result<(), PbxError> {
    if samples == 0 {
        return Err(PbxError::Config(
            ErrorInfo::new("empty-sample", "no snapshot falls inside the schedule")
                .with_context("burnin", schedule.burnin)
                .with_context("until", schedule.until)
                .with_hint("lower the burn-in or extend the chain"),
        ));
    }
    Ok(())
}
