//! Many independent diff runs at once.
//!
//! Each run owns its working copy, so tree pairs (e.g. one per changed file of
//! a commit) can be diffed in parallel without coordination.

use rayon::prelude::*;

use crate::chawathe::EditOp;
use crate::container::ContainerResolver;
use crate::mapping::{MappingStore, MultiMappingStore};
use crate::tree::DiffTree;
use crate::{ScriptConfig, debug, diff_with_mappings};

/// One tree pair with its mappings.
#[derive(Debug)]
pub struct DiffJob<'a, S, D> {
    /// Source tree
    pub src: &'a S,
    /// Destination tree
    pub dst: &'a D,
    /// Mono mapping between them
    pub mono: &'a MappingStore,
    /// Multi-mapping between them
    pub multi: &'a MultiMappingStore,
}

// Manual impls: the job only holds references, so no bounds on S and D.
impl<S, D> Clone for DiffJob<'_, S, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, D> Copy for DiffJob<'_, S, D> {}

/// Diff every job in parallel. The result has one script per job, in job
/// order.
pub fn diff_all<S, D, R>(
    jobs: &[DiffJob<'_, S, D>],
    resolver: &R,
    config: &ScriptConfig,
) -> Vec<Vec<EditOp>>
where
    S: DiffTree + Sync,
    D: DiffTree + Sync,
    R: ContainerResolver + Sync + ?Sized,
{
    debug!(jobs = jobs.len(), "diff_all start");
    jobs.par_iter()
        .map(|job| diff_with_mappings(job.src, job.dst, job.mono, job.multi, resolver, config))
        .collect()
}
