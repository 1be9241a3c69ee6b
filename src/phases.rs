//! Static grouping of join stages into GC phases.
//!
//! Stages are listed in the order the collector fires them within a phase, and phases in
//! the order they occur within a GC. Not every stage fires in every GC (a GC relocates and
//! compacts or it sweeps, never both), and traces may drop arbitrary stage events.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{GcJoinError, GcJoinResult, StageId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Init,
    Mark,
    Plan,
    Relocate,
    Compact,
    Sweep,
    HeapVerify,
    PostGc,
}

impl PhaseId {
    pub const ALL: &'static [PhaseId] = &[
        PhaseId::Init,
        PhaseId::Mark,
        PhaseId::Plan,
        PhaseId::Relocate,
        PhaseId::Compact,
        PhaseId::Sweep,
        PhaseId::HeapVerify,
        PhaseId::PostGc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Mark => "mark",
            Self::Plan => "plan",
            Self::Relocate => "relocate",
            Self::Compact => "compact",
            Self::Sweep => "sweep",
            Self::HeapVerify => "heap_verify",
            Self::PostGc => "post_gc",
        }
    }
}

pub const STAGES_BY_PHASE: &[(PhaseId, &[StageId])] = &[
    (
        PhaseId::Mark,
        &[
            StageId::BeginMarkPhase,
            StageId::ScanSizedrefDone,
            StageId::UpdateCardBundles,
            StageId::ScanDependentHandles,
            StageId::NullDeadShortWeak,
            StageId::ScanFinalization,
            StageId::NullDeadLongWeak,
            StageId::NullDeadSyncblk,
        ],
    ),
    // Fires slightly past the end of planning.
    (PhaseId::Plan, &[StageId::DecideOnCompaction]),
    (
        PhaseId::Relocate,
        &[StageId::BeginRelocatePhase, StageId::RelocatePhaseDone],
    ),
    (
        PhaseId::Compact,
        &[StageId::RearrangeSegsCompaction, StageId::AdjustHandleAgeCompact],
    ),
    (PhaseId::Sweep, &[StageId::AdjustHandleAgeSweep]),
    (
        PhaseId::HeapVerify,
        &[StageId::VerifyCopyTable, StageId::VerifyObjectsDone],
    ),
    // Marks the start of post-GC work, not its end.
    (PhaseId::PostGc, &[StageId::Done]),
];

/// Phase table plus its inversion.
#[derive(Debug, Clone)]
pub struct PhaseTable {
    stages_by_phase: BTreeMap<PhaseId, Vec<StageId>>,
    phase_by_stage: BTreeMap<StageId, PhaseId>,
}

impl PhaseTable {
    pub fn new(entries: &[(PhaseId, &[StageId])]) -> GcJoinResult<Self> {
        let mut table = Self::empty();
        for (phase, stages) in entries {
            table.insert_phase(*phase, stages)?;
        }
        Ok(table)
    }

    fn empty() -> Self {
        Self {
            stages_by_phase: BTreeMap::new(),
            phase_by_stage: BTreeMap::new(),
        }
    }

    /// Adds `stages` to `phase`. Leaves the table untouched if any stage already has a phase.
    fn insert_phase(&mut self, phase: PhaseId, stages: &[StageId]) -> GcJoinResult<()> {
        for stage in stages {
            if let Some(first) = self.phase_by_stage.get(stage) {
                return Err(GcJoinError::PhaseTable {
                    stage: *stage,
                    first: *first,
                    second: phase,
                });
            }
        }
        for stage in stages {
            self.phase_by_stage.insert(*stage, phase);
        }
        self.stages_by_phase
            .entry(phase)
            .or_default()
            .extend_from_slice(stages);
        Ok(())
    }

    pub fn phase_of(&self, stage: StageId) -> Option<PhaseId> {
        self.phase_by_stage.get(&stage).copied()
    }

    pub fn stages_of(&self, phase: PhaseId) -> &[StageId] {
        self.stages_by_phase
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn phases(&self) -> impl Iterator<Item = PhaseId> + '_ {
        self.stages_by_phase.keys().copied()
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (phase, stages) in STAGES_BY_PHASE {
            if let Err(err) = table.insert_phase(*phase, stages) {
                tracing::error!(%err, "skipping inconsistent builtin phase entry");
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_consistent() {
        let table = PhaseTable::new(STAGES_BY_PHASE).unwrap();
        let default = PhaseTable::default();
        for stage in StageId::ALL {
            assert_eq!(table.phase_of(*stage), default.phase_of(*stage));
        }
        assert_eq!(table.phase_of(StageId::Done), Some(PhaseId::PostGc));
        assert_eq!(table.phase_of(StageId::UpdateCardBundles), Some(PhaseId::Mark));
        assert_eq!(table.phase_of(StageId::GenerationDetermined), None);
        assert_eq!(table.stages_of(PhaseId::Init), &[] as &[StageId]);
    }

    #[test]
    fn stage_in_two_phases_is_rejected() {
        let entries: &[(PhaseId, &[StageId])] = &[
            (PhaseId::Mark, &[StageId::BeginMarkPhase]),
            (PhaseId::Plan, &[StageId::BeginMarkPhase]),
        ];
        let err = PhaseTable::new(entries).unwrap_err();
        assert!(matches!(
            err,
            GcJoinError::PhaseTable {
                stage: StageId::BeginMarkPhase,
                first: PhaseId::Mark,
                second: PhaseId::Plan,
            }
        ));
    }

    #[test]
    fn rejected_phase_leaves_table_untouched() {
        let mut table = PhaseTable::new(&[(PhaseId::Mark, &[StageId::BeginMarkPhase])]).unwrap();
        let err = table
            .insert_phase(PhaseId::Plan, &[StageId::DecideOnCompaction, StageId::BeginMarkPhase])
            .unwrap_err();
        assert!(matches!(err, GcJoinError::PhaseTable { first: PhaseId::Mark, .. }));
        assert_eq!(table.phase_of(StageId::DecideOnCompaction), None);
        assert_eq!(table.stages_of(PhaseId::Plan), &[] as &[StageId]);
    }

    #[test]
    fn phases_iterate_in_gc_order() {
        let table = PhaseTable::default();
        let phases: Vec<_> = table.phases().collect();
        assert_eq!(phases.first(), Some(&PhaseId::Mark));
        assert_eq!(phases.last(), Some(&PhaseId::PostGc));
    }
}
