//! Join/restart events as recorded per heap, and decoding from the runtime's numeric codes.

use serde::{Deserialize, Serialize};

use crate::{GcJoinError, GcJoinResult};

/// Heap number within a server GC. Traces report the processor number here; the two
/// coincide when GC threads are affinitized.
pub type HeapId = u32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    LastJoin,
    Join,
    Restart,
    FirstRJoin,
}

impl TryFrom<i32> for JoinKind {
    type Error = GcJoinError;

    fn try_from(code: i32) -> GcJoinResult<Self> {
        match code {
            0 => Ok(Self::LastJoin),
            1 => Ok(Self::Join),
            2 => Ok(Self::Restart),
            3 => Ok(Self::FirstRJoin),
            other => Err(GcJoinError::InvalidJoinType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JoinEdge {
    Start,
    End,
}

impl TryFrom<i32> for JoinEdge {
    type Error = GcJoinError;

    fn try_from(code: i32) -> GcJoinResult<Self> {
        match code {
            0 => Ok(Self::Start),
            1 => Ok(Self::End),
            other => Err(GcJoinError::InvalidJoinTime(other)),
        }
    }
}

macro_rules! stage_ids {
    ($($name:ident = $code:literal => $snake:literal),+ $(,)?) => {
        /// Join stage as numbered by the collector. `Restart` is the pseudo-stage carried by
        /// restart events.
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(rename_all = "snake_case")]
        pub enum StageId {
            $($name,)+
        }

        impl StageId {
            pub const ALL: &'static [StageId] = &[$(StageId::$name,)+];

            pub fn code(self) -> i32 {
                match self {
                    $(StageId::$name => $code,)+
                }
            }

            /// Snake-case name, as serialized and as used in metric names.
            pub fn name(self) -> &'static str {
                match self {
                    $(StageId::$name => $snake,)+
                }
            }
        }

        impl TryFrom<i32> for StageId {
            type Error = GcJoinError;

            fn try_from(code: i32) -> GcJoinResult<Self> {
                match code {
                    $($code => Ok(StageId::$name),)+
                    other => Err(GcJoinError::InvalidStage(other)),
                }
            }
        }
    };
}

stage_ids! {
    Restart = -1 => "restart",
    InitCpuMapping = 0 => "init_cpu_mapping",
    Done = 1 => "done",
    GenerationDetermined = 2 => "generation_determined",
    BeginMarkPhase = 3 => "begin_mark_phase",
    ScanDependentHandles = 4 => "scan_dependent_handles",
    RescanDependentHandles = 5 => "rescan_dependent_handles",
    ScanSizedrefDone = 6 => "scan_sizedref_done",
    NullDeadShortWeak = 7 => "null_dead_short_weak",
    ScanFinalization = 8 => "scan_finalization",
    NullDeadLongWeak = 9 => "null_dead_long_weak",
    NullDeadSyncblk = 10 => "null_dead_syncblk",
    DecideOnCompaction = 11 => "decide_on_compaction",
    RearrangeSegsCompaction = 12 => "rearrange_segs_compaction",
    AdjustHandleAgeCompact = 13 => "adjust_handle_age_compact",
    AdjustHandleAgeSweep = 14 => "adjust_handle_age_sweep",
    BeginRelocatePhase = 15 => "begin_relocate_phase",
    RelocatePhaseDone = 16 => "relocate_phase_done",
    VerifyObjectsDone = 17 => "verify_objects_done",
    StartBgc = 18 => "start_bgc",
    RestartEe = 19 => "restart_ee",
    ConcurrentOverflow = 20 => "concurrent_overflow",
    SuspendEe = 21 => "suspend_ee",
    BgcAfterEphemeral = 22 => "bgc_after_ephemeral",
    AllowFgc = 23 => "allow_fgc",
    BgcSweep = 24 => "bgc_sweep",
    SuspendEeVerify = 25 => "suspend_ee_verify",
    RestartEeVerify = 26 => "restart_ee_verify",
    SetStateFree = 27 => "set_state_free",
    UpdateCardBundles = 28 => "update_card_bundles",
    AfterAbsorb = 29 => "after_absorb",
    VerifyCopyTable = 30 => "verify_copy_table",
    AfterReset = 31 => "after_reset",
    AfterEphemeralSweep = 32 => "after_ephemeral_sweep",
    AfterProfilerHeapWalk = 33 => "after_profiler_heap_walk",
    MinimalGc = 34 => "minimal_gc",
    AfterCommitSohNoGc = 35 => "after_commit_soh_no_gc",
    ExpandLohNoGc = 36 => "expand_loh_no_gc",
    FinalNoGc = 37 => "final_no_gc",
    DisableSoftwareWriteWatch = 38 => "disable_software_write_watch",
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JoinEvent {
    pub kind: JoinKind,
    pub edge: JoinEdge,
    pub stage: StageId,
    pub heap_origin: HeapId,
    pub timestamp_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_timestamp_ms: Option<f64>,
}

impl JoinEvent {
    pub fn new(
        kind: JoinKind,
        edge: JoinEdge,
        stage: StageId,
        heap_origin: HeapId,
        timestamp_ms: f64,
    ) -> Self {
        Self {
            kind,
            edge,
            stage,
            heap_origin,
            timestamp_ms,
            relative_timestamp_ms: None,
        }
    }

    pub fn with_relative(mut self, relative_timestamp_ms: f64) -> Self {
        self.relative_timestamp_ms = Some(relative_timestamp_ms);
        self
    }

    fn is_restart_either(&self) -> bool {
        self.kind == JoinKind::Restart && self.stage == StageId::Restart
    }

    pub fn is_restart_start(&self) -> bool {
        self.is_restart_either() && self.edge == JoinEdge::Start
    }

    pub fn is_restart_end(&self) -> bool {
        self.is_restart_either() && self.edge == JoinEdge::End
    }

    pub fn is_join_start(&self) -> bool {
        self.kind == JoinKind::Join && self.edge == JoinEdge::Start
    }

    pub fn is_join_end(&self) -> bool {
        self.kind == JoinKind::Join && self.edge == JoinEdge::End
    }

    /// True for joins after which this heap's thread proceeds alone until a restart.
    pub fn is_single_threaded_start(&self) -> bool {
        self.edge == JoinEdge::Start
            && matches!(self.kind, JoinKind::LastJoin | JoinKind::FirstRJoin)
    }
}

/// An event with the collector's integer codes, before validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawJoinEvent {
    pub join_type: i32,
    pub join_time: i32,
    pub join_id: i32,
    pub heap: HeapId,
    pub absolute_timestamp_ms: f64,
    #[serde(default)]
    pub relative_timestamp_ms: Option<f64>,
}

impl TryFrom<RawJoinEvent> for JoinEvent {
    type Error = GcJoinError;

    fn try_from(raw: RawJoinEvent) -> GcJoinResult<Self> {
        Ok(Self {
            kind: JoinKind::try_from(raw.join_type)?,
            edge: JoinEdge::try_from(raw.join_time)?,
            stage: StageId::try_from(raw.join_id)?,
            heap_origin: raw.heap,
            timestamp_ms: raw.absolute_timestamp_ms,
            relative_timestamp_ms: raw.relative_timestamp_ms,
        })
    }
}

/// Decodes a whole heap's events. Runtimes that do not record stage ids emit `-256`,
/// which fails here like any other unknown id.
pub fn decode_events(raw: &[RawJoinEvent]) -> GcJoinResult<Vec<JoinEvent>> {
    raw.iter().copied().map(JoinEvent::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_codes_round_trip_through_i32() {
        for stage in StageId::ALL {
            assert_eq!(StageId::try_from(stage.code()).unwrap(), *stage);
        }
        assert_eq!(StageId::Restart.code(), -1);
        assert_eq!(StageId::DisableSoftwareWriteWatch.code(), 38);
    }

    #[test]
    fn unrecorded_join_id_is_rejected() {
        let raw = RawJoinEvent {
            join_type: 1,
            join_time: 0,
            join_id: -256,
            heap: 0,
            absolute_timestamp_ms: 1.0,
            relative_timestamp_ms: None,
        };
        let err = JoinEvent::try_from(raw).unwrap_err();
        assert!(matches!(err, GcJoinError::InvalidStage(-256)));
    }

    #[test]
    fn decode_maps_codes() {
        let raw = [
            RawJoinEvent {
                join_type: 0,
                join_time: 0,
                join_id: 3,
                heap: 2,
                absolute_timestamp_ms: 10.0,
                relative_timestamp_ms: Some(1.0),
            },
            RawJoinEvent {
                join_type: 2,
                join_time: 1,
                join_id: -1,
                heap: 2,
                absolute_timestamp_ms: 11.0,
                relative_timestamp_ms: Some(2.0),
            },
        ];
        let events = decode_events(&raw).unwrap();
        assert_eq!(events[0].kind, JoinKind::LastJoin);
        assert_eq!(events[0].stage, StageId::BeginMarkPhase);
        assert!(events[0].is_single_threaded_start());
        assert!(events[1].is_restart_end());
        assert_eq!(events[1].relative_timestamp_ms, Some(2.0));
    }

    #[test]
    fn bad_type_and_time_codes_are_rejected() {
        assert!(matches!(JoinKind::try_from(4), Err(GcJoinError::InvalidJoinType(4))));
        assert!(matches!(JoinEdge::try_from(2), Err(GcJoinError::InvalidJoinTime(2))));
    }

    #[test]
    fn events_deserialize_from_snake_case_json() {
        let json = concat!(
            r#"{"kind":"first_r_join","edge":"start","stage":"update_card_bundles","#,
            r#""heap_origin":1,"timestamp_ms":4.5}"#,
        );
        let event: JoinEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, JoinKind::FirstRJoin);
        assert_eq!(event.stage, StageId::UpdateCardBundles);
        assert_eq!(event.relative_timestamp_ms, None);
    }

    #[test]
    fn stage_names_match_serialized_form() {
        for stage in StageId::ALL {
            assert_eq!(serde_json::to_value(stage).unwrap(), stage.name());
        }
    }
}
