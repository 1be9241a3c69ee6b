//! Best-effort start/end of every join stage and GC phase, for display.
//!
//! Unlike [`crate::StageReplayer`] this makes no pairing assumptions: arbitrary stage
//! events may be dropped or reordered in customer traces, and a missing edge simply stays
//! `None`.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    AnalysisConfig, GcJoinError, GcJoinResult, HeapId, JoinEdge, JoinEvent, JoinKind, PhaseId,
    PhaseTable, StageId,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageTiming {
    pub stage: StageId,
    pub heap: HeapId,
    pub start_ms: Option<f64>,
    pub end_ms: Option<f64>,
    pub n_starts: u32,
    pub n_ends: u32,
}

impl StageTiming {
    pub fn span_ms(&self) -> Option<f64> {
        Some(self.end_ms? - self.start_ms?)
    }

    pub fn to_tuple(&self) -> (Option<f64>, Option<f64>) {
        (self.start_ms, self.end_ms)
    }
}

pub type StageTimeline = BTreeMap<StageId, BTreeMap<HeapId, StageTiming>>;

#[derive(Debug, Default)]
struct StageAccumulator {
    n_starts: u32,
    n_ends: u32,
    start_abs_ms: Option<f64>,
    end_abs_ms: Option<f64>,
    start_rel_ms: Option<f64>,
    end_rel_ms: Option<f64>,
}

impl StageAccumulator {
    fn record_start(&mut self, e: &JoinEvent) {
        self.n_starts += 1;
        if self.start_abs_ms.is_none() {
            self.start_abs_ms = Some(e.timestamp_ms);
            self.start_rel_ms = e.relative_timestamp_ms;
        }
    }

    fn record_end(&mut self, e: &JoinEvent) {
        self.n_ends += 1;
        self.end_abs_ms = Some(e.timestamp_ms);
        self.end_rel_ms = e.relative_timestamp_ms;
    }

    fn finish(
        self,
        stage: StageId,
        heap: HeapId,
        config: &AnalysisConfig,
    ) -> GcJoinResult<StageTiming> {
        if let (Some(sa), Some(ea), Some(sr), Some(er)) =
            (self.start_abs_ms, self.end_abs_ms, self.start_rel_ms, self.end_rel_ms)
        {
            let (absolute_ms, relative_ms) = (ea - sa, er - sr);
            if !config.clocks_agree(absolute_ms, relative_ms) {
                return Err(GcJoinError::ClockMismatch {
                    stage,
                    heap,
                    absolute_ms,
                    relative_ms,
                });
            }
        }
        let mut end_ms = self.end_abs_ms;
        if let (Some(start), Some(end)) = (self.start_abs_ms, end_ms) {
            if end < start {
                // Ended before the trace began and started again later.
                tracing::debug!(heap, ?stage, start, end, "dropping end that precedes start");
                end_ms = None;
            }
        }
        Ok(StageTiming {
            stage,
            heap,
            start_ms: self.start_abs_ms,
            end_ms,
            n_starts: self.n_starts,
            n_ends: self.n_ends,
        })
    }
}

/// First start and last end of each stage on each heap.
///
/// Restart events carry no stage, so a restart end closes whichever last-join or right-join
/// stage this heap is running alone, if any.
pub fn reconstruct_stage_timeline<'e>(
    heaps: impl IntoIterator<Item = (HeapId, &'e [JoinEvent])>,
    config: &AnalysisConfig,
) -> GcJoinResult<StageTimeline> {
    let mut acc = BTreeMap::<StageId, BTreeMap<HeapId, StageAccumulator>>::new();
    let mut seen = BTreeSet::new();
    for (heap, events) in heaps {
        if !seen.insert(heap) {
            return Err(GcJoinError::DuplicateHeap(heap));
        }
        let mut single_threaded: Option<StageId> = None;
        for e in events {
            let is_restart = e.kind == JoinKind::Restart;
            match (e.edge, is_restart) {
                (JoinEdge::Start, false) => {
                    acc.entry(e.stage)
                        .or_default()
                        .entry(heap)
                        .or_default()
                        .record_start(e);
                    if e.is_single_threaded_start() {
                        single_threaded = Some(e.stage);
                    }
                }
                (JoinEdge::End, false) => {
                    acc.entry(e.stage)
                        .or_default()
                        .entry(heap)
                        .or_default()
                        .record_end(e);
                }
                (JoinEdge::End, true) => {
                    if let Some(stage) = single_threaded.take() {
                        acc.entry(stage)
                            .or_default()
                            .entry(heap)
                            .or_default()
                            .record_end(e);
                    }
                }
                (JoinEdge::Start, true) => {}
            }
        }
    }

    let mut out = StageTimeline::new();
    for (stage, by_heap) in acc {
        let mut timings = BTreeMap::new();
        for (heap, a) in by_heap {
            timings.insert(heap, a.finish(stage, heap, config)?);
        }
        out.insert(stage, timings);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeAndHeap {
    pub time_ms: f64,
    pub heap: HeapId,
}

/// A stage across all heaps: the first heap's start and the last heap's end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageSpan {
    pub stage: StageId,
    pub start: Option<TimeAndHeap>,
    pub end: Option<TimeAndHeap>,
}

pub fn stage_spans(timeline: &StageTimeline) -> BTreeMap<StageId, StageSpan> {
    let mut out = BTreeMap::new();
    for (stage, by_heap) in timeline {
        let mut span = StageSpan {
            stage: *stage,
            start: None,
            end: None,
        };
        for (heap, timing) in by_heap {
            if let Some(t) = timing.start_ms {
                if span.start.is_none_or(|s| t < s.time_ms) {
                    span.start = Some(TimeAndHeap { time_ms: t, heap: *heap });
                }
            }
            if let Some(t) = timing.end_ms {
                if span.end.is_none_or(|e| t > e.time_ms) {
                    span.end = Some(TimeAndHeap { time_ms: t, heap: *heap });
                }
            }
        }
        out.insert(*stage, span);
    }
    out
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PhaseTiming {
    pub phase: PhaseId,
    pub start_ms: Option<f64>,
    pub end_ms: Option<f64>,
}

impl PhaseTiming {
    fn new(phase: PhaseId, start_ms: Option<f64>, end_ms: Option<f64>) -> Self {
        let end_ms = match (start_ms, end_ms) {
            (Some(s), Some(e)) if e < s => {
                tracing::debug!(?phase, s, e, "dropping phase end that precedes start");
                None
            }
            _ => end_ms,
        };
        Self {
            phase,
            start_ms,
            end_ms,
        }
    }

    pub fn span_ms(&self) -> Option<f64> {
        Some(self.end_ms? - self.start_ms?)
    }
}

fn opt_min(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn opt_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Phase boundaries from their stages' spans. A phase is present if any of its stages was
/// seen.
///
/// Three joins mark the wrong edge of their phase, so those edges are redefined:
/// plan starts when mark ends, sweep starts when plan ends, and post-GC work ends with the
/// pause (`pause_duration_ms`, on the same clock as the events).
pub fn phase_timings(
    spans: &BTreeMap<StageId, StageSpan>,
    table: &PhaseTable,
    pause_duration_ms: f64,
) -> BTreeMap<PhaseId, PhaseTiming> {
    let mut bounds = BTreeMap::<PhaseId, (Option<f64>, Option<f64>)>::new();
    for phase in table.phases() {
        for stage in table.stages_of(phase) {
            let Some(span) = spans.get(stage) else {
                continue;
            };
            let (start, end) = bounds.entry(phase).or_insert((None, None));
            *start = opt_min(*start, span.start.map(|s| s.time_ms));
            *end = opt_max(*end, span.end.map(|e| e.time_ms));
        }
    }

    let mark_end = bounds.get(&PhaseId::Mark).and_then(|(_, end)| *end);
    if let Some((start, _)) = bounds.get_mut(&PhaseId::Plan) {
        *start = mark_end;
    }
    let plan_end = bounds.get(&PhaseId::Plan).and_then(|(_, end)| *end);
    if let Some((start, _)) = bounds.get_mut(&PhaseId::Sweep) {
        *start = plan_end;
    }
    if let Some((_, end)) = bounds.get_mut(&PhaseId::PostGc) {
        *end = Some(pause_duration_ms);
    }

    bounds
        .into_iter()
        .map(|(phase, (start, end))| (phase, PhaseTiming::new(phase, start, end)))
        .collect()
}

/// Everything a timeline chart needs for one GC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTimeline {
    pub stages: StageTimeline,
    pub spans: BTreeMap<StageId, StageSpan>,
    pub phases: BTreeMap<PhaseId, PhaseTiming>,
}

impl JoinTimeline {
    pub fn reconstruct<'e>(
        heaps: impl IntoIterator<Item = (HeapId, &'e [JoinEvent])>,
        table: &PhaseTable,
        pause_duration_ms: f64,
        config: &AnalysisConfig,
    ) -> GcJoinResult<Self> {
        let stages = reconstruct_stage_timeline(heaps, config)?;
        let spans = stage_spans(&stages);
        let phases = phase_timings(&spans, table, pause_duration_ms);
        Ok(Self {
            stages,
            spans,
            phases,
        })
    }

    pub fn to_json(&self) -> GcJoinResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
