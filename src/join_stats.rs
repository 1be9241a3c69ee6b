//! Per-GC join statistics: how long each heap waited in each join, how the heaps compare,
//! and the per-heap join metrics catalog.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{
    AnalysisConfig, CatalogBuilder, ElementMetric, Failable, GcJoinError, GcJoinResult, HeapId,
    JoinEvent, JoinTimeline, MetricValue, PhaseId, PhaseTable, RawJoinEvent, StageId,
    StatisticsCatalog, TrailingStagePolicy, decode_events, fail, join_times_for_heap, max, median,
    min,
};

/// Durations per stage for one heap, in the order the stage was joined.
pub type JoinTimesForHeap = BTreeMap<StageId, Vec<f64>>;

/// `stage -> heap -> duration`, keeping only each heap's last join of the stage.
pub type JoinDurationByHeap = BTreeMap<StageId, BTreeMap<HeapId, f64>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeapJoinHistory {
    pub heap: HeapId,
    pub events: Vec<JoinEvent>,
}

impl HeapJoinHistory {
    pub fn new(heap: HeapId, events: Vec<JoinEvent>) -> Self {
        Self { heap, events }
    }

    pub fn decode(heap: HeapId, raw: &[RawJoinEvent]) -> GcJoinResult<Self> {
        Ok(Self::new(heap, decode_events(raw)?))
    }
}

/// One garbage collection as seen by the join analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionCycle {
    pub gc_number: u32,
    pub heap_count: u32,
    /// Same clock as the event timestamps.
    pub pause_duration_ms: f64,
    pub heaps: Vec<HeapJoinHistory>,
}

impl CollectionCycle {
    /// Join durations only mean something when several GC threads join each other.
    pub fn server_heaps(&self) -> Failable<&[HeapJoinHistory]> {
        if self.heap_count <= 1 {
            fail("join durations are only valid for server GC")
        } else if self.heaps.is_empty() {
            fail("empty server GC heap histories")
        } else {
            Ok(&self.heaps)
        }
    }

    pub fn event_slices(&self) -> impl Iterator<Item = (HeapId, &[JoinEvent])> {
        self.heaps.iter().map(|h| (h.heap, h.events.as_slice()))
    }

    /// Outer error: the events are malformed. Inner failure: not a server GC.
    pub fn join_times_for_all_heaps(
        &self,
        policy: TrailingStagePolicy,
    ) -> GcJoinResult<Failable<BTreeMap<HeapId, JoinTimesForHeap>>> {
        let heaps = match self.server_heaps() {
            Ok(heaps) => heaps,
            Err(failure) => return Ok(Err(failure)),
        };
        let mut out = BTreeMap::new();
        for h in heaps {
            if out.contains_key(&h.heap) {
                return Err(GcJoinError::DuplicateHeap(h.heap));
            }
            out.insert(h.heap, join_times_for_heap(h.heap, &h.events, policy)?);
        }
        Ok(Ok(out))
    }

    pub fn join_duration_by_heap(
        &self,
        policy: TrailingStagePolicy,
    ) -> GcJoinResult<Failable<JoinDurationByHeap>> {
        Ok(self
            .join_times_for_all_heaps(policy)?
            .map(|all| last_duration_by_heap(&all)))
    }
}

// A stage may be joined more than once per GC; only the last join is kept here.
fn last_duration_by_heap(all: &BTreeMap<HeapId, JoinTimesForHeap>) -> JoinDurationByHeap {
    let mut out = JoinDurationByHeap::new();
    for (heap, by_stage) in all {
        for (stage, times) in by_stage {
            if let Some(last) = times.last() {
                out.entry(*stage).or_default().insert(*heap, *last);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbsPct {
    pub absolute: f64,
    pub percentage: Failable<f64>,
}

impl AbsPct {
    /// Distance of `value` from `median`, absolute and as a percentage of the median.
    pub fn deviation(value: f64, median: f64) -> Self {
        let absolute = (value - median).abs();
        let percentage = if median == 0.0 {
            fail("pct deviation from a zero median")
        } else {
            Ok(absolute / median * 100.0)
        };
        Self {
            absolute,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsOverAllJoins {
    pub median_join_ms: f64,
    pub max_join_ms: f64,
    pub min_join_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageJoinStats {
    pub stage: StageId,
    pub median_heap_join_ms: f64,
    pub min_heap_join_ms: f64,
    pub max_heap_join_ms: f64,
    /// Each heap's deviation from the stage median.
    pub heaps: BTreeMap<HeapId, AbsPct>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseJoinStats {
    pub phase: PhaseId,
    pub median_phase_join_ms: f64,
    pub max_phase_join_ms: f64,
    pub min_phase_join_ms: f64,
    /// Deviation of the phase median from the median of all joins.
    pub deviation_from_median_join: AbsPct,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcJoinStatistics {
    pub over_all_joins: StatsOverAllJoins,
    pub stages: BTreeMap<StageId, StageJoinStats>,
    pub phases: BTreeMap<PhaseId, PhaseJoinStats>,
}

impl GcJoinStatistics {
    pub fn compute(
        cycle: &CollectionCycle,
        table: &PhaseTable,
        policy: TrailingStagePolicy,
    ) -> GcJoinResult<Failable<Self>> {
        Ok(cycle
            .join_times_for_all_heaps(policy)?
            .and_then(|all| Self::from_join_times(&all, table)))
    }

    pub fn from_join_times(
        all: &BTreeMap<HeapId, JoinTimesForHeap>,
        table: &PhaseTable,
    ) -> Failable<Self> {
        let all_durations: Vec<f64> = all
            .values()
            .flat_map(|by_stage| by_stage.values().flatten().copied())
            .collect();
        let over_all_joins = StatsOverAllJoins {
            median_join_ms: median(&all_durations).map_err(|f| f.context("all joins"))?,
            max_join_ms: max(&all_durations).map_err(|f| f.context("all joins"))?,
            min_join_ms: min(&all_durations).map_err(|f| f.context("all joins"))?,
        };

        let by_heap = last_duration_by_heap(all);

        let mut stages = BTreeMap::new();
        for (stage, heap_durations) in &by_heap {
            let values: Vec<f64> = heap_durations.values().copied().collect();
            let stage_median = median(&values)?;
            stages.insert(
                *stage,
                StageJoinStats {
                    stage: *stage,
                    median_heap_join_ms: stage_median,
                    min_heap_join_ms: min(&values)?,
                    max_heap_join_ms: max(&values)?,
                    heaps: heap_durations
                        .iter()
                        .map(|(heap, d)| (*heap, AbsPct::deviation(*d, stage_median)))
                        .collect(),
                },
            );
        }

        let mut phases = BTreeMap::new();
        for phase in table.phases() {
            let values: Vec<f64> = table
                .stages_of(phase)
                .iter()
                .filter_map(|stage| by_heap.get(stage))
                .flat_map(|heap_durations| heap_durations.values().copied())
                .collect();
            if values.is_empty() {
                continue;
            }
            let phase_median = median(&values)?;
            phases.insert(
                phase,
                PhaseJoinStats {
                    phase,
                    median_phase_join_ms: phase_median,
                    max_phase_join_ms: max(&values)?,
                    min_phase_join_ms: min(&values)?,
                    deviation_from_median_join: AbsPct::deviation(
                        phase_median,
                        over_all_joins.median_join_ms,
                    ),
                },
            );
        }

        Ok(Self {
            over_all_joins,
            stages,
            phases,
        })
    }
}

/// What the per-heap join metrics read from one heap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeapJoinSummary {
    pub heap: HeapId,
    pub join_times: JoinTimesForHeap,
    pub phase_totals_ms: BTreeMap<PhaseId, f64>,
    /// The heap joined last (or right-joined) at least once and ran alone.
    pub did_single_threaded_join: bool,
}

impl HeapJoinSummary {
    pub fn from_history(
        history: &HeapJoinHistory,
        table: &PhaseTable,
        policy: TrailingStagePolicy,
    ) -> GcJoinResult<Self> {
        let join_times = join_times_for_heap(history.heap, &history.events, policy)?;
        let mut phase_totals_ms = BTreeMap::new();
        for phase in table.phases() {
            let total = table
                .stages_of(phase)
                .iter()
                .filter_map(|stage| join_times.get(stage))
                .flatten()
                .sum::<f64>();
            phase_totals_ms.insert(phase, total);
        }
        Ok(Self {
            heap: history.heap,
            join_times,
            phase_totals_ms,
            did_single_threaded_join: history
                .events
                .iter()
                .any(JoinEvent::is_single_threaded_start),
        })
    }

    pub fn durations(&self) -> Vec<f64> {
        self.join_times.values().flatten().copied().collect()
    }

    fn nonempty_durations(&self) -> Failable<Vec<f64>> {
        let durations = self.durations();
        if durations.is_empty() {
            fail("empty join durations")
        } else {
            Ok(durations)
        }
    }

    pub fn median_individual_join_ms(&self) -> Failable<f64> {
        median(&self.nonempty_durations()?)
    }

    pub fn max_individual_join_ms(&self) -> Failable<f64> {
        max(&self.nonempty_durations()?)
    }

    pub fn total_join_ms(&self) -> Failable<f64> {
        Ok(self.nonempty_durations()?.iter().sum())
    }

    /// Total time in `stage`; 0 if the heap never joined it.
    pub fn stage_total_ms(&self, stage: StageId) -> f64 {
        self.join_times.get(&stage).map_or(0.0, |times| times.iter().sum())
    }

    pub fn phase_total_ms(&self, phase: PhaseId) -> f64 {
        self.phase_totals_ms.get(&phase).copied().unwrap_or(0.0)
    }
}

/// Container for the per-heap join catalog. Replay errors surface when this is built;
/// the catalog only sees expected absence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleJoinSummary {
    pub gc_number: u32,
    pub heaps: Failable<Vec<HeapJoinSummary>>,
}

impl CycleJoinSummary {
    pub fn summarize(
        cycle: &CollectionCycle,
        table: &PhaseTable,
        policy: TrailingStagePolicy,
    ) -> GcJoinResult<Self> {
        let heaps = match cycle.server_heaps() {
            Ok(heaps) => Ok(heaps
                .iter()
                .map(|h| HeapJoinSummary::from_history(h, table, policy))
                .collect::<GcJoinResult<Vec<_>>>()?),
            Err(failure) => Err(failure),
        };
        Ok(Self {
            gc_number: cycle.gc_number,
            heaps,
        })
    }
}

pub const JOIN_TIME_METRICS: &[&str] = &[
    "MedianIndividualJoinMSec",
    "MaxIndividualJoinMSec",
    "TotalJoinMSec",
];

pub const DID_SINGLE_THREADED_JOIN: &str = "DidSingleThreadedJoin";

pub type JoinCatalog = StatisticsCatalog<'static, CycleJoinSummary>;

/// Stages with a per-heap total; restart events carry no stage of their own.
pub fn measured_stages() -> impl Iterator<Item = StageId> {
    StageId::ALL.iter().copied().filter(|s| *s != StageId::Restart)
}

/// Per-heap join metrics aggregated over the heaps of a GC, e.g. `TotalJoinMSec_Max`,
/// `begin_mark_phase_Mean`, `mark_Mean`, `CountDidSingleThreadedJoin`.
pub fn join_catalog(table: &PhaseTable) -> GcJoinResult<JoinCatalog> {
    let mut metrics = vec![
        ElementMetric::float(
            "MedianIndividualJoinMSec",
            |_: &CycleJoinSummary, heaps: &[HeapJoinSummary], i| {
                heaps[i].median_individual_join_ms()
            },
        ),
        ElementMetric::float(
            "MaxIndividualJoinMSec",
            |_: &CycleJoinSummary, heaps: &[HeapJoinSummary], i| heaps[i].max_individual_join_ms(),
        ),
        ElementMetric::float(
            "TotalJoinMSec",
            |_: &CycleJoinSummary, heaps: &[HeapJoinSummary], i| heaps[i].total_join_ms(),
        ),
    ];
    for stage in measured_stages() {
        metrics.push(ElementMetric::float(
            stage.name(),
            move |_: &CycleJoinSummary, heaps: &[HeapJoinSummary], i| {
                Ok(heaps[i].stage_total_ms(stage))
            },
        ));
    }
    for phase in table.phases() {
        metrics.push(ElementMetric::float(
            phase.name(),
            move |_: &CycleJoinSummary, heaps: &[HeapJoinSummary], i| {
                Ok(heaps[i].phase_total_ms(phase))
            },
        ));
    }
    metrics.push(ElementMetric::bool(
        DID_SINGLE_THREADED_JOIN,
        |_: &CycleJoinSummary, heaps: &[HeapJoinSummary], i| Ok(heaps[i].did_single_threaded_join),
    ));

    CatalogBuilder::new(|c: &CycleJoinSummary| c.heaps.clone())
        .element_metrics(metrics)
        .special_aggregate("HeapCount", |_, heaps: &[HeapJoinSummary]| {
            Ok(MetricValue::Int(heaps.len() as i64))
        })
        .build()
}

/// Short names for groups of per-heap metrics.
pub fn per_heap_metric_aliases(table: &PhaseTable) -> IndexMap<&'static str, Vec<String>> {
    let mut out = IndexMap::new();
    out.insert("joinTimes", JOIN_TIME_METRICS.iter().map(|m| m.to_string()).collect());
    out.insert("stages", measured_stages().map(|s| s.name().to_string()).collect());
    out.insert("phases", table.phases().map(|p| p.name().to_string()).collect());
    out
}

/// Short names for groups of per-GC metrics in the join catalog.
pub fn per_cycle_metric_aliases(table: &PhaseTable) -> IndexMap<&'static str, Vec<String>> {
    let mut out = IndexMap::new();
    out.insert(
        "joinTimes",
        vec!["TotalJoinMSec_Max".to_string(), "TotalJoinMSec_Mean".to_string()],
    );
    out.insert("stages", measured_stages().map(|s| format!("{}_Mean", s.name())).collect());
    out.insert("phases", table.phases().map(|p| format!("{}_Mean", p.name())).collect());
    out
}

/// Everything the join analysis reports for one GC.
#[derive(Debug, Clone, Serialize)]
pub struct JoinStatisticsReport {
    pub gc_number: u32,
    pub statistics: Failable<GcJoinStatistics>,
    pub timeline: JoinTimeline,
    pub heap_metrics: IndexMap<String, Failable<MetricValue>>,
}

impl JoinStatisticsReport {
    pub fn to_json(&self) -> GcJoinResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Builds [`JoinStatisticsReport`]s with one phase table, config and catalog.
#[derive(Debug)]
pub struct JoinStatisticsReporter {
    table: PhaseTable,
    config: AnalysisConfig,
    catalog: JoinCatalog,
}

impl JoinStatisticsReporter {
    pub fn new(table: PhaseTable, config: AnalysisConfig) -> GcJoinResult<Self> {
        let catalog = join_catalog(&table)?;
        Ok(Self {
            table,
            config,
            catalog,
        })
    }

    pub fn catalog(&self) -> &JoinCatalog {
        &self.catalog
    }

    pub fn report(&self, cycle: &CollectionCycle) -> GcJoinResult<JoinStatisticsReport> {
        tracing::debug!(
            gc = cycle.gc_number,
            heaps = cycle.heaps.len(),
            "building join report"
        );
        let policy = self.config.trailing_stage_policy;
        let statistics = GcJoinStatistics::compute(cycle, &self.table, policy)?;
        let timeline = JoinTimeline::reconstruct(
            cycle.event_slices(),
            &self.table,
            cycle.pause_duration_ms,
            &self.config,
        )?;
        let summary = CycleJoinSummary::summarize(cycle, &self.table, policy)?;
        if let Err(failure) = &summary.heaps {
            tracing::debug!(gc = cycle.gc_number, %failure, "no per-heap join metrics");
        }
        Ok(JoinStatisticsReport {
            gc_number: cycle.gc_number,
            statistics,
            timeline,
            heap_metrics: self.catalog.evaluate_all(&summary),
        })
    }

    /// Resolves the per-GC aliases against one cycle's metrics.
    pub fn aliased_metrics(
        &self,
        alias: &str,
        cycle: &CollectionCycle,
    ) -> GcJoinResult<IndexMap<String, Failable<MetricValue>>> {
        let aliases = per_cycle_metric_aliases(&self.table);
        let names = aliases
            .get(alias)
            .ok_or_else(|| GcJoinError::UnknownMetric(alias.to_string()))?;
        let summary =
            CycleJoinSummary::summarize(cycle, &self.table, self.config.trailing_stage_policy)?;
        self.catalog.evaluate_selected(names, &summary)
    }
}
