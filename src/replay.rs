//! Replays one heap's join/restart events into per-stage durations.
//!
//! Each heap's list is in timestamp order, but restart events fired by *other* heaps' GC
//! threads are interleaved into it (the restart event records the processor of whichever
//! thread did the restart). How a stage ends depends on how this heap joined it:
//!
//! - `join`: the thread waits, so the stage ends at this heap's own join end.
//! - `last_join`: this heap joined last and runs alone; the stage ends when it restarts the
//!   other threads, i.e. at the restart end.
//! - `first_r_join`: right-join; the heap that does the work only ever sees the restart.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{
    EventCursor, GcJoinError, GcJoinResult, HeapId, JoinEdge, JoinEvent, JoinKind, StageId,
    TrailingStagePolicy,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageDuration {
    pub stage: StageId,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayState {
    Initial,
    Running,
    Finished,
}

/// Lazy iterator of stage durations for one heap. Stops after the first error.
#[derive(Debug)]
pub struct StageReplayer<'a> {
    heap: HeapId,
    cursor: EventCursor<'a>,
    policy: TrailingStagePolicy,
    state: ReplayState,
    truncated_stage: Option<StageId>,
}

impl<'a> StageReplayer<'a> {
    pub fn new(heap: HeapId, events: &'a [JoinEvent], policy: TrailingStagePolicy) -> Self {
        Self {
            heap,
            cursor: EventCursor::new(events),
            policy,
            state: ReplayState::Initial,
            truncated_stage: None,
        }
    }

    /// The trailing stage dropped under the [`TrailingStagePolicy`], once replay has
    /// reached it.
    pub fn truncated_stage(&self) -> Option<StageId> {
        self.truncated_stage
    }

    fn unbalanced(&self, message: impl Into<String>) -> GcJoinError {
        GcJoinError::Unbalanced {
            heap: self.heap,
            index: self.cursor.position(),
            message: message.into(),
        }
    }

    /// `generation_determined` is joined before the GC start event fires, so the trace may
    /// hold only its tail. We can't tell whether it began as a join or a last join, hence
    /// whether a join end follows, so all of it is discarded.
    fn skip_initial(&mut self) -> GcJoinResult<()> {
        let Some(first) = self.cursor.next() else {
            return Ok(());
        };
        if first.is_restart_start() {
            while let Some(e) = self.cursor.next() {
                if e.is_join_end() {
                    self.expect_stage(StageId::GenerationDetermined, e)?;
                } else if !e.is_restart_end() {
                    self.cursor.unconsume();
                    break;
                }
            }
        } else if first.is_join_start() {
            self.expect_stage(StageId::GenerationDetermined, first)?;
            let end = self
                .cursor
                .next()
                .ok_or_else(|| self.unbalanced("generation_determined join start without an end"))?;
            if !end.is_join_end() {
                return Err(self.unbalanced(format!(
                    "expected generation_determined join end, found {:?} {:?}",
                    end.kind, end.edge
                )));
            }
            self.expect_stage(StageId::GenerationDetermined, end)?;
        } else if first.is_join_end() {
            self.expect_stage(StageId::GenerationDetermined, first)?;
        } else {
            return Err(self.unbalanced(format!(
                "trace starts with {:?} {:?} of {:?}",
                first.kind, first.edge, first.stage
            )));
        }
        Ok(())
    }

    fn expect_stage(&self, expected: StageId, event: &JoinEvent) -> GcJoinResult<()> {
        if event.stage == expected {
            Ok(())
        } else {
            Err(GcJoinError::StageMismatch {
                heap: self.heap,
                expected,
                found: event.stage,
            })
        }
    }

    /// The restart end may come right away or later, since it's fired from another thread.
    fn maybe_skip_restart_end(&mut self) {
        if let Some(e) = self.cursor.next() {
            if !e.is_restart_end() {
                self.cursor.unconsume();
            }
        }
    }

    /// Next event, looking past one interleaved restart from another heap.
    fn next_skip_restarts(&mut self) -> Option<&'a JoinEvent> {
        let e = self.cursor.next()?;
        if !e.is_restart_start() {
            return Some(e);
        }
        let e2 = self.cursor.next()?;
        if e2.is_restart_end() {
            self.cursor.next()
        } else {
            Some(e2)
        }
    }

    /// End time of a restart pair, or `None` if the events ran out first.
    fn restart_pair_end(&mut self) -> GcJoinResult<Option<f64>> {
        let Some(start) = self.cursor.next() else {
            return Ok(None);
        };
        if !start.is_restart_start() {
            return Err(self.unbalanced(format!(
                "expected restart start, found {:?} {:?} of {:?}",
                start.kind, start.edge, start.stage
            )));
        }
        let Some(end) = self.cursor.next() else {
            return Ok(None);
        };
        if !end.is_restart_end() {
            return Err(self.unbalanced(format!(
                "expected restart end, found {:?} {:?} of {:?}",
                end.kind, end.edge, end.stage
            )));
        }
        Ok(Some(end.timestamp_ms))
    }

    fn end_time(&mut self, start: &JoinEvent) -> GcJoinResult<Option<f64>> {
        match start.kind {
            JoinKind::LastJoin | JoinKind::FirstRJoin => self.restart_pair_end(),
            JoinKind::Join => {
                let Some(end) = self.next_skip_restarts() else {
                    return Ok(None);
                };
                if !end.is_join_end() {
                    return Err(self.unbalanced(format!(
                        "expected join end of {:?}, found {:?} {:?} of {:?}",
                        start.stage, end.kind, end.edge, end.stage
                    )));
                }
                self.expect_stage(start.stage, end)?;
                self.maybe_skip_restart_end();
                Ok(Some(end.timestamp_ms))
            }
            JoinKind::Restart => Err(self.unbalanced("restart handled as a join start")),
        }
    }

    fn on_unterminated(&mut self, stage: StageId) -> GcJoinResult<()> {
        let tolerated = match self.policy {
            TrailingStagePolicy::DoneOnly => stage == StageId::Done,
            TrailingStagePolicy::Any => true,
            TrailingStagePolicy::Strict => false,
        };
        if !tolerated {
            return Err(GcJoinError::Truncated {
                heap: self.heap,
                stage,
            });
        }
        tracing::debug!(heap = self.heap, ?stage, "dropping unterminated trailing stage");
        self.truncated_stage = Some(stage);
        Ok(())
    }

    fn step(&mut self) -> GcJoinResult<Option<StageDuration>> {
        if self.state == ReplayState::Initial {
            self.skip_initial()?;
            self.state = ReplayState::Running;
        }
        loop {
            let Some(start) = self.cursor.next() else {
                return Ok(None);
            };
            if start.is_restart_start() {
                // A restart from another heap; ours would follow our own last join.
                tracing::trace!(
                    heap = self.heap,
                    origin = start.heap_origin,
                    "skipping foreign restart"
                );
                self.maybe_skip_restart_end();
                continue;
            }
            if start.edge != JoinEdge::Start {
                return Err(self.unbalanced(format!(
                    "found {:?} end of {:?} where a join start was expected",
                    start.kind, start.stage
                )));
            }
            return match self.end_time(start)? {
                Some(end_ms) => Ok(Some(StageDuration {
                    stage: start.stage,
                    duration_ms: end_ms - start.timestamp_ms,
                })),
                None => {
                    self.on_unterminated(start.stage)?;
                    Ok(None)
                }
            };
        }
    }
}

impl Iterator for StageReplayer<'_> {
    type Item = GcJoinResult<StageDuration>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReplayState::Finished {
            return None;
        }
        match self.step() {
            Ok(Some(d)) => Some(Ok(d)),
            Ok(None) => {
                self.state = ReplayState::Finished;
                None
            }
            Err(err) => {
                self.state = ReplayState::Finished;
                Some(Err(err))
            }
        }
    }
}

/// All durations per stage for one heap. A stage may be joined more than once per GC.
pub fn join_times_for_heap(
    heap: HeapId,
    events: &[JoinEvent],
    policy: TrailingStagePolicy,
) -> GcJoinResult<BTreeMap<StageId, Vec<f64>>> {
    let mut out = BTreeMap::<StageId, Vec<f64>>::new();
    for d in StageReplayer::new(heap, events, policy) {
        let d = d?;
        out.entry(d.stage).or_default().push(d.duration_ms);
    }
    Ok(out)
}
