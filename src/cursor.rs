//! Sequential reader over one heap's join events.

use crate::JoinEvent;

#[derive(Debug)]
pub struct EventCursor<'a> {
    events: &'a [JoinEvent],
    index: usize,
    can_unconsume: bool,
}

impl<'a> EventCursor<'a> {
    pub fn new(events: &'a [JoinEvent]) -> Self {
        Self {
            events,
            index: 0,
            can_unconsume: false,
        }
    }

    pub fn peek(&self) -> Option<&'a JoinEvent> {
        self.events.get(self.index)
    }

    pub fn next(&mut self) -> Option<&'a JoinEvent> {
        let e = self.events.get(self.index)?;
        self.index += 1;
        self.can_unconsume = true;
        Some(e)
    }

    /// Steps back over the event returned by the last `next`.
    ///
    /// # Panics
    ///
    /// If there was no `next` since construction or since the previous `unconsume`.
    pub fn unconsume(&mut self) {
        assert!(
            self.can_unconsume,
            "EventCursor::unconsume without a preceding next (position {})",
            self.index
        );
        self.index -= 1;
        self.can_unconsume = false;
    }

    /// Index of the event `peek` would return.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.events.len().saturating_sub(self.index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JoinEdge, JoinKind, StageId};

    fn events() -> Vec<JoinEvent> {
        vec![
            JoinEvent::new(JoinKind::Join, JoinEdge::Start, StageId::BeginMarkPhase, 0, 1.0),
            JoinEvent::new(JoinKind::Join, JoinEdge::End, StageId::BeginMarkPhase, 0, 2.0),
        ]
    }

    #[test]
    fn peek_does_not_advance() {
        let events = events();
        let cursor = EventCursor::new(&events);
        assert_eq!(cursor.peek().map(|e| e.timestamp_ms), Some(1.0));
        assert_eq!(cursor.peek().map(|e| e.timestamp_ms), Some(1.0));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn next_then_unconsume_rereads_event() {
        let events = events();
        let mut cursor = EventCursor::new(&events);
        assert_eq!(cursor.next().map(|e| e.timestamp_ms), Some(1.0));
        cursor.unconsume();
        assert_eq!(cursor.next().map(|e| e.timestamp_ms), Some(1.0));
        assert_eq!(cursor.next().map(|e| e.timestamp_ms), Some(2.0));
        assert!(cursor.is_exhausted());
        assert!(cursor.next().is_none());
        assert!(cursor.peek().is_none());
        cursor.unconsume();
        assert_eq!(cursor.remaining(), 1);
    }

    #[test]
    fn next_at_end_does_not_enable_unconsume_past_last_read() {
        let events = events();
        let mut cursor = EventCursor::new(&events[..1]);
        cursor.next();
        cursor.unconsume();
        assert!(cursor.next().is_some());
        assert!(cursor.next().is_none());
        cursor.unconsume();
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    #[should_panic(expected = "without a preceding next")]
    fn double_unconsume_panics() {
        let events = events();
        let mut cursor = EventCursor::new(&events);
        cursor.next();
        cursor.unconsume();
        cursor.unconsume();
    }

    #[test]
    #[should_panic(expected = "without a preceding next")]
    fn unconsume_at_start_panics() {
        let events = events();
        let mut cursor = EventCursor::new(&events);
        cursor.unconsume();
    }
}
