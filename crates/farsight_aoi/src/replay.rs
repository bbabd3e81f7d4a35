//! Replay recording of the downstream message flow.

use farsight_wire::ClientMessage;

use crate::types::GameTime;

/// Mirrors every message a witness emits, grouped by tick, so a recorded
/// session can be played back through a spectator client.
///
/// The collector never gates witness behavior: recording failures are the
/// collector's problem, and a witness without one simply skips the mirror
/// calls.
#[derive(Debug, Default)]
pub struct ReplayDataCollector {
    segments: Vec<(GameTime, Vec<ClientMessage>)>,
}

impl ReplayDataCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a segment for `tick`. Messages recorded before the first call
    /// are dropped.
    pub fn begin_tick(&mut self, tick: GameTime) {
        self.segments.push((tick, Vec::new()));
    }

    pub fn record(&mut self, msg: &ClientMessage) {
        if let Some((_, messages)) = self.segments.last_mut() {
            messages.push(msg.clone());
        }
    }

    pub fn segments(&self) -> &[(GameTime, Vec<ClientMessage>)] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<(GameTime, Vec<ClientMessage>)> {
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_group_by_tick() {
        let mut collector = ReplayDataCollector::new();
        collector.record(&ClientMessage::SelectPlayerEntity); // before any tick
        collector.begin_tick(1);
        collector.record(&ClientMessage::TickSync { tick: 1 });
        collector.begin_tick(2);
        collector.record(&ClientMessage::TickSync { tick: 2 });
        collector.record(&ClientMessage::LeaveAoi { id: 7 });

        let segments = collector.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].1.len(), 1);
        assert_eq!(segments[1].1.len(), 2);
    }
}
