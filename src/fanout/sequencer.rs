use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ids::ConversationId;

const LANES: usize = 64;

/// Orders "write to the store, then publish" per conversation, so a room sees
/// events in the order their writes committed.
///
/// Conversations hash onto a fixed set of lanes. Two conversations sharing a
/// lane wait on each other; nothing is allocated per conversation.
#[derive(Clone)]
pub struct Sequencer {
    lanes: Arc<[Arc<Mutex<()>>]>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::with_lanes(LANES)
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lanes(lanes: usize) -> Self {
        let lanes: Arc<[_]> = (0..lanes.max(1)).map(|_| Arc::new(Mutex::new(()))).collect();
        Self { lanes }
    }

    /// Waits for the conversation's turn. The turn lasts until the guard is
    /// dropped, which may happen on another task.
    pub async fn enter(&self, conversation_id: ConversationId) -> OwnedMutexGuard<()> {
        let lane = (conversation_id.0.as_u128() % self.lanes.len() as u128) as usize;
        self.lanes[lane].clone().lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn same_conversation_waits_for_the_turn() {
        let sequencer = Sequencer::new();
        let room = ConversationId::new();

        let turn = sequencer.enter(room).await;
        assert!(timeout(Duration::from_millis(20), sequencer.enter(room)).await.is_err());

        let handoff = tokio::spawn(async move { drop(turn) });
        handoff.await.unwrap();
        assert!(timeout(Duration::from_millis(200), sequencer.enter(room)).await.is_ok());
    }

    #[tokio::test]
    async fn other_lanes_are_not_blocked() {
        let sequencer = Sequencer::with_lanes(2);
        let even = ConversationId(Uuid::from_u128(10));
        let odd = ConversationId(Uuid::from_u128(11));

        let _turn = sequencer.enter(even).await;
        assert!(timeout(Duration::from_millis(200), sequencer.enter(odd)).await.is_ok());
    }
}
