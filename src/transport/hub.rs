use crate::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Room registry shared by the relay and every connected client.
///
/// Each user has a room named by their id. A room holds one sender per live
/// connection; closed connections are pruned whenever the room is written to.
#[derive(Clone, Debug, Default)]
pub struct RoomHub {
    // user -> one sender per connection
    rooms: Arc<RwLock<HashMap<UserId, Vec<UnboundedSender<String>>>>>,
}

impl RoomHub {
    /// An empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to `user`'s room.
    pub async fn join(&self, user: UserId) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        let mut rooms = self.rooms.write().await;
        rooms.entry(user).or_default().push(tx);
        rx
    }

    /// Pushes a frame to every live connection in `user`'s room.
    ///
    /// Returns how many connections received it.
    pub async fn send_to(&self, user: &UserId, frame: String) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(connections) = rooms.get_mut(user) else {
            return 0;
        };

        connections.retain(|sender| sender.send(frame.clone()).is_ok());
        let delivered = connections.len();
        if connections.is_empty() {
            rooms.remove(user);
        }
        delivered
    }

    /// Whether `user` has at least one live connection.
    pub async fn is_connected(&self, user: &UserId) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(user)
            .is_some_and(|connections| connections.iter().any(|sender| !sender.is_closed()))
    }
}
