use futures_util::lock::Mutex;

use crate::{
    core::{
        hash::HashMap,
        id::SessionId,
    },
    session::session::SessionHandle,
};

/// The accepting node's map of live sessions, keyed by the session id each
/// initiator chose.
#[derive(Default)]
pub struct ConnectionManager {
    active: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl ConnectionManager {
    /// Stores a session once its setup completes.
    pub async fn insert(&self, session_id: SessionId, handle: SessionHandle) {
        self.active.lock().await.insert(session_id, handle);
    }

    /// Removes a session on teardown.
    pub async fn remove(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.active.lock().await.remove(&session_id)
    }

    /// Resolves a live session by id.
    pub async fn get(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.active.lock().await.get(&session_id).cloned()
    }

    /// Every live session.
    pub async fn all(&self) -> Vec<SessionHandle> {
        self.active.lock().await.values().cloned().collect()
    }

    /// The number of live sessions.
    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }
}
