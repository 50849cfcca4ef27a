use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::models::ActiveUser;

/// The users present in one document. Guarded by its own lock so documents never contend.
#[derive(Debug)]
pub struct DocumentSession {
    pub document_id: String,
    users: RwLock<HashMap<String, ActiveUser>>,
}

impl DocumentSession {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite by user id
    pub fn add_user(&self, user: ActiveUser) {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.user_id.clone(), user);
    }

    pub fn remove_user(&self, user_id: &str) -> bool {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id)
            .is_some()
    }

    /// Refresh cursor and activity time. Returns `false` if the user is not in the session.
    pub fn update_user_activity(&self, user_id: &str, cursor_position: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        match users.get_mut(user_id) {
            Some(user) => {
                user.cursor_position = cursor_position.to_string();
                user.last_active = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn active_users(&self) -> Vec<ActiveUser> {
        let mut users: Vec<ActiveUser> = self
            .users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of removing a user through the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub was_present: bool,
    pub session_closed: bool,
}

/// Document id to live session. A session exists only while it has at least one user.
///
/// Lock order is always registry then session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<DocumentSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<DocumentSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_or_create_session(&self, document_id: &str) -> Arc<DocumentSession> {
        self.lock()
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(DocumentSession::new(document_id)))
            .clone()
    }

    pub fn get_session(&self, document_id: &str) -> Option<Arc<DocumentSession>> {
        self.lock().get(document_id).cloned()
    }

    /// Unconditional removal; callers decide when a session is finished
    pub fn remove_session(&self, document_id: &str) {
        self.lock().remove(document_id);
    }

    /// Add `user` to the document's session, creating the session if needed. Returns the
    /// session and whether it was created by this call.
    pub fn join(&self, document_id: &str, user: ActiveUser) -> (Arc<DocumentSession>, bool) {
        let mut sessions = self.lock();
        let mut created = false;
        let session = sessions
            .entry(document_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(DocumentSession::new(document_id))
            })
            .clone();
        session.add_user(user);
        (session, created)
    }

    /// Remove a user and tear the session down once it is empty. Both happen under the
    /// registry lock so a concurrent join can never land in a session that is being removed.
    pub fn leave(&self, document_id: &str, user_id: &str) -> Departure {
        let mut sessions = self.lock();
        let Some(session) = sessions.get(document_id).cloned() else {
            return Departure {
                was_present: false,
                session_closed: false,
            };
        };
        let was_present = session.remove_user(user_id);
        let session_closed = session.is_empty();
        if session_closed {
            sessions.remove(document_id);
        }
        Departure {
            was_present,
            session_closed,
        }
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.lock().contains_key(document_id)
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    pub fn user_count(&self) -> usize {
        self.lock().values().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lives_exactly_while_users_remain() {
        let registry = SessionRegistry::new();
        assert!(!registry.contains("d1"));

        let (_, created) = registry.join("d1", ActiveUser::new("a", "Alice"));
        assert!(created);
        let (_, created) = registry.join("d1", ActiveUser::new("b", "Bob"));
        assert!(!created);
        assert_eq!(registry.user_count(), 2);

        let departure = registry.leave("d1", "a");
        assert!(departure.was_present);
        assert!(!departure.session_closed);
        assert!(registry.contains("d1"));

        let departure = registry.leave("d1", "b");
        assert!(departure.session_closed);
        assert!(!registry.contains("d1"));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn leaving_an_unknown_user_is_a_no_op() {
        let registry = SessionRegistry::new();
        let departure = registry.leave("d1", "ghost");
        assert!(!departure.was_present);
        assert!(!departure.session_closed);
        assert!(!registry.contains("d1"));

        registry.join("d1", ActiveUser::new("a", "Alice"));
        let departure = registry.leave("d1", "ghost");
        assert!(!departure.was_present);
        assert!(registry.contains("d1"));
    }

    #[test]
    fn rejoin_overwrites_by_user_id() {
        let registry = SessionRegistry::new();
        registry.join("d1", ActiveUser::new("a", "Alice"));
        let (session, _) = registry.join("d1", ActiveUser::new("a", "Alice Smith"));
        let users = session.active_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "Alice Smith");
    }

    #[test]
    fn activity_updates_only_touch_members() {
        let registry = SessionRegistry::new();
        let (session, _) = registry.join("d1", ActiveUser::new("a", "Alice"));
        let before = session.active_users()[0].last_active;

        assert!(session.update_user_activity("a", "4:2"));
        assert!(!session.update_user_activity("ghost", "1:1"));

        let user = &session.active_users()[0];
        assert_eq!(user.cursor_position, "4:2");
        assert!(user.last_active >= before);
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn get_or_create_and_remove() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create_session("d1");
        let second = registry.get_or_create_session("d1");
        assert!(Arc::ptr_eq(&first, &second));
        registry.remove_session("d1");
        assert!(registry.get_session("d1").is_none());
    }
}
