//! User <-> connection binding table.
//!
//! Holds the live set and the two inverse maps. Every bound pair `(u, c)`
//! satisfies `user_to_conn[u] == c` and `conn_to_user[c] == u`, each user
//! maps to at most one connection, and only live connections are bound.
//! Not synchronized; the router wraps it in a single lock.

use std::collections::HashMap;

pub type ConnectionId = u64;
pub type UserId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound {
        /// Connection that previously held this user, now unbound but live.
        evicted: Option<ConnectionId>,
        /// User this connection was bound to before, if it re-authenticated.
        replaced_user: Option<UserId>,
    },
    /// Connection was already bound to this user; nothing changed.
    AlreadyBound,
    UnknownConnection,
}

#[derive(Debug)]
pub struct RoutingTable<H> {
    live: HashMap<ConnectionId, H>,
    user_to_conn: HashMap<UserId, ConnectionId>,
    conn_to_user: HashMap<ConnectionId, UserId>,
}

impl<H> Default for RoutingTable<H> {
    fn default() -> Self {
        Self {
            live: HashMap::new(),
            user_to_conn: HashMap::new(),
            conn_to_user: HashMap::new(),
        }
    }
}

impl<H: Clone> RoutingTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unbound live connection.
    pub fn insert(&mut self, conn: ConnectionId, handle: H) {
        self.live.insert(conn, handle);
    }

    pub fn bind(&mut self, conn: ConnectionId, user: &str) -> BindOutcome {
        if !self.live.contains_key(&conn) {
            return BindOutcome::UnknownConnection;
        }
        if self.conn_to_user.get(&conn).map(String::as_str) == Some(user) {
            return BindOutcome::AlreadyBound;
        }

        // Drop this connection's old binding first.
        let replaced_user = self.conn_to_user.remove(&conn);
        if let Some(old_user) = &replaced_user {
            self.user_to_conn.remove(old_user);
        }

        // Then take the user away from whoever holds it.
        let evicted = self.user_to_conn.remove(user);
        if let Some(previous) = evicted {
            self.conn_to_user.remove(&previous);
        }

        self.user_to_conn.insert(user.to_string(), conn);
        self.conn_to_user.insert(conn, user.to_string());

        BindOutcome::Bound {
            evicted,
            replaced_user,
        }
    }

    /// Forget a connection entirely. Returns its handle if it was live.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<H> {
        if let Some(user) = self.conn_to_user.remove(&conn) {
            self.user_to_conn.remove(&user);
        }
        self.live.remove(&conn)
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<&str> {
        self.conn_to_user.get(&conn).map(String::as_str)
    }

    pub fn connection_of(&self, user: &str) -> Option<ConnectionId> {
        self.user_to_conn.get(user).copied()
    }

    pub fn handle(&self, conn: ConnectionId) -> Option<H> {
        self.live.get(&conn).cloned()
    }

    pub fn handle_for_user(&self, user: &str) -> Option<H> {
        self.connection_of(user).and_then(|conn| self.handle(conn))
    }

    pub fn live_handles(&self) -> Vec<H> {
        self.live.values().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn bound_count(&self) -> usize {
        self.user_to_conn.len()
    }

    /// Check the inverse-map invariant.
    pub fn is_consistent(&self) -> bool {
        self.user_to_conn.len() == self.conn_to_user.len()
            && self.user_to_conn.iter().all(|(user, conn)| {
                self.conn_to_user.get(conn) == Some(user) && self.live.contains_key(conn)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table_with(conns: &[ConnectionId]) -> RoutingTable<ConnectionId> {
        let mut table = RoutingTable::new();
        for &c in conns {
            table.insert(c, c);
        }
        table
    }

    #[test]
    fn test_bind_unbound_connection() {
        let mut table = table_with(&[1]);
        assert_eq!(
            table.bind(1, "u1"),
            BindOutcome::Bound {
                evicted: None,
                replaced_user: None
            }
        );
        assert_eq!(table.user_of(1), Some("u1"));
        assert_eq!(table.connection_of("u1"), Some(1));
    }

    #[test]
    fn test_rebind_same_user_is_noop() {
        let mut table = table_with(&[1]);
        table.bind(1, "u1");
        assert_eq!(table.bind(1, "u1"), BindOutcome::AlreadyBound);
        assert_eq!(table.bound_count(), 1);
    }

    #[test]
    fn test_user_moves_to_new_connection() {
        let mut table = table_with(&[1, 2]);
        table.bind(1, "u");
        assert_eq!(
            table.bind(2, "u"),
            BindOutcome::Bound {
                evicted: Some(1),
                replaced_user: None
            }
        );
        assert_eq!(table.connection_of("u"), Some(2));
        assert_eq!(table.user_of(1), None);
        // Evicted connection stays live.
        assert_eq!(table.live_count(), 2);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_connection_switches_user() {
        let mut table = table_with(&[1, 2]);
        table.bind(1, "a");
        table.bind(2, "b");
        assert_eq!(
            table.bind(1, "b"),
            BindOutcome::Bound {
                evicted: Some(2),
                replaced_user: Some("a".to_string())
            }
        );
        assert_eq!(table.connection_of("a"), None);
        assert_eq!(table.connection_of("b"), Some(1));
        assert_eq!(table.user_of(2), None);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_bind_unknown_connection() {
        let mut table = table_with(&[]);
        assert_eq!(table.bind(9, "u"), BindOutcome::UnknownConnection);
        assert_eq!(table.bound_count(), 0);
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let mut table = table_with(&[1]);
        table.bind(1, "u");
        assert_eq!(table.remove(1), Some(1));
        assert_eq!(table.connection_of("u"), None);
        assert_eq!(table.live_count(), 0);
        assert_eq!(table.remove(1), None);
        assert!(table.is_consistent());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Open,
        Bind(usize, u8),
        Close(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Open),
            (0usize..8, 0u8..4).prop_map(|(c, u)| Op::Bind(c, u)),
            (0usize..8).prop_map(Op::Close),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariant_holds_for_any_sequence(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut table: RoutingTable<ConnectionId> = RoutingTable::new();
            let mut opened: Vec<ConnectionId> = Vec::new();
            let mut next_id: ConnectionId = 0;

            for op in ops {
                match op {
                    Op::Open => {
                        table.insert(next_id, next_id);
                        opened.push(next_id);
                        next_id += 1;
                    }
                    Op::Bind(idx, user) => {
                        if opened.is_empty() { continue; }
                        let conn = opened[idx % opened.len()];
                        let user = format!("u{}", user);
                        let live_before = table.live_count();
                        let holder_before = table.connection_of(&user);

                        let outcome = table.bind(conn, &user);

                        if let BindOutcome::Bound { evicted, .. } = outcome {
                            prop_assert_eq!(evicted, holder_before.filter(|c| *c != conn));
                            prop_assert_eq!(table.connection_of(&user), Some(conn));
                            if let Some(old) = evicted {
                                prop_assert_eq!(table.user_of(old), None);
                                prop_assert!(table.handle(old).is_some());
                            }
                        }
                        prop_assert_eq!(table.live_count(), live_before);
                    }
                    Op::Close(idx) => {
                        if opened.is_empty() { continue; }
                        let conn = opened.remove(idx % opened.len());
                        table.remove(conn);
                        prop_assert!(table.user_of(conn).is_none());
                    }
                }
                prop_assert!(table.is_consistent());
                prop_assert!(table.bound_count() <= table.live_count());
            }
        }
    }
}
