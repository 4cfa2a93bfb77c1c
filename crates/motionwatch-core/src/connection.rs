//! Source connection manager.
//!
//! Owns the single source session of a cycle and its lifecycle:
//!
//! ```text
//! Disconnected ── acquire() ──→ Connecting ──→ Ready
//!                                   ↑            │ connection-level error
//!                                   └─ Degraded ←┘
//! ```
//!
//! Requests that fail at the connection level discard the session, reconnect
//! under the retry policy and are re-issued from scratch.

use crate::model::{AckMode, ConnectionState, ItemFilter, Payload, SourceItem};
use crate::retry::RetryPolicy;
use crate::source::{Source, SourceSession};
use crate::{Error, Result};

/// Holds at most one live session for a [`Source`].
pub struct ConnectionManager<S: Source> {
    source: S,
    policy: RetryPolicy,
    state: ConnectionState,
    session: Option<S::Session>,
}

impl<S: Source> std::fmt::Debug for ConnectionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("source", &self.source.describe())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// One request to the session, replayable after a reconnect.
enum Request<'r> {
    List(&'r ItemFilter),
    Fetch(&'r SourceItem),
    Acknowledge(&'r SourceItem, AckMode),
}

impl Request<'_> {
    const fn operation(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Fetch(_) => "fetch",
            Self::Acknowledge(..) => "acknowledge",
        }
    }
}

enum Reply {
    Items(Vec<SourceItem>),
    Payloads(Vec<Payload>),
    Done,
}

async fn dispatch<T: SourceSession>(session: &mut T, request: &Request<'_>) -> Result<Reply> {
    match *request {
        Request::List(filter) => session.list(filter).await.map(Reply::Items),
        Request::Fetch(item) => session.fetch(item).await.map(Reply::Payloads),
        Request::Acknowledge(item, mode) => session.acknowledge(item, mode).await.map(|()| Reply::Done),
    }
}

impl<S: Source> ConnectionManager<S> {
    /// Creates a disconnected manager.
    pub const fn new(source: S, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            state: ConnectionState::Disconnected,
            session: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The wrapped source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Establishes a session and returns a handle for one cycle.
    ///
    /// The handle must be given back with [`Connection::release`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the retry policy is exhausted, or the
    /// source's own error if it refuses the session outright (for example
    /// rejected credentials).
    pub async fn acquire(&mut self) -> Result<Connection<'_, S>> {
        if self.session.is_none() {
            self.establish().await?;
        }
        Ok(Connection {
            manager: self,
            released: false,
        })
    }

    async fn establish(&mut self) -> Result<()> {
        self.transition(ConnectionState::Connecting);
        let source = &self.source;
        let result = self
            .policy
            .run("connect", Error::is_connection_level, || source.connect())
            .await;

        match result {
            Ok(session) => {
                self.session = Some(session);
                self.transition(ConnectionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected);
                if e.is_connection_level() {
                    Err(Error::Connection(format!(
                        "{} unreachable after {} attempts: {e}",
                        self.source.describe(),
                        self.policy.max_attempts.max(1)
                    )))
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn call(&mut self, request: Request<'_>) -> Result<Reply> {
        let operation = request.operation();
        let max = self.policy.max_attempts.max(1);
        let mut reissues = 0;

        loop {
            if self.session.is_none() {
                self.establish().await?;
            }
            let policy = self.policy;
            let Some(session) = self.session.as_mut() else {
                return Err(Error::Connection("no session".into()));
            };

            match policy.timed(operation, dispatch(session, &request)).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_connection_level() => {
                    self.session = None;
                    self.transition(ConnectionState::Degraded);
                    reissues += 1;
                    tracing::warn!(operation, attempt = reissues, error = %e, "Session failed");
                    if reissues >= max {
                        self.transition(ConnectionState::Disconnected);
                        return Err(Error::Connection(format!(
                            "{operation} failed after {reissues} attempts: {e}"
                        )));
                    }
                    tokio::time::sleep(policy.delay(reissues)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            let policy = self.policy;
            if let Err(e) = policy.timed("logout", session.disconnect()).await {
                tracing::warn!(error = %e, "Logout failed");
            }
        }
        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, state = %next, "Connection state changed");
            self.state = next;
        }
    }
}

/// A live session lent out for one cycle.
pub struct Connection<'a, S: Source> {
    manager: &'a mut ConnectionManager<S>,
    released: bool,
}

impl<S: Source> std::fmt::Debug for Connection<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.manager.state)
            .finish_non_exhaustive()
    }
}

impl<S: Source> Connection<'_, S> {
    /// Lists candidate items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the session cannot be restored, or
    /// the source's error for this request.
    pub async fn list(&mut self, filter: &ItemFilter) -> Result<Vec<SourceItem>> {
        match self.manager.call(Request::List(filter)).await? {
            Reply::Items(items) => Ok(items),
            _ => Err(Error::Source("unexpected reply to list".into())),
        }
    }

    /// Downloads an item's payloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the session cannot be restored, or
    /// the source's error for this request.
    pub async fn fetch(&mut self, item: &SourceItem) -> Result<Vec<Payload>> {
        match self.manager.call(Request::Fetch(item)).await? {
            Reply::Payloads(payloads) => Ok(payloads),
            _ => Err(Error::Source("unexpected reply to fetch".into())),
        }
    }

    /// Acknowledges an item at the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the session cannot be restored, or
    /// the source's error for this request.
    pub async fn acknowledge(&mut self, item: &SourceItem, mode: AckMode) -> Result<()> {
        self.manager
            .call(Request::Acknowledge(item, mode))
            .await
            .map(drop)
    }

    /// Logs out and returns the manager to `Disconnected`.
    pub async fn release(mut self) {
        self.manager.teardown().await;
        self.released = true;
    }
}

impl<S: Source> Drop for Connection<'_, S> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Connection dropped without release, discarding session");
            self.manager.session = None;
            self.manager.state = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::retry::Backoff;

    #[derive(Default)]
    struct Script {
        connects: AtomicU32,
        disconnects: AtomicU32,
        lists: AtomicU32,
        /// Connection attempts after this many fail.
        healthy_connects: Option<u32>,
        list_errors: Mutex<VecDeque<Error>>,
        hang_lists: AtomicU32,
    }

    struct FakeSource(Arc<Script>);
    struct FakeSession(Arc<Script>);

    #[async_trait]
    impl Source for FakeSource {
        type Session = FakeSession;

        async fn connect(&self) -> Result<FakeSession> {
            let n = self.0.connects.fetch_add(1, Ordering::SeqCst) + 1;
            if self.0.healthy_connects.is_some_and(|limit| n > limit) {
                return Err(Error::Connection("refused".into()));
            }
            Ok(FakeSession(Arc::clone(&self.0)))
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    #[async_trait]
    impl SourceSession for FakeSession {
        async fn list(&mut self, _: &ItemFilter) -> Result<Vec<SourceItem>> {
            self.0.lists.fetch_add(1, Ordering::SeqCst);
            if self.0.hang_lists.load(Ordering::SeqCst) > 0 {
                self.0.hang_lists.fetch_sub(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            match self.0.list_errors.lock().unwrap().pop_front() {
                Some(e) => Err(e),
                None => Ok(Vec::new()),
            }
        }

        async fn fetch(&mut self, _: &SourceItem) -> Result<Vec<Payload>> {
            Ok(Vec::new())
        }

        async fn acknowledge(&mut self, _: &SourceItem, _: AckMode) -> Result<()> {
            Ok(())
        }

        async fn disconnect(self) -> Result<()> {
            self.0.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
            call_timeout: Duration::from_secs(10),
        }
    }

    fn filter() -> ItemFilter {
        ItemFilter {
            lookback: Duration::from_secs(60),
            keyword: None,
            unseen_only: false,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let script = Arc::new(Script::default());
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let mut conn = manager.acquire().await.unwrap();
        conn.list(&filter()).await.unwrap();
        conn.release().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_reissues() {
        let script = Arc::new(Script::default());
        script
            .list_errors
            .lock()
            .unwrap()
            .push_back(Error::Connection("BYE".into()));
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());

        let mut conn = manager.acquire().await.unwrap();
        conn.list(&filter()).await.unwrap();
        conn.release().await;

        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
        assert_eq!(script.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_policy() {
        let script = Arc::new(Script {
            healthy_connects: Some(1),
            ..Script::default()
        });
        script
            .list_errors
            .lock()
            .unwrap()
            .push_back(Error::Connection("protocol violation".into()));
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());

        let mut conn = manager.acquire().await.unwrap();
        let err = conn.list(&filter()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        conn.release().await;

        // One initial connect plus three reconnect attempts.
        assert_eq!(script.connects.load(Ordering::SeqCst), 4);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_source_error_is_not_retried() {
        let script = Arc::new(Script::default());
        script
            .list_errors
            .lock()
            .unwrap()
            .push_back(Error::Source("NO mailbox busy".into()));
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());

        let mut conn = manager.acquire().await.unwrap();
        assert!(matches!(
            conn.list(&filter()).await,
            Err(Error::Source(_))
        ));
        conn.release().await;
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_reconnect() {
        let script = Arc::new(Script::default());
        script.hang_lists.store(1, Ordering::SeqCst);
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());

        let mut conn = manager.acquire().await.unwrap();
        conn.list(&filter()).await.unwrap();
        conn.release().await;
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_exhaustion() {
        let script = Arc::new(Script {
            healthy_connects: Some(0),
            ..Script::default()
        });
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());
        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connection(m) if m.contains("3 attempts")));
        assert_eq!(script.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_drop_without_release_discards_session() {
        let script = Arc::new(Script::default());
        let mut manager = ConnectionManager::new(FakeSource(Arc::clone(&script)), policy());
        drop(manager.acquire().await.unwrap());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
