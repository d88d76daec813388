//! Asynchronous GPU queries.
//!
//! A query is bracketed by `begin`/`end` (occlusion) or only ended
//! (timestamp). Ending it puts it on the active list; each poll asks the
//! driver without blocking and, once the 64-bit result is available, stores
//! it, writes it through the optional [`QueryTarget`] and takes the query
//! off the list.
//!
//! ```text
//!  Idle ──begin──► Begun ──end──► Ended ──poll──► Polling ──ready──► Resolved
//!   ▲                               ▲                                  │
//!   └──────────── abandon ──────────┴────────────── begin / end ───────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::{SlotMap, new_key_type};

use crate::backend::QueryHandle;
use crate::device::RhiDevice;
use crate::error::{RhiError, RhiResult};
use crate::intrusive::{Link, ListHead, Linked};
use crate::types::QueryKind;

new_key_type! {
    /// Key of a query in a [`QueryRegistry`].
    pub struct QueryKey;
}

/// Lifecycle state of an [`AsyncQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryState {
    /// Created or abandoned; no result pending.
    Idle,
    /// Between begin and end.
    Begun,
    /// Ended and waiting for its first poll.
    Ended,
    /// Polled at least once without a result.
    Polling,
    /// Result received.
    Resolved,
}

/// Shared slot a resolved query writes its value into.
///
/// Used where another component wants the latest result without holding
/// the query, for example GPU clock calibration from timestamp queries.
#[derive(Debug, Clone, Default)]
pub struct QueryTarget(Arc<AtomicU64>);

impl QueryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written, 0 before the first result.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }
}

/// One driver query and its pending result.
#[derive(Debug)]
pub struct AsyncQuery {
    kind: QueryKind,
    handle: QueryHandle,
    state: QueryState,
    result: Option<u64>,
    target: Option<QueryTarget>,
    link: Link<QueryKey>,
}

impl AsyncQuery {
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Cached result of the last resolved end.
    pub fn result(&self) -> Option<u64> {
        self.result
    }

    /// Returns true while the query is on the active list.
    pub fn is_pending(&self) -> bool {
        self.link.is_linked()
    }
}

impl Linked<QueryKey> for AsyncQuery {
    fn link(&self) -> &Link<QueryKey> {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link<QueryKey> {
        &mut self.link
    }
}

/// All queries of a context plus the list of those awaiting results.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: SlotMap<QueryKey, AsyncQuery>,
    active: ListHead<QueryKey>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: QueryKey) -> Option<&AsyncQuery> {
        self.queries.get(key)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Number of queries waiting for a result.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn create(&mut self, device: &mut RhiDevice, kind: QueryKind) -> RhiResult<QueryKey> {
        let handle = device.backend().create_query(kind)?;
        Ok(self.queries.insert(AsyncQuery {
            kind,
            handle,
            state: QueryState::Idle,
            result: None,
            target: None,
            link: Link::default(),
        }))
    }

    /// Issue the driver begin.
    ///
    /// A result still pending from an earlier end is abandoned.
    ///
    /// # Panics
    ///
    /// Panics for timestamp queries and for queries already begun.
    pub fn begin(&mut self, device: &mut RhiDevice, key: QueryKey) -> RhiResult<()> {
        let query = self
            .queries
            .get(key)
            .ok_or(RhiError::InvalidHandle("query"))?;
        if !query.kind.has_begin() {
            crate::fatal!("begin issued on a {:?} query", query.kind);
        }
        if query.state == QueryState::Begun {
            crate::fatal!("begin issued on a query that is already begun");
        }
        if query.is_pending() {
            log::debug!("QueryRegistry: re-begin abandons a pending result");
            self.abandon(key);
        }

        let Some(query) = self.queries.get_mut(key) else {
            return Err(RhiError::InvalidHandle("query"));
        };
        device.backend().begin_query(query.handle);
        query.state = QueryState::Begun;
        query.result = None;
        Ok(())
    }

    /// Issue the driver end and start waiting for the result.
    ///
    /// # Panics
    ///
    /// Panics for occlusion queries that were not begun.
    pub fn end(
        &mut self,
        device: &mut RhiDevice,
        key: QueryKey,
        target: Option<QueryTarget>,
    ) -> RhiResult<()> {
        let query = self
            .queries
            .get(key)
            .ok_or(RhiError::InvalidHandle("query"))?;
        if query.kind.has_begin() && query.state != QueryState::Begun {
            crate::fatal!(
                "end issued on a {:?} query in state {:?}",
                query.kind,
                query.state
            );
        }
        if query.is_pending() {
            self.abandon(key);
        }

        let Some(query) = self.queries.get_mut(key) else {
            return Err(RhiError::InvalidHandle("query"));
        };
        device.backend().end_query(query.handle);
        query.state = QueryState::Ended;
        query.result = None;
        query.target = target;
        self.active.push_back(&mut self.queries, key);
        Ok(())
    }

    /// Poll one query, or every active query with `None`, without blocking.
    ///
    /// Returns the number of queries resolved.
    pub fn poll(&mut self, device: &mut RhiDevice, only: Option<QueryKey>) -> usize {
        let keys = match only {
            Some(key) if self.queries.get(key).is_some_and(AsyncQuery::is_pending) => vec![key],
            Some(_) => Vec::new(),
            None => self.active.keys(&self.queries),
        };
        keys.into_iter()
            .filter(|&key| self.poll_one(device, key, false).is_some())
            .count()
    }

    /// Result of a query, polling the driver if it is still pending.
    ///
    /// With `wait` the call blocks until the driver reports the result.
    /// Returns `None` for queries that were never ended, were abandoned, or
    /// (without `wait`) are not ready yet.
    pub fn result(&mut self, device: &mut RhiDevice, key: QueryKey, wait: bool) -> Option<u64> {
        let query = self.queries.get(key)?;
        if query.state == QueryState::Resolved {
            return query.result;
        }
        if !query.is_pending() {
            return None;
        }
        if !wait {
            return self.poll_one(device, key, false);
        }
        loop {
            if let Some(value) = self.poll_one(device, key, true) {
                return Some(value);
            }
            std::thread::yield_now();
        }
    }

    /// Drop a pending result. Returns false if nothing was pending.
    pub fn abandon(&mut self, key: QueryKey) -> bool {
        if !self.active.unlink(&mut self.queries, key) {
            return false;
        }
        if let Some(query) = self.queries.get_mut(key) {
            query.state = QueryState::Idle;
            query.target = None;
        }
        true
    }

    /// Abandon and release a query. Returns false for a stale key.
    pub fn destroy(&mut self, device: &mut RhiDevice, key: QueryKey) -> bool {
        self.abandon(key);
        let Some(query) = self.queries.remove(key) else {
            return false;
        };
        device.backend().destroy_query(query.handle);
        true
    }

    /// Release every query, at context shutdown.
    pub fn clear(&mut self, device: &mut RhiDevice) {
        for (_, query) in self.queries.drain() {
            device.backend().destroy_query(query.handle);
        }
        self.active = ListHead::new();
    }

    fn poll_one(&mut self, device: &mut RhiDevice, key: QueryKey, wait: bool) -> Option<u64> {
        let query = self.queries.get_mut(key)?;
        let value = device.backend().query_result(query.handle, wait);
        let Some(value) = value else {
            query.state = QueryState::Polling;
            return None;
        };

        query.state = QueryState::Resolved;
        query.result = Some(value);
        if let Some(target) = query.target.take() {
            target.set(value);
        }
        self.active.unlink(&mut self.queries, key);
        device.stats_mut().queries_resolved += 1;
        Some(value)
    }
}
