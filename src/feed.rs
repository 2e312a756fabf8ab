//! Change feed: every persisted insert, update or delete is published here
//! and delivered to scoped subscriptions.
//!
//! A [`Subscription`] is a handle over a bounded broadcast receiver plus a set
//! of [`Scope`]s. Events that match no scope are skipped inside `recv`. The
//! handle is closed by [`Subscription::close`] or by dropping it, so every
//! exit path of a consuming session releases it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ListRecord, NoteRecord, Profile, Relationship, ShareGrant, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    UserRelationships,
    Lists,
    Notes,
    Tasks,
    ListShares,
    NoteShares,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The row an event is about. For deletes this is the row as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum Record {
    Profile(Profile),
    Relationship(Relationship),
    List(ListRecord),
    Note(NoteRecord),
    Task(Task),
    ListShare(ShareGrant),
    NoteShare(ShareGrant),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Profile(_) => Table::Profiles,
            Record::Relationship(_) => Table::UserRelationships,
            Record::List(_) => Table::Lists,
            Record::Note(_) => Table::Notes,
            Record::Task(_) => Table::Tasks,
            Record::ListShare(_) => Table::ListShares,
            Record::NoteShare(_) => Table::NoteShares,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Profile(p) => &p.id,
            Record::Relationship(r) => &r.id,
            Record::List(l) => &l.id,
            Record::Note(n) => &n.id,
            Record::Task(t) => &t.id,
            Record::ListShare(g) | Record::NoteShare(g) => &g.id,
        }
    }

    /// Column value used by row filters. Unknown columns never match.
    pub fn column(&self, name: &str) -> Option<&str> {
        match (self, name) {
            (_, "id") => Some(self.id()),
            (Record::Profile(p), "username") => Some(&p.username),
            (Record::Relationship(r), "user_a") => Some(&r.user_a),
            (Record::Relationship(r), "user_b") => Some(&r.user_b),
            (Record::Relationship(r), "initiator") => Some(&r.initiator),
            (Record::List(l), "owner_id") => Some(&l.owner_id),
            (Record::Note(n), "owner_id") => Some(&n.owner_id),
            (Record::Task(t), "list_id") => Some(&t.list_id),
            (Record::Task(t), "created_by") => Some(&t.created_by),
            (Record::ListShare(g) | Record::NoteShare(g), "resource_id") => Some(&g.resource_id),
            (Record::ListShare(g) | Record::NoteShare(g), "grantee_id") => Some(&g.grantee_id),
            (Record::ListShare(g) | Record::NoteShare(g), "granted_by") => Some(&g.granted_by),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Position in the feed, increasing by one per published event.
    pub seq: u64,
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn table(&self) -> Table {
        self.record.table()
    }
}

/// Row-level predicate: equality, membership, or any-of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    All,
    Eq(&'static str, String),
    In(&'static str, Vec<String>),
    Or(Vec<RowFilter>),
}

impl RowFilter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Eq(column, value) => record.column(column) == Some(value.as_str()),
            RowFilter::In(column, values) => record
                .column(column)
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            RowFilter::Or(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }
}

/// One table, the event kinds wanted from it (empty means all), and a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub table: Table,
    pub kinds: Vec<ChangeKind>,
    pub filter: RowFilter,
}

impl Scope {
    pub fn new(table: Table, filter: RowFilter) -> Self {
        Self {
            table,
            kinds: Vec::new(),
            filter,
        }
    }

    pub fn only(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.table() == self.table
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && self.filter.matches(&event.record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The subscriber fell behind and `n` events were dropped. Local state
    /// should be reloaded.
    Lagged(u64),
    Closed,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Lagged(n) => write!(f, "subscription lagged, {n} events missed"),
            FeedError::Closed => write!(f, "change feed closed"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Publisher side of the change feed. Cheap to clone.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    next_seq: Arc<AtomicU64>,
    next_subscription: Arc<AtomicU64>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            next_seq: Arc::new(AtomicU64::new(1)),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish one change. Having no subscribers is not an error.
    pub fn publish(&self, kind: ChangeKind, record: Record) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(ChangeEvent { seq, kind, record });
        seq
    }

    pub fn open_subscription(&self, scopes: Vec<Scope>) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        Subscription {
            id,
            rx: self.tx.subscribe(),
            scopes,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<ChangeEvent>,
    scopes: Vec<Scope>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Replace the filters in place. Queued events are kept and will be
    /// checked against the new scopes.
    pub fn rescope(&mut self, scopes: Vec<Scope>) {
        self.scopes = scopes;
    }

    fn wanted(&self, event: &ChangeEvent) -> bool {
        self.scopes.iter().any(|s| s.matches(event))
    }

    /// Wait for the next event matching one of the scopes.
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wanted(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(FeedError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }

    /// Next matching event that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>, FeedError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wanted(&event) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Err(FeedError::Lagged(n))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        crate::clog!("feed: subscription {} closed", self.id);
    }
}
