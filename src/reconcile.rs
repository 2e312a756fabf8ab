//! Per-session view of everything visible to one user, kept current from the
//! change feed.
//!
//! [`SessionView`] applies change events idempotently: inserts of known rows
//! are ignored, updates of unknown rows fetch the row, deletes always remove.
//! Local optimistic mutations are recorded in a pending table keyed by
//! (table, id) together with the value they replaced, so a failed store call
//! can be rolled back. [`LiveSession`] pairs a view with a feed subscription.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::CotaskResult;
use crate::feed::{
    ChangeEvent, ChangeFeed, ChangeKind, FeedError, Record, RowFilter, Scope, Subscription, Table,
};
use crate::ledger::ContactCursor;
use crate::logging;
use crate::model::{
    Access, Profile, Relationship, Resource, ResourceKind, ShareGrant, Shareable, Task,
};
use crate::permissions::resolve;
use crate::sharing::{grant_record, resource_record, VisibleResource};
use crate::storage::Storage;

/// Where the view fetches full rows it learns about from notifications.
pub trait RecordSource {
    fn fetch_record(&self, table: Table, id: &str) -> CotaskResult<Option<Record>>;
    fn fetch_tasks(&self, list_id: &str) -> CotaskResult<Vec<Task>>;
    fn fetch_grants(&self, kind: ResourceKind, resource_id: &str) -> CotaskResult<Vec<ShareGrant>>;
    fn fetch_grants_for(&self, kind: ResourceKind, grantee_id: &str) -> CotaskResult<Vec<ShareGrant>>;
    fn fetch_visible(&self, user_id: &str, kind: ResourceKind) -> CotaskResult<Vec<VisibleResource>>;
    fn fetch_relationships(&self, user_id: &str) -> CotaskResult<Vec<Relationship>>;
}

impl RecordSource for Storage {
    fn fetch_record(&self, table: Table, id: &str) -> CotaskResult<Option<Record>> {
        let record = match table {
            Table::Profiles => self.get_profile(id)?.map(Record::Profile),
            Table::UserRelationships => self.get_relationship(id)?.map(Record::Relationship),
            Table::Lists => self
                .get_resource(ResourceKind::List, id)?
                .map(|r| resource_record(&r)),
            Table::Notes => self
                .get_resource(ResourceKind::Note, id)?
                .map(|r| resource_record(&r)),
            Table::Tasks => self.get_task(id)?.map(Record::Task),
            Table::ListShares => self.get_grant(ResourceKind::List, id)?.map(Record::ListShare),
            Table::NoteShares => self.get_grant(ResourceKind::Note, id)?.map(Record::NoteShare),
        };
        Ok(record)
    }

    fn fetch_tasks(&self, list_id: &str) -> CotaskResult<Vec<Task>> {
        Ok(self.list_tasks(list_id)?)
    }

    fn fetch_grants(&self, kind: ResourceKind, resource_id: &str) -> CotaskResult<Vec<ShareGrant>> {
        Ok(self.list_grants(kind, resource_id)?)
    }

    fn fetch_grants_for(&self, kind: ResourceKind, grantee_id: &str) -> CotaskResult<Vec<ShareGrant>> {
        Ok(self.list_grants_for_grantee(kind, grantee_id)?)
    }

    fn fetch_visible(&self, user_id: &str, kind: ResourceKind) -> CotaskResult<Vec<VisibleResource>> {
        let mut visible: Vec<VisibleResource> = self
            .list_owned(kind, user_id)?
            .into_iter()
            .map(|resource| VisibleResource {
                resource,
                access: Access::Owner,
            })
            .collect();
        for (resource, grant) in self.list_shared_with(kind, user_id)? {
            visible.push(VisibleResource {
                resource,
                access: Access::from(grant.permission),
            });
        }
        Ok(visible)
    }

    fn fetch_relationships(&self, user_id: &str) -> CotaskResult<Vec<Relationship>> {
        ContactCursor::new(self, user_id, 100)
            .map(|contact| contact.map(|c| c.relationship))
            .collect()
    }
}

/// Identifies one row across all record sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub table: Table,
    pub id: String,
}

impl PendingKey {
    pub fn of(record: &Record) -> Self {
        Self {
            table: record.table(),
            id: record.id().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingMutation {
    /// Value before the first optimistic change, `None` if the row was new.
    before: Option<Record>,
    /// Resource removed from the view by a local delete or leave.
    dropped: Option<DroppedResource>,
    started: Instant,
}

/// Everything the view held for one resource, as it was before removal.
#[derive(Debug, Clone, PartialEq)]
struct DroppedResource {
    key: ResourceKey,
    visible: VisibleResource,
    tasks: Option<Vec<Task>>,
    grants: Vec<(ResourceKey, ShareGrant)>,
}

/// Last-modified stamp used when a confirmation races a newer local value.
fn stamp(record: &Record) -> u64 {
    match record {
        Record::Profile(p) => p.created_at,
        Record::Relationship(r) => r.updated_at,
        Record::List(l) => l.updated_at,
        Record::Note(n) => n.updated_at,
        Record::Task(t) => t.updated_at,
        Record::ListShare(g) | Record::NoteShare(g) => g.granted_at,
    }
}

fn kind_of(table: Table) -> Option<ResourceKind> {
    match table {
        Table::Lists | Table::ListShares => Some(ResourceKind::List),
        Table::Notes | Table::NoteShares => Some(ResourceKind::Note),
        _ => None,
    }
}

fn resource_of(record: &Record) -> Option<Resource> {
    match record {
        Record::List(l) => Some(Resource::List(l.clone())),
        Record::Note(n) => Some(Resource::Note(n.clone())),
        _ => None,
    }
}

type ResourceKey = (ResourceKind, String);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    user_id: String,
    profile: Option<Profile>,
    resources: HashMap<ResourceKey, VisibleResource>,
    /// Tasks of visible lists, keyed by list id, in creation order.
    tasks: HashMap<String, Vec<Task>>,
    relationships: HashMap<String, Relationship>,
    /// The user's own grants plus every grant on resources they own.
    grants: HashMap<ResourceKey, ShareGrant>,
    pending: HashMap<PendingKey, PendingMutation>,
}

impl SessionView {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            profile: None,
            resources: HashMap::new(),
            tasks: HashMap::new(),
            relationships: HashMap::new(),
            grants: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Full snapshot of everything visible to `user_id`.
    pub fn load<S: RecordSource + ?Sized>(source: &S, user_id: &str) -> CotaskResult<Self> {
        let mut view = Self::new(user_id);
        if let Some(Record::Profile(p)) = source.fetch_record(Table::Profiles, user_id)? {
            view.profile = Some(p);
        }
        for kind in [ResourceKind::List, ResourceKind::Note] {
            for visible in source.fetch_visible(user_id, kind)? {
                let id = visible.resource.id().to_string();
                if kind == ResourceKind::List {
                    view.tasks.insert(id.clone(), source.fetch_tasks(&id)?);
                }
                if visible.access == Access::Owner {
                    for grant in source.fetch_grants(kind, &id)? {
                        view.grants.insert((kind, grant.id.clone()), grant);
                    }
                }
                view.resources.insert((kind, id), visible);
            }
            for grant in source.fetch_grants_for(kind, user_id)? {
                view.grants.insert((kind, grant.id.clone()), grant);
            }
        }
        for rel in source.fetch_relationships(user_id)? {
            view.relationships.insert(rel.id.clone(), rel);
        }
        Ok(view)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn resource(&self, kind: ResourceKind, id: &str) -> Option<&VisibleResource> {
        self.resources.get(&(kind, id.to_string()))
    }

    /// Visible resources of one kind, pinned first, then newest updated.
    pub fn resources(&self, kind: ResourceKind) -> Vec<&VisibleResource> {
        let mut out: Vec<&VisibleResource> = self
            .resources
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| v)
            .collect();
        out.sort_by(|a, b| {
            b.resource
                .pinned()
                .cmp(&a.resource.pinned())
                .then(b.resource.updated_at().cmp(&a.resource.updated_at()))
                .then_with(|| a.resource.id().cmp(b.resource.id()))
        });
        out
    }

    pub fn tasks(&self, list_id: &str) -> &[Task] {
        self.tasks.get(list_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn grants_on(&self, kind: ResourceKind, resource_id: &str) -> Vec<&ShareGrant> {
        self.grants
            .iter()
            .filter(|((k, _), g)| *k == kind && g.resource_id == resource_id)
            .map(|(_, g)| g)
            .collect()
    }

    pub fn is_pending(&self, key: &PendingKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn ids_of(&self, kind: ResourceKind, owned_only: bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .resources
            .iter()
            .filter(|((k, _), v)| *k == kind && (!owned_only || v.access == Access::Owner))
            .map(|((_, id), _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Subscription filters matching exactly what this view can show.
    pub fn scopes(&self) -> Vec<Scope> {
        let me = self.user_id.clone();
        let mut scopes = Vec::new();
        for (kind, table, share_table) in [
            (ResourceKind::List, Table::Lists, Table::ListShares),
            (ResourceKind::Note, Table::Notes, Table::NoteShares),
        ] {
            scopes.push(Scope::new(
                table,
                RowFilter::Or(vec![
                    RowFilter::Eq("owner_id", me.clone()),
                    RowFilter::In("id", self.ids_of(kind, false)),
                ]),
            ));
            scopes.push(Scope::new(
                share_table,
                RowFilter::Or(vec![
                    RowFilter::Eq("grantee_id", me.clone()),
                    RowFilter::In("resource_id", self.ids_of(kind, true)),
                ]),
            ));
        }
        scopes.push(Scope::new(
            Table::Tasks,
            RowFilter::In("list_id", self.ids_of(ResourceKind::List, false)),
        ));
        scopes.push(Scope::new(
            Table::UserRelationships,
            RowFilter::Or(vec![
                RowFilter::Eq("user_a", me.clone()),
                RowFilter::Eq("user_b", me.clone()),
            ]),
        ));
        scopes.push(Scope::new(Table::Profiles, RowFilter::Eq("id", me)));
        scopes
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Apply one change notification. Applying the same event twice leaves
    /// the view as applying it once.
    pub fn apply<S: RecordSource + ?Sized>(&mut self, event: &ChangeEvent, source: &S) -> CotaskResult<()> {
        let key = PendingKey::of(&event.record);
        // Our own change came back: nothing left to roll back.
        self.pending.remove(&key);
        match event.kind {
            ChangeKind::Delete => {
                self.remove_record(&event.record);
                Ok(())
            }
            ChangeKind::Insert if self.lookup(&key).is_some() => Ok(()),
            ChangeKind::Update if self.lookup(&key).is_some() => {
                self.put(event.record.clone());
                Ok(())
            }
            ChangeKind::Insert | ChangeKind::Update => self.fetch_in(&key, source),
        }
    }

    fn fetch_in<S: RecordSource + ?Sized>(&mut self, key: &PendingKey, source: &S) -> CotaskResult<()> {
        let Some(record) = source.fetch_record(key.table, &key.id)? else {
            // Gone again before we looked; its delete will follow.
            return Ok(());
        };
        match &record {
            Record::Profile(p) if p.id == self.user_id => self.profile = Some(p.clone()),
            Record::Profile(_) => {}
            Record::Relationship(r) if r.involves(&self.user_id) => {
                self.relationships.insert(r.id.clone(), r.clone());
            }
            Record::Relationship(_) => {}
            Record::List(_) | Record::Note(_) => {
                let Some(resource) = resource_of(&record) else {
                    return Ok(());
                };
                let access = if resource.owner_id() == self.user_id {
                    Access::Owner
                } else {
                    let grants = source.fetch_grants(resource.kind(), resource.id())?;
                    resolve(&resource, &grants, &self.user_id)
                };
                if access.can_view() {
                    self.admit(resource, access, source)?;
                }
            }
            Record::Task(t) => {
                if self.resource(ResourceKind::List, &t.list_id).is_some() {
                    self.put(record);
                }
            }
            Record::ListShare(g) | Record::NoteShare(g) => {
                let grant = g.clone();
                if grant.grantee_id == self.user_id {
                    self.grants.insert((grant.kind, grant.id.clone()), grant.clone());
                    let table = match grant.kind {
                        ResourceKind::List => Table::Lists,
                        ResourceKind::Note => Table::Notes,
                    };
                    let known = self.resource(grant.kind, &grant.resource_id).is_some();
                    if known {
                        self.put(record);
                    } else if let Some(fetched) = source.fetch_record(table, &grant.resource_id)? {
                        // Pull in the resource and its tasks; task events sent
                        // before our filter covered this list are not missed.
                        if let Some(resource) = resource_of(&fetched) {
                            self.admit(resource, Access::from(grant.permission), source)?;
                        }
                    }
                } else if self.owns(grant.kind, &grant.resource_id) {
                    self.grants.insert((grant.kind, grant.id.clone()), grant);
                }
            }
        }
        Ok(())
    }

    fn admit<S: RecordSource + ?Sized>(
        &mut self,
        resource: Resource,
        access: Access,
        source: &S,
    ) -> CotaskResult<()> {
        let kind = resource.kind();
        let id = resource.id().to_string();
        if kind == ResourceKind::List {
            self.tasks.insert(id.clone(), source.fetch_tasks(&id)?);
        }
        if access == Access::Owner {
            for grant in source.fetch_grants(kind, &id)? {
                self.grants.insert((kind, grant.id.clone()), grant);
            }
        }
        self.resources
            .insert((kind, id), VisibleResource { resource, access });
        Ok(())
    }

    fn owns(&self, kind: ResourceKind, resource_id: &str) -> bool {
        self.resource(kind, resource_id)
            .map(|v| v.access == Access::Owner)
            .unwrap_or(false)
    }

    /// Current local value of a row, if the view holds it.
    fn lookup(&self, key: &PendingKey) -> Option<Record> {
        match key.table {
            Table::Profiles => self
                .profile
                .as_ref()
                .filter(|p| p.id == key.id)
                .map(|p| Record::Profile(p.clone())),
            Table::UserRelationships => self
                .relationships
                .get(&key.id)
                .map(|r| Record::Relationship(r.clone())),
            Table::Lists | Table::Notes => {
                let kind = kind_of(key.table)?;
                self.resource(kind, &key.id)
                    .map(|v| resource_record(&v.resource))
            }
            Table::Tasks => self
                .tasks
                .values()
                .flatten()
                .find(|t| t.id == key.id)
                .map(|t| Record::Task(t.clone())),
            Table::ListShares | Table::NoteShares => {
                let kind = kind_of(key.table)?;
                self.grants
                    .get(&(kind, key.id.clone()))
                    .map(grant_record)
            }
        }
    }

    /// Upsert a row from its value, without fetching anything.
    fn put(&mut self, record: Record) {
        match record {
            Record::Profile(p) => {
                if p.id == self.user_id {
                    self.profile = Some(p);
                }
            }
            Record::Relationship(r) => {
                if r.involves(&self.user_id) {
                    self.relationships.insert(r.id.clone(), r);
                }
            }
            Record::List(_) | Record::Note(_) => {
                let Some(resource) = resource_of(&record) else {
                    return;
                };
                let key = (resource.kind(), resource.id().to_string());
                let access = match self.resources.get(&key) {
                    Some(existing) => existing.access,
                    None if resource.owner_id() == self.user_id => Access::Owner,
                    None => return,
                };
                if resource.kind() == ResourceKind::List {
                    self.tasks.entry(key.1.clone()).or_default();
                }
                self.resources.insert(key, VisibleResource { resource, access });
            }
            Record::Task(task) => {
                let tasks = self.tasks.entry(task.list_id.clone()).or_default();
                match tasks.iter_mut().find(|t| t.id == task.id) {
                    Some(existing) => *existing = task,
                    None => {
                        tasks.push(task);
                        tasks.sort_by_key(|t| t.created_at);
                    }
                }
            }
            Record::ListShare(grant) | Record::NoteShare(grant) => {
                if grant.grantee_id == self.user_id {
                    if let Some(visible) = self
                        .resources
                        .get_mut(&(grant.kind, grant.resource_id.clone()))
                    {
                        visible.access = Access::from(grant.permission);
                    }
                }
                self.grants.insert((grant.kind, grant.id.clone()), grant);
            }
        }
    }

    fn remove_resource(&mut self, kind: ResourceKind, resource_id: &str) {
        self.resources.remove(&(kind, resource_id.to_string()));
        if kind == ResourceKind::List {
            self.tasks.remove(resource_id);
        }
        self.grants
            .retain(|(k, _), g| !(*k == kind && g.resource_id == resource_id));
    }

    fn remove_record(&mut self, record: &Record) {
        match record {
            Record::Profile(p) => {
                if p.id == self.user_id {
                    self.profile = None;
                }
            }
            Record::Relationship(r) => {
                self.relationships.remove(&r.id);
            }
            Record::List(l) => self.remove_resource(ResourceKind::List, &l.id),
            Record::Note(n) => self.remove_resource(ResourceKind::Note, &n.id),
            Record::Task(t) => {
                if let Some(tasks) = self.tasks.get_mut(&t.list_id) {
                    tasks.retain(|existing| existing.id != t.id);
                }
            }
            Record::ListShare(g) | Record::NoteShare(g) => {
                self.grants.remove(&(g.kind, g.id.clone()));
                if g.grantee_id == self.user_id && !self.owns(g.kind, &g.resource_id) {
                    self.remove_resource(g.kind, &g.resource_id);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Optimistic mutations
    // -----------------------------------------------------------------------

    /// Apply a local change ahead of the store and remember what it replaced.
    pub fn apply_local(&mut self, kind: ChangeKind, record: Record) -> PendingKey {
        let key = PendingKey::of(&record);
        let before = self.lookup(&key);
        let dropped = match kind {
            ChangeKind::Delete => self.dropped_by(&record),
            ChangeKind::Insert | ChangeKind::Update => None,
        };
        self.pending.entry(key.clone()).or_insert(PendingMutation {
            before,
            dropped,
            started: Instant::now(),
        });
        match kind {
            ChangeKind::Delete => self.remove_record(&record),
            ChangeKind::Insert | ChangeKind::Update => self.put(record),
        }
        key
    }

    /// Snapshot of the resource a delete of `record` would take out of the
    /// view: the resource itself, or a shared one left by dropping our grant.
    fn dropped_by(&self, record: &Record) -> Option<DroppedResource> {
        let key = match record {
            Record::List(l) => (ResourceKind::List, l.id.clone()),
            Record::Note(n) => (ResourceKind::Note, n.id.clone()),
            Record::ListShare(g) | Record::NoteShare(g)
                if g.grantee_id == self.user_id && !self.owns(g.kind, &g.resource_id) =>
            {
                (g.kind, g.resource_id.clone())
            }
            _ => return None,
        };
        let visible = self.resources.get(&key)?.clone();
        let tasks = match key.0 {
            ResourceKind::List => Some(self.tasks(&key.1).to_vec()),
            ResourceKind::Note => None,
        };
        let grants = self
            .grants
            .iter()
            .filter(|((k, _), g)| *k == key.0 && g.resource_id == key.1)
            .map(|(k, g)| (k.clone(), g.clone()))
            .collect();
        Some(DroppedResource {
            key,
            visible,
            tasks,
            grants,
        })
    }

    /// The store accepted the change. A returned row replaces the local one
    /// unless the local value is already newer. A row stored under a
    /// different id replaces the local placeholder outright.
    pub fn confirm(&mut self, key: &PendingKey, server: Option<Record>) {
        self.pending.remove(key);
        if let Some(record) = server.as_ref().filter(|r| PendingKey::of(r) != *key) {
            if let Some(placeholder) = self.lookup(key) {
                self.remove_record(&placeholder);
            }
            self.put(record.clone());
            return;
        }
        if let Some(record) = server {
            let newer_locally = self
                .lookup(key)
                .map(|local| stamp(&local) > stamp(&record))
                .unwrap_or(false);
            if !newer_locally {
                self.put(record);
            }
        }
    }

    /// The store rejected the change: restore the pre-action value.
    pub fn rollback(&mut self, key: &PendingKey) {
        let Some(pending) = self.pending.remove(key) else {
            return;
        };
        if let Some(dropped) = pending.dropped {
            if let Some(tasks) = dropped.tasks {
                self.tasks.insert(dropped.key.1.clone(), tasks);
            }
            self.grants.extend(dropped.grants);
            self.resources.insert(dropped.key, dropped.visible);
        }
        match pending.before {
            Some(before) => self.put(before),
            None => {
                if let Some(current) = self.lookup(key) {
                    self.remove_record(&current);
                }
            }
        }
    }

    /// Forget entries older than `timeout`; their local value stays.
    pub fn expire_pending(&mut self, now: Instant, timeout: Duration) -> Vec<PendingKey> {
        let expired: Vec<PendingKey> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.started) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.pending.remove(key);
        }
        expired
    }
}

/// A session view kept live by a scoped subscription.
///
/// The subscription is opened before the snapshot is read so that nothing
/// published in between is lost, and it is closed when the session drops.
pub struct LiveSession {
    view: SessionView,
    subscription: Subscription,
    pending_timeout: Duration,
}

impl LiveSession {
    pub fn open<S: RecordSource + ?Sized>(
        feed: &ChangeFeed,
        source: &S,
        user_id: &str,
        pending_timeout: Duration,
    ) -> CotaskResult<Self> {
        let mut subscription = feed.open_subscription(Vec::new());
        let view = SessionView::load(source, user_id)?;
        subscription.rescope(view.scopes());
        crate::clog!(
            "session: {} live on subscription {}",
            logging::user_id(user_id),
            subscription.id()
        );
        Ok(Self {
            view,
            subscription,
            pending_timeout,
        })
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    fn refresh_scopes(&mut self) {
        let scopes = self.view.scopes();
        if scopes.as_slice() != self.subscription.scopes() {
            self.subscription.rescope(scopes);
        }
    }

    fn reload<S: RecordSource + ?Sized>(&mut self, source: &S) -> CotaskResult<()> {
        let mut fresh = SessionView::load(source, &self.view.user_id)?;
        fresh.pending = std::mem::take(&mut self.view.pending);
        self.view = fresh;
        self.refresh_scopes();
        Ok(())
    }

    /// Apply every queued notification. Returns how many were applied.
    pub fn drain<S: RecordSource + ?Sized>(&mut self, source: &S) -> CotaskResult<usize> {
        let mut applied = 0;
        loop {
            match self.subscription.try_recv() {
                Ok(Some(event)) => {
                    if let Err(e) = self.view.apply(&event, source) {
                        crate::clog!(
                            "session: skipped event {} for {}: {e}",
                            event.seq,
                            logging::user_id(&self.view.user_id)
                        );
                        continue;
                    }
                    applied += 1;
                    self.refresh_scopes();
                }
                Ok(None) | Err(FeedError::Closed) => break,
                Err(FeedError::Lagged(missed)) => {
                    crate::clog!(
                        "session: {} missed {missed} events, reloading",
                        logging::user_id(&self.view.user_id)
                    );
                    self.reload(source)?;
                }
            }
        }
        for key in self
            .view
            .expire_pending(Instant::now(), self.pending_timeout)
        {
            crate::clog!("session: pending change to {} timed out", key.id);
        }
        Ok(applied)
    }

    /// Run one optimistic mutation: apply locally, call the store, then
    /// confirm or roll back.
    pub fn perform<F>(&mut self, kind: ChangeKind, optimistic: Record, commit: F) -> CotaskResult<Option<Record>>
    where
        F: FnOnce() -> CotaskResult<Option<Record>>,
    {
        let key = self.view.apply_local(kind, optimistic);
        match commit() {
            Ok(server) => {
                self.view.confirm(&key, server.clone());
                self.refresh_scopes();
                Ok(server)
            }
            Err(e) => {
                crate::clog!(
                    "session: {} rolled back change to {}: {e}",
                    logging::user_id(&self.view.user_id),
                    key.id
                );
                self.view.rollback(&key);
                Err(e)
            }
        }
    }

    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CotaskError;
    use crate::ledger::RelationshipLedger;
    use crate::model::{Permission, ResourceAttrs, TaskAttrs};
    use crate::sharing::Sharing;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn setup() -> (Storage, ChangeFeed) {
        let storage = Storage::open_in_memory().unwrap();
        for (id, username) in [("o", "owner"), ("u", "user")] {
            storage
                .insert_profile(&Profile {
                    id: id.into(),
                    username: username.into(),
                    display_name: username.into(),
                    avatar_url: None,
                    created_at: 0,
                })
                .unwrap();
        }
        (storage, ChangeFeed::new(256))
    }

    fn everything(feed: &ChangeFeed) -> Subscription {
        let tables = [
            Table::Profiles,
            Table::UserRelationships,
            Table::Lists,
            Table::Notes,
            Table::Tasks,
            Table::ListShares,
            Table::NoteShares,
        ];
        feed.open_subscription(
            tables
                .into_iter()
                .map(|t| Scope::new(t, RowFilter::All))
                .collect(),
        )
    }

    fn collect(sub: &mut Subscription) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| sub.try_recv().unwrap()).collect()
    }

    fn attrs(title: &str) -> ResourceAttrs {
        ResourceAttrs {
            title: title.into(),
            body: None,
        }
    }

    fn task(title: &str) -> TaskAttrs {
        TaskAttrs {
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_applying_twice_equals_once() {
        let (storage, feed) = setup();
        let mut sub = everything(&feed);
        let mut once = SessionView::load(&storage, "u").unwrap();
        let mut twice = once.clone();

        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Groceries"))
            .unwrap();
        sharing
            .grant_share(ResourceKind::List, list.id(), "o", "user", Permission::Edit)
            .unwrap();
        let milk = sharing.add_task(list.id(), "u", &task("Milk")).unwrap();
        sharing.set_task_completed(&milk.id, "o", true).unwrap();
        sharing.add_task(list.id(), "o", &task("Eggs")).unwrap();
        sharing.delete_task(&milk.id, "o").unwrap();
        sharing
            .update_resource(ResourceKind::List, list.id(), "o", &attrs("Weekly"))
            .unwrap();
        RelationshipLedger::new(&storage, &feed)
            .request_connection("o", "u")
            .unwrap();

        for event in collect(&mut sub) {
            once.apply(&event, &storage).unwrap();
            twice.apply(&event, &storage).unwrap();
            twice.apply(&event, &storage).unwrap();
        }
        assert_eq!(once, twice);
        assert_eq!(once, SessionView::load(&storage, "u").unwrap());
        let titles: Vec<&str> = once.tasks(list.id()).iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Eggs"]);
        assert_eq!(once.relationships().count(), 1);
    }

    #[test]
    fn test_losing_share_drops_resource_and_tasks() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Trip"))
            .unwrap();
        let grant = sharing
            .grant_share(ResourceKind::List, list.id(), "o", "user", Permission::View)
            .unwrap();
        sharing.add_task(list.id(), "o", &task("Tickets")).unwrap();

        let mut view = SessionView::load(&storage, "u").unwrap();
        assert_eq!(view.tasks(list.id()).len(), 1);
        assert_eq!(
            view.resource(ResourceKind::List, list.id()).unwrap().access,
            Access::View
        );

        let mut sub = everything(&feed);
        sharing.revoke_grant(ResourceKind::List, &grant.id, "o").unwrap();
        for event in collect(&mut sub) {
            view.apply(&event, &storage).unwrap();
        }
        assert!(view.resource(ResourceKind::List, list.id()).is_none());
        assert!(view.tasks(list.id()).is_empty());
    }

    #[test]
    fn test_task_events_for_unknown_lists_are_ignored() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Private"))
            .unwrap();
        let mut view = SessionView::load(&storage, "u").unwrap();
        let mut sub = everything(&feed);
        sharing.add_task(list.id(), "o", &task("Secret")).unwrap();
        for event in collect(&mut sub) {
            view.apply(&event, &storage).unwrap();
        }
        assert!(view.tasks(list.id()).is_empty());
    }

    #[test]
    fn test_rollback_restores_previous_value() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("u", ResourceKind::List, &attrs("Home"))
            .unwrap();
        let original = sharing.add_task(list.id(), "u", &task("Vacuum")).unwrap();
        let mut view = SessionView::load(&storage, "u").unwrap();

        let mut edited = original.clone();
        edited.title = "Mop".into();
        let key = view.apply_local(ChangeKind::Update, Record::Task(edited));
        assert!(view.is_pending(&key));
        assert_eq!(view.tasks(list.id())[0].title, "Mop");
        view.rollback(&key);
        assert!(!view.is_pending(&key));
        assert_eq!(view.tasks(list.id())[0], original);

        let mut fresh = original.clone();
        fresh.id = "new-task".into();
        let key = view.apply_local(ChangeKind::Insert, Record::Task(fresh));
        assert_eq!(view.tasks(list.id()).len(), 2);
        view.rollback(&key);
        assert_eq!(view.tasks(list.id()).len(), 1);

        let key = view.apply_local(ChangeKind::Delete, Record::Task(original.clone()));
        assert!(view.tasks(list.id()).is_empty());
        view.rollback(&key);
        assert_eq!(view.tasks(list.id()), [original]);
    }

    #[test]
    fn test_confirm_keeps_newer_local_value() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("u", ResourceKind::List, &attrs("Home"))
            .unwrap();
        let original = sharing.add_task(list.id(), "u", &task("Vacuum")).unwrap();
        let mut view = SessionView::load(&storage, "u").unwrap();

        let mut local = original.clone();
        local.title = "Local".into();
        local.updated_at = original.updated_at + 5;
        let key = view.apply_local(ChangeKind::Update, Record::Task(local));

        let mut stale = original.clone();
        stale.title = "Stale".into();
        view.confirm(&key, Some(Record::Task(stale)));
        assert_eq!(view.pending_count(), 0);
        assert_eq!(view.tasks(list.id())[0].title, "Local");
    }

    #[test]
    fn test_echo_and_timeout_clear_pending() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("u", ResourceKind::List, &attrs("Home"))
            .unwrap();
        let mut view = SessionView::load(&storage, "u").unwrap();
        let mut sub = everything(&feed);

        let added = sharing.add_task(list.id(), "u", &task("Dust")).unwrap();
        let key = view.apply_local(ChangeKind::Insert, Record::Task(added));
        for event in collect(&mut sub) {
            view.apply(&event, &storage).unwrap();
        }
        assert!(!view.is_pending(&key));
        assert_eq!(view.tasks(list.id()).len(), 1);

        let mut renamed = view.tasks(list.id())[0].clone();
        renamed.title = "Dust shelves".into();
        let key = view.apply_local(ChangeKind::Update, Record::Task(renamed));
        assert!(view.expire_pending(Instant::now(), TIMEOUT).is_empty());
        let expired = view.expire_pending(Instant::now() + TIMEOUT, TIMEOUT);
        assert_eq!(expired, [key]);
        assert_eq!(view.tasks(list.id())[0].title, "Dust shelves");
    }

    #[test]
    fn test_live_session_follows_new_shares() {
        let (storage, feed) = setup();
        let mut session = LiveSession::open(&feed, &storage, "u", TIMEOUT).unwrap();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Party"))
            .unwrap();
        sharing.add_task(list.id(), "o", &task("Cake")).unwrap();
        sharing
            .grant_share(ResourceKind::List, list.id(), "o", "user", Permission::View)
            .unwrap();
        sharing.add_task(list.id(), "o", &task("Balloons")).unwrap();

        session.drain(&storage).unwrap();
        let titles: Vec<&str> = session
            .view()
            .tasks(list.id())
            .iter()
            .map(|t| t.title.as_str())
            .collect();
        assert_eq!(titles, ["Cake", "Balloons"]);
        assert!(session
            .subscription()
            .scopes()
            .iter()
            .any(|s| s.table == Table::Tasks && s.filter == RowFilter::In("list_id", vec![list.id().to_string()])));
    }

    #[test]
    fn test_live_session_reloads_after_lag() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .insert_profile(&Profile {
                id: "o".into(),
                username: "owner".into(),
                display_name: "Owner".into(),
                avatar_url: None,
                created_at: 0,
            })
            .unwrap();
        let feed = ChangeFeed::new(2);
        let mut session = LiveSession::open(&feed, &storage, "o", TIMEOUT).unwrap();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Lots"))
            .unwrap();
        for i in 0..5 {
            sharing.add_task(list.id(), "o", &task(&format!("t{i}"))).unwrap();
        }
        session.drain(&storage).unwrap();
        assert_eq!(session.view().tasks(list.id()).len(), 5);
    }

    #[test]
    fn test_perform_rolls_back_on_store_error() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Shared"))
            .unwrap();
        sharing
            .grant_share(ResourceKind::List, list.id(), "o", "user", Permission::View)
            .unwrap();
        let mut session = LiveSession::open(&feed, &storage, "u", TIMEOUT).unwrap();

        let mut attempt = match list.clone() {
            Resource::List(l) => l,
            Resource::Note(_) => unreachable!(),
        };
        attempt.title = "Renamed".into();
        let result = session.perform(ChangeKind::Update, Record::List(attempt.clone()), || {
            sharing
                .update_resource(ResourceKind::List, &attempt.id, "u", &attrs("Renamed"))
                .map(|r| Some(resource_record(&r)))
        });
        assert!(matches!(result, Err(CotaskError::Forbidden(_))));
        let visible = session.view().resource(ResourceKind::List, list.id()).unwrap();
        assert_eq!(visible.resource.title(), "Shared");
        assert_eq!(session.view().pending_count(), 0);
    }

    fn shared_list_with_task(storage: &Storage, feed: &ChangeFeed) -> (Resource, ShareGrant) {
        let sharing = Sharing::new(storage, feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Groceries"))
            .unwrap();
        sharing.add_task(list.id(), "o", &task("Milk")).unwrap();
        let grant = sharing
            .grant_share(ResourceKind::List, list.id(), "o", "user", Permission::Edit)
            .unwrap();
        (list, grant)
    }

    #[test]
    fn test_failed_delete_restores_shared_list() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let (list, _) = shared_list_with_task(&storage, &feed);
        let mut session = LiveSession::open(&feed, &storage, "u", TIMEOUT).unwrap();
        let before = session.view().clone();

        let result = session.perform(ChangeKind::Delete, resource_record(&list), || {
            sharing
                .delete_resource(ResourceKind::List, list.id(), "u")
                .map(|_| None)
        });
        assert!(matches!(result, Err(CotaskError::Forbidden(_))));

        let visible = session.view().resource(ResourceKind::List, list.id()).unwrap();
        assert_eq!(visible.access, Access::Edit);
        assert_eq!(session.view().tasks(list.id()).len(), 1);
        assert_eq!(session.view().grants_on(ResourceKind::List, list.id()).len(), 1);
        assert_eq!(session.view(), &before);
    }

    #[test]
    fn test_failed_leave_restores_shared_list() {
        let (storage, feed) = setup();
        let (list, grant) = shared_list_with_task(&storage, &feed);
        let mut session = LiveSession::open(&feed, &storage, "u", TIMEOUT).unwrap();
        let before = session.view().clone();

        let result = session.perform(ChangeKind::Delete, grant_record(&grant), || {
            Err(CotaskError::TransientStore("disk full".into()))
        });
        assert!(matches!(result, Err(CotaskError::TransientStore(_))));

        assert!(session.view().resource(ResourceKind::List, list.id()).is_some());
        assert_eq!(session.view().tasks(list.id())[0].title, "Milk");
        assert_eq!(session.view(), &before);
    }

    #[test]
    fn test_leave_removes_list_until_rolled_back() {
        let (storage, feed) = setup();
        let (list, grant) = shared_list_with_task(&storage, &feed);
        let mut view = SessionView::load(&storage, "u").unwrap();

        let key = view.apply_local(ChangeKind::Delete, grant_record(&grant));
        assert!(view.resource(ResourceKind::List, list.id()).is_none());
        assert!(view.tasks(list.id()).is_empty());
        view.rollback(&key);
        assert_eq!(view.tasks(list.id()).len(), 1);
        assert_eq!(view.grants_on(ResourceKind::List, list.id()), vec![&grant]);
    }
}
