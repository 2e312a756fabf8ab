//! Ownership and sharing of lists and notes, plus the tasks inside lists.
//!
//! Every operation resolves the caller's access first and only then writes.
//! Writes go through the capabilities from [`crate::permissions`], and each
//! persisted change is published on the [`ChangeFeed`].

use serde::Serialize;
use uuid::Uuid;

use crate::error::{CotaskError, CotaskResult};
use crate::feed::{ChangeFeed, ChangeKind, Record};
use crate::logging;
use crate::model::{
    Access, ListRecord, NoteRecord, Permission, Resource, ResourceAttrs, ResourceKind,
    ShareGrant, Shareable, Task, TaskAttrs,
};
use crate::now_secs;
use crate::permissions::{authorize_admin, authorize_content, authorize_view, resolve, ContentEditor};
use crate::storage::Storage;

/// A resource together with the caller's access to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleResource {
    pub resource: Resource,
    pub access: Access,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub owned_lists: u32,
    pub shared_lists: u32,
    pub owned_notes: u32,
    pub shared_notes: u32,
    pub open_tasks: u32,
    pub completed_tasks: u32,
    pub pending_requests: u32,
}

pub(crate) fn resource_record(resource: &Resource) -> Record {
    match resource {
        Resource::List(l) => Record::List(l.clone()),
        Resource::Note(n) => Record::Note(n.clone()),
    }
}

pub(crate) fn grant_record(grant: &ShareGrant) -> Record {
    match grant.kind {
        ResourceKind::List => Record::ListShare(grant.clone()),
        ResourceKind::Note => Record::NoteShare(grant.clone()),
    }
}

pub struct Sharing<'a> {
    storage: &'a Storage,
    feed: &'a ChangeFeed,
}

impl<'a> Sharing<'a> {
    pub fn new(storage: &'a Storage, feed: &'a ChangeFeed) -> Self {
        Self { storage, feed }
    }

    fn load(&self, kind: ResourceKind, id: &str) -> CotaskResult<(Resource, Vec<ShareGrant>)> {
        let resource = self
            .storage
            .get_resource(kind, id)?
            .ok_or_else(|| CotaskError::not_found(format!("{} {id}", kind.as_str())))?;
        let grants = self.storage.list_grants(kind, id)?;
        Ok((resource, grants))
    }

    fn reload(&self, kind: ResourceKind, id: &str) -> CotaskResult<Resource> {
        Ok(self.load(kind, id)?.0)
    }

    fn load_task(&self, task_id: &str) -> CotaskResult<Task> {
        self.storage
            .get_task(task_id)?
            .ok_or_else(|| CotaskError::not_found(format!("task {task_id}")))
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub fn create_resource(
        &self,
        owner_id: &str,
        kind: ResourceKind,
        attrs: &ResourceAttrs,
    ) -> CotaskResult<Resource> {
        attrs.validate()?;
        if self.storage.get_profile(owner_id)?.is_none() {
            return Err(CotaskError::Unauthenticated);
        }
        let now = now_secs();
        let id = Uuid::new_v4().to_string();
        let title = attrs.title.trim().to_string();
        let resource = match kind {
            ResourceKind::List => Resource::List(ListRecord {
                id,
                owner_id: owner_id.to_string(),
                title,
                description: attrs.body.clone(),
                pinned: false,
                archived: false,
                created_at: now,
                updated_at: now,
            }),
            ResourceKind::Note => Resource::Note(NoteRecord {
                id,
                owner_id: owner_id.to_string(),
                title,
                content: attrs.body.clone(),
                pinned: false,
                archived: false,
                created_at: now,
                updated_at: now,
            }),
        };
        self.storage.insert_resource(&resource)?;
        crate::clog!(
            "sharing: {} created {} {}",
            logging::user_id(owner_id),
            kind.as_str(),
            logging::resource_id(resource.id())
        );
        self.feed.publish(ChangeKind::Insert, resource_record(&resource));
        Ok(resource)
    }

    /// Fetch one resource the caller can see. Invisible resources are
    /// reported as missing.
    pub fn get_resource(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
    ) -> CotaskResult<VisibleResource> {
        let (resource, grants) = self.load(kind, resource_id)?;
        let access = authorize_view(&resource, &grants, user_id)?;
        Ok(VisibleResource { resource, access })
    }

    pub fn update_resource(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
        attrs: &ResourceAttrs,
    ) -> CotaskResult<Resource> {
        let (resource, grants) = self.load(kind, resource_id)?;
        let editor = authorize_content(&resource, &grants, user_id)?;
        attrs.validate()?;
        self.storage.update_resource_content(
            &editor,
            attrs.title.trim(),
            attrs.body.as_deref(),
            now_secs(),
        )?;
        let updated = self.reload(kind, resource_id)?;
        self.feed.publish(ChangeKind::Update, resource_record(&updated));
        Ok(updated)
    }

    pub fn set_pinned(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
        pinned: bool,
    ) -> CotaskResult<Resource> {
        let (resource, _) = self.load(kind, resource_id)?;
        let admin = authorize_admin(&resource, user_id)?;
        self.storage.set_resource_pinned(&admin, pinned, now_secs())?;
        let updated = self.reload(kind, resource_id)?;
        self.feed.publish(ChangeKind::Update, resource_record(&updated));
        Ok(updated)
    }

    pub fn set_archived(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
        archived: bool,
    ) -> CotaskResult<Resource> {
        let (resource, _) = self.load(kind, resource_id)?;
        let admin = authorize_admin(&resource, user_id)?;
        self.storage
            .set_resource_archived(&admin, archived, now_secs())?;
        let updated = self.reload(kind, resource_id)?;
        self.feed.publish(ChangeKind::Update, resource_record(&updated));
        Ok(updated)
    }

    /// Delete a resource with its tasks and grants. Deletes are published
    /// children first, so subscribers never see a task whose list is gone.
    pub fn delete_resource(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
    ) -> CotaskResult<()> {
        let (resource, grants) = self.load(kind, resource_id)?;
        let admin = authorize_admin(&resource, user_id)?;
        let tasks = match kind {
            ResourceKind::List => self.storage.list_tasks(resource_id)?,
            ResourceKind::Note => Vec::new(),
        };
        if !self.storage.delete_resource(&admin)? {
            return Err(CotaskError::not_found(format!(
                "{} {resource_id}",
                kind.as_str()
            )));
        }
        crate::clog!(
            "sharing: {} deleted {} {} ({} tasks, {} grants)",
            logging::user_id(user_id),
            kind.as_str(),
            logging::resource_id(resource_id),
            tasks.len(),
            grants.len()
        );
        for task in tasks {
            self.feed.publish(ChangeKind::Delete, Record::Task(task));
        }
        for grant in &grants {
            self.feed.publish(ChangeKind::Delete, grant_record(grant));
        }
        self.feed.publish(ChangeKind::Delete, resource_record(&resource));
        Ok(())
    }

    /// Owned and shared-with-me resources of one kind: pinned first, then
    /// most recently updated.
    pub fn list_visible(&self, user_id: &str, kind: ResourceKind) -> CotaskResult<Vec<VisibleResource>> {
        let mut visible: Vec<VisibleResource> = self
            .storage
            .list_owned(kind, user_id)?
            .into_iter()
            .map(|resource| VisibleResource {
                resource,
                access: Access::Owner,
            })
            .collect();
        for (resource, grant) in self.storage.list_shared_with(kind, user_id)? {
            visible.push(VisibleResource {
                resource,
                access: Access::from(grant.permission),
            });
        }
        visible.sort_by(|a, b| {
            b.resource
                .pinned()
                .cmp(&a.resource.pinned())
                .then(b.resource.updated_at().cmp(&a.resource.updated_at()))
                .then_with(|| a.resource.id().cmp(b.resource.id()))
        });
        Ok(visible)
    }

    // -----------------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------------

    pub fn grant_share(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        owner_id: &str,
        grantee_username: &str,
        permission: Permission,
    ) -> CotaskResult<ShareGrant> {
        let (resource, _) = self.load(kind, resource_id)?;
        let admin = authorize_admin(&resource, owner_id)?;
        let grantee = self
            .storage
            .get_profile_by_username(grantee_username.trim())?
            .ok_or_else(|| CotaskError::not_found(format!("user {grantee_username}")))?;
        if grantee.id == owner_id {
            return Err(CotaskError::SelfReference(
                "you already own this resource".into(),
            ));
        }
        if self
            .storage
            .find_grant(kind, resource_id, &grantee.id)?
            .is_some()
        {
            return Err(CotaskError::AlreadyExists(format!(
                "{} is already shared with {}",
                kind.as_str(),
                grantee.username
            )));
        }

        let grant = ShareGrant {
            id: Uuid::new_v4().to_string(),
            kind,
            resource_id: resource_id.to_string(),
            grantee_id: grantee.id.clone(),
            permission,
            granted_by: owner_id.to_string(),
            granted_at: now_secs(),
        };
        self.storage.insert_grant(&admin, &grant)?;
        crate::clog!(
            "sharing: {} shared {} with {} ({})",
            logging::user_id(owner_id),
            logging::resource_id(resource_id),
            logging::user_id(&grantee.id),
            permission.as_str()
        );
        self.feed.publish(ChangeKind::Insert, grant_record(&grant));
        Ok(grant)
    }

    fn load_grant(&self, kind: ResourceKind, grant_id: &str) -> CotaskResult<ShareGrant> {
        self.storage
            .get_grant(kind, grant_id)?
            .ok_or_else(|| CotaskError::not_found(format!("grant {grant_id}")))
    }

    pub fn update_grant_permission(
        &self,
        kind: ResourceKind,
        grant_id: &str,
        owner_id: &str,
        permission: Permission,
    ) -> CotaskResult<ShareGrant> {
        let mut grant = self.load_grant(kind, grant_id)?;
        let (resource, _) = self.load(kind, &grant.resource_id)?;
        let admin = authorize_admin(&resource, owner_id)?;
        if !self
            .storage
            .update_grant_permission(&admin, grant_id, permission)?
        {
            return Err(CotaskError::not_found(format!("grant {grant_id}")));
        }
        grant.permission = permission;
        self.feed.publish(ChangeKind::Update, grant_record(&grant));
        Ok(grant)
    }

    pub fn revoke_grant(&self, kind: ResourceKind, grant_id: &str, owner_id: &str) -> CotaskResult<()> {
        let grant = self.load_grant(kind, grant_id)?;
        let (resource, _) = self.load(kind, &grant.resource_id)?;
        let admin = authorize_admin(&resource, owner_id)?;
        if self.storage.delete_grant(&admin, grant_id)? {
            crate::clog!(
                "sharing: {} revoked {} from {}",
                logging::user_id(owner_id),
                logging::resource_id(&grant.resource_id),
                logging::user_id(&grant.grantee_id)
            );
            self.feed.publish(ChangeKind::Delete, grant_record(&grant));
        }
        Ok(())
    }

    /// A grantee drops their own access. The owner cannot leave.
    pub fn leave_shared_resource(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
    ) -> CotaskResult<()> {
        let (resource, _) = self.load(kind, resource_id)?;
        if resource.owner_id() == user_id {
            return Err(CotaskError::forbidden(
                "the owner cannot leave their own resource",
            ));
        }
        let grant = self
            .storage
            .find_grant(kind, resource_id, user_id)?
            .ok_or_else(|| CotaskError::not_found(format!("{} {resource_id}", kind.as_str())))?;
        if self.storage.delete_own_grant(kind, resource_id, user_id)? {
            crate::clog!(
                "sharing: {} left {}",
                logging::user_id(user_id),
                logging::resource_id(resource_id)
            );
            self.feed.publish(ChangeKind::Delete, grant_record(&grant));
        }
        Ok(())
    }

    /// Grants on a resource, readable by anyone who can see it.
    pub fn list_grants(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        user_id: &str,
    ) -> CotaskResult<Vec<ShareGrant>> {
        let (resource, grants) = self.load(kind, resource_id)?;
        authorize_view(&resource, &grants, user_id)?;
        Ok(grants)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn add_task(&self, list_id: &str, user_id: &str, attrs: &TaskAttrs) -> CotaskResult<Task> {
        let (list, grants) = self.load(ResourceKind::List, list_id)?;
        let editor = authorize_content(&list, &grants, user_id)?;
        attrs.validate()?;
        let now = now_secs();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            list_id: list_id.to_string(),
            title: attrs.title.trim().to_string(),
            completed: false,
            completed_by: None,
            completed_at: None,
            priority: attrs.priority,
            due_date: attrs.due_date,
            created_by: user_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_task(&editor, &task)?;
        self.feed.publish(ChangeKind::Insert, Record::Task(task.clone()));
        Ok(task)
    }

    /// Whole-row update of a task. The last writer wins.
    pub fn update_task(&self, task_id: &str, user_id: &str, attrs: &TaskAttrs) -> CotaskResult<Task> {
        let mut task = self.load_task(task_id)?;
        let (list, grants) = self.load(ResourceKind::List, &task.list_id)?;
        let editor = authorize_content(&list, &grants, user_id)?;
        attrs.validate()?;
        task.title = attrs.title.trim().to_string();
        task.priority = attrs.priority;
        task.due_date = attrs.due_date;
        task.updated_at = now_secs();
        self.write_task(&editor, task)
    }

    /// Completing records who and when; reopening clears both.
    pub fn set_task_completed(&self, task_id: &str, user_id: &str, completed: bool) -> CotaskResult<Task> {
        let mut task = self.load_task(task_id)?;
        let (list, grants) = self.load(ResourceKind::List, &task.list_id)?;
        let editor = authorize_content(&list, &grants, user_id)?;
        let now = now_secs();
        task.completed = completed;
        if completed {
            task.completed_by = Some(user_id.to_string());
            task.completed_at = Some(now);
        } else {
            task.completed_by = None;
            task.completed_at = None;
        }
        task.updated_at = now;
        self.write_task(&editor, task)
    }

    fn write_task(&self, editor: &ContentEditor, task: Task) -> CotaskResult<Task> {
        if !self.storage.update_task(editor, &task)? {
            return Err(CotaskError::not_found(format!("task {}", task.id)));
        }
        self.feed.publish(ChangeKind::Update, Record::Task(task.clone()));
        Ok(task)
    }

    pub fn delete_task(&self, task_id: &str, user_id: &str) -> CotaskResult<()> {
        let task = self.load_task(task_id)?;
        let (list, grants) = self.load(ResourceKind::List, &task.list_id)?;
        let editor = authorize_content(&list, &grants, user_id)?;
        if self.storage.delete_task(&editor, task_id)? {
            self.feed.publish(ChangeKind::Delete, Record::Task(task));
        }
        Ok(())
    }

    pub fn list_tasks(&self, list_id: &str, user_id: &str) -> CotaskResult<Vec<Task>> {
        let (list, grants) = self.load(ResourceKind::List, list_id)?;
        authorize_view(&list, &grants, user_id)?;
        Ok(self.storage.list_tasks(list_id)?)
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    pub fn dashboard(&self, user_id: &str) -> CotaskResult<Dashboard> {
        let mut summary = Dashboard::default();
        for kind in [ResourceKind::List, ResourceKind::Note] {
            for visible in self.list_visible(user_id, kind)? {
                let owned = visible.access == Access::Owner;
                match (kind, owned) {
                    (ResourceKind::List, true) => summary.owned_lists += 1,
                    (ResourceKind::List, false) => summary.shared_lists += 1,
                    (ResourceKind::Note, true) => summary.owned_notes += 1,
                    (ResourceKind::Note, false) => summary.shared_notes += 1,
                }
                if kind == ResourceKind::List {
                    let (open, done) = self.storage.count_tasks(visible.resource.id())?;
                    summary.open_tasks += open;
                    summary.completed_tasks += done;
                }
            }
        }
        summary.pending_requests = self.storage.count_pending_received(user_id)?;
        Ok(summary)
    }

    /// Access of `user_id` to a resource, or `Access::None` if it is gone.
    pub fn access_of(&self, kind: ResourceKind, resource_id: &str, user_id: &str) -> CotaskResult<Access> {
        match self.storage.get_resource(kind, resource_id)? {
            Some(resource) => {
                let grants = self.storage.list_grants(kind, resource_id)?;
                Ok(resolve(&resource, &grants, user_id))
            }
            None => Ok(Access::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{RowFilter, Scope, Table};
    use crate::model::Profile;

    fn setup() -> (Storage, ChangeFeed) {
        let storage = Storage::open_in_memory().unwrap();
        for (id, username) in [("o", "owner"), ("u", "user"), ("s", "stranger")] {
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
    fn test_create_starts_unshared_and_unpinned() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Groceries"))
            .unwrap();
        assert!(!list.pinned());
        assert!(!list.archived());
        assert!(sharing
            .list_grants(ResourceKind::List, list.id(), "o")
            .unwrap()
            .is_empty());
        assert_eq!(
            sharing.access_of(ResourceKind::List, list.id(), "o").unwrap(),
            Access::Owner
        );
        assert!(matches!(
            sharing.create_resource("o", ResourceKind::Note, &attrs("  ")),
            Err(CotaskError::Validation(_))
        ));
    }

    #[test]
    fn test_grant_share_errors() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let note = sharing
            .create_resource("o", ResourceKind::Note, &attrs("Ideas"))
            .unwrap();
        let id = note.id();

        assert!(matches!(
            sharing.grant_share(ResourceKind::Note, id, "u", "stranger", Permission::View),
            Err(CotaskError::Forbidden(_))
        ));
        assert!(matches!(
            sharing.grant_share(ResourceKind::Note, id, "o", "nobody", Permission::View),
            Err(CotaskError::NotFound(_))
        ));
        assert!(matches!(
            sharing.grant_share(ResourceKind::Note, id, "o", "owner", Permission::View),
            Err(CotaskError::SelfReference(_))
        ));
        sharing
            .grant_share(ResourceKind::Note, id, "o", "user", Permission::View)
            .unwrap();
        assert!(matches!(
            sharing.grant_share(ResourceKind::Note, id, "o", "user", Permission::Edit),
            Err(CotaskError::AlreadyExists(_))
        ));
        assert_eq!(
            sharing.access_of(ResourceKind::Note, id, "u").unwrap(),
            Access::View
        );
    }

    #[test]
    fn test_view_edit_owner_matrix() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Groceries"))
            .unwrap();
        let id = list.id().to_string();
        let grant = sharing
            .grant_share(ResourceKind::List, &id, "o", "user", Permission::View)
            .unwrap();
        let owner_task = sharing.add_task(&id, "o", &task("Bread")).unwrap();

        // View: read only.
        assert!(sharing.list_tasks(&id, "u").is_ok());
        assert!(matches!(
            sharing.add_task(&id, "u", &task("Milk")),
            Err(CotaskError::Forbidden(_))
        ));
        assert!(matches!(
            sharing.set_task_completed(&owner_task.id, "u", true),
            Err(CotaskError::Forbidden(_))
        ));
        assert!(matches!(
            sharing.update_resource(ResourceKind::List, &id, "u", &attrs("Mine")),
            Err(CotaskError::Forbidden(_))
        ));

        // Edit: content yes, administration no.
        sharing
            .update_grant_permission(ResourceKind::List, &grant.id, "o", Permission::Edit)
            .unwrap();
        sharing.add_task(&id, "u", &task("Milk")).unwrap();
        let done = sharing.set_task_completed(&owner_task.id, "u", true).unwrap();
        assert_eq!(done.completed_by.as_deref(), Some("u"));
        sharing
            .update_resource(ResourceKind::List, &id, "u", &attrs("Weekly groceries"))
            .unwrap();
        for result in [
            sharing.set_pinned(ResourceKind::List, &id, "u", true).map(|_| ()),
            sharing.set_archived(ResourceKind::List, &id, "u", true).map(|_| ()),
            sharing.delete_resource(ResourceKind::List, &id, "u"),
            sharing
                .grant_share(ResourceKind::List, &id, "u", "stranger", Permission::View)
                .map(|_| ()),
            sharing
                .update_grant_permission(ResourceKind::List, &grant.id, "u", Permission::Edit)
                .map(|_| ()),
            sharing.revoke_grant(ResourceKind::List, &grant.id, "u"),
        ] {
            assert!(matches!(result, Err(CotaskError::Forbidden(_))));
        }

        // None: invisible on reads, forbidden on writes.
        assert!(matches!(
            sharing.get_resource(ResourceKind::List, &id, "s"),
            Err(CotaskError::NotFound(_))
        ));
        assert!(matches!(
            sharing.list_tasks(&id, "s"),
            Err(CotaskError::NotFound(_))
        ));
        assert!(matches!(
            sharing.add_task(&id, "s", &task("Eggs")),
            Err(CotaskError::Forbidden(_))
        ));

        let pinned = sharing.set_pinned(ResourceKind::List, &id, "o", true).unwrap();
        assert!(pinned.pinned());
        assert_eq!(pinned.title(), "Weekly groceries");
    }

    #[test]
    fn test_reopening_task_clears_completion() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Chores"))
            .unwrap();
        let t = sharing.add_task(list.id(), "o", &task("Dishes")).unwrap();
        let t = sharing.set_task_completed(&t.id, "o", true).unwrap();
        assert!(t.completed_at.is_some());
        let t = sharing.set_task_completed(&t.id, "o", false).unwrap();
        assert!(!t.completed);
        assert_eq!(t.completed_by, None);
        assert_eq!(t.completed_at, None);
    }

    #[test]
    fn test_delete_leaves_no_orphans() {
        let (storage, feed) = setup();
        let mut sub = feed.open_subscription(vec![
            Scope::new(Table::Tasks, RowFilter::All),
            Scope::new(Table::ListShares, RowFilter::All),
            Scope::new(Table::Lists, RowFilter::All),
        ]);
        let sharing = Sharing::new(&storage, &feed);
        let list = sharing
            .create_resource("o", ResourceKind::List, &attrs("Trip"))
            .unwrap();
        let id = list.id().to_string();
        sharing
            .grant_share(ResourceKind::List, &id, "o", "user", Permission::Edit)
            .unwrap();
        sharing.add_task(&id, "o", &task("Tickets")).unwrap();
        sharing.add_task(&id, "u", &task("Hotel")).unwrap();

        sharing.delete_resource(ResourceKind::List, &id, "o").unwrap();
        assert!(storage.list_tasks(&id).unwrap().is_empty());
        assert!(storage.list_grants(ResourceKind::List, &id).unwrap().is_empty());
        assert!(storage.get_resource(ResourceKind::List, &id).unwrap().is_none());

        let events: Vec<_> = std::iter::from_fn(|| sub.try_recv().unwrap()).collect();
        let deletes: Vec<Table> = events
            .iter()
            .filter(|e| e.kind == ChangeKind::Delete)
            .map(|e| e.table())
            .collect();
        assert_eq!(
            deletes,
            [Table::Tasks, Table::Tasks, Table::ListShares, Table::Lists]
        );
    }

    #[test]
    fn test_leave_shared_resource() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let note = sharing
            .create_resource("o", ResourceKind::Note, &attrs("Plans"))
            .unwrap();
        let id = note.id();
        assert!(matches!(
            sharing.leave_shared_resource(ResourceKind::Note, id, "o"),
            Err(CotaskError::Forbidden(_))
        ));
        assert!(matches!(
            sharing.leave_shared_resource(ResourceKind::Note, id, "u"),
            Err(CotaskError::NotFound(_))
        ));
        sharing
            .grant_share(ResourceKind::Note, id, "o", "user", Permission::View)
            .unwrap();
        sharing
            .grant_share(ResourceKind::Note, id, "o", "stranger", Permission::View)
            .unwrap();
        sharing.leave_shared_resource(ResourceKind::Note, id, "u").unwrap();
        assert_eq!(
            sharing.access_of(ResourceKind::Note, id, "u").unwrap(),
            Access::None
        );
        // Other grants are untouched.
        assert_eq!(
            sharing.access_of(ResourceKind::Note, id, "s").unwrap(),
            Access::View
        );
    }

    #[test]
    fn test_list_visible_and_dashboard() {
        let (storage, feed) = setup();
        let sharing = Sharing::new(&storage, &feed);
        let mine = sharing
            .create_resource("u", ResourceKind::List, &attrs("Mine"))
            .unwrap();
        let theirs = sharing
            .create_resource("o", ResourceKind::List, &attrs("Theirs"))
            .unwrap();
        sharing
            .create_resource("o", ResourceKind::List, &attrs("Hidden"))
            .unwrap();
        sharing
            .grant_share(ResourceKind::List, theirs.id(), "o", "user", Permission::View)
            .unwrap();
        sharing
            .set_pinned(ResourceKind::List, theirs.id(), "o", true)
            .unwrap();
        let t = sharing.add_task(mine.id(), "u", &task("A")).unwrap();
        sharing.add_task(theirs.id(), "o", &task("B")).unwrap();
        sharing.set_task_completed(&t.id, "u", true).unwrap();

        let visible = sharing.list_visible("u", ResourceKind::List).unwrap();
        let titles: Vec<&str> = visible.iter().map(|v| v.resource.title()).collect();
        assert_eq!(titles, ["Theirs", "Mine"]);
        assert_eq!(visible[0].access, Access::View);
        assert_eq!(visible[1].access, Access::Owner);

        let summary = sharing.dashboard("u").unwrap();
        assert_eq!(summary.owned_lists, 1);
        assert_eq!(summary.shared_lists, 1);
        assert_eq!(summary.owned_notes, 0);
        assert_eq!(summary.open_tasks, 1);
        assert_eq!(summary.completed_tasks, 1);
    }
}
