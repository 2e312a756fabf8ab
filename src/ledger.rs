//! Relationship ledger: connection requests between two profiles.
//!
//! States are none, pending and friend. A request creates a pending row, only
//! the receiver can accept it, and reject/remove delete the row outright.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::error::{CotaskError, CotaskResult};
use crate::feed::{ChangeFeed, ChangeKind, Record};
use crate::logging;
use crate::model::{Contact, Relationship, RelationshipStatus};
use crate::now_secs;
use crate::storage::Storage;

const PAGE_SIZE: u32 = 50;

pub struct RelationshipLedger<'a> {
    storage: &'a Storage,
    feed: &'a ChangeFeed,
}

impl<'a> RelationshipLedger<'a> {
    pub fn new(storage: &'a Storage, feed: &'a ChangeFeed) -> Self {
        Self { storage, feed }
    }

    pub fn request_connection(&self, requester: &str, target: &str) -> CotaskResult<Relationship> {
        if requester == target {
            return Err(CotaskError::SelfReference(
                "cannot send a connection request to yourself".into(),
            ));
        }
        if self.storage.get_profile(target)?.is_none() {
            return Err(CotaskError::not_found(format!("user {target}")));
        }
        if let Some(existing) = self.storage.find_relationship_between(requester, target)? {
            let what = match existing.status {
                RelationshipStatus::Friend => "you are already connected",
                RelationshipStatus::Pending => "a request is already pending",
                RelationshipStatus::Blocked => "this connection is blocked",
            };
            return Err(CotaskError::AlreadyExists(what.into()));
        }

        let now = now_secs();
        let rel = Relationship {
            id: Uuid::new_v4().to_string(),
            user_a: requester.to_string(),
            user_b: target.to_string(),
            status: RelationshipStatus::Pending,
            initiator: requester.to_string(),
            created_at: now,
            updated_at: now,
        };
        // The unique pair index catches a request racing in from the other side.
        self.storage.insert_relationship(&rel)?;
        crate::clog!(
            "ledger: {} requested connection with {}",
            logging::user_id(requester),
            logging::user_id(target)
        );
        self.feed
            .publish(ChangeKind::Insert, Record::Relationship(rel.clone()));
        Ok(rel)
    }

    pub fn request_connection_by_username(
        &self,
        requester: &str,
        username: &str,
    ) -> CotaskResult<Relationship> {
        let target = self
            .storage
            .get_profile_by_username(username.trim())?
            .ok_or_else(|| CotaskError::not_found(format!("user {username}")))?;
        self.request_connection(requester, &target.id)
    }

    fn load(&self, relationship_id: &str) -> CotaskResult<Relationship> {
        self.storage
            .get_relationship(relationship_id)?
            .ok_or_else(|| CotaskError::not_found(format!("relationship {relationship_id}")))
    }

    pub fn accept(&self, relationship_id: &str, acting_user: &str) -> CotaskResult<Relationship> {
        let mut rel = self.load(relationship_id)?;
        if !rel.involves(acting_user) || rel.initiator == acting_user {
            return Err(CotaskError::forbidden(
                "only the receiver of a request can accept it",
            ));
        }
        if rel.status != RelationshipStatus::Pending {
            return Err(CotaskError::forbidden("this request is no longer pending"));
        }

        let now = now_secs();
        if !self
            .storage
            .update_relationship_status(&rel.id, RelationshipStatus::Friend, now)?
        {
            return Err(CotaskError::not_found(format!("relationship {relationship_id}")));
        }
        rel.status = RelationshipStatus::Friend;
        rel.updated_at = now;
        crate::clog!(
            "ledger: {} accepted {}",
            logging::user_id(acting_user),
            logging::resource_id(&rel.id)
        );
        self.feed
            .publish(ChangeKind::Update, Record::Relationship(rel.clone()));
        Ok(rel)
    }

    /// Decline a pending request. Same effect as [`Self::remove`].
    pub fn reject(&self, relationship_id: &str, acting_user: &str) -> CotaskResult<()> {
        self.delete(relationship_id, acting_user, "rejected")
    }

    /// Drop a connection in any state, from either side.
    pub fn remove(&self, relationship_id: &str, acting_user: &str) -> CotaskResult<()> {
        self.delete(relationship_id, acting_user, "removed")
    }

    fn delete(&self, relationship_id: &str, acting_user: &str, verb: &str) -> CotaskResult<()> {
        let rel = self.load(relationship_id)?;
        if !rel.involves(acting_user) {
            return Err(CotaskError::forbidden(
                "only members of a connection can change it",
            ));
        }
        if self.storage.delete_relationship(&rel.id)? {
            crate::clog!(
                "ledger: {} {verb} {}",
                logging::user_id(acting_user),
                logging::resource_id(&rel.id)
            );
            self.feed.publish(ChangeKind::Delete, Record::Relationship(rel));
        }
        Ok(())
    }

    /// Every relationship touching `user_id`, read a page at a time.
    pub fn list_for_user(&self, user_id: &str) -> ContactCursor<'a> {
        ContactCursor::new(self.storage, user_id, PAGE_SIZE)
    }

    pub fn pending_received_count(&self, user_id: &str) -> CotaskResult<u32> {
        Ok(self.storage.count_pending_received(user_id)?)
    }
}

/// Lazy, finite walk over a user's relationships in creation order.
/// [`ContactCursor::restart`] rewinds it to the first row.
pub struct ContactCursor<'a> {
    storage: &'a Storage,
    user_id: String,
    page_size: u32,
    after: Option<(u64, String)>,
    buffer: VecDeque<Relationship>,
    exhausted: bool,
}

impl<'a> ContactCursor<'a> {
    pub fn new(storage: &'a Storage, user_id: &str, page_size: u32) -> Self {
        Self {
            storage,
            user_id: user_id.to_string(),
            page_size: page_size.max(1),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn restart(&mut self) {
        self.after = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> CotaskResult<()> {
        let after = self.after.as_ref().map(|(ts, id)| (*ts, id.as_str()));
        let page = self
            .storage
            .list_relationships_page(&self.user_id, after, self.page_size)?;
        if (page.len() as u32) < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some((last.created_at, last.id.clone()));
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for ContactCursor<'_> {
    type Item = CotaskResult<Contact>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let rel = self.buffer.pop_front()?;
        Some(Ok(Contact {
            other_user_id: rel.other(&self.user_id).to_string(),
            view: rel.view_for(&self.user_id),
            relationship: rel,
        }))
    }
}
