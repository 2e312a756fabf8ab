//! Record types for profiles, relationships, shareable resources, tasks and
//! share grants.
//!
//! Lists and notes are separate record types sharing the [`Shareable`] trait;
//! [`Resource`] tags one or the other where code handles both kinds.

use serde::{Deserialize, Serialize};

use crate::error::CotaskError;

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: u64,
}

/// Lowercase ASCII letters, digits and underscores, 3 to 32 characters.
pub fn validate_username(username: &str) -> Result<(), CotaskError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(CotaskError::validation(
            "username must be between 3 and 32 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(CotaskError::validation(
            "username may only contain lowercase letters, digits and underscores",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Pending,
    Friend,
    /// Reserved. Nothing in the ledger writes it yet.
    Blocked,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Pending => "pending",
            RelationshipStatus::Friend => "friend",
            RelationshipStatus::Blocked => "blocked",
        }
    }

    /// Anything that is not `pending` or `friend` reads back as blocked.
    pub fn from_db(value: &str) -> Self {
        match value {
            "pending" => RelationshipStatus::Pending,
            "friend" => RelationshipStatus::Friend,
            _ => RelationshipStatus::Blocked,
        }
    }
}

/// How a relationship looks from one member's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipView {
    Friend,
    PendingSent,
    PendingReceived,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub status: RelationshipStatus,
    pub initiator: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Relationship {
    pub fn involves(&self, user_id: &str) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The member that is not `user_id`.
    pub fn other(&self, user_id: &str) -> &str {
        if self.user_a == user_id {
            &self.user_b
        } else {
            &self.user_a
        }
    }

    pub fn view_for(&self, user_id: &str) -> RelationshipView {
        match self.status {
            RelationshipStatus::Friend => RelationshipView::Friend,
            RelationshipStatus::Pending if self.initiator == user_id => {
                RelationshipView::PendingSent
            }
            RelationshipStatus::Pending => RelationshipView::PendingReceived,
            RelationshipStatus::Blocked => RelationshipView::Blocked,
        }
    }
}

/// A relationship annotated for the user who listed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub relationship: Relationship,
    pub other_user_id: String,
    pub view: RelationshipView,
}

// ---------------------------------------------------------------------------
// Shareable resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    List,
    Note,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::List => "list",
            ResourceKind::Note => "note",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            ResourceKind::List => "lists",
            ResourceKind::Note => "notes",
        }
    }

    pub(crate) fn share_table(&self) -> &'static str {
        match self {
            ResourceKind::List => "list_shares",
            ResourceKind::Note => "note_shares",
        }
    }

    /// Column holding the free text of the resource.
    pub(crate) fn body_column(&self) -> &'static str {
        match self {
            ResourceKind::List => "description",
            ResourceKind::Note => "content",
        }
    }
}

pub trait Shareable {
    fn kind(&self) -> ResourceKind;
    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRecord {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub pinned: bool,
    pub archived: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub content: Option<String>,
    pub pinned: bool,
    pub archived: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Shareable for ListRecord {
    fn kind(&self) -> ResourceKind {
        ResourceKind::List
    }
    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

impl Shareable for NoteRecord {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Note
    }
    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    List(ListRecord),
    Note(NoteRecord),
}

impl Resource {
    pub fn title(&self) -> &str {
        match self {
            Resource::List(l) => &l.title,
            Resource::Note(n) => &n.title,
        }
    }

    /// Description of a list or content of a note.
    pub fn body(&self) -> Option<&str> {
        match self {
            Resource::List(l) => l.description.as_deref(),
            Resource::Note(n) => n.content.as_deref(),
        }
    }

    pub fn pinned(&self) -> bool {
        match self {
            Resource::List(l) => l.pinned,
            Resource::Note(n) => n.pinned,
        }
    }

    pub fn archived(&self) -> bool {
        match self {
            Resource::List(l) => l.archived,
            Resource::Note(n) => n.archived,
        }
    }

    pub fn updated_at(&self) -> u64 {
        match self {
            Resource::List(l) => l.updated_at,
            Resource::Note(n) => n.updated_at,
        }
    }
}

impl Shareable for Resource {
    fn kind(&self) -> ResourceKind {
        match self {
            Resource::List(_) => ResourceKind::List,
            Resource::Note(_) => ResourceKind::Note,
        }
    }
    fn id(&self) -> &str {
        match self {
            Resource::List(l) => &l.id,
            Resource::Note(n) => &n.id,
        }
    }
    fn owner_id(&self) -> &str {
        match self {
            Resource::List(l) => &l.owner_id,
            Resource::Note(n) => &n.owner_id,
        }
    }
}

/// Input for creating or editing a resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceAttrs {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl ResourceAttrs {
    pub fn validate(&self) -> Result<(), CotaskError> {
        if self.title.trim().is_empty() {
            return Err(CotaskError::validation("title cannot be empty"));
        }
        if self.title.chars().count() > 200 {
            return Err(CotaskError::validation("title is limited to 200 characters"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub list_id: String,
    pub title: String,
    pub completed: bool,
    pub completed_by: Option<String>,
    pub completed_at: Option<u64>,
    pub priority: Priority,
    /// Seconds since the UNIX epoch.
    pub due_date: Option<u64>,
    pub created_by: String,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskAttrs {
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<u64>,
}

impl TaskAttrs {
    pub fn validate(&self) -> Result<(), CotaskError> {
        if self.title.trim().is_empty() {
            return Err(CotaskError::validation("task title cannot be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Grants and access
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
    Edit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "view" => Some(Permission::View),
            "edit" => Some(Permission::Edit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub id: String,
    pub kind: ResourceKind,
    pub resource_id: String,
    pub grantee_id: String,
    pub permission: Permission,
    pub granted_by: String,
    pub granted_at: u64,
}

/// Effective access of one user to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Owner,
    Edit,
    View,
    None,
}

impl Access {
    pub fn can_view(&self) -> bool {
        !matches!(self, Access::None)
    }

    pub fn can_edit_content(&self) -> bool {
        matches!(self, Access::Owner | Access::Edit)
    }

    pub fn can_administer(&self) -> bool {
        matches!(self, Access::Owner)
    }
}

impl From<Permission> for Access {
    fn from(p: Permission) -> Self {
        match p {
            Permission::View => Access::View,
            Permission::Edit => Access::Edit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(status: RelationshipStatus) -> Relationship {
        Relationship {
            id: "r1".into(),
            user_a: "alice".into(),
            user_b: "bob".into(),
            status,
            initiator: "alice".into(),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_relationship_views() {
        let pending = rel(RelationshipStatus::Pending);
        assert_eq!(pending.view_for("alice"), RelationshipView::PendingSent);
        assert_eq!(pending.view_for("bob"), RelationshipView::PendingReceived);
        assert_eq!(pending.other("bob"), "alice");

        let friend = rel(RelationshipStatus::Friend);
        assert_eq!(friend.view_for("bob"), RelationshipView::Friend);
    }

    #[test]
    fn test_unknown_status_reads_as_blocked() {
        assert_eq!(RelationshipStatus::from_db("muted"), RelationshipStatus::Blocked);
        assert_eq!(
            rel(RelationshipStatus::from_db("???")).view_for("alice"),
            RelationshipView::Blocked
        );
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("sam_99").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("Sam").is_err());
        assert!(validate_username("with space").is_err());
    }

    #[test]
    fn test_access_capabilities() {
        assert!(Access::Owner.can_administer());
        assert!(Access::Edit.can_edit_content());
        assert!(!Access::Edit.can_administer());
        assert!(Access::View.can_view());
        assert!(!Access::View.can_edit_content());
        assert!(!Access::None.can_view());
    }
}
