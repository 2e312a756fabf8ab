//! Permission resolution and the capabilities it hands out.
//!
//! [`resolve`] maps a resource and a user to an [`Access`] level. Mutations in
//! the store layer do not take a user id: they take a [`ContentEditor`] or a
//! [`ResourceAdministrator`], and the only way to obtain either is through the
//! `authorize_*` functions below. Edit grants therefore cannot reach pin,
//! archive, delete or share management code paths at all.

use crate::error::CotaskError;
use crate::model::{Access, ResourceKind, ShareGrant, Shareable};

/// Effective access of `user_id` to `resource` given the resource's grants.
pub fn resolve<R: Shareable + ?Sized>(resource: &R, grants: &[ShareGrant], user_id: &str) -> Access {
    if resource.owner_id() == user_id {
        return Access::Owner;
    }
    grants
        .iter()
        .find(|g| {
            g.kind == resource.kind() && g.resource_id == resource.id() && g.grantee_id == user_id
        })
        .map(|g| Access::from(g.permission))
        .unwrap_or(Access::None)
}

/// Proof that a user may change the content of one resource: title, body and,
/// for lists, tasks.
#[derive(Debug, Clone)]
pub struct ContentEditor {
    kind: ResourceKind,
    resource_id: String,
    user_id: String,
    access: Access,
}

impl ContentEditor {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
    pub fn access(&self) -> Access {
        self.access
    }
}

/// Proof that a user owns one resource and may pin, archive, delete it or
/// manage its grants.
#[derive(Debug, Clone)]
pub struct ResourceAdministrator {
    kind: ResourceKind,
    resource_id: String,
    owner_id: String,
}

impl ResourceAdministrator {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Any administrator may also edit content.
    pub fn as_editor(&self) -> ContentEditor {
        ContentEditor {
            kind: self.kind,
            resource_id: self.resource_id.clone(),
            user_id: self.owner_id.clone(),
            access: Access::Owner,
        }
    }
}

/// Users without any access do not learn that the resource exists.
pub fn authorize_view<R: Shareable + ?Sized>(
    resource: &R,
    grants: &[ShareGrant],
    user_id: &str,
) -> Result<Access, CotaskError> {
    match resolve(resource, grants, user_id) {
        Access::None => Err(CotaskError::not_found(format!(
            "{} {}",
            resource.kind().as_str(),
            resource.id()
        ))),
        access => Ok(access),
    }
}

pub fn authorize_content<R: Shareable + ?Sized>(
    resource: &R,
    grants: &[ShareGrant],
    user_id: &str,
) -> Result<ContentEditor, CotaskError> {
    let access = resolve(resource, grants, user_id);
    if !access.can_edit_content() {
        let why = match access {
            Access::View => "view-only access",
            _ => "no access",
        };
        return Err(CotaskError::forbidden(format!(
            "{why} to {} {}",
            resource.kind().as_str(),
            resource.id()
        )));
    }
    Ok(ContentEditor {
        kind: resource.kind(),
        resource_id: resource.id().to_string(),
        user_id: user_id.to_string(),
        access,
    })
}

pub fn authorize_admin<R: Shareable + ?Sized>(
    resource: &R,
    user_id: &str,
) -> Result<ResourceAdministrator, CotaskError> {
    if resource.owner_id() != user_id {
        return Err(CotaskError::forbidden(format!(
            "only the owner can manage {} {}",
            resource.kind().as_str(),
            resource.id()
        )));
    }
    Ok(ResourceAdministrator {
        kind: resource.kind(),
        resource_id: resource.id().to_string(),
        owner_id: user_id.to_string(),
    })
}
