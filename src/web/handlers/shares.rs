//! Share grant handlers for lists and notes.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::model::{Permission, ResourceKind};
use crate::web::state::SharedState;
use crate::web::utils::{authenticate, empty_result, error_response, json_result};

#[derive(Deserialize)]
pub struct GrantPayload {
    username: String,
    permission: Permission,
}

#[derive(Deserialize)]
pub struct PermissionPayload {
    permission: Permission,
}

async fn list(state: SharedState, headers: HeaderMap, kind: ResourceKind, id: String) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.sharing().list_grants(kind, &id, &user_id))
}

async fn grant(
    state: SharedState,
    headers: HeaderMap,
    kind: ResourceKind,
    id: String,
    req: GrantPayload,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::CREATED,
        st.backend
            .sharing()
            .grant_share(kind, &id, &user_id, &req.username, req.permission),
    )
}

async fn update(
    state: SharedState,
    headers: HeaderMap,
    kind: ResourceKind,
    grant_id: String,
    permission: Permission,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::OK,
        st.backend
            .sharing()
            .update_grant_permission(kind, &grant_id, &user_id, permission),
    )
}

async fn revoke(state: SharedState, headers: HeaderMap, kind: ResourceKind, grant_id: String) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    empty_result(st.backend.sharing().revoke_grant(kind, &grant_id, &user_id))
}

pub async fn list_list_shares_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    list(state, headers, ResourceKind::List, id).await
}

pub async fn share_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<GrantPayload>,
) -> Response {
    grant(state, headers, ResourceKind::List, id, req).await
}

pub async fn update_list_share_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(grant_id): Path<String>,
    axum::Json(req): axum::Json<PermissionPayload>,
) -> Response {
    update(state, headers, ResourceKind::List, grant_id, req.permission).await
}

pub async fn revoke_list_share_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(grant_id): Path<String>,
) -> Response {
    revoke(state, headers, ResourceKind::List, grant_id).await
}

pub async fn list_note_shares_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    list(state, headers, ResourceKind::Note, id).await
}

pub async fn share_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<GrantPayload>,
) -> Response {
    grant(state, headers, ResourceKind::Note, id, req).await
}

pub async fn update_note_share_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(grant_id): Path<String>,
    axum::Json(req): axum::Json<PermissionPayload>,
) -> Response {
    update(state, headers, ResourceKind::Note, grant_id, req.permission).await
}

pub async fn revoke_note_share_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(grant_id): Path<String>,
) -> Response {
    revoke(state, headers, ResourceKind::Note, grant_id).await
}
