//! List and note handlers. Both kinds share one implementation; the route
//! decides the kind.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::model::{ResourceAttrs, ResourceKind};
use crate::web::state::SharedState;
use crate::web::utils::{authenticate, empty_result, error_response, json_result};

#[derive(Deserialize)]
pub struct PinPayload {
    pinned: bool,
}

#[derive(Deserialize)]
pub struct ArchivePayload {
    archived: bool,
}

async fn list_visible(state: SharedState, headers: HeaderMap, kind: ResourceKind) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.sharing().list_visible(&user_id, kind))
}

async fn create(
    state: SharedState,
    headers: HeaderMap,
    kind: ResourceKind,
    attrs: ResourceAttrs,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::CREATED,
        st.backend.sharing().create_resource(&user_id, kind, &attrs),
    )
}

async fn get_one(state: SharedState, headers: HeaderMap, kind: ResourceKind, id: String) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.sharing().get_resource(kind, &id, &user_id))
}

async fn update(
    state: SharedState,
    headers: HeaderMap,
    kind: ResourceKind,
    id: String,
    attrs: ResourceAttrs,
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
            .update_resource(kind, &id, &user_id, &attrs),
    )
}

async fn delete(state: SharedState, headers: HeaderMap, kind: ResourceKind, id: String) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    empty_result(st.backend.sharing().delete_resource(kind, &id, &user_id))
}

async fn pin(state: SharedState, headers: HeaderMap, kind: ResourceKind, id: String, pinned: bool) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::OK,
        st.backend.sharing().set_pinned(kind, &id, &user_id, pinned),
    )
}

async fn archive(
    state: SharedState,
    headers: HeaderMap,
    kind: ResourceKind,
    id: String,
    archived: bool,
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
            .set_archived(kind, &id, &user_id, archived),
    )
}

async fn leave(state: SharedState, headers: HeaderMap, kind: ResourceKind, id: String) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    empty_result(
        st.backend
            .sharing()
            .leave_shared_resource(kind, &id, &user_id),
    )
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

pub async fn list_lists_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    list_visible(state, headers, ResourceKind::List).await
}

pub async fn create_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<ResourceAttrs>,
) -> Response {
    create(state, headers, ResourceKind::List, req).await
}

pub async fn get_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    get_one(state, headers, ResourceKind::List, id).await
}

pub async fn update_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<ResourceAttrs>,
) -> Response {
    update(state, headers, ResourceKind::List, id, req).await
}

pub async fn delete_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    delete(state, headers, ResourceKind::List, id).await
}

pub async fn pin_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<PinPayload>,
) -> Response {
    pin(state, headers, ResourceKind::List, id, req.pinned).await
}

pub async fn archive_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<ArchivePayload>,
) -> Response {
    archive(state, headers, ResourceKind::List, id, req.archived).await
}

pub async fn leave_list_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    leave(state, headers, ResourceKind::List, id).await
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

pub async fn list_notes_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    list_visible(state, headers, ResourceKind::Note).await
}

pub async fn create_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<ResourceAttrs>,
) -> Response {
    create(state, headers, ResourceKind::Note, req).await
}

pub async fn get_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    get_one(state, headers, ResourceKind::Note, id).await
}

pub async fn update_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<ResourceAttrs>,
) -> Response {
    update(state, headers, ResourceKind::Note, id, req).await
}

pub async fn delete_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    delete(state, headers, ResourceKind::Note, id).await
}

pub async fn pin_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<PinPayload>,
) -> Response {
    pin(state, headers, ResourceKind::Note, id, req.pinned).await
}

pub async fn archive_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<ArchivePayload>,
) -> Response {
    archive(state, headers, ResourceKind::Note, id, req.archived).await
}

pub async fn leave_note_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    leave(state, headers, ResourceKind::Note, id).await
}
