//! Connection request handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::error::CotaskResult;
use crate::model::Contact;
use crate::web::state::SharedState;
use crate::web::utils::{authenticate, empty_result, error_response, json_result};

#[derive(Deserialize)]
pub struct RequestConnectionPayload {
    username: String,
}

pub async fn list_relationships_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    let contacts: CotaskResult<Vec<Contact>> = st.backend.ledger().list_for_user(&user_id).collect();
    json_result(StatusCode::OK, contacts)
}

pub async fn request_connection_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<RequestConnectionPayload>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::CREATED,
        st.backend
            .ledger()
            .request_connection_by_username(&user_id, &req.username),
    )
}

pub async fn pending_count_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::OK,
        st.backend
            .ledger()
            .pending_received_count(&user_id)
            .map(|count| serde_json::json!({ "count": count })),
    )
}

pub async fn accept_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.ledger().accept(&id, &user_id))
}

pub async fn reject_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    empty_result(st.backend.ledger().reject(&id, &user_id))
}

pub async fn remove_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    empty_result(st.backend.ledger().remove(&id, &user_id))
}
