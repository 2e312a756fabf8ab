//! Task handlers. Tasks always belong to a list.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::model::TaskAttrs;
use crate::web::state::SharedState;
use crate::web::utils::{authenticate, empty_result, error_response, json_result};

#[derive(Deserialize)]
pub struct CompletePayload {
    completed: bool,
}

pub async fn list_tasks_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(list_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.sharing().list_tasks(&list_id, &user_id))
}

pub async fn add_task_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(list_id): Path<String>,
    axum::Json(req): axum::Json<TaskAttrs>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::CREATED,
        st.backend.sharing().add_task(&list_id, &user_id, &req),
    )
}

pub async fn update_task_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    axum::Json(req): axum::Json<TaskAttrs>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::OK,
        st.backend.sharing().update_task(&task_id, &user_id, &req),
    )
}

pub async fn complete_task_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    axum::Json(req): axum::Json<CompletePayload>,
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
            .set_task_completed(&task_id, &user_id, req.completed),
    )
}

pub async fn delete_task_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    empty_result(st.backend.sharing().delete_task(&task_id, &user_id))
}
