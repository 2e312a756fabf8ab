//! Profile, avatar and user search handlers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::web::config::DEFAULT_SEARCH_LIMIT;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, authenticate, empty_result, error_response, json_result};

#[derive(Deserialize)]
pub struct UpdateProfilePayload {
    display_name: String,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    limit: Option<u32>,
}

pub async fn get_own_profile_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.accounts().profile(&user_id))
}

pub async fn update_own_profile_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<UpdateProfilePayload>,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(
        StatusCode::OK,
        st.backend
            .accounts()
            .update_display_name(&user_id, &req.display_name),
    )
}

/// Delete the caller's account and end all of their sessions.
pub async fn delete_account_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    if let Err(e) = st.backend.accounts().delete_account(&user_id) {
        return error_response(e);
    }
    if let Err(e) = st.backend.avatars().remove(&user_id) {
        crate::clog!("avatar: cleanup for deleted account failed: {e}");
    }
    st.sessions.revoke_user(&user_id);
    StatusCode::NO_CONTENT.into_response()
}

/// Raw image body; the MIME type comes from the Content-Type header.
pub async fn upload_avatar_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return api_error(StatusCode::BAD_REQUEST, "missing Content-Type header");
    };
    let url = match st.backend.avatars().upload(&user_id, content_type, &body) {
        Ok(url) => url,
        Err(e) => return error_response(e),
    };
    crate::clog!(
        "avatar: {} uploaded {} bytes",
        crate::logging::user_id(&user_id),
        body.len()
    );
    json_result(
        StatusCode::OK,
        st.backend.accounts().set_avatar(&user_id, Some(&url)),
    )
}

pub async fn delete_avatar_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    if let Err(e) = st.backend.avatars().remove(&user_id) {
        return error_response(e);
    }
    empty_result(st.backend.accounts().set_avatar(&user_id, None).map(|_| ()))
}

pub async fn serve_avatar_handler(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
) -> Response {
    let st = state.lock().await;
    match st.backend.avatars().read(&file_name) {
        Ok(Some((bytes, content_type))) => {
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                    (
                        header::CONTENT_SECURITY_POLICY,
                        "default-src 'none'; sandbox",
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "avatar not found"),
        Err(e) => error_response(e),
    }
}

pub async fn get_profile_by_username_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> Response {
    let st = state.lock().await;
    if let Err(e) = authenticate(&st, &headers) {
        return error_response(e);
    }
    match st.backend.storage().get_profile_by_username(&username) {
        Ok(Some(profile)) => (StatusCode::OK, axum::Json(profile)).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("user {username} not found")),
        Err(e) => error_response(e.into()),
    }
}

pub async fn search_profiles_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Response {
    let st = state.lock().await;
    if let Err(e) = authenticate(&st, &headers) {
        return error_response(e);
    }
    let prefix = query.q.trim().to_lowercase();
    if prefix.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "q cannot be empty");
    }
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 100);
    json_result(
        StatusCode::OK,
        st.backend
            .storage()
            .search_profiles(&prefix, limit)
            .map_err(Into::into),
    )
}
