//! Sign-up, sign-in and session handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::auth::{hash_password, validate_password, verify_password};
use crate::error::CotaskError;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, authenticate, bearer_token, error_response};

#[derive(Deserialize)]
pub struct SignUpPayload {
    email: String,
    password: String,
    username: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Deserialize)]
pub struct SignInPayload {
    email: String,
    password: String,
}

pub async fn sign_up_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<SignUpPayload>,
) -> Response {
    if let Err(e) = validate_password(&req.password) {
        return error_response(e);
    }
    // Hash before taking the lock; bcrypt is slow on purpose.
    let password_hash = match hash_password(&req.password).await {
        Ok(h) => h,
        Err(e) => return error_response(e),
    };

    let mut st = state.lock().await;
    let profile = match st.backend.accounts().register(
        &req.email,
        &password_hash,
        &req.username,
        &req.display_name,
    ) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let token = st.sessions.create(&profile.id);
    let body = serde_json::json!({ "token": token, "user": profile });
    (StatusCode::CREATED, axum::Json(body)).into_response()
}

pub async fn sign_in_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<SignInPayload>,
) -> Response {
    let credentials = {
        let st = state.lock().await;
        match st.backend.accounts().credentials_for(&req.email) {
            Ok(c) => c,
            Err(e) => return error_response(e),
        }
    };
    let Some(credentials) = credentials else {
        return api_error(StatusCode::UNAUTHORIZED, "invalid email or password");
    };
    match verify_password(&req.password, &credentials.password_hash).await {
        Ok(true) => {}
        Ok(false) => return api_error(StatusCode::UNAUTHORIZED, "invalid email or password"),
        Err(e) => return error_response(e),
    }

    let mut st = state.lock().await;
    let profile = match st.backend.accounts().profile(&credentials.user_id) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let token = st.sessions.create(&profile.id);
    crate::clog!("auth: {} signed in", crate::logging::user_id(&profile.id));
    let body = serde_json::json!({ "token": token, "user": profile });
    (StatusCode::OK, axum::Json(body)).into_response()
}

pub async fn sign_out_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut st = state.lock().await;
    let Some(token) = bearer_token(&headers, None) else {
        return error_response(CotaskError::Unauthenticated);
    };
    if st.sessions.revoke(token) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(CotaskError::Unauthenticated)
    }
}

pub async fn current_user_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    let accounts = st.backend.accounts();
    let current = match accounts.current_user(&user_id) {
        Ok(Some(c)) => c,
        Ok(None) => return error_response(CotaskError::Unauthenticated),
        Err(e) => return error_response(e),
    };
    match accounts.profile(&user_id) {
        Ok(profile) => {
            let body = serde_json::json!({
                "id": current.id,
                "email": current.email,
                "profile": profile,
            });
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        Err(e) => error_response(e),
    }
}
