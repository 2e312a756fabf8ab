use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use crate::web::state::SharedState;
use crate::web::utils::{authenticate, error_response, json_result};

pub async fn dashboard_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let st = state.lock().await;
    let user_id = match authenticate(&st, &headers) {
        Ok(u) => u,
        Err(e) => return error_response(e),
    };
    json_result(StatusCode::OK, st.backend.sharing().dashboard(&user_id))
}
