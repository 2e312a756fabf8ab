//! WebSocket upgrade and per-user change streaming.
//!
//! Each connection holds a scoped feed subscription plus a server-side
//! [`SessionView`] of the user's visible rows. The view is only used to keep
//! the subscription's filters in step with what the user can see, so a new
//! share starts streaming its tasks without a reconnect.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::feed::{FeedError, Subscription};
use crate::reconcile::SessionView;
use crate::web::config::MAX_WS_CONNECTIONS;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, authenticate_token, bearer_token, error_response};

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    let (user_id, token, ws_count) = {
        let st = state.lock().await;
        let token = bearer_token(&headers, query.token.as_deref());
        match authenticate_token(&st, token) {
            Ok(user_id) => (
                user_id,
                token.unwrap_or_default().to_string(),
                st.ws_connection_count.clone(),
            ),
            Err(e) => return error_response(e),
        }
    };

    let current = ws_count.load(Ordering::Relaxed);
    if current >= MAX_WS_CONNECTIONS {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("too many WebSocket connections (max {MAX_WS_CONNECTIONS})"),
        );
    }

    ws.on_upgrade(move |socket| ws_connection(socket, state, user_id, token))
        .into_response()
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(WsMessage::Text(json)).await.is_ok(),
        Err(_) => true,
    }
}

/// Subscribe first, then snapshot, so nothing published in between is lost.
async fn open_session(state: &SharedState, user_id: &str) -> Option<(Subscription, SessionView)> {
    let st = state.lock().await;
    let mut subscription = st.backend.feed().open_subscription(Vec::new());
    match SessionView::load(st.backend.storage(), user_id) {
        Ok(view) => {
            subscription.rescope(view.scopes());
            Some((subscription, view))
        }
        Err(e) => {
            crate::clog!(
                "ws: could not load session for {}: {e}",
                crate::logging::user_id(user_id)
            );
            None
        }
    }
}

async fn session_valid(state: &SharedState, token: &str) -> bool {
    state.lock().await.sessions.get(token).is_some()
}

async fn ws_connection(mut socket: WebSocket, state: SharedState, user_id: String, token: String) {
    let (ws_count, pending_timeout, mut revocations) = {
        let st = state.lock().await;
        let count = st.ws_connection_count.clone();
        count.fetch_add(1, Ordering::Relaxed);
        (count, st.pending_timeout, st.sessions.revocations())
    };
    // Signed out between the upgrade request and now.
    if !session_valid(&state, &token).await {
        let _ = socket.send(WsMessage::Close(None)).await;
        ws_count.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let Some((mut subscription, mut view)) = open_session(&state, &user_id).await else {
        ws_count.fetch_sub(1, Ordering::Relaxed);
        return;
    };
    crate::clog!(
        "ws: {} connected on subscription {}",
        crate::logging::user_id(&user_id),
        subscription.id()
    );

    let ready = serde_json::json!({
        "type": "ready",
        "pending_timeout_secs": pending_timeout.as_secs(),
    });
    if !send_json(&mut socket, &ready).await {
        ws_count.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    loop {
        tokio::select! {
            result = subscription.recv() => {
                match result {
                    Ok(event) => {
                        {
                            let st = state.lock().await;
                            if st.sessions.get(&token).is_none() {
                                break;
                            }
                            if let Err(e) = view.apply(&event, st.backend.storage()) {
                                crate::clog!("ws: event {} not applied: {e}", event.seq);
                            }
                        }
                        let scopes = view.scopes();
                        if scopes.as_slice() != subscription.scopes() {
                            subscription.rescope(scopes);
                        }
                        let msg = serde_json::json!({ "type": "change", "event": event });
                        if !send_json(&mut socket, &msg).await {
                            break;
                        }
                    }
                    Err(FeedError::Lagged(n)) => {
                        crate::clog!(
                            "ws: {} lagged, skipped {n} events",
                            crate::logging::user_id(&user_id)
                        );
                        {
                            let st = state.lock().await;
                            match SessionView::load(st.backend.storage(), &user_id) {
                                Ok(fresh) => view = fresh,
                                Err(e) => crate::clog!("ws: reload failed: {e}"),
                            }
                        }
                        subscription.rescope(view.scopes());
                        // Tell the client so it can refetch.
                        let msg = serde_json::json!({ "type": "events_missed", "count": n });
                        if !send_json(&mut socket, &msg).await {
                            break;
                        }
                    }
                    Err(FeedError::Closed) => break,
                }
            }
            changed = revocations.changed() => {
                if changed.is_err() || !session_valid(&state, &token).await {
                    crate::clog!(
                        "ws: session of {} revoked, closing",
                        crate::logging::user_id(&user_id)
                    );
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = socket.send(WsMessage::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = socket.send(WsMessage::Close(None)).await;
    subscription.close();
    ws_count.fetch_sub(1, Ordering::Relaxed);
    crate::clog!("ws: {} disconnected", crate::logging::user_id(&user_id));
}
