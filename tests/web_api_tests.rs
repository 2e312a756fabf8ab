use std::io::Read;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use cotask::backend::Backend;
use cotask::feed::ChangeFeed;
use cotask::web::router::build_router;
use cotask::web::state::AppState;

struct TestServer {
    base_url: String,
    shutdown_tx: oneshot::Sender<()>,
    _data: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let data = tempfile::tempdir().expect("temp dir");
    let backend =
        Backend::open_in_memory(data.path().join("avatars"), ChangeFeed::new(256)).expect("backend");
    let state = AppState::new(backend, Duration::from_secs(10)).shared();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind server");
    let addr = listener.local_addr().expect("server addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        shutdown_tx,
        _data: data,
    }
}

fn read_body(response: ureq::Response) -> Value {
    let body = response.into_string().unwrap_or_default();
    if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).unwrap_or(Value::String(body))
    }
}

/// Issue one request and return the status with the decoded JSON body
/// (`Null` for empty bodies).
fn call(base_url: &str, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> (u16, Value) {
    let mut request = ureq::request(method, &format!("{base_url}{path}"));
    if let Some(token) = token {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }
    let result = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    match result {
        Ok(r) => (r.status(), read_body(r)),
        Err(ureq::Error::Status(code, r)) => (code, read_body(r)),
        Err(e) => panic!("request failed: {e}"),
    }
}

/// Sign up and return `(token, user_id)`.
fn sign_up(base_url: &str, username: &str) -> (String, String) {
    let (status, body) = call(
        base_url,
        "POST",
        "/api/auth/signup",
        None,
        Some(json!({
            "email": format!("{username}@example.com"),
            "password": "correct horse",
            "username": username,
        })),
    );
    assert_eq!(status, 201, "signup failed: {body}");
    let token = body["token"].as_str().expect("token").to_string();
    let user_id = body["user"]["id"].as_str().expect("user id").to_string();
    (token, user_id)
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_up_sign_in_and_sign_out() {
    let server = start_server().await;
    let base_url = server.base_url.clone();

    blocking(move || {
        let (token, user_id) = sign_up(&base_url, "olive");

        let (status, body) = call(&base_url, "GET", "/api/auth/me", Some(&token), None);
        assert_eq!(status, 200);
        assert_eq!(body["id"], user_id.as_str());
        assert_eq!(body["email"], "olive@example.com");
        assert_eq!(body["profile"]["display_name"], "olive");

        // Same email, different username.
        let (status, _) = call(
            &base_url,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({
                "email": "OLIVE@example.com",
                "password": "another password",
                "username": "olive2",
            })),
        );
        assert_eq!(status, 409);

        let (status, body) = call(
            &base_url,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({ "email": "x@example.com", "password": "short", "username": "x" })),
        );
        assert_eq!(status, 400);
        assert_eq!(body["kind"], "validation");

        let (status, _) = call(
            &base_url,
            "POST",
            "/api/auth/signin",
            None,
            Some(json!({ "email": "olive@example.com", "password": "wrong password" })),
        );
        assert_eq!(status, 401);

        let (status, body) = call(
            &base_url,
            "POST",
            "/api/auth/signin",
            None,
            Some(json!({ "email": " Olive@Example.com ", "password": "correct horse" })),
        );
        assert_eq!(status, 200);
        let second = body["token"].as_str().unwrap().to_string();
        assert_ne!(second, token);

        let (status, _) = call(&base_url, "POST", "/api/auth/signout", Some(&token), None);
        assert_eq!(status, 204);
        let (status, body) = call(&base_url, "GET", "/api/auth/me", Some(&token), None);
        assert_eq!(status, 401);
        assert_eq!(body["kind"], "unauthenticated");

        // The other session is untouched.
        let (status, _) = call(&base_url, "GET", "/api/auth/me", Some(&second), None);
        assert_eq!(status, 200);
    })
    .await;

    server.shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let server = start_server().await;
    let base_url = server.base_url.clone();

    blocking(move || {
        for path in ["/api/lists", "/api/notes", "/api/dashboard", "/api/relationships"] {
            let (status, body) = call(&base_url, "GET", path, None, None);
            assert_eq!(status, 401, "{path}");
            assert!(body["error"].is_string());
        }
        let (status, _) = call(&base_url, "GET", "/api/lists", Some("not-a-token"), None);
        assert_eq!(status, 401);

        let (status, body) = call(&base_url, "GET", "/api/health", None, None);
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pending_timeout_secs"], 10);
    })
    .await;

    server.shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn list_sharing_over_http() {
    let server = start_server().await;
    let base_url = server.base_url.clone();

    blocking(move || {
        let (owner, _) = sign_up(&base_url, "owner");
        let (guest, guest_id) = sign_up(&base_url, "guest");

        let (status, list) = call(
            &base_url,
            "POST",
            "/api/lists",
            Some(&owner),
            Some(json!({ "title": "Groceries" })),
        );
        assert_eq!(status, 201);
        assert_eq!(list["kind"], "list");
        let list_id = list["id"].as_str().unwrap().to_string();

        let (status, _) = call(&base_url, "GET", &format!("/api/lists/{list_id}"), Some(&guest), None);
        assert_eq!(status, 404);

        let (status, grant) = call(
            &base_url,
            "POST",
            &format!("/api/lists/{list_id}/shares"),
            Some(&owner),
            Some(json!({ "username": "guest", "permission": "view" })),
        );
        assert_eq!(status, 201);
        assert_eq!(grant["grantee_id"], guest_id.as_str());
        let grant_id = grant["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &base_url,
            "POST",
            &format!("/api/lists/{list_id}/shares"),
            Some(&owner),
            Some(json!({ "username": "guest", "permission": "edit" })),
        );
        assert_eq!(status, 409);
        assert_eq!(body["kind"], "already_exists");

        let (status, body) = call(
            &base_url,
            "POST",
            &format!("/api/lists/{list_id}/shares"),
            Some(&owner),
            Some(json!({ "username": "owner", "permission": "view" })),
        );
        assert_eq!(status, 400);
        assert_eq!(body["kind"], "self_reference");

        let (status, visible) = call(&base_url, "GET", &format!("/api/lists/{list_id}"), Some(&guest), None);
        assert_eq!(status, 200);
        assert_eq!(visible["access"], "view");

        let (status, body) = call(
            &base_url,
            "POST",
            &format!("/api/lists/{list_id}/tasks"),
            Some(&guest),
            Some(json!({ "title": "Milk" })),
        );
        assert_eq!(status, 403);
        assert_eq!(body["kind"], "forbidden");

        // Only the owner manages grants.
        let (status, _) = call(
            &base_url,
            "PUT",
            &format!("/api/list-shares/{grant_id}"),
            Some(&guest),
            Some(json!({ "permission": "edit" })),
        );
        assert_eq!(status, 403);

        let (status, grant) = call(
            &base_url,
            "PUT",
            &format!("/api/list-shares/{grant_id}"),
            Some(&owner),
            Some(json!({ "permission": "edit" })),
        );
        assert_eq!(status, 200);
        assert_eq!(grant["permission"], "edit");

        let (status, task) = call(
            &base_url,
            "POST",
            &format!("/api/lists/{list_id}/tasks"),
            Some(&guest),
            Some(json!({ "title": "Milk" })),
        );
        assert_eq!(status, 201);
        let task_id = task["id"].as_str().unwrap().to_string();

        let (status, task) = call(
            &base_url,
            "POST",
            &format!("/api/tasks/{task_id}/complete"),
            Some(&owner),
            Some(json!({ "completed": true })),
        );
        assert_eq!(status, 200);
        assert_eq!(task["completed"], true);

        let (status, tasks) = call(&base_url, "GET", &format!("/api/lists/{list_id}/tasks"), Some(&owner), None);
        assert_eq!(status, 200);
        let tasks = tasks.as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["title"], "Milk");
        assert_eq!(tasks[0]["created_by"], guest_id.as_str());

        // Editors cannot delete the list itself.
        let (status, _) = call(&base_url, "DELETE", &format!("/api/lists/{list_id}"), Some(&guest), None);
        assert_eq!(status, 403);

        let (status, _) = call(&base_url, "POST", &format!("/api/lists/{list_id}/leave"), Some(&owner), None);
        assert_eq!(status, 403);

        let (status, _) = call(&base_url, "POST", &format!("/api/lists/{list_id}/leave"), Some(&guest), None);
        assert_eq!(status, 204);
        let (status, lists) = call(&base_url, "GET", "/api/lists", Some(&guest), None);
        assert_eq!(status, 200);
        assert!(lists.as_array().unwrap().is_empty());

        let (status, dashboard) = call(&base_url, "GET", "/api/dashboard", Some(&owner), None);
        assert_eq!(status, 200);
        assert_eq!(dashboard["owned_lists"], 1);
        assert_eq!(dashboard["completed_tasks"], 1);

        let (status, _) = call(&base_url, "DELETE", &format!("/api/lists/{list_id}"), Some(&owner), None);
        assert_eq!(status, 204);
        let (status, _) = call(&base_url, "GET", &format!("/api/lists/{list_id}"), Some(&owner), None);
        assert_eq!(status, 404);
        let (status, _) = call(
            &base_url,
            "POST",
            &format!("/api/tasks/{task_id}/complete"),
            Some(&owner),
            Some(json!({ "completed": false })),
        );
        assert_eq!(status, 404);
    })
    .await;

    server.shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn connection_requests_over_http() {
    let server = start_server().await;
    let base_url = server.base_url.clone();

    blocking(move || {
        let (alice, alice_id) = sign_up(&base_url, "alice");
        let (bob, _) = sign_up(&base_url, "bob");

        let (status, body) = call(
            &base_url,
            "POST",
            "/api/relationships",
            Some(&alice),
            Some(json!({ "username": "alice" })),
        );
        assert_eq!(status, 400);
        assert_eq!(body["kind"], "self_reference");

        let (status, rel) = call(
            &base_url,
            "POST",
            "/api/relationships",
            Some(&alice),
            Some(json!({ "username": "bob" })),
        );
        assert_eq!(status, 201);
        assert_eq!(rel["status"], "pending");
        assert_eq!(rel["initiator"], alice_id.as_str());
        let rel_id = rel["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &base_url,
            "POST",
            "/api/relationships",
            Some(&bob),
            Some(json!({ "username": "alice" })),
        );
        assert_eq!(status, 409);

        let (_, count) = call(&base_url, "GET", "/api/relationships/pending-count", Some(&bob), None);
        assert_eq!(count["count"], 1);
        let (_, count) = call(&base_url, "GET", "/api/relationships/pending-count", Some(&alice), None);
        assert_eq!(count["count"], 0);

        let (status, _) = call(&base_url, "POST", &format!("/api/relationships/{rel_id}/accept"), Some(&alice), None);
        assert_eq!(status, 403);
        let (status, rel) = call(&base_url, "POST", &format!("/api/relationships/{rel_id}/accept"), Some(&bob), None);
        assert_eq!(status, 200);
        assert_eq!(rel["status"], "friend");

        for token in [&alice, &bob] {
            let (status, contacts) = call(&base_url, "GET", "/api/relationships", Some(token), None);
            assert_eq!(status, 200);
            let contacts = contacts.as_array().unwrap();
            assert_eq!(contacts.len(), 1);
            assert_eq!(contacts[0]["view"], "friend");
        }
        let (_, count) = call(&base_url, "GET", "/api/relationships/pending-count", Some(&bob), None);
        assert_eq!(count["count"], 0);

        let (status, _) = call(&base_url, "DELETE", &format!("/api/relationships/{rel_id}"), Some(&alice), None);
        assert_eq!(status, 204);
        let (_, contacts) = call(&base_url, "GET", "/api/relationships", Some(&bob), None);
        assert!(contacts.as_array().unwrap().is_empty());
    })
    .await;

    server.shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn avatar_upload_and_serve() {
    let server = start_server().await;
    let base_url = server.base_url.clone();

    blocking(move || {
        let (token, _) = sign_up(&base_url, "painter");

        let response = ureq::put(&format!("{base_url}/api/profile/avatar"))
            .set("Authorization", &format!("Bearer {token}"))
            .set("Content-Type", "text/plain")
            .send_bytes(b"not an image");
        match response {
            Err(ureq::Error::Status(code, _)) => assert_eq!(code, 400),
            other => panic!("expected 400, got {:?}", other.map(|r| r.status())),
        }

        let response = ureq::put(&format!("{base_url}/api/profile/avatar"))
            .set("Authorization", &format!("Bearer {token}"))
            .set("Content-Type", "image/svg+xml")
            .send_bytes(b"<svg xmlns=\"http://www.w3.org/2000/svg\" onload=\"alert(1)\"/>");
        match response {
            Err(ureq::Error::Status(code, _)) => assert_eq!(code, 400),
            other => panic!("expected 400, got {:?}", other.map(|r| r.status())),
        }

        let response = ureq::put(&format!("{base_url}/api/profile/avatar"))
            .set("Authorization", &format!("Bearer {token}"))
            .set("Content-Type", "image/png")
            .send_bytes(b"\x89PNG fake image")
            .expect("upload avatar");
        let profile = read_body(response);
        let url = profile["avatar_url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/avatars/"));
        assert!(url.ends_with(".png"));

        let response = ureq::get(&format!("{base_url}{url}")).call().expect("fetch avatar");
        assert_eq!(response.content_type(), "image/png");
        assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"\x89PNG fake image");

        let (status, _) = call(&base_url, "DELETE", "/api/profile/avatar", Some(&token), None);
        assert_eq!(status, 204);
        let (_, profile) = call(&base_url, "GET", "/api/profile", Some(&token), None);
        assert!(profile["avatar_url"].is_null());
        let (status, _) = call(&base_url, "GET", &url, None, None);
        assert_eq!(status, 404);
    })
    .await;

    server.shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn websocket_streams_new_shares() {
    let server = start_server().await;

    let (owner, guest) = blocking({
        let base_url = server.base_url.clone();
        move || {
            let (owner, _) = sign_up(&base_url, "host");
            let (guest, _) = sign_up(&base_url, "visitor");
            (owner, guest)
        }
    })
    .await;

    let ws_url = format!(
        "{}/api/ws?token={guest}",
        server.base_url.replacen("http://", "ws://", 1)
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .expect("connect websocket");

    let next_json = |msg: tokio_tungstenite::tungstenite::Message| -> Option<Value> {
        match msg {
            tokio_tungstenite::tungstenite::Message::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    };

    let ready = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("ready in time")
        .expect("socket open")
        .expect("ready frame");
    let ready = next_json(ready).expect("ready json");
    assert_eq!(ready["type"], "ready");

    let list_id = blocking({
        let base_url = server.base_url.clone();
        move || {
            let (_, list) = call(
                &base_url,
                "POST",
                "/api/lists",
                Some(&owner),
                Some(json!({ "title": "Trip" })),
            );
            let list_id = list["id"].as_str().unwrap().to_string();
            let (status, _) = call(
                &base_url,
                "POST",
                &format!("/api/lists/{list_id}/shares"),
                Some(&owner),
                Some(json!({ "username": "visitor", "permission": "edit" })),
            );
            assert_eq!(status, 201);
            let (status, _) = call(
                &base_url,
                "POST",
                &format!("/api/lists/{list_id}/tasks"),
                Some(&owner),
                Some(json!({ "title": "Passport" })),
            );
            assert_eq!(status, 201);
            list_id
        }
    })
    .await;

    // The owner's list insert happens before the share and is not visible
    // to the guest; the share and the task after it are.
    let mut seen = Vec::new();
    while seen.len() < 2 {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("change in time")
            .expect("socket open")
            .expect("change frame");
        let Some(msg) = next_json(frame) else { continue };
        assert_eq!(msg["type"], "change");
        seen.push(msg["event"]["record"]["record_type"].as_str().unwrap().to_string());
        if seen.len() == 2 {
            assert_eq!(msg["event"]["record"]["list_id"], list_id.as_str());
        }
    }
    assert_eq!(seen, vec!["list_share".to_string(), "task".to_string()]);

    socket.close(None).await.ok();
    server.shutdown_tx.send(()).ok();
}

#[tokio::test]
async fn websocket_closes_after_sign_out() {
    let server = start_server().await;

    let token = blocking({
        let base_url = server.base_url.clone();
        move || sign_up(&base_url, "leaver").0
    })
    .await;

    let ws_url = format!(
        "{}/api/ws?token={token}",
        server.base_url.replacen("http://", "ws://", 1)
    );
    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .expect("connect websocket");
    let ready = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("ready in time")
        .expect("socket open")
        .expect("ready frame");
    assert!(ready.is_text());

    let status = blocking({
        let base_url = server.base_url.clone();
        let token = token.clone();
        move || call(&base_url, "POST", "/api/auth/signout", Some(&token), None).0
    })
    .await;
    assert_eq!(status, 204);

    // Only a close frame or the end of the stream may follow.
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("socket closed in time");
        match frame {
            None | Some(Err(_)) => break,
            Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) => break,
            Some(Ok(other)) => assert!(!other.is_text(), "unexpected frame: {other:?}"),
        }
    }

    server.shutdown_tx.send(()).ok();
}
