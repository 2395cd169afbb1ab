//! End-to-end tests for the client's refresh coordinator and backoff,
//! driven against an in-process stub of the auth API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::{COOKIE, SET_COOKIE}},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use masuk::client::{ApiClient, ClientError, RetryPolicy};

struct StubState {
    login_calls: AtomicUsize,
    me_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    flaky_calls: AtomicUsize,
    /// When true, `/auth/refresh` answers 401 instead of rotating.
    refresh_fails: bool,
    /// The access token a successful refresh hands out. `/auth/me` only
    /// accepts `fresh`, so tests can mint rotations that still fail.
    refresh_grants: &'static str,
    /// How long `/auth/refresh` holds before answering, to let a burst of
    /// concurrent requests pile up behind the single flight.
    refresh_delay: Duration,
    /// `/auth/forgot-password` fails with 503 this many times, then works.
    flaky_failures: usize,
}

impl StubState {
    fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            flaky_calls: AtomicUsize::new(0),
            refresh_fails: false,
            refresh_grants: "fresh",
            refresh_delay: Duration::from_millis(30),
            flaky_failures: 0,
        }
    }
}

fn has_cookie(headers: &HeaderMap, pair: &str) -> bool {
    headers
        .get(COOKIE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|cookies| cookies.split(';').any(|c| c.trim() == pair))
}

fn set_session_cookies(access: &str, refresh: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        format!("accessToken={access}; Path=/; HttpOnly")
            .parse()
            .expect("cookie"),
    );
    headers.append(
        SET_COOKIE,
        format!("refreshToken={refresh}; Path=/; HttpOnly")
            .parse()
            .expect("cookie"),
    );
    headers
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "message": "Invalid or expired token" })),
    )
        .into_response()
}

/// Login always succeeds and hands out a stale access token, so the first
/// authenticated request is guaranteed to need a refresh.
async fn login(State(state): State<Arc<StubState>>) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    let headers = set_session_cookies("stale", "refresh-0");
    let body = json!({
        "success": true,
        "user": { "id": "u-1", "email": "alice@example.com", "role": "user" }
    });
    (StatusCode::OK, headers, Json(body)).into_response()
}

async fn me(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Response {
    state.me_calls.fetch_add(1, Ordering::SeqCst);
    if !has_cookie(&headers, "accessToken=fresh") {
        return unauthorized();
    }
    let body = json!({
        "success": true,
        "user": {
            "id": "u-1",
            "email": "alice@example.com",
            "role": "user",
            "email_verified": true
        }
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn refresh(State(state): State<Arc<StubState>>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.refresh_delay).await;
    if state.refresh_fails {
        return unauthorized();
    }
    let headers = set_session_cookies(state.refresh_grants, "refresh-1");
    let body = json!({ "success": true, "message": "Token refreshed successfully" });
    (StatusCode::OK, headers, Json(body)).into_response()
}

async fn flaky_forgot_password(State(state): State<Arc<StubState>>) -> Response {
    let call = state.flaky_calls.fetch_add(1, Ordering::SeqCst);
    if call < state.flaky_failures {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "message": "try later" })),
        )
            .into_response();
    }
    let body = json!({
        "success": true,
        "message": "If an account exists with this email, a password reset link has been sent."
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn spawn_stub(state: Arc<StubState>) -> SocketAddr {
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forgot-password", post(flaky_forgot_password))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("stub server");
    });
    addr
}

fn client_for(addr: SocketAddr) -> ApiClient {
    ApiClient::new(&format!("http://{addr}"))
        .expect("client")
        .with_retry_policy(RetryPolicy::new().with_base_delay(Duration::from_millis(10)))
}

#[tokio::test]
async fn concurrent_401s_trigger_exactly_one_refresh() {
    let state = Arc::new(StubState::new());
    let addr = spawn_stub(Arc::clone(&state)).await;
    let client = Arc::new(client_for(addr));

    client
        .login("alice@example.com", "Abcd123!")
        .await
        .expect("login");

    const BURST: usize = 8;
    let mut tasks = JoinSet::new();
    for _ in 0..BURST {
        let client = Arc::clone(&client);
        tasks.spawn(async move { client.me().await });
    }

    while let Some(result) = tasks.join_next().await {
        let me = result.expect("join").expect("request resolves");
        assert_eq!(me.user.email, "alice@example.com");
    }

    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    // Each request went out at most twice: once with the stale token and
    // once after the rotation. A task scheduled after the rotation may get
    // through on its first try, but nothing retries more than once.
    let me_calls = state.me_calls.load(Ordering::SeqCst);
    assert!(
        me_calls > BURST && me_calls <= BURST * 2,
        "unexpected /auth/me call count: {me_calls}"
    );
}

#[tokio::test]
async fn refresh_failure_fails_every_waiter_consistently() {
    let mut stub = StubState::new();
    stub.refresh_fails = true;
    let state = Arc::new(stub);
    let addr = spawn_stub(Arc::clone(&state)).await;

    let expired_notices = Arc::new(AtomicUsize::new(0));
    let notices = Arc::clone(&expired_notices);
    let client = Arc::new(client_for(addr).with_session_expired_hook(move || {
        notices.fetch_add(1, Ordering::SeqCst);
    }));

    client
        .login("alice@example.com", "Abcd123!")
        .await
        .expect("login");

    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let client = Arc::clone(&client);
        tasks.spawn(async move { client.me().await });
    }

    while let Some(result) = tasks.join_next().await {
        let err = result.expect("join").expect_err("session is dead");
        assert!(matches!(err, ClientError::SessionExpired), "got: {err}");
    }

    // One refresh attempt, one notice; the other waiters failed fast
    // instead of hammering a dead session.
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(expired_notices.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_request_is_replayed_at_most_once() {
    // Refresh succeeds but rotates to a token /auth/me still rejects, so
    // the replayed request 401s a second time.
    let mut stub = StubState::new();
    stub.refresh_grants = "still-stale";
    let state = Arc::new(stub);
    let addr = spawn_stub(Arc::clone(&state)).await;
    let client = client_for(addr);

    // No login: there are no cookies at all, so /auth/me 401s before and
    // after the (successful) refresh.
    let err = client.me().await.expect_err("still unauthorized");
    match err {
        ClientError::Api { status, .. } => assert_eq!(status, 401),
        other => panic!("expected Api error, got: {other}"),
    }

    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.me_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_failures_back_off_and_recover() {
    let mut stub = StubState::new();
    stub.flaky_failures = 2;
    let state = Arc::new(stub);
    let addr = spawn_stub(Arc::clone(&state)).await;
    let client = client_for(addr);

    let response = client
        .forgot_password("alice@example.com")
        .await
        .expect("eventually succeeds");
    assert!(response.success);
    assert_eq!(state.flaky_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transient_retries_are_bounded() {
    let mut stub = StubState::new();
    stub.flaky_failures = usize::MAX;
    let state = Arc::new(stub);
    let addr = spawn_stub(Arc::clone(&state)).await;
    let client = ApiClient::new(&format!("http://{addr}"))
        .expect("client")
        .with_retry_policy(
            RetryPolicy::new()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(5)),
        );

    let err = client
        .forgot_password("alice@example.com")
        .await
        .expect_err("gives up");
    match err {
        ClientError::Api { status, .. } => assert_eq!(status, 503),
        other => panic!("expected Api error, got: {other}"),
    }
    // Initial attempt plus two retries.
    assert_eq!(state.flaky_calls.load(Ordering::SeqCst), 3);
}
