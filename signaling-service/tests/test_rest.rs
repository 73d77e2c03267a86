mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use lib_common_kodama::types::{Participant, VoiceState};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::ServiceExt;

use common::TestApp;

async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_owned())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

const JOIN_7: &str = "/api/servers/1/channels/7/voice/join";

#[tokio::test]
async fn health_needs_no_credentials() {
    let app = TestApp::new(8);
    let (status, body) = call(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse::<Value>(&body)["status"], "ok");
}

#[tokio::test]
async fn join_mute_state_and_leave() {
    let app = TestApp::new(8);
    let ala = app.token(1);
    let ola = app.token(2);

    let (status, body) = call(&app, "POST", JOIN_7, Some(&ala), None).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<Participant> = parse(&body);
    assert_eq!(listed.len(), 1);
    assert_eq!((listed[0].user_id, listed[0].username.as_str()), (1, "user1"));

    let (_, body) = call(&app, "POST", JOIN_7, Some(&ola), None).await;
    assert_eq!(parse::<Vec<Participant>>(&body).len(), 2);

    let muted = Some(r#"{"muted":true}"#);
    let (status, body) = call(&app, "POST", "/api/voice/mute", Some(&ala), muted).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<Participant> = parse(&body);
    assert!(listed.iter().any(|p| p.user_id == 1 && p.muted));

    let (_, body) = call(&app, "GET", "/api/voice/state", Some(&ala), None).await;
    assert_eq!(parse::<VoiceState>(&body), VoiceState::present(7, true));

    let uri = "/api/servers/1/channels/7/voice/participants";
    let (status, body) = call(&app, "GET", uri, Some(&ola), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse::<Vec<Participant>>(&body), app.hub.list_participants(7));

    let (status, body) = call(&app, "POST", "/api/voice/leave", Some(&ala), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse::<Value>(&body)["channel_id"], 7);

    let (_, body) = call(&app, "GET", "/api/voice/state", Some(&ala), None).await;
    assert_eq!(parse::<Value>(&body), serde_json::json!({ "in_channel": false }));
}

#[tokio::test]
async fn rejoining_elsewhere_moves_the_user() {
    let app = TestApp::new(8);
    let ala = app.token(1);
    call(&app, "POST", JOIN_7, Some(&ala), None).await;
    let uri = "/api/servers/1/channels/8/voice/join";
    let (status, _) = call(&app, "POST", uri, Some(&ala), None).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.hub.find_user_channel(1), Some(8));
    assert!(app.hub.list_participants(7).is_empty());
    assert_eq!(app.hub.channel_ids(), vec![8]);
}

#[tokio::test]
async fn leave_and_mute_outside_a_channel_are_bad_requests() {
    let app = TestApp::new(8);
    let ala = app.token(1);

    let (status, body) = call(&app, "POST", "/api/voice/leave", Some(&ala), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse::<Value>(&body)["code"], "NotInChannel");

    let unmuted = Some(r#"{"muted":false}"#);
    let (status, _) = call(&app, "POST", "/api/voice/mute", Some(&ala), unmuted).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.hub.room_count(), 0);
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let app = TestApp::new(8);
    let ala = app.token(1);
    call(&app, "POST", JOIN_7, Some(&ala), None).await;

    let body = Some(r#"{"muted":"yes"}"#);
    let (status, _) = call(&app, "POST", "/api/voice/mute", Some(&ala), body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = "/api/servers/1/channels/seven/voice/join";
    let (status, _) = call(&app, "POST", uri, Some(&ala), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.hub.user_voice_state(1), VoiceState::present(7, false));
}

#[tokio::test]
async fn credentials_and_authorization_are_checked_before_joining() {
    let app = TestApp::new(8);
    let cases = [
        (None, JOIN_7, StatusCode::UNAUTHORIZED),
        (Some("garbage".to_owned()), JOIN_7, StatusCode::UNAUTHORIZED),
        (Some(app.expired_token(1)), JOIN_7, StatusCode::UNAUTHORIZED),
        (Some(app.token(4)), JOIN_7, StatusCode::FORBIDDEN),
        (
            Some(app.token(1)),
            "/api/servers/1/channels/20/voice/join",
            StatusCode::NOT_FOUND,
        ),
        (
            Some(app.token(1)),
            "/api/servers/1/channels/9/voice/join",
            StatusCode::BAD_REQUEST,
        ),
    ];
    for (token, uri, expected) in cases {
        let (status, body) = call(&app, "POST", uri, token.as_deref(), None).await;
        assert_eq!(status, expected, "{uri}");
        assert!(parse::<Value>(&body)["error"].is_string());
    }
    assert_eq!(app.hub.room_count(), 0);
    assert!(app.hub.presence().channels().is_empty());
}
