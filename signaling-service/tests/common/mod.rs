#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use signaling_service::api::{self, AppState, SessionLimits};
use signaling_service::common::services::auth::JwtAuthenticator;
use signaling_service::common::services::directory::StaticDirectory;
use signaling_service::vc::Hub;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const SECRET: &str = "integration-secret";

/// Router over `tests/resources/test-directory.yaml`: server 1 has members
/// 1, 2, 3, 5 and 6 with voice channels 7 and 8 and text channel 9, server 2 has member
/// 4 and voice channel 20.
pub struct TestApp {
    pub router: Router,
    pub hub: Arc<Hub>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    issuer: JwtAuthenticator,
}

impl TestApp {
    pub fn new(connection_limit: usize) -> Self {
        let directory =
            StaticDirectory::load(Path::new("tests/resources/test-directory.yaml")).unwrap();
        let hub = Arc::new(Hub::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let state = AppState {
            hub: hub.clone(),
            auth: Arc::new(JwtAuthenticator::new(SECRET)),
            directory: Arc::new(directory),
            sessions: SessionLimits::new(connection_limit, 64),
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
        };
        Self {
            router: api::router(state, &[]),
            hub,
            shutdown,
            tracker,
            issuer: JwtAuthenticator::new(SECRET),
        }
    }

    pub fn token(&self, user_id: i64) -> String {
        self.issuer
            .issue(user_id, &format!("user{user_id}"), chrono::Duration::minutes(5))
            .unwrap()
    }

    pub fn expired_token(&self, user_id: i64) -> String {
        self.issuer
            .issue(user_id, &format!("user{user_id}"), chrono::Duration::minutes(-5))
            .unwrap()
    }
}
