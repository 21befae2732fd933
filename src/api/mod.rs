pub mod assignments_api;
pub mod devices_api;
pub mod schedules_api;

use crate::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

pub fn routes(state: AppState) -> Router<AppState> {
    let protected_routes = Router::new()
        // Schedules
        .route(
            "/schedules",
            get(schedules_api::list_schedules).post(schedules_api::create_schedule),
        )
        .route(
            "/schedules/:id",
            get(schedules_api::get_schedule)
                .put(schedules_api::update_schedule)
                .delete(schedules_api::delete_schedule),
        )
        .route(
            "/schedules/:id/entries",
            get(schedules_api::list_entries).post(schedules_api::create_entry),
        )
        .route(
            "/schedules/:id/entries/:entry_id",
            put(schedules_api::update_entry).delete(schedules_api::delete_entry),
        )
        .route("/schedules/:id/conflicts", post(schedules_api::find_conflicts))
        .route(
            "/schedules/:id/filler",
            put(schedules_api::set_filler).delete(schedules_api::clear_filler),
        )
        .route("/schedules/:id/preview", get(schedules_api::preview_week))
        .route("/schedules/:id/resolve", get(schedules_api::resolve_schedule))
        // Assignments
        .route(
            "/schedules/:id/assign",
            post(assignments_api::assign_schedule),
        )
        .route(
            "/assignments/unassign",
            post(assignments_api::unassign_schedule),
        )
        .route(
            "/devices/:id/default-scene",
            put(assignments_api::set_default_scene),
        )
        // Resolution
        .route(
            "/targets/:kind/:id/decision",
            get(devices_api::target_decision),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::auth::middleware::auth_middleware,
        ));

    Router::new()
        // Device poll authenticates with X-Device-Secret
        .route("/devices/:id/decision", get(devices_api::device_decision))
        .merge(protected_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::issue_test_token;
    use crate::config::Config;
    use crate::db::{create_pool, migrate, DbPool};
    use crate::models::ContentType;
    use crate::services::assignment_service::fixtures::insert_device;
    use crate::services::campaigns::DbCampaignSource;
    use crate::services::content_catalog::fixtures::insert_content;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    struct TestApp {
        _dir: TempDir,
        pool: DbPool,
        app: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("scheduler.db");
            let pool = create_pool(path.to_str().unwrap()).unwrap();
            migrate(&pool).unwrap();

            let mut config: Config = toml::from_str(Config::default_template()).unwrap();
            config.jwt.secret = SECRET.to_string();
            let campaigns = Arc::new(DbCampaignSource::new(pool.clone()));
            let state = AppState::new(config, pool.clone(), campaigns);

            let app = Router::new()
                .nest("/api", routes(state.clone()))
                .with_state(state);

            TestApp {
                _dir: dir,
                pool,
                app,
            }
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            role: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(role) = role {
                let token = issue_test_token(1, 1, role, SECRET.as_bytes());
                request = request.header("authorization", format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .unwrap();

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        async fn create_schedule(&self, name: &str) -> i64 {
            let (status, body) = self
                .send(
                    "POST",
                    "/api/schedules",
                    Some("editor"),
                    Some(json!({"name": name, "timezone": "UTC"})),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            body["id"].as_i64().unwrap()
        }
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = TestApp::new();
        let (status, _) = app.send("GET", "/api/schedules", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_viewer_cannot_create_schedule() {
        let app = TestApp::new();
        let (status, _) = app
            .send(
                "POST",
                "/api/schedules",
                Some("viewer"),
                Some(json!({"name": "Lobby"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_validation_errors_are_bad_requests() {
        let app = TestApp::new();
        let (status, _) = app
            .send(
                "POST",
                "/api/schedules",
                Some("editor"),
                Some(json!({"name": "  "})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                "POST",
                "/api/schedules",
                Some("editor"),
                Some(json!({"name": "Lobby", "timezone": "Mars/Olympus"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entry_creation_reports_conflicts() {
        let app = TestApp::new();
        let (menu, specials) = {
            let mut conn = app.pool.get().unwrap();
            (
                insert_content(&mut conn, ContentType::Playlist, 1, "lunch-menu", true),
                insert_content(&mut conn, ContentType::Playlist, 1, "specials", true),
            )
        };
        let schedule_id = app.create_schedule("Weekday Lunch").await;
        let entries = format!("/api/schedules/{}/entries", schedule_id);

        let (status, body) = app
            .send(
                "POST",
                &entries,
                Some("editor"),
                Some(json!({
                    "content_type": "playlist",
                    "content_id": menu.content_id,
                    "start_time": "11:00",
                    "end_time": "14:00",
                    "days_of_week": [1, 2, 3, 4, 5],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["conflicts"].as_array().unwrap().is_empty());
        let lunch_id = body["entry"]["id"].as_i64().unwrap();

        let (status, body) = app
            .send(
                "POST",
                &entries,
                Some("editor"),
                Some(json!({
                    "content_type": "playlist",
                    "content_id": specials.content_id,
                    "start_time": "11:30",
                    "end_time": "12:30",
                    "days_of_week": [2],
                    "priority": 5,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let conflicts = body["conflicts"].as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["entry_id"].as_i64(), Some(lunch_id));
        assert_eq!(conflicts[0]["content_name"], "lunch-menu");

        let (status, body) = app
            .send(
                "GET",
                &format!(
                    "/api/schedules/{}/resolve?at=2024-06-04T12:00:00Z",
                    schedule_id
                ),
                Some("viewer"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"]["kind"], "entry");
        assert_eq!(body["decision"]["content"]["content_id"], specials.content_id);
    }

    #[tokio::test]
    async fn test_entry_update_is_not_its_own_conflict() {
        let app = TestApp::new();
        let (menu, specials) = {
            let mut conn = app.pool.get().unwrap();
            (
                insert_content(&mut conn, ContentType::Playlist, 1, "lunch-menu", true),
                insert_content(&mut conn, ContentType::Playlist, 1, "specials", true),
            )
        };
        let schedule_id = app.create_schedule("Weekday Lunch").await;
        let entries = format!("/api/schedules/{}/entries", schedule_id);
        let lunch = |start: &str, end: &str| {
            json!({
                "content_type": "playlist",
                "content_id": menu.content_id,
                "start_time": start,
                "end_time": end,
                "days_of_week": [1, 2, 3, 4, 5],
            })
        };

        let (_, body) = app
            .send("POST", &entries, Some("editor"), Some(lunch("11:00", "14:00")))
            .await;
        let lunch_id = body["entry"]["id"].as_i64().unwrap();
        let entry_uri = format!("{}/{}", entries, lunch_id);

        let (status, body) = app
            .send("PUT", &entry_uri, Some("editor"), Some(lunch("10:30", "15:00")))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry"]["id"].as_i64(), Some(lunch_id));
        assert_eq!(body["entry"]["start_time"], "10:30:00");
        assert!(body["conflicts"].as_array().unwrap().is_empty());

        let (_, body) = app
            .send(
                "POST",
                &entries,
                Some("editor"),
                Some(json!({
                    "content_type": "playlist",
                    "content_id": specials.content_id,
                    "start_time": "11:30",
                    "end_time": "12:30",
                    "days_of_week": [2],
                })),
            )
            .await;
        let specials_id = body["entry"]["id"].as_i64().unwrap();

        let (status, body) = app
            .send("PUT", &entry_uri, Some("editor"), Some(lunch("11:00", "14:00")))
            .await;
        assert_eq!(status, StatusCode::OK);
        let conflicts = body["conflicts"].as_array().unwrap();
        let ids: Vec<i64> = conflicts.iter().filter_map(|c| c["entry_id"].as_i64()).collect();
        assert_eq!(ids, vec![specials_id]);
    }

    #[tokio::test]
    async fn test_preview_returns_seven_days() {
        let app = TestApp::new();
        let schedule_id = app.create_schedule("Lobby").await;

        let (status, body) = app
            .send(
                "GET",
                &format!("/api/schedules/{}/preview?start_date=2024-06-02", schedule_id),
                Some("viewer"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let days = body.as_array().unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0]["date"], "2024-06-02");
        assert_eq!(days[6]["date"], "2024-06-08");
    }

    #[tokio::test]
    async fn test_unknown_schedule_is_not_found() {
        let app = TestApp::new();
        let (status, _) = app
            .send("GET", "/api/schedules/404", Some("viewer"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_device_poll_uses_device_secret() {
        let app = TestApp::new();
        let scene = {
            let mut conn = app.pool.get().unwrap();
            insert_content(&mut conn, ContentType::Scene, 1, "idle", true)
        };
        let device = {
            let mut conn = app.pool.get().unwrap();
            insert_device(&mut conn, 1, "kiosk", None)
        };
        let (status, _) = app
            .send(
                "PUT",
                &format!("/api/devices/{}/default-scene", device),
                Some("editor"),
                Some(json!({"scene_id": scene.content_id})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let poll = |secret: &'static str| {
            Request::builder()
                .uri(format!("/api/devices/{}/decision", device))
                .header("X-Device-Secret", secret)
                .body(Body::empty())
                .unwrap()
        };

        let response = app.app.clone().oneshot(poll("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.app.clone().oneshot(poll("kiosk-secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["decision"]["source"], "default_scene");
        assert_eq!(body["degraded"], false);
    }

    #[tokio::test]
    async fn test_assign_and_target_decision() {
        let app = TestApp::new();
        let device = {
            let mut conn = app.pool.get().unwrap();
            insert_device(&mut conn, 1, "kiosk", None)
        };
        let schedule_id = app.create_schedule("Lobby").await;

        let (status, body) = app
            .send(
                "POST",
                &format!("/api/schedules/{}/assign", schedule_id),
                Some("editor"),
                Some(json!({"device_ids": [device, 999]})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

        let (status, body) = app
            .send(
                "POST",
                &format!("/api/schedules/{}/assign", schedule_id),
                Some("editor"),
                Some(json!({"device_ids": [device]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["devices"], 1);

        let (status, body) = app
            .send(
                "GET",
                &format!("/api/targets/device/{}/decision", device),
                Some("viewer"),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        // An empty schedule without filler falls through to nothing.
        assert_eq!(body["decision"]["source"], "none");
    }
}
