use axum::{
    Router,
    routing::get,
};

use waiting_room_cell::router::waiting_room_routes;
use waiting_room_cell::WaitingRoomState;

pub fn create_router(state: WaitingRoomState) -> Router {
    Router::new()
        .route("/", get(|| async { "Waiting room API is running!" }))
        .nest("/waiting-room", waiting_room_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{body::Body, http::{Request, StatusCode}};
    use shared_config::AppConfig;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_jwt_secret: "test-secret".to_string(),
            consultations_table: "consultations".to_string(),
            max_message_length: 2000,
            port: 0,
        }
    }

    #[tokio::test]
    async fn test_root_and_nested_health() {
        let state = WaitingRoomState::from_config(Arc::new(test_config()));
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/waiting-room/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
