use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
use waiting_room_cell::error::WaitingRoomError;
use waiting_room_cell::services::{ConsultationDirectory, SupabaseConsultationDirectory};

fn config_for(server: &MockServer) -> AppConfig {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = server.uri();
    config
}

#[tokio::test]
async fn test_find_by_room() {
    let mock_server = MockServer::start().await;
    let consultation_id = Uuid::new_v4();
    let expires_at = Utc::now() + Duration::hours(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("room_id", "eq.R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_response(consultation_id, "R1", "patient-a", "doctor-d", expires_at)
        ])))
        .mount(&mock_server)
        .await;

    let directory = SupabaseConsultationDirectory::new(&config_for(&mock_server));
    let record = directory.find_by_room("R1").await.unwrap().unwrap();

    assert_eq!(record.id, consultation_id);
    assert_eq!(record.room_id, "R1");
    assert_eq!(record.patient_id.as_deref(), Some("patient-a"));
    assert_eq!(record.doctor_id.as_deref(), Some("doctor-d"));
    assert!(!record.is_expired(Utc::now()));
    assert!(record.is_expired(expires_at + Duration::seconds(1)));
}

#[tokio::test]
async fn test_find_by_room_missing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let directory = SupabaseConsultationDirectory::new(&config_for(&mock_server));
    assert!(directory.find_by_room("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_find_by_link_token_uses_token_column() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .and(query_param("consultation_token", "eq.tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::consultation_response(Uuid::new_v4(), "R7", "patient-a", "doctor-d", Utc::now())
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let directory = SupabaseConsultationDirectory::new(&config_for(&mock_server));
    let record = directory.find_by_link_token("tok-123").await.unwrap();

    assert_eq!(record.unwrap().room_id, "R7");
}

#[tokio::test]
async fn test_lookup_failure_is_external_service_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/consultations"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("boom", "internal"),
        ))
        .mount(&mock_server)
        .await;

    let directory = SupabaseConsultationDirectory::new(&config_for(&mock_server));
    let result = directory.find_by_room("R1").await;

    assert_matches!(result, Err(WaitingRoomError::ExternalService(_)));
}

#[tokio::test]
async fn test_custom_table_name() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/video_consultations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = config_for(&mock_server);
    config.consultations_table = "video_consultations".to_string();

    let directory = SupabaseConsultationDirectory::new(&config);
    assert!(directory.find_by_room("R1").await.unwrap().is_none());
}
