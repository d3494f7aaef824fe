// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire-level tests for the LMS client against a mock server.

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gradeflow_lms::types::{DuplicatePolicy, EnrollmentKind, GradePost, LmsAssignmentUpdate};
use gradeflow_lms::{LmsClient, LmsConfig};

fn client_for(server: &MockServer) -> LmsClient {
    let mut config = LmsConfig::new(server.uri(), "secret-token", 42);
    config.realm = Some("unc".to_string());
    LmsClient::new(config).unwrap()
}

#[tokio::test]
async fn test_get_course_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/42"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "name": "Intro to Data Science",
            "start_at": "2025-01-08T00:00:00Z",
            "end_at": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let course = client_for(&server).get_course().await.unwrap();
    assert_eq!(course.id, 42);
    assert_eq!(course.name, "Intro to Data Science");
    assert!(course.start_at.is_some());
    assert!(course.end_at.is_none());
}

#[tokio::test]
async fn test_list_assignments_maps_allowed_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/42/assignments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 1, "name": "A1", "unlock_at": "2025-03-10T10:00:00Z",
                "due_at": "2025-03-10T12:00:00Z", "published": true,
                "allowed_attempts": 3, "unpublishable": false,
            },
            {
                "id": 2, "name": "A2", "unlock_at": null, "due_at": null,
                "published": false, "allowed_attempts": -1, "unpublishable": true,
            },
        ])))
        .mount(&server)
        .await;

    let assignments = client_for(&server).list_assignments().await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].max_attempts(), Some(3));
    assert_eq!(assignments[1].max_attempts(), None);
}

#[tokio::test]
async fn test_list_users_strips_realm_decoration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/42/users"))
        .and(query_param("enrollment_type[]", "student"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 10, "sis_user_id": "730123456:unc", "email": "jdoe@example.org", "name": "Jay Doe" },
            { "id": 11, "sis_user_id": null, "email": null, "name": null },
        ])))
        .mount(&server)
        .await;

    let users = client_for(&server)
        .list_users(EnrollmentKind::Student)
        .await
        .unwrap();
    assert_eq!(users[0].sis_user_id.as_deref(), Some("730123456"));
    assert!(!users[0].is_pending());
    assert!(users[1].is_pending());
}

#[tokio::test]
async fn test_post_grade_body_shape() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/courses/42/assignments/7/submissions/10"))
        .and(body_string_contains("\"posted_grade\":\"87.5%\""))
        .and(body_string_contains("\"file_ids\":[991]"))
        .and(body_string_contains("q1: correct"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .post_grade(
            7,
            &GradePost {
                user_id: 10,
                grade_percent: 87.5,
                file_ids: vec![991],
                comment: Some("q1: correct".to_string()),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_upload_course_file_two_step_flow() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/courses/42/files"))
        .and(body_string_contains("on_duplicate=overwrite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_url": format!("{}/upload-target", server.uri()),
            "upload_params": { "key": "abc123" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload-target"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 555, "display_name": "notebook.ipynb",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let file = client_for(&server)
        .upload_course_file(
            "private/Student Submissions/7",
            "notebook.ipynb",
            b"{}".to_vec(),
            DuplicatePolicy::Overwrite,
        )
        .await
        .unwrap();
    assert_eq!(file.id, 555);
}

#[tokio::test]
async fn test_update_assignment_wraps_payload() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/courses/42/assignments/7"))
        .and(body_string_contains("\"published\":false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7, "name": "A1", "unlock_at": null, "due_at": null,
            "published": false, "allowed_attempts": -1, "unpublishable": true,
        })))
        .mount(&server)
        .await;

    let update = LmsAssignmentUpdate {
        published: Some(false),
        ..Default::default()
    };
    let assignment = client_for(&server).update_assignment(7, &update).await.unwrap();
    assert!(!assignment.published);
}

#[tokio::test]
async fn test_error_carries_upstream_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/courses/42"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client_for(&server).get_course().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_retryable());

    // The same error converts into the core error kind with status intact.
    let core: gradeflow_core::CoreError = err.into();
    assert_eq!(core.error_code(), "LMS_BACKEND_ERROR");
    assert!(core.is_retryable());
}
