// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire-level tests for the Git host client against a mock server.

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gradeflow_githost::types::{CollaboratorPermission, FileOperation};
use gradeflow_githost::{GitHostClient, GitHostConfig};

fn client_for(server: &MockServer) -> GitHostClient {
    GitHostClient::new(GitHostConfig {
        base_url: server.uri(),
        token: "admin-token".to_string(),
        organization: "comp110".to_string(),
        master_repo: "comp110-master".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_create_user_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/users"))
        .and(header("authorization", "Bearer admin-token"))
        .and(body_string_contains("\"username\":\"jdoe\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "login": "jdoe",
            "email": "jdoe@example.org",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = client_for(&server)
        .create_user("jdoe", "jdoe@example.org", "generated-pw")
        .await
        .unwrap();
    assert_eq!(user.login, "jdoe");
}

#[tokio::test]
async fn test_fork_repository_returns_post_rename_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/comp110/comp110-master/forks"))
        .and(body_string_contains("\"owner\":\"jdoe\""))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "name": "comp110-master",
            "owner": { "login": "jdoe" },
            "clone_url": "https://git.example.edu/jdoe/comp110-master.git",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/repos/jdoe/comp110-master"))
        .and(body_string_contains("\"name\":\"comp110-jdoe\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "comp110-jdoe",
            "owner": { "login": "jdoe" },
            "clone_url": "https://git.example.edu/jdoe/comp110-jdoe.git",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repo = client_for(&server)
        .fork_repository("comp110", "comp110-master", "jdoe", "comp110-jdoe")
        .await
        .unwrap();
    assert_eq!(repo.name, "comp110-jdoe");
    assert_eq!(
        repo.clone_url,
        "https://git.example.edu/jdoe/comp110-jdoe.git"
    );
}

#[tokio::test]
async fn test_modify_files_encodes_content_and_preserves_order() {
    let server = MockServer::start().await;
    // "hello" base64-encodes to aGVsbG8=.
    Mock::given(method("POST"))
        .and(path("/repos/comp110/comp110-master/contents"))
        .and(body_string_contains("\"branch\":\"master\""))
        .and(body_string_contains("aGVsbG8="))
        .and(body_string_contains("\"operation\":\"create\""))
        .and(body_string_contains("\"operation\":\"rename\""))
        .and(body_string_contains("\"from_path\":\"A1/old.txt\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .modify_files(
            "comp110",
            "comp110-master",
            "master",
            "publish A1",
            &[
                FileOperation::create("A1/A1.ipynb", b"hello".to_vec()),
                FileOperation::rename("A1/old.txt", "A1/new.txt"),
                FileOperation::delete("A1/stale.txt"),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_install_pre_receive_hook_patches_script() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/repos/comp110/comp110-master/hooks/git/pre-receive"))
        .and(body_string_contains("PROTECTED_VIOLATION"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let script = "#!/bin/sh\necho PROTECTED_VIOLATION\nexit 1\n";
    client_for(&server)
        .install_pre_receive_hook("comp110", "comp110-master", "pre-receive", script)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_add_collaborator_sets_permission() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/repos/jdoe/comp110-jdoe/collaborators/grader-bot"))
        .and(body_string_contains("\"permission\":\"read\""))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .add_collaborator(
            "jdoe",
            "comp110-jdoe",
            "grader-bot",
            CollaboratorPermission::Read,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_download_archive_constrains_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/jdoe/comp110-jdoe/archive/master.tar.gz"))
        .and(wiremock::matchers::query_param("path", "A1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tarball".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = client_for(&server)
        .download_archive("jdoe", "comp110-jdoe", "master", Some("A1"))
        .await
        .unwrap();
    assert_eq!(bytes, b"tarball");
}

#[tokio::test]
async fn test_create_and_delete_organization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orgs"))
        .and(header("authorization", "Bearer admin-token"))
        .and(body_string_contains("\"username\":\"comp110\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "username": "comp110",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orgs/comp110"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let org = client.create_organization("comp110").await.unwrap();
    assert_eq!(org.username, "comp110");
    client.delete_organization("comp110").await.unwrap();
}

#[tokio::test]
async fn test_remove_ssh_key_deletes_only_matching_titles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/jdoe/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 11, "title": "gradeflow", "key": "ssh-ed25519 AAAA..." },
            { "id": 12, "title": "laptop", "key": "ssh-ed25519 BBBB..." },
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/admin/users/jdoe/keys/11"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let removed = client_for(&server)
        .remove_ssh_key("jdoe", "gradeflow")
        .await
        .unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn test_get_commit_parses_the_commit_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/jdoe/comp110-jdoe/git/commits/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sha": "abc123",
            "created": "2025-03-10T10:30:00Z",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let commit = client_for(&server)
        .get_commit("jdoe", "comp110-jdoe", "abc123")
        .await
        .unwrap();
    assert_eq!(commit.sha, "abc123");
    let created = commit.created.unwrap();
    assert_eq!(created.to_rfc3339(), "2025-03-10T10:30:00+00:00");
}

#[tokio::test]
async fn test_error_carries_upstream_status() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/admin/users/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_string("user does not exist"))
        .mount(&server)
        .await;

    let err = client_for(&server).delete_user("ghost").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(!err.is_retryable());

    let core: gradeflow_core::CoreError = err.into();
    assert_eq!(core.error_code(), "GIT_BACKEND_ERROR");
}
