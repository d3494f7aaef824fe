// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LMS client for downsync reads and upsync writes.
//!
//! Wraps the LMS HTTP API with bearer-token auth. All calls use a 10 second
//! timeout. Upstream failures surface as [`LmsError`] carrying the response
//! status so callers can decide whether to retry.

use std::time::Duration;

use reqwest::multipart;
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::LmsConfig;
use crate::error::{LmsError, Result};
use crate::types::{
    DuplicatePolicy, EnrollmentKind, GradePost, LmsAssignment, LmsAssignmentUpdate, LmsCourse,
    LmsFile, LmsSubmission, LmsUser, UploadTicket,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the LMS HTTP API.
pub struct LmsClient {
    http: reqwest::Client,
    config: LmsConfig,
}

impl LmsClient {
    /// Create a new client from the given configuration.
    pub fn new(config: LmsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LmsError::Config(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(LmsConfig::from_env()?)
    }

    /// The adapter configuration.
    pub fn config(&self) -> &LmsConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let mut body = body;
        body.truncate(512);
        Err(LmsError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.config.token)
            .query(query)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    // =========================================================================
    // Downsync reads
    // =========================================================================

    /// Fetch the configured course.
    #[instrument(skip(self))]
    pub async fn get_course(&self) -> Result<LmsCourse> {
        debug!(course_id = self.config.course_id, "Fetching course");
        self.get_json(&format!("courses/{}", self.config.course_id), &[])
            .await
    }

    /// List all assignments in the course.
    #[instrument(skip(self))]
    pub async fn list_assignments(&self) -> Result<Vec<LmsAssignment>> {
        self.get_json(
            &format!("courses/{}/assignments", self.config.course_id),
            &[("per_page", "100".to_string())],
        )
        .await
    }

    /// Fetch a single assignment (used for the unpublishable check).
    #[instrument(skip(self))]
    pub async fn get_assignment(&self, assignment_id: i64) -> Result<LmsAssignment> {
        self.get_json(
            &format!(
                "courses/{}/assignments/{}",
                self.config.course_id, assignment_id
            ),
            &[],
        )
        .await
    }

    /// List enrolled users of one kind.
    ///
    /// SIS ids in the result are realm-stripped: callers see bare PIDs.
    #[instrument(skip(self))]
    pub async fn list_users(&self, kind: EnrollmentKind) -> Result<Vec<LmsUser>> {
        let mut users: Vec<LmsUser> = self
            .get_json(
                &format!("courses/{}/users", self.config.course_id),
                &[
                    ("enrollment_type[]", kind.as_str().to_string()),
                    ("per_page", "100".to_string()),
                ],
            )
            .await?;
        for user in &mut users {
            if let Some(sis) = &user.sis_user_id {
                user.sis_user_id = Some(self.config.bare_pid(sis));
            }
        }
        Ok(users)
    }

    /// List submissions for a set of assignments and students.
    #[instrument(skip(self, assignment_ids, student_ids))]
    pub async fn list_submissions(
        &self,
        assignment_ids: &[i64],
        student_ids: &[i64],
        include_history: bool,
    ) -> Result<Vec<LmsSubmission>> {
        let mut query: Vec<(&str, String)> = assignment_ids
            .iter()
            .map(|id| ("assignment_ids[]", id.to_string()))
            .collect();
        if student_ids.is_empty() {
            query.push(("student_ids[]", "all".to_string()));
        } else {
            query.extend(student_ids.iter().map(|id| ("student_ids[]", id.to_string())));
        }
        if include_history {
            query.push(("include[]", "submission_history".to_string()));
        }
        query.push(("per_page", "100".to_string()));

        self.get_json(
            &format!("courses/{}/students/submissions", self.config.course_id),
            &query,
        )
        .await
    }

    // =========================================================================
    // Upsync writes
    // =========================================================================

    /// Upload a file into a course folder.
    ///
    /// The LMS upload is multi-step: request an upload ticket, then POST the
    /// bytes to the returned URL with the ticket params echoed as form
    /// fields. A redirect on the final step is followed to confirm the file.
    #[instrument(skip(self, content), fields(size = content.len()))]
    pub async fn upload_course_file(
        &self,
        folder_path: &str,
        file_name: &str,
        content: Vec<u8>,
        on_duplicate: DuplicatePolicy,
    ) -> Result<LmsFile> {
        debug!(folder_path, file_name, "Requesting upload ticket");

        let response = self
            .http
            .post(self.url(&format!("courses/{}/files", self.config.course_id)))
            .bearer_auth(&self.config.token)
            .form(&[
                ("name", file_name),
                ("parent_folder_path", folder_path),
                ("size", &content.len().to_string()),
                ("on_duplicate", on_duplicate.as_str()),
            ])
            .send()
            .await?;
        let ticket: UploadTicket = Self::check(response)
            .await
            .map_err(|e| LmsError::Upload(e.to_string()))?
            .json()
            .await
            .map_err(|e| LmsError::Upload(e.to_string()))?;

        let mut form = multipart::Form::new();
        for (key, value) in &ticket.upload_params {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            form = form.text(key.clone(), value);
        }
        form = form.part(
            "file",
            multipart::Part::bytes(content).file_name(file_name.to_string()),
        );

        let response = self
            .http
            .post(&ticket.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LmsError::Upload(e.to_string()))?;
        let response = Self::check(response)
            .await
            .map_err(|e| LmsError::Upload(e.to_string()))?;
        let file: LmsFile = response
            .json()
            .await
            .map_err(|e| LmsError::Upload(e.to_string()))?;

        debug!(file_id = file.id, "Upload confirmed");
        Ok(file)
    }

    /// Post a grade for one student on one assignment.
    ///
    /// The grade travels as `posted_grade` in percent form; attached file
    /// ids and an optional text comment ride along.
    #[instrument(skip(self, post), fields(user_id = post.user_id))]
    pub async fn post_grade(&self, assignment_id: i64, post: &GradePost) -> Result<()> {
        let mut body = json!({
            "submission": { "posted_grade": format!("{}%", post.grade_percent) },
        });
        if !post.file_ids.is_empty() || post.comment.is_some() {
            let mut comment = serde_json::Map::new();
            if let Some(text) = &post.comment {
                comment.insert("text_comment".to_string(), json!(text));
            }
            if !post.file_ids.is_empty() {
                comment.insert("file_ids".to_string(), json!(post.file_ids));
            }
            body["comment"] = serde_json::Value::Object(comment);
        }

        let response = self
            .http
            .put(self.url(&format!(
                "courses/{}/assignments/{}/submissions/{}",
                self.config.course_id, assignment_id, post.user_id
            )))
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Push a schedule/publishedness update for an assignment.
    #[instrument(skip(self, update))]
    pub async fn update_assignment(
        &self,
        assignment_id: i64,
        update: &LmsAssignmentUpdate,
    ) -> Result<LmsAssignment> {
        let response = self
            .http
            .put(self.url(&format!(
                "courses/{}/assignments/{}",
                self.config.course_id, assignment_id
            )))
            .bearer_auth(&self.config.token)
            .json(&json!({ "assignment": update }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}
