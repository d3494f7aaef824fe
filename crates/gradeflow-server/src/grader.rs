// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Autograder execution.
//!
//! The subprocess runner stages one submission into a throwaway working
//! directory, invokes the grader executable, and parses its JSON results.
//! The scratch directory is removed on all exit paths by `TempDir`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use gradeflow_core::{CoreError, Precondition, Result};

/// Result for a single graded question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionResult {
    /// Question identifier.
    pub name: String,
    /// Points earned.
    pub score: f64,
    /// Points available.
    pub max_score: f64,
    /// Grader output for this question.
    pub output: String,
}

/// Outcome of grading one submission.
#[derive(Debug, Clone, Default)]
pub struct GradeOutcome {
    /// Total points earned.
    pub score: f64,
    /// Total points available.
    pub total_points: f64,
    /// Per-question breakdown.
    pub questions: Vec<QuestionResult>,
    /// Rendered copy of the graded notebook, when the grader produces one.
    pub rendered_notebook: Option<Vec<u8>>,
}

impl GradeOutcome {
    /// Per-question feedback as one comment body.
    pub fn feedback_text(&self) -> String {
        self.questions
            .iter()
            .map(|q| format!("{}: {}/{} {}", q.name, q.score, q.max_score, q.output.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Grades submission trees against a grader configuration.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Generate the grader configuration from the master notebook.
    ///
    /// Fails with `OTTER_CONFIG_VIOLATION` when the notebook cannot be
    /// turned into a valid configuration.
    async fn generate_config(&self, master_notebook: &str) -> Result<String>;

    /// Grade one submission archive. `archive` is a tar.gz of the
    /// assignment subtree at the submitted commit.
    async fn grade(
        &self,
        archive: &[u8],
        config: &str,
        requirements: &str,
    ) -> Result<GradeOutcome>;
}

/// Wire shape of the grader executable's JSON results.
#[derive(Debug, Deserialize)]
struct GraderResults {
    score: f64,
    max_score: f64,
    #[serde(default)]
    questions: Vec<GraderQuestion>,
}

#[derive(Debug, Deserialize)]
struct GraderQuestion {
    name: String,
    score: f64,
    max_score: f64,
    #[serde(default)]
    output: String,
}

/// Runs the grader executable in an isolated working directory.
pub struct SubprocessGrader {
    command: String,
}

impl SubprocessGrader {
    /// Create a runner invoking the given executable.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn operational(context: &str, err: impl std::fmt::Display) -> CoreError {
        CoreError::OperationalFailure {
            details: format!("{context}: {err}"),
        }
    }
}

#[async_trait]
impl Grader for SubprocessGrader {
    #[instrument(skip(self, master_notebook), fields(bytes = master_notebook.len()))]
    async fn generate_config(&self, master_notebook: &str) -> Result<String> {
        let workdir = tempfile::TempDir::new()
            .map_err(|e| Self::operational("creating grader workdir", e))?;
        let notebook_path = workdir.path().join("master.ipynb");
        tokio::fs::write(&notebook_path, master_notebook)
            .await
            .map_err(|e| Self::operational("staging master notebook", e))?;

        let output = tokio::process::Command::new(&self.command)
            .arg("assign")
            .arg(&notebook_path)
            .current_dir(workdir.path())
            .output()
            .await
            .map_err(|e| Self::operational("spawning grader", e))?;

        if !output.status.success() {
            debug!(
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Config generation failed"
            );
            return Err(CoreError::PreconditionFailed(
                Precondition::OtterConfigViolation,
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| CoreError::PreconditionFailed(Precondition::OtterConfigViolation))
    }

    #[instrument(skip_all, fields(archive_bytes = archive.len()))]
    async fn grade(
        &self,
        archive: &[u8],
        config: &str,
        requirements: &str,
    ) -> Result<GradeOutcome> {
        let workdir = tempfile::TempDir::new()
            .map_err(|e| Self::operational("creating grader workdir", e))?;
        let archive_path = workdir.path().join("submission.tar.gz");
        tokio::fs::write(&archive_path, archive)
            .await
            .map_err(|e| Self::operational("staging submission archive", e))?;
        tokio::fs::write(workdir.path().join("autograder.json"), config)
            .await
            .map_err(|e| Self::operational("staging grader config", e))?;
        tokio::fs::write(workdir.path().join("requirements.txt"), requirements)
            .await
            .map_err(|e| Self::operational("staging requirements", e))?;

        let output = tokio::process::Command::new(&self.command)
            .arg("grade")
            .arg(&archive_path)
            .arg("--config")
            .arg("autograder.json")
            .current_dir(workdir.path())
            .output()
            .await
            .map_err(|e| Self::operational("spawning grader", e))?;

        if !output.status.success() {
            return Err(Self::operational(
                "grader exited with failure",
                String::from_utf8_lossy(&output.stderr),
            ));
        }

        let results: GraderResults = serde_json::from_slice(&output.stdout)
            .map_err(|e| Self::operational("parsing grader results", e))?;

        // A rendered notebook is optional; its absence is not a failure.
        let rendered_notebook = tokio::fs::read(workdir.path().join("graded.pdf")).await.ok();

        Ok(GradeOutcome {
            score: results.score,
            total_points: results.max_score,
            questions: results
                .questions
                .into_iter()
                .map(|q| QuestionResult {
                    name: q.name,
                    score: q.score,
                    max_score: q.max_score,
                    output: q.output,
                })
                .collect(),
            rendered_notebook,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_parse_with_and_without_questions() {
        let full: GraderResults = serde_json::from_str(
            r#"{"score": 7.5, "max_score": 10.0, "questions": [
                {"name": "q1", "score": 5.0, "max_score": 5.0, "output": "passed"},
                {"name": "q2", "score": 2.5, "max_score": 5.0}
            ]}"#,
        )
        .unwrap();
        assert_eq!(full.score, 7.5);
        assert_eq!(full.questions.len(), 2);
        assert_eq!(full.questions[1].output, "");

        let bare: GraderResults =
            serde_json::from_str(r#"{"score": 0.0, "max_score": 10.0}"#).unwrap();
        assert!(bare.questions.is_empty());
    }

    #[test]
    fn test_feedback_text_joins_questions() {
        let outcome = GradeOutcome {
            score: 7.5,
            total_points: 10.0,
            questions: vec![
                QuestionResult {
                    name: "q1".into(),
                    score: 5.0,
                    max_score: 5.0,
                    output: "passed".into(),
                },
                QuestionResult {
                    name: "q2".into(),
                    score: 2.5,
                    max_score: 5.0,
                    output: "off by one".into(),
                },
            ],
            rendered_notebook: None,
        };
        let text = outcome.feedback_text();
        assert!(text.contains("q1: 5/5 passed"));
        assert!(text.contains("q2: 2.5/5 off by one"));
    }

    #[tokio::test]
    async fn test_generate_config_with_missing_executable_is_operational() {
        let grader = SubprocessGrader::new("/nonexistent/grader-binary");
        let err = grader.generate_config("{}").await.unwrap_err();
        assert_eq!(err.error_code(), "OPERATIONAL_FAILURE");
    }
}
