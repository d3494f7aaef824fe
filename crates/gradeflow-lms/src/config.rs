// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LMS adapter configuration.

use crate::error::LmsError;

/// Host suffixes whose PIDs travel realm-decorated (`<pid>:<realm>`).
///
/// The core always deals in bare PIDs; the decoration is applied and
/// stripped at this adapter's edge only.
const REALMED_HOSTS: [(&str, &str); 2] = [
    ("uncch.instructure.com", "unc"),
    ("canvas.unc.edu", "unc"),
];

/// LMS adapter configuration.
#[derive(Debug, Clone)]
pub struct LmsConfig {
    /// Base URL of the LMS API, e.g. `https://canvas.example.edu/api/v1`.
    pub base_url: String,
    /// Bearer token for API calls.
    pub token: String,
    /// The course this deployment serves.
    pub course_id: i64,
    /// Realm suffix for SIS ids, when the host requires one.
    pub realm: Option<String>,
}

impl LmsConfig {
    /// Build a config, inferring the realm from the host when not given.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, course_id: i64) -> Self {
        let base_url = base_url.into();
        let realm = infer_realm(&base_url).map(str::to_string);
        Self {
            base_url,
            token: token.into(),
            course_id,
            realm,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `GRADEFLOW_LMS_BASE_URL`
    /// - `GRADEFLOW_LMS_TOKEN`
    /// - `GRADEFLOW_LMS_COURSE_ID`
    ///
    /// Optional:
    /// - `GRADEFLOW_LMS_REALM`: overrides the host-inferred realm suffix
    pub fn from_env() -> Result<Self, LmsError> {
        let base_url = std::env::var("GRADEFLOW_LMS_BASE_URL")
            .map_err(|_| LmsError::Config("missing GRADEFLOW_LMS_BASE_URL".to_string()))?;
        let token = std::env::var("GRADEFLOW_LMS_TOKEN")
            .map_err(|_| LmsError::Config("missing GRADEFLOW_LMS_TOKEN".to_string()))?;
        let course_id = std::env::var("GRADEFLOW_LMS_COURSE_ID")
            .map_err(|_| LmsError::Config("missing GRADEFLOW_LMS_COURSE_ID".to_string()))?
            .parse()
            .map_err(|_| {
                LmsError::Config("GRADEFLOW_LMS_COURSE_ID must be an integer".to_string())
            })?;

        let mut config = Self::new(base_url, token, course_id);
        if let Ok(realm) = std::env::var("GRADEFLOW_LMS_REALM") {
            config.realm = if realm.is_empty() { None } else { Some(realm) };
        }
        Ok(config)
    }

    /// Decorate a bare PID for the wire, when this host uses realms.
    pub fn decorate_pid(&self, pid: &str) -> String {
        match &self.realm {
            Some(realm) => format!("{pid}:{realm}"),
            None => pid.to_string(),
        }
    }

    /// Strip the realm decoration from a wire-side SIS id.
    pub fn bare_pid(&self, sis_user_id: &str) -> String {
        match &self.realm {
            Some(realm) => sis_user_id
                .strip_suffix(&format!(":{realm}"))
                .unwrap_or(sis_user_id)
                .to_string(),
            None => sis_user_id.to_string(),
        }
    }
}

fn infer_realm(base_url: &str) -> Option<&'static str> {
    let host = url::Url::parse(base_url).ok()?.host_str()?.to_string();
    REALMED_HOSTS
        .iter()
        .find(|(known, _)| host == *known)
        .map(|(_, realm)| *realm)
}
