// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static role and permission taxonomy.
//!
//! Permissions are `<resource>:<verb>` strings over the fixed resource and
//! verb sets. Role bindings are seeded once and never change at runtime.
//! Admin implicitly carries every permission, and owning a resource implies
//! permission to read it.

use std::fmt;

/// Named permission set assigned to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleName {
    /// Enrolled student.
    Student,
    /// Course staff.
    Instructor,
    /// Bootstrap admin; bypasses role checks.
    Admin,
}

impl RoleName {
    /// Returns the string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Admin => "admin",
        }
    }

    /// Parse a role from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "instructor" => Some(Self::Instructor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission resources.
pub const RESOURCES: [&str; 5] = [
    "assignment",
    "course",
    "student",
    "instructor",
    "submission",
];

/// Permission verbs.
pub const VERBS: [&str; 4] = ["get", "create", "modify", "delete"];

/// Permissions seeded for the student role.
pub const STUDENT_PERMISSIONS: [&str; 4] = [
    "assignment:get",
    "course:get",
    "instructor:get",
    "submission:create",
];

/// Permissions seeded for the instructor role.
pub const INSTRUCTOR_PERMISSIONS: [&str; 12] = [
    "assignment:get",
    "assignment:modify",
    "course:get",
    "course:modify",
    "student:get",
    "student:create",
    "student:modify",
    "student:delete",
    "instructor:get",
    "submission:get",
    "submission:create",
    "submission:modify",
];

/// Seeded permissions for a role. Admin is handled by
/// [`role_has_permission`], not by enumeration.
pub fn permissions_for(role: RoleName) -> &'static [&'static str] {
    match role {
        RoleName::Student => &STUDENT_PERMISSIONS,
        RoleName::Instructor => &INSTRUCTOR_PERMISSIONS,
        RoleName::Admin => &[],
    }
}

/// Whether the role carries the permission. Admin always does.
pub fn role_has_permission(role: RoleName, permission: &str) -> bool {
    match role {
        RoleName::Admin => true,
        _ => permissions_for(role).contains(&permission),
    }
}

/// Full authorization check: role permission, admin bypass, or ownership.
///
/// Ownership of a resource implies its `get` permission, so a student can
/// read their own submissions without `submission:get`.
pub fn is_authorized(role: RoleName, permission: &str, owns_resource: bool) -> bool {
    if role_has_permission(role, permission) {
        return true;
    }
    owns_resource && permission.ends_with(":get")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [RoleName::Student, RoleName::Instructor, RoleName::Admin] {
            assert_eq!(RoleName::parse(role.as_str()), Some(role));
        }
        assert_eq!(RoleName::parse("superuser"), None);
    }

    #[test]
    fn test_seeded_permissions_are_well_formed() {
        for role in [RoleName::Student, RoleName::Instructor] {
            for permission in permissions_for(role) {
                let (resource, verb) = permission
                    .split_once(':')
                    .unwrap_or_else(|| panic!("malformed permission {permission}"));
                assert!(RESOURCES.contains(&resource), "unknown resource {resource}");
                assert!(VERBS.contains(&verb), "unknown verb {verb}");
            }
        }
    }

    #[test]
    fn test_admin_carries_everything() {
        for resource in RESOURCES {
            for verb in VERBS {
                let permission = format!("{resource}:{verb}");
                assert!(role_has_permission(RoleName::Admin, &permission));
            }
        }
    }

    #[test]
    fn test_student_cannot_modify_assignments() {
        assert!(!role_has_permission(RoleName::Student, "assignment:modify"));
        assert!(role_has_permission(RoleName::Student, "assignment:get"));
    }

    #[test]
    fn test_seed_migration_matches_the_code_bindings() {
        let seed = include_str!("../migrations/0002_role_permission_seed.sql");
        for role in ["student", "instructor", "admin"] {
            assert!(seed.contains(&format!("('{role}')")), "role {role} not seeded");
        }
        for resource in RESOURCES {
            for verb in VERBS {
                assert!(
                    seed.contains(&format!("('{resource}:{verb}')")),
                    "permission {resource}:{verb} not seeded"
                );
            }
        }
        for permission in STUDENT_PERMISSIONS {
            assert!(
                seed.contains(&format!("('student', '{permission}')")),
                "student binding {permission} not seeded"
            );
        }
        for permission in INSTRUCTOR_PERMISSIONS {
            assert!(
                seed.contains(&format!("('instructor', '{permission}')")),
                "instructor binding {permission} not seeded"
            );
        }
        // Admin bypasses checks in code; it gets no binding rows.
        assert!(!seed.contains("('admin', "));
    }

    #[test]
    fn test_ownership_implies_get() {
        // Students have no submission:get, but can read their own.
        assert!(!role_has_permission(RoleName::Student, "submission:get"));
        assert!(is_authorized(RoleName::Student, "submission:get", true));
        assert!(!is_authorized(RoleName::Student, "submission:get", false));
        // Ownership never implies mutation.
        assert!(!is_authorized(RoleName::Student, "submission:delete", true));
    }
}
