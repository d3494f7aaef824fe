// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pre-receive hook script synthesis.
//!
//! Renders the protected-files and merge-control policies for the current
//! assignment set as a single POSIX shell script. The script reads
//! `oldrev newrev refname` lines on stdin, enumerates changed paths with
//! `git diff --name-only`, and rejects the push when any path violates a
//! policy. Output is byte-deterministic for a given input set so the
//! reconciler can skip reinstalling an unchanged script.

use std::fmt::Write as _;

/// The all-zero SHA Git passes as `oldrev` for a newly created ref.
pub const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// SHA of the empty tree, substituted when `oldrev` is the null SHA.
pub const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Glob suffixes that may never be added to the master repository,
/// relative to an assignment directory. The master notebook path is
/// appended per assignment.
const PROTECTED_SUFFIXES: &[&str] = &["dist/*", "grade-report*", ".ssh/*", "protected-helpers/*"];

/// Glob suffixes an instructor may still modify or delete while the
/// assignment is open, relative to an assignment directory.
const OVERWRITABLE_SUFFIXES: &[&str] = &[
    "README*",
    "helpers/*",
    "requirements*.txt",
    "INSTRUCTIONS*",
    ".gitignore",
];

/// Per-assignment input to hook synthesis.
///
/// The caller resolves schedules; `merge_controlled` is true when the
/// assignment has both dates set and is currently open to at least one
/// student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookAssignment {
    /// Assignment directory, relative to the repository root, no trailing slash.
    pub directory_path: String,
    /// Master notebook path, relative to `directory_path`.
    pub master_notebook_path: String,
    /// Whether the merge-control policy applies to this assignment.
    pub merge_controlled: bool,
}

/// Render the combined pre-receive script for the given assignments.
///
/// Inputs are sorted by directory path before rendering, so the result is
/// byte-identical regardless of input order.
pub fn synthesize_hooks(assignments: &[HookAssignment]) -> String {
    let mut sorted: Vec<&HookAssignment> = assignments.iter().collect();
    sorted.sort_by(|a, b| a.directory_path.cmp(&b.directory_path));

    let mut protected: Vec<String> = Vec::new();
    let mut merge_dirs: Vec<&str> = Vec::new();
    let mut overwritable: Vec<String> = Vec::new();
    for assignment in &sorted {
        let dir = assignment.directory_path.trim_matches('/');
        protected.push(format!(
            "{dir}/{}",
            assignment.master_notebook_path.trim_start_matches('/')
        ));
        for suffix in PROTECTED_SUFFIXES {
            protected.push(format!("{dir}/{suffix}"));
        }
        if assignment.merge_controlled {
            merge_dirs.push(dir);
            for suffix in OVERWRITABLE_SUFFIXES {
                overwritable.push(format!("{dir}/{suffix}"));
            }
        }
    }

    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str("# Generated by gradeflow. Do not edit; changes are overwritten\n");
    script.push_str("# on the next reconciliation cycle.\n");
    let _ = writeln!(script, "NULL_SHA=\"{NULL_SHA}\"");
    let _ = writeln!(script, "EMPTY_TREE=\"{EMPTY_TREE_SHA}\"");
    script.push_str("violation=0\n");
    script.push_str("while read oldrev newrev refname; do\n");
    script.push_str("    if [ \"$oldrev\" = \"$NULL_SHA\" ]; then\n");
    script.push_str("        oldrev=\"$EMPTY_TREE\"\n");
    script.push_str("    fi\n");

    if !protected.is_empty() {
        script.push_str(
            "    for path in $(git diff --name-only --diff-filter=A \"$oldrev\" \"$newrev\"); do\n",
        );
        script.push_str("        case \"$path\" in\n");
        let _ = writeln!(script, "            {})", protected.join("|"));
        script.push_str("                echo \"PROTECTED_VIOLATION: $path\"\n");
        script.push_str("                violation=1\n");
        script.push_str("                ;;\n");
        script.push_str("        esac\n");
        script.push_str("    done\n");
    }

    if !merge_dirs.is_empty() {
        script.push_str(
            "    for path in $(git diff --name-only --diff-filter=MD \"$oldrev\" \"$newrev\"); do\n",
        );
        script.push_str("        case \"$path\" in\n");
        let _ = writeln!(script, "            {})", overwritable.join("|"));
        script.push_str("                ;;\n");
        let guarded: Vec<String> = merge_dirs.iter().map(|dir| format!("{dir}/*")).collect();
        let _ = writeln!(script, "            {})", guarded.join("|"));
        script.push_str("                echo \"MERGE_VIOLATION: $path\"\n");
        script.push_str("                violation=1\n");
        script.push_str("                ;;\n");
        script.push_str("        esac\n");
        script.push_str("    done\n");
    }

    script.push_str("done\n");
    script.push_str("exit $violation\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(dir: &str, notebook: &str, merge_controlled: bool) -> HookAssignment {
        HookAssignment {
            directory_path: dir.to_string(),
            master_notebook_path: notebook.to_string(),
            merge_controlled,
        }
    }

    #[test]
    fn protects_master_notebook_and_fixed_globs() {
        let script = synthesize_hooks(&[assignment("A1", "A1-prof.ipynb", false)]);
        assert!(script.contains("A1/A1-prof.ipynb"));
        assert!(script.contains("A1/dist/*"));
        assert!(script.contains("A1/grade-report*"));
        assert!(script.contains("A1/.ssh/*"));
        assert!(script.contains("A1/protected-helpers/*"));
        assert!(script.contains("PROTECTED_VIOLATION: $path"));
        assert!(script.contains("--diff-filter=A"));
    }

    #[test]
    fn protected_helpers_and_overwritable_helpers_stay_distinct() {
        let script = synthesize_hooks(&[assignment("A1", "A1-prof.ipynb", true)]);
        // protected-helpers is rejected on add; plain helpers stays
        // overwritable under merge control.
        assert!(script.contains("A1/protected-helpers/*"));
        assert!(script.contains("A1/helpers/*"));
    }

    #[test]
    fn merge_control_only_for_flagged_assignments() {
        let without = synthesize_hooks(&[assignment("A1", "A1-prof.ipynb", false)]);
        assert!(!without.contains("MERGE_VIOLATION"));

        let with = synthesize_hooks(&[assignment("A1", "A1-prof.ipynb", true)]);
        assert!(with.contains("MERGE_VIOLATION: $path"));
        assert!(with.contains("--diff-filter=MD"));
        assert!(with.contains("A1/README*"));
        assert!(with.contains("A1/helpers/*"));
        assert!(with.contains("A1/.gitignore"));
        assert!(with.contains("A1/*)"));
    }

    #[test]
    fn substitutes_empty_tree_for_null_sha() {
        let script = synthesize_hooks(&[assignment("A1", "A1-prof.ipynb", true)]);
        assert!(script.contains(NULL_SHA));
        assert!(script.contains(EMPTY_TREE_SHA));
        assert!(script.contains("oldrev=\"$EMPTY_TREE\""));
    }

    #[test]
    fn output_is_byte_identical_regardless_of_input_order() {
        let a = assignment("A1", "A1-prof.ipynb", true);
        let b = assignment("A2", "A2-prof.ipynb", false);
        let c = assignment("B1", "B1-prof.ipynb", true);
        let forward = synthesize_hooks(&[a.clone(), b.clone(), c.clone()]);
        let backward = synthesize_hooks(&[c, b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn empty_assignment_set_still_produces_runnable_script() {
        let script = synthesize_hooks(&[]);
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("exit $violation"));
        assert!(!script.contains("PROTECTED_VIOLATION"));
        assert!(!script.contains("MERGE_VIOLATION"));
    }

    #[test]
    fn trims_slashes_before_joining_paths() {
        let script = synthesize_hooks(&[assignment("/A1/", "/A1-prof.ipynb", false)]);
        assert!(script.contains("A1/A1-prof.ipynb"));
        assert!(!script.contains("//"));
    }
}
