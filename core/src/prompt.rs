//! Prompt construction: the implementation prompt, the review prompt, and
//! the merge-conflict retry note.
//! Grounded on the reference codebase's `flow_executor.rs` prompt-assembly
//! helpers (plain string building, no templating engine).

use crate::model::{Task, MAX_QUEUED_MESSAGE_CHARS};

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Tail of `s`, at most `max` characters, used for scratchpad progress notes.
pub fn tail_chars(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        return s.to_string();
    }
    s.chars().skip(total - max).collect()
}

/// Build the implementation-phase prompt for one iteration.
pub fn build_prompt(
    task: &Task,
    iteration: u32,
    max_iterations: u32,
    user_name: &str,
    user_email: &str,
    queued_followups: &[String],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Task: {}\n\n", task.title));
    out.push_str(&format!("id: {}\n", task.id));
    if let Some(desc) = &task.description {
        out.push_str(&format!("\n## Description\n{desc}\n"));
    }
    if let Some(ac) = &task.acceptance_criteria {
        out.push_str(&format!("\n## Acceptance criteria\n{ac}\n"));
    }
    if !task.scratchpad.is_empty() {
        out.push_str(&format!("\n## Prior progress\n{}\n", task.scratchpad));
    }
    out.push_str(&format!("\n## Iteration {iteration} of {max_iterations}\n"));
    out.push_str(&format!(
        "\nCommit as {user_name} <{user_email}> (co-authored-by trailer).\n"
    ));
    if !queued_followups.is_empty() {
        out.push_str("\n## Follow-up notes from the user\n");
        for f in queued_followups {
            out.push_str(&format!("- {}\n", truncate_chars(f, MAX_QUEUED_MESSAGE_CHARS)));
        }
    }
    out.push_str(
        "\nWhen finished, emit <complete/>. If you cannot proceed, emit \
         <blocked reason=\"...\"/>.\n",
    );
    out
}

/// Build the review prompt.
pub fn build_review_prompt(
    task: &Task,
    base_branch: &str,
    commit_log: &[String],
    diff_stats: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Review: {}\n\n", task.title));
    out.push_str(&format!("id: {}\n", task.id));
    if let Some(desc) = &task.description {
        out.push_str(&format!("\n## Description\n{desc}\n"));
    }
    out.push_str(&format!("\n## Commits since {base_branch}\n"));
    for line in commit_log {
        out.push_str(&format!("- {line}\n"));
    }
    out.push_str(&format!("\n## Diff stat\n{diff_stats}\n"));
    out.push_str(
        "\nRespond with <approve reason=\"...\"/> or <reject reason=\"...\"/>.\n",
    );
    out
}

/// The structured scratchpad note appended on a merge-conflict retry.
pub fn build_merge_conflict_note(
    original_error: &str,
    rebase_message: &str,
    conflict_files: &[String],
    files_changed_on_base: &[String],
    base_branch: &str,
) -> String {
    let mut out = String::new();
    out.push_str("\n[MERGE CONFLICT] Auto-merge hit a conflict and was rebased for retry.\n");
    out.push_str(&format!("- Original error: {original_error}\n"));
    out.push_str(&format!("- Rebase outcome: {rebase_message}\n"));
    out.push_str(&format!("- Base branch: {base_branch}\n"));
    if !conflict_files.is_empty() {
        out.push_str(&format!("- Conflicting files: {}\n", conflict_files.join(", ")));
    }
    if !files_changed_on_base.is_empty() {
        out.push_str(&format!(
            "- Files changed on base since branch: {}\n",
            files_changed_on_base.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MergeReadiness, TaskStatus, TaskType};

    fn sample_task() -> Task {
        Task {
            id: "t1".into(),
            status: TaskStatus::InProgress,
            task_type: TaskType::Auto,
            title: "Add widget".into(),
            description: Some("Build the widget.".into()),
            acceptance_criteria: None,
            scratchpad: String::new(),
            base_branch: Some("main".into()),
            total_iterations: 0,
            merge_readiness: MergeReadiness::Risk,
            checks_passed: None,
            review_summary: None,
            last_error: None,
            block_reason: None,
            agent_backend: None,
            merge_failed: false,
            merge_error: None,
        }
    }

    #[test]
    fn prompt_includes_iteration_and_identity() {
        let t = sample_task();
        let p = build_prompt(&t, 2, 10, "Ada", "ada@example.com", &[]);
        assert!(p.contains("Iteration 2 of 10"));
        assert!(p.contains("ada@example.com"));
    }

    #[test]
    fn prompt_includes_followups() {
        let t = sample_task();
        let p = build_prompt(&t, 1, 10, "Ada", "ada@example.com", &["please also fix X".into()]);
        assert!(p.contains("please also fix X"));
    }

    #[test]
    fn tail_chars_keeps_suffix() {
        let s = "a".repeat(10) + "END";
        let tail = tail_chars(&s, 5);
        assert_eq!(tail, "aaEND");
    }

    #[test]
    fn merge_conflict_note_has_all_sections() {
        let note = build_merge_conflict_note(
            "merge conflict in src/a.rs",
            "rebase stopped with conflicts",
            &["src/a.rs".to_string()],
            &["src/b.rs".to_string()],
            "main",
        );
        assert!(note.contains("src/a.rs"));
        assert!(note.contains("src/b.rs"));
        assert!(note.contains("main"));
    }
}
