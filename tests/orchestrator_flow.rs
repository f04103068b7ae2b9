mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{fail, ok, unwrap_wsl, FakeExec};
use paneforge::orchestrator::{orchestrate, NullProgress, OrchestrationRequest};
use paneforge::tmux::layouts::Layout;
use paneforge::worktree::{Assignment, CleanupPolicy, WorktreeManager};

fn request(assignments: Vec<Assignment>) -> OrchestrationRequest {
    OrchestrationRequest {
        distribution: "Ubuntu".to_string(),
        available_distributions: vec!["Ubuntu".to_string(), "Debian".to_string()],
        layout: Layout::Grid,
        cleanup_policy: CleanupPolicy::Session,
        assignments,
        worktree_base: "/home/u/worktrees".to_string(),
        session_name: "dev".to_string(),
        tmux_auto_install: true,
    }
}

/// Fresh-repo executor: tmux present, no existing worktrees, everything
/// else succeeds.
fn happy_exec() -> FakeExec {
    FakeExec::new(|argv| {
        let inner = unwrap_wsl(argv);
        let line = inner.join(" ");
        if line.contains("worktree list --porcelain") {
            return Ok(ok(""));
        }
        if inner[0] == "bash" {
            return Ok(fail(1, ""));
        }
        Ok(ok(""))
    })
}

#[test]
fn two_assignments_produce_session_in_pane_order() {
    let exec = happy_exec();
    let req = request(vec![
        Assignment::new(1, "/home/u/src/repo", "dev"),
        Assignment::new(0, "/home/u/src/repo", "main"),
    ]);

    let result = orchestrate(&req, &exec, &NullProgress, None).unwrap();
    let panes: Vec<u32> = result.worktrees.iter().map(|w| w.pane).collect();
    assert_eq!(panes, vec![0, 1]);
    assert_eq!(result.worktrees[0].path, "/home/u/worktrees/repo/pane-0-main");
    assert_eq!(result.worktrees[1].path, "/home/u/worktrees/repo/pane-1-dev");

    // Every recorded command is wrapped for the selected distribution.
    assert!(result
        .executed_commands
        .iter()
        .all(|c| c[..4] == ["wsl.exe", "-d", "Ubuntu", "--"].map(String::from)));

    let tmux: Vec<&[String]> = result
        .executed_commands
        .iter()
        .map(|c| unwrap_wsl(c))
        .filter(|c| c[0] == "tmux")
        .collect();
    assert_eq!(tmux[0][1], "new-session");
    assert_eq!(tmux[0][6], "/home/u/worktrees/repo/pane-0-main");
    let split = tmux.iter().find(|c| c[1] == "split-window").unwrap();
    assert_eq!(split[6], "/home/u/worktrees/repo/pane-1-dev");
    assert_eq!(tmux.last().unwrap()[1], "select-pane");
}

#[test]
fn remote_branches_are_materialized_before_worktrees() {
    let exec = happy_exec();
    let req = request(vec![
        Assignment::new(0, "/home/u/src/repo", "origin/feat"),
        Assignment::new(1, "/home/u/src/repo", "main"),
    ]);

    let result = orchestrate(&req, &exec, &NullProgress, None).unwrap();
    assert_eq!(result.worktrees[0].branch, "feat");
    assert_eq!(result.worktrees[1].branch, "main");

    let inner: Vec<Vec<String>> = result
        .executed_commands
        .iter()
        .map(|c| unwrap_wsl(c).to_vec())
        .collect();
    let track = inner
        .iter()
        .position(|c| c.join(" ").contains("branch --track feat origin/feat"))
        .expect("tracking branch created");
    let first_add = inner
        .iter()
        .position(|c| c.iter().any(|w| w == "add"))
        .unwrap();
    assert!(track < first_add);
}

#[test]
fn layout_failure_rolls_back_created_worktrees() {
    let exec = FakeExec::new(|argv| {
        let inner = unwrap_wsl(argv);
        let line = inner.join(" ");
        if line.contains("worktree list --porcelain") {
            return Ok(ok(""));
        }
        if inner[0] == "bash" {
            return Ok(fail(1, ""));
        }
        if inner[0] == "tmux" && inner[1] == "new-session" {
            return Ok(fail(1, "error connecting to server"));
        }
        Ok(ok(""))
    });

    let manager = WorktreeManager::new_remote("/home/u/worktrees", CleanupPolicy::Session);
    let req = request(vec![
        Assignment::new(0, "/home/u/src/repo", "main"),
        Assignment::new(1, "/home/u/src/repo", "dev"),
    ]);

    let err = orchestrate(&req, &exec, &NullProgress, Some(&manager)).unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Tmux);
    assert!(err.hint().contains("error connecting to server"));

    // Both worktrees were removed again, forced and policy-independent.
    assert!(manager.managed().is_empty());
    let removes: Vec<Vec<String>> = exec
        .calls()
        .iter()
        .map(|c| unwrap_wsl(c).to_vec())
        .filter(|c| c.iter().any(|w| w == "remove"))
        .collect();
    assert_eq!(removes.len(), 2);
    assert!(removes.iter().all(|c| c.iter().any(|w| w == "--force")));
}

#[test]
fn duplicate_session_is_killed_and_retried_once() {
    let new_session_calls = AtomicUsize::new(0);
    let exec = FakeExec::new(move |argv| {
        let inner = unwrap_wsl(argv);
        let line = inner.join(" ");
        if line.contains("worktree list --porcelain") {
            return Ok(ok(""));
        }
        if inner[0] == "bash" {
            return Ok(fail(1, ""));
        }
        if inner[0] == "tmux" && inner[1] == "new-session" {
            if new_session_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(fail(1, "duplicate session: dev"));
            }
            return Ok(ok(""));
        }
        Ok(ok(""))
    });

    let req = request(vec![
        Assignment::new(0, "/home/u/src/repo", "main"),
        Assignment::new(1, "/home/u/src/repo", "dev"),
    ]);
    let result = orchestrate(&req, &exec, &NullProgress, None).unwrap();
    assert_eq!(result.worktrees.len(), 2);

    let inner: Vec<Vec<String>> = result
        .executed_commands
        .iter()
        .map(|c| unwrap_wsl(c).to_vec())
        .collect();
    let new_sessions = inner.iter().filter(|c| c[1] == "new-session").count();
    let kills = inner
        .iter()
        .filter(|c| c[0] == "tmux" && c[1] == "kill-session")
        .count();
    assert_eq!(new_sessions, 2);
    assert_eq!(kills, 1);
    let kill = inner.iter().find(|c| c.get(1).map(String::as_str) == Some("kill-session")).unwrap();
    assert_eq!(kill[3], "dev");
}

#[test]
fn persistent_kill_failure_still_fails_with_context() {
    let exec = FakeExec::new(|argv| {
        let inner = unwrap_wsl(argv);
        let line = inner.join(" ");
        if line.contains("worktree list --porcelain") {
            return Ok(ok(""));
        }
        if inner[0] == "bash" {
            return Ok(fail(1, ""));
        }
        if inner[0] == "tmux" && inner[1] == "new-session" {
            return Ok(fail(1, "duplicate session: dev"));
        }
        if inner[0] == "tmux" && inner[1] == "kill-session" {
            return Ok(fail(1, "session not found"));
        }
        Ok(ok(""))
    });

    let req = request(vec![
        Assignment::new(0, "/home/u/src/repo", "main"),
        Assignment::new(1, "/home/u/src/repo", "dev"),
    ]);
    let err = orchestrate(&req, &exec, &NullProgress, None).unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Tmux);
    assert!(err.hint().contains("duplicate session"));
    assert!(err.hint().contains("cleanup failed"));
}

#[test]
fn invalid_distribution_fails_before_any_command() {
    let exec = FakeExec::always_ok();
    let mut req = request(vec![
        Assignment::new(0, "/r", "main"),
        Assignment::new(1, "/r", "dev"),
    ]);
    req.distribution = "Arch".to_string();

    let err = orchestrate(&req, &exec, &NullProgress, None).unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Runtime);
    assert!(err.message().contains("Arch"));
    assert_eq!(exec.call_count(), 0);
}

#[test]
fn duplicate_pane_assignments_fail_validation() {
    let exec = FakeExec::always_ok();
    let req = request(vec![
        Assignment::new(0, "/r", "main"),
        Assignment::new(0, "/r", "dev"),
    ]);

    let err = orchestrate(&req, &exec, &NullProgress, None).unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Validation);
    assert_eq!(exec.call_count(), 0);
}
