mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use paneforge::errors::Result;
use paneforge::git::materialize::BranchMaterializer;
use paneforge::terminal::backend::{BackendError, SessionBackend};
use paneforge::terminal::models::{RuntimeKind, TerminalSpec, TerminalState};
use paneforge::terminal::service::{DirtySwitchDecision, RemovalMode, SwitchRequest, TerminalService};

#[derive(Default)]
struct FakeBackend {
    fail_starts: AtomicBool,
    fail_start_cwd: Mutex<Option<String>>,
    fail_stops: AtomicBool,
    log: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl SessionBackend for FakeBackend {
    fn start(
        &self,
        terminal_id: &str,
        _runtime: RuntimeKind,
        cwd: Option<&str>,
    ) -> std::result::Result<(), BackendError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start:{terminal_id}:{}", cwd.unwrap_or("")));
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(BackendError::StartFailed("forced start failure".into()));
        }
        if let Some(bad) = self.fail_start_cwd.lock().unwrap().as_deref() {
            if cwd == Some(bad) {
                return Err(BackendError::StartFailed(format!("cannot start in {bad}")));
            }
        }
        Ok(())
    }

    fn stop(&self, terminal_id: &str) -> std::result::Result<(), BackendError> {
        self.log.lock().unwrap().push(format!("stop:{terminal_id}"));
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(BackendError::StopFailed("forced stop failure".into()));
        }
        Ok(())
    }
}

struct FakeMaterializer;

impl BranchMaterializer for FakeMaterializer {
    fn materialize(&self, _repo_path: &str, remote_branch: &str) -> Result<String> {
        Ok(remote_branch.trim_start_matches("origin/").to_string())
    }
}

fn service_with(backend: Arc<FakeBackend>) -> TerminalService {
    TerminalService::new(4, RuntimeKind::Wsl)
        .unwrap()
        .with_backend(backend)
        .with_materializer(Arc::new(FakeMaterializer))
}

fn spec(id: &str, repo: &str, branch: &str) -> TerminalSpec {
    TerminalSpec::new(id, format!("Terminal {id}")).repo(repo).branch(branch)
}

fn event_steps(service: &TerminalService, terminal_id: &str) -> Vec<String> {
    service
        .list_events()
        .into_iter()
        .filter(|e| e.terminal_id == terminal_id)
        .map(|e| e.step)
        .collect()
}

#[test]
fn lifecycle_transitions_and_events() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(Arc::clone(&backend));

    let created = service.create(spec("t1", "/repo", "main")).unwrap();
    assert_eq!(created.state, TerminalState::Created);

    let running = service.start("t1").unwrap();
    assert_eq!(running.state, TerminalState::Running);
    assert_eq!(running.metadata.get("pty_attached").map(String::as_str), Some("true"));

    let stopped = service.stop("t1").unwrap();
    assert_eq!(stopped.state, TerminalState::Stopped);
    assert!(!stopped.metadata.contains_key("pty_attached"));

    let restarted = service.restart("t1").unwrap();
    assert_eq!(restarted.state, TerminalState::Running);

    service.remove("t1", RemovalMode::Preserve).unwrap();
    assert!(service.list_instances().is_empty());

    assert_eq!(
        event_steps(&service, "t1"),
        vec!["create", "start", "stop", "stop", "start", "stop", "remove"]
    );
    // remove() stopped the running terminal before dropping it
    assert_eq!(backend.log().last().unwrap(), "stop:t1");
}

#[test]
fn duplicate_ids_and_limit_are_rejected() {
    let service = TerminalService::new(2, RuntimeKind::Wsl).unwrap();
    service.create(spec("t1", "/r", "main")).unwrap();

    let dup = service.create(spec("t1", "/r", "main")).unwrap_err();
    assert_eq!(dup.kind(), paneforge::ErrorKind::Validation);

    service.create(spec("t2", "/r", "main")).unwrap();
    let full = service.create(spec("t3", "/r", "main")).unwrap_err();
    assert!(full.message().contains("limit"));
    assert_eq!(service.list_instances().len(), 2);
}

#[test]
fn stop_failure_marks_terminal_failed() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(Arc::clone(&backend));
    service.create(spec("t1", "/repo", "main")).unwrap();
    service.start("t1").unwrap();

    backend.fail_stops.store(true, Ordering::SeqCst);
    let err = service.stop("t1").unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Runtime);

    let instance = service.list_instances().into_iter().next().unwrap();
    assert_eq!(instance.state, TerminalState::Failed);
    assert!(instance
        .metadata
        .get("failure_reason")
        .unwrap()
        .contains("forced stop failure"));
    assert!(event_steps(&service, "t1").contains(&"stop-failed".to_string()));
}

#[test]
fn dirty_switch_without_resolver_cancels() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(backend);
    service.create(spec("t1", "/repo/old", "main")).unwrap();
    service.start("t1").unwrap();

    let err = service
        .switch_context(
            "t1",
            SwitchRequest::new("/repo/new", "dev"),
            Some(&|_| true),
            None,
        )
        .unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Validation);

    let instance = service.list_instances().into_iter().next().unwrap();
    assert_eq!(instance.spec.repo_path, "/repo/old");
    assert_eq!(instance.spec.branch, "main");
    assert_eq!(instance.state, TerminalState::Running);
    assert!(event_steps(&service, "t1").contains(&"switch-cancel".to_string()));
}

#[test]
fn dirty_switch_preserve_decision_is_recorded() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(backend);
    service.create(spec("t1", "/repo/old", "main")).unwrap();
    service.start("t1").unwrap();

    let switched = service
        .switch_context(
            "t1",
            SwitchRequest::new("/repo/new", "dev"),
            Some(&|_| true),
            Some(&|_| DirtySwitchDecision::Preserve),
        )
        .unwrap();
    assert_eq!(switched.spec.repo_path, "/repo/new");
    assert_eq!(switched.spec.branch, "dev");
    assert_eq!(switched.state, TerminalState::Running);
    assert_eq!(
        switched.metadata.get("dirty_switch").map(String::as_str),
        Some("preserve")
    );
    assert!(event_steps(&service, "t1").contains(&"switch-dirty".to_string()));
}

#[test]
fn switch_materializes_remote_branches() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(backend);
    service.create(spec("t1", "/repo/old", "main")).unwrap();
    service.start("t1").unwrap();

    let switched = service
        .switch_context("t1", SwitchRequest::new("/repo/new", "origin/feat"), None, None)
        .unwrap();
    assert_eq!(switched.spec.branch, "feat");

    let steps = event_steps(&service, "t1");
    let pos = |s: &str| steps.iter().position(|x| x == s).unwrap();
    assert!(pos("switch-start") < pos("switch-materialize"));
    assert!(pos("switch-materialize") < pos("switch-stop-old"));
    assert!(pos("switch-stop-old") < pos("switch-start-new"));
    assert!(pos("switch-start-new") < pos("switch-complete"));
}

#[test]
fn failed_switch_rolls_back_previous_context() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(Arc::clone(&backend));
    service.create(spec("t1", "/repo/old", "main")).unwrap();
    service.start("t1").unwrap();

    *backend.fail_start_cwd.lock().unwrap() = Some("/repo/new".to_string());
    let err = service
        .switch_context("t1", SwitchRequest::new("/repo/new", "dev"), None, None)
        .unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Runtime);

    let instance = service.list_instances().into_iter().next().unwrap();
    assert_eq!(instance.spec.repo_path, "/repo/old");
    assert_eq!(instance.spec.branch, "main");
    assert_eq!(instance.state, TerminalState::Running);
    assert!(event_steps(&service, "t1").contains(&"switch-revert".to_string()));
}

#[test]
fn double_start_failure_marks_failed() {
    let backend = Arc::new(FakeBackend::default());
    let service = service_with(Arc::clone(&backend));
    service.create(spec("t1", "/repo/old", "main")).unwrap();
    service.start("t1").unwrap();

    backend.fail_starts.store(true, Ordering::SeqCst);
    let err = service
        .switch_context("t1", SwitchRequest::new("/repo/new", "dev"), None, None)
        .unwrap_err();
    assert_eq!(err.kind(), paneforge::ErrorKind::Runtime);

    let instance = service.list_instances().into_iter().next().unwrap();
    assert_eq!(instance.state, TerminalState::Failed);
    assert!(instance
        .metadata
        .get("failure_reason")
        .unwrap()
        .contains("restore"));
}

#[test]
fn event_log_is_complete_under_concurrency() {
    let service = Arc::new(TerminalService::new(4, RuntimeKind::Wsl).unwrap());
    let mut handles = Vec::new();
    for i in 0..200 {
        let svc = Arc::clone(&service);
        handles.push(std::thread::spawn(move || {
            svc.record_event(&format!("t{}", i % 4), "probe", &format!("message {i}"));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(service.list_events().len(), 200);

    service.clear_events();
    assert!(service.list_events().is_empty());
}
