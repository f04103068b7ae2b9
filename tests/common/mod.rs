#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use paneforge::errors::Result;
use paneforge::util::exec::{ExecOutput, ExecRequest, Execute};

/// Deterministic executor: records every argv and answers through a
/// caller-supplied handler.
pub struct FakeExec {
    calls: Mutex<Vec<Vec<String>>>,
    handler: Box<dyn Fn(&[String]) -> Result<ExecOutput> + Send + Sync>,
}

impl FakeExec {
    pub fn new(handler: impl Fn(&[String]) -> Result<ExecOutput> + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Executor that answers success with empty output to everything.
    pub fn always_ok() -> Self {
        Self::new(|_| Ok(ok("")))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock poisoned").len()
    }
}

impl Execute for FakeExec {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push(request.argv.clone());
        (self.handler)(&request.argv)
    }
}

pub fn ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration: Duration::ZERO,
    }
}

pub fn fail(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
        duration: Duration::ZERO,
    }
}

/// Strip the `wsl.exe -d <dist> --` wrapper, returning the inner command.
pub fn unwrap_wsl(argv: &[String]) -> &[String] {
    if argv.len() >= 4 && argv[0] == "wsl.exe" && argv[1] == "-d" && argv[3] == "--" {
        &argv[4..]
    } else {
        argv
    }
}

pub fn joined(argv: &[String]) -> String {
    argv.join(" ")
}
