use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use paneforge::cli::{Cli, Command};
use paneforge::config::Config;
use paneforge::errors::{user_facing_error, Error, Result};
use paneforge::git::branches::fetch_and_list;
use paneforge::lock::acquire_session_lock;
use paneforge::orchestrator::{orchestrate, NullProgress, OrchestrationRequest};
use paneforge::runtime::remote::{DistributionExec, WslRuntime};
use paneforge::runtime::wsl::{list_distributions, to_wsl_path};
use paneforge::worktree::Assignment;
use paneforge::util::exec::{ExecRequest, Execute, ProcessExecutor};

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_distribution(
    flag: Option<String>,
    config: &Config,
    available: &[String],
) -> Result<String> {
    if let Some(d) = flag.or_else(|| config.distribution.clone()) {
        return Ok(d);
    }
    // A single installed distribution is an unambiguous default.
    if available.len() == 1 {
        return Ok(available[0].clone());
    }
    Err(Error::validation("No WSL distribution selected.").with_hint(format!(
        "Pass --distribution or set PANEFORGE_DISTRIBUTION. Available: {}",
        available.join(", ")
    )))
}

fn run_up(
    config: &Config,
    exec: &dyn Execute,
    distribution: Option<String>,
    layout: Option<paneforge::tmux::layouts::Layout>,
    cleanup: Option<paneforge::worktree::CleanupPolicy>,
    worktree_base: Option<String>,
    session: Option<String>,
    no_auto_install: bool,
    assignments: Vec<Assignment>,
) -> Result<()> {
    let available = list_distributions(exec)?;
    let distribution = resolve_distribution(distribution, config, &available)?;
    let session_name = session.unwrap_or_else(|| config.session_name.clone());

    // Repo paths may be given in Windows form; git runs inside the
    // distribution and needs the /mnt/... view.
    let assignments = assignments
        .into_iter()
        .map(|a| {
            let repo = to_wsl_path(&distribution, &a.repo_path, exec)?;
            Ok(Assignment::new(a.pane, repo, a.branch))
        })
        .collect::<Result<Vec<Assignment>>>()?;

    let _lock = acquire_session_lock(&session_name).map_err(|e| {
        Error::conflict(e.to_string()).with_hint("Wait for the other run to finish.")
    })?;

    let request = OrchestrationRequest {
        distribution,
        available_distributions: available,
        layout: layout.unwrap_or(config.layout),
        cleanup_policy: cleanup.unwrap_or(config.cleanup_policy),
        assignments,
        worktree_base: worktree_base.unwrap_or_else(|| config.worktree_base.clone()),
        session_name: session_name.clone(),
        tmux_auto_install: !no_auto_install && config.tmux_auto_install,
    };

    let result = orchestrate(&request, exec, &NullProgress, None)?;
    println!("Session '{session_name}' is ready with {} panes:", result.worktrees.len());
    for worktree in &result.worktrees {
        println!("  pane {}  {}  ({})", worktree.pane, worktree.path, worktree.branch);
    }
    println!("Attach with: wsl.exe -d {} -- tmux attach -t {session_name}", request.distribution);
    Ok(())
}

fn run_targets(
    config: &Config,
    exec: Arc<dyn Execute>,
    repo: Option<String>,
    distribution: Option<String>,
) -> Result<()> {
    let available = list_distributions(exec.as_ref())?;
    println!("WSL distributions:");
    for d in &available {
        println!("  {d}");
    }

    let Some(repo) = repo else {
        return Ok(());
    };
    let distribution = resolve_distribution(distribution, config, &available)?;
    let runtime = WslRuntime::new(&distribution, Arc::clone(&exec));
    runtime.run(&["true".to_string()], None, None).map_err(|_| {
        Error::runtime(paneforge::runtime::wsl::distribution_unreachable_message(
            &distribution,
        ))
    })?;

    let wsl_exec = DistributionExec::new(&distribution, exec);
    let branches = fetch_and_list(&repo, &wsl_exec)?;
    if !branches.warning.is_empty() {
        eprintln!("warning: {}", branches.warning);
    }
    println!("Local branches:");
    for b in &branches.local {
        println!("  {b}");
    }
    if !branches.remote.is_empty() {
        println!("Remote branches:");
        for b in &branches.remote {
            println!("  {b}");
        }
    }
    Ok(())
}

fn run_doctor(config: &Config, exec: &dyn Execute) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("paneforge doctor");
    eprintln!("  version: v{version}");
    eprintln!("  host: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
    eprintln!("  session name: {}", config.session_name);
    eprintln!("  worktree base: {}", config.worktree_base);
    eprintln!("  layout: {}", config.layout.as_str());
    eprintln!("  runtime: {}", config.default_runtime.as_str());

    match which::which("wsl.exe") {
        Ok(p) => eprintln!("  wsl.exe: {}", p.display()),
        Err(e) => eprintln!("  wsl.exe: not found ({e})"),
    }

    match list_distributions(exec) {
        Ok(distros) => {
            eprintln!("  distributions: {}", distros.join(", "));
            for distro in &distros {
                let probe = exec.run(ExecRequest::new([
                    "wsl.exe", "-d", distro, "--", "command", "-v", "tmux",
                ]));
                let state = match probe {
                    Ok(out) if out.success() => "tmux ok",
                    Ok(_) => "tmux missing",
                    Err(_) => "unreachable",
                };
                eprintln!("    {distro}: {state}");
            }
        }
        Err(e) => eprintln!("  distributions: {}", e.message()),
    }

    eprintln!("doctor: completed diagnostics.");
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::from_env();
    if let Some(runtime) = cli.runtime {
        config.default_runtime = runtime;
    }
    let exec: Arc<dyn Execute> = Arc::new(ProcessExecutor::default());

    let outcome: Result<()> = match cli.command {
        Command::Up {
            distribution,
            layout,
            cleanup,
            worktree_base,
            session,
            no_auto_install,
            assignments,
        } => run_up(
            &config,
            exec.as_ref(),
            distribution,
            layout,
            cleanup,
            worktree_base,
            session,
            no_auto_install,
            assignments,
        ),
        Command::Targets { repo, distribution } => {
            run_targets(&config, Arc::clone(&exec), repo, distribution)
        }
        Command::Doctor => {
            run_doctor(&config, exec.as_ref());
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", user_facing_error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}
