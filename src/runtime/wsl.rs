//! WSL distribution discovery and command building.

use tracing::{debug, error, warn};

use crate::errors::{Error, Result};
use crate::util::exec::{ExecRequest, Execute};

/// List installed distributions via `wsl.exe -l -q`, sorted and deduplicated.
pub fn list_distributions(exec: &dyn Execute) -> Result<Vec<String>> {
    debug!("listing WSL distributions using wsl.exe -l -q");
    let out = exec.run(ExecRequest::new(["wsl.exe", "-l", "-q"]))?;
    if !out.success() {
        error!(stderr = %out.stderr.trim(), "WSL distribution listing failed");
        return Err(Error::runtime("Failed to list WSL distributions.")
            .with_hint(nonempty_or(out.stderr.trim(), "Check WSL installation.")));
    }

    let mut distros: Vec<String> = out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    distros.sort();
    distros.dedup();

    if distros.is_empty() {
        error!("no WSL distributions discovered");
        return Err(Error::runtime("No WSL distributions were found.")
            .with_hint("Install a distribution using `wsl --install` and retry."));
    }
    debug!(count = distros.len(), "discovered WSL distributions");
    Ok(distros)
}

pub fn validate_distribution(distribution: &str, available: &[String]) -> bool {
    available.iter().any(|d| d == distribution)
}

/// Wrap a command for execution inside the given distribution.
pub fn build_wsl_command(distribution: &str, command: &[String]) -> Result<Vec<String>> {
    if distribution.is_empty() {
        error!("WSL command requested without distribution");
        return Err(Error::validation("WSL distribution is required.")
            .with_hint("Select a distribution before orchestration."));
    }
    if command.is_empty() {
        error!("WSL command requested with empty payload");
        return Err(Error::validation("Runtime command is empty.")
            .with_hint("Provide a command to execute in WSL."));
    }
    let mut wrapped = vec![
        "wsl.exe".to_string(),
        "-d".to_string(),
        distribution.to_string(),
        "--".to_string(),
    ];
    wrapped.extend(command.iter().cloned());
    Ok(wrapped)
}

fn normalize_host_path(host_path: &str) -> String {
    host_path.replace('\\', "/")
}

/// Map `C:\Users\me\x` to `/mnt/c/Users/me/x` without consulting wslpath.
fn fallback_windows_to_wsl_path(host_path: &str) -> Option<String> {
    let bytes = host_path.as_bytes();
    if bytes.len() < 2 || !bytes[0].is_ascii_alphabetic() || bytes[1] != b':' {
        return None;
    }
    if bytes.len() > 2 && bytes[2] != b'/' && bytes[2] != b'\\' {
        return None;
    }
    let drive = (bytes[0] as char).to_ascii_lowercase();
    let rest = host_path[2..].replace('\\', "/");
    let rest = rest.trim_matches('/');
    if rest.is_empty() {
        Some(format!("/mnt/{drive}"))
    } else {
        Some(format!("/mnt/{drive}/{rest}"))
    }
}

/// Convert a host path to its in-distribution form. Paths that are already
/// POSIX absolute pass through untouched; otherwise `wslpath -a` is asked,
/// with a static `/mnt/<drive>` mapping as fallback.
pub fn to_wsl_path(distribution: &str, host_path: &str, exec: &dyn Execute) -> Result<String> {
    let normalized = normalize_host_path(host_path);
    if normalized.starts_with('/') && !normalized.starts_with("//") {
        return Ok(normalized);
    }

    let command = build_wsl_command(
        distribution,
        &["wslpath".to_string(), "-a".to_string(), normalized.clone()],
    )?;
    debug!(host_path, "resolving WSL path");
    let out = exec.run(ExecRequest::new(command))?;
    let stdout = out.stdout.trim();
    if !out.success() || stdout.is_empty() {
        if let Some(fallback) = fallback_windows_to_wsl_path(&normalized) {
            warn!(host_path, "wslpath failed, using fallback mapping");
            return Ok(fallback);
        }
        error!(host_path, "failed to convert host path to WSL path");
        return Err(
            Error::runtime(format!("Failed to convert host path to WSL path: {host_path}"))
                .with_hint(nonempty_or(
                    out.stderr.trim(),
                    "Ensure the selected WSL distribution is running.",
                )),
        );
    }
    Ok(stdout.to_string())
}

pub fn distribution_unreachable_message(distribution: &str) -> String {
    format!(
        "Selected WSL distribution '{distribution}' is not reachable. \
         Choose another distribution or start this one manually and retry."
    )
}

pub(crate) fn nonempty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
