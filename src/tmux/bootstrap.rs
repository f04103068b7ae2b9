//! Tmux bootstrap inside the selected distribution: presence check,
//! distro-family detection, and optional non-interactive installation.

use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::runtime::wsl::build_wsl_command;
use crate::util::exec::{ExecRequest, Execute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapResult {
    pub tmux_available: bool,
    pub install_attempted: bool,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Map `/etc/os-release` contents to the interactive install command for
/// that family. Unknown families are an error; the caller turns that into
/// manual guidance.
fn install_command_for_os_release(os_release: &str) -> Result<String> {
    let lowered = os_release.to_lowercase();
    let squashed = lowered.replace(' ', "");

    let debian_ids = [
        "debian", "ubuntu", "pengwin", "kali", "mint", "pop", "elementary", "zorin",
    ];
    if contains_any(&lowered, &debian_ids) || squashed.contains("id_like=debian") {
        return Ok("sudo apt-get update && sudo apt-get install -y tmux".to_string());
    }

    let rhel_ids = [
        "fedora", "rhel", "centos", "rocky", "almalinux", "oracle", "amazon",
    ];
    if contains_any(&lowered, &rhel_ids) {
        return Ok("sudo dnf install -y tmux".to_string());
    }

    let arch_ids = ["arch", "manjaro", "endeavouros", "garuda"];
    if contains_any(&lowered, &arch_ids) || squashed.contains("id_like=arch") {
        return Ok("sudo pacman -S --noconfirm tmux".to_string());
    }

    if lowered.contains("opensuse") || lowered.contains("suse") {
        return Ok("sudo zypper install -y tmux".to_string());
    }
    if lowered.contains("alpine") {
        return Ok("sudo apk add tmux".to_string());
    }
    if lowered.contains("void") {
        return Ok("sudo xbps-install -Sy tmux".to_string());
    }
    if lowered.contains("gentoo") {
        return Ok("sudo emerge app-misc/tmux".to_string());
    }
    if lowered.contains("nixos") || lowered.contains("nix") {
        return Ok("nix profile install nixpkgs#tmux".to_string());
    }

    Err(
        Error::tmux("Unsupported distribution for automatic tmux install.")
            .with_hint("Install tmux manually inside the selected distribution."),
    )
}

fn manual_install_guidance(os_release: &str) -> String {
    match install_command_for_os_release(os_release) {
        Ok(cmd) => format!("Run this inside the distribution: {cmd}"),
        Err(_) => "Install tmux manually in the selected distribution and retry.".to_string(),
    }
}

fn run_in_distribution(
    distribution: &str,
    command: &[String],
    exec: &dyn Execute,
) -> Result<crate::util::exec::ExecOutput> {
    let wrapped = build_wsl_command(distribution, command)?;
    exec.run(ExecRequest::new(wrapped))
}

/// Attempt installation with `sudo -n` so no password prompt can hang the
/// run. Returns true on success.
fn try_noninteractive_install(
    distribution: &str,
    install_cmd: &str,
    exec: &dyn Execute,
) -> Result<bool> {
    let noninteractive = install_cmd.replace("sudo ", "sudo -n ");
    debug!(distribution, "trying non-interactive tmux install");
    let out = run_in_distribution(
        distribution,
        &["bash".to_string(), "-lc".to_string(), noninteractive],
        exec,
    )?;
    if out.success() {
        info!(distribution, "non-interactive tmux install succeeded");
        return Ok(true);
    }
    let stderr: String = out.stderr.trim().chars().take(200).collect();
    debug!(
        distribution,
        stderr = %stderr,
        "non-interactive install failed (password likely required)"
    );
    Ok(false)
}

/// Ensure tmux is usable in the distribution. A present tool short-circuits;
/// otherwise installation is attempted when `auto_install` allows it.
/// Idempotent and safe to re-run.
pub fn ensure_tmux(
    distribution: &str,
    auto_install: bool,
    exec: &dyn Execute,
) -> Result<BootstrapResult> {
    debug!(distribution, "checking tmux availability");
    let check = run_in_distribution(
        distribution,
        &["command".to_string(), "-v".to_string(), "tmux".to_string()],
        exec,
    )?;
    if check.success() {
        debug!(distribution, "tmux is already installed");
        return Ok(BootstrapResult {
            tmux_available: true,
            install_attempted: false,
        });
    }

    let os_release_out = run_in_distribution(
        distribution,
        &["cat".to_string(), "/etc/os-release".to_string()],
        exec,
    )?;
    let os_release = if os_release_out.success() {
        os_release_out.stdout
    } else {
        String::new()
    };
    warn!(distribution, auto_install, "tmux not found");

    if !auto_install {
        error!(distribution, "tmux missing and auto-install disabled");
        return Err(
            Error::tmux("tmux is not installed in the selected distribution.")
                .with_hint(manual_install_guidance(&os_release)),
        );
    }

    let install_cmd = install_command_for_os_release(&os_release)?;
    if try_noninteractive_install(distribution, &install_cmd, exec)? {
        return Ok(BootstrapResult {
            tmux_available: true,
            install_attempted: true,
        });
    }

    // No passwordless sudo; hand the install command back to the user
    // instead of blocking on a password prompt.
    error!(distribution, "passwordless tmux install unavailable");
    Err(
        Error::tmux("Automatic tmux installation requires a sudo password.")
            .with_hint(manual_install_guidance(&os_release)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_debian_family() {
        let os = "ID=ubuntu\nNAME=\"Ubuntu\"";
        assert_eq!(
            install_command_for_os_release(os).unwrap(),
            "sudo apt-get update && sudo apt-get install -y tmux"
        );
        let like = "ID=raspbian\nID_LIKE=debian";
        assert!(install_command_for_os_release(like)
            .unwrap()
            .contains("apt-get"));
    }

    #[test]
    fn detects_other_families() {
        assert!(install_command_for_os_release("ID=fedora")
            .unwrap()
            .contains("dnf"));
        assert!(install_command_for_os_release("ID=arch")
            .unwrap()
            .contains("pacman"));
        assert!(install_command_for_os_release("ID=alpine")
            .unwrap()
            .contains("apk add"));
        assert!(install_command_for_os_release("ID=opensuse-leap")
            .unwrap()
            .contains("zypper"));
        assert!(install_command_for_os_release("ID=nixos")
            .unwrap()
            .starts_with("nix profile"));
    }

    #[test]
    fn unknown_family_yields_manual_guidance() {
        assert!(install_command_for_os_release("ID=plan9").is_err());
        assert_eq!(
            manual_install_guidance("ID=plan9"),
            "Install tmux manually in the selected distribution and retry."
        );
    }
}
