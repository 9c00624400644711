//! WSL detection for the default bind-host decision.

use std::env;

/// True when running under Windows Subsystem for Linux: Linux plus any of
/// `WSL_DISTRO_NAME`, `WSL_INTEROP`, or a kernel release containing
/// "microsoft".
pub fn is_wsl() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    if env::var_os("WSL_DISTRO_NAME").is_some() || env::var_os("WSL_INTEROP").is_some() {
        return true;
    }
    kernel_release_contains_microsoft()
}

fn kernel_release_contains_microsoft() -> bool {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_linux_is_never_wsl() {
        if !cfg!(target_os = "linux") {
            assert!(!is_wsl());
        }
    }
}
