use anyhow::bail;
use log::debug;
use std::path::Path;
use tokio::process::Command;

/// Hands a local file to the OS default application.
pub(crate) async fn open(path: &Path) -> anyhow::Result<()> {
    let mut command = opener_command(path);
    debug!("opening {} with {:?}", path.display(), command.as_std().get_program());

    let output = command.output().await?;
    if !output.status.success() {
        bail!(
            "could not open {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn opener_command(path: &Path) -> Command {
    let mut command = Command::new("open");
    command.arg(path);
    command
}

#[cfg(target_os = "windows")]
fn opener_command(path: &Path) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", ""]).arg(path);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener_command(path: &Path) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(path);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_uses_xdg_open() {
        let command = opener_command(Path::new("/tmp/report.docx"));
        let std = command.as_std();
        assert_eq!(std.get_program(), "xdg-open");
        assert_eq!(std.get_args().collect::<Vec<_>>(), vec!["/tmp/report.docx"]);
    }
}
