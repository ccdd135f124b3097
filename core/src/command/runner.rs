use super::{CHUNK_SIZE, CommandRunner, CommandSpec, DEFAULT_OUTPUT_LIMIT, Output};
use crate::error::SvnError;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STDERR_LIMIT: usize = 64 * 1024;

// svn reports every failure with exit status 1; these numeric codes are the
// locale-independent part of its diagnostics.
const AUTH_FAILURE_CODES: [&str; 2] = ["E170001", "E215004"];

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub program: PathBuf,
    pub locale: String,
    pub output_limit: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("svn"),
            locale: "en_US.UTF-8".to_string(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

/// Spawns one backend process per call.
#[derive(Clone, Debug, Default)]
pub struct SvnRunner {
    config: RunnerConfig,
}

impl SvnRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn command(&self, spec: &CommandSpec) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .args(spec.args())
            .env("LANG", &self.config.locale)
            .env("LC_ALL", &self.config.locale)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        #[cfg(target_os = "macos")]
        command.env("PATH", macos_search_path());

        command
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Child, SvnError> {
        debug!(
            "spawning {} {}",
            self.config.program.display(),
            spec.redacted_args().join(" ")
        );

        self.command(spec).spawn().map_err(|err| {
            warn!(
                "failed to spawn {} for {}: {err}",
                self.config.program.display(),
                spec.verb
            );
            SvnError::Command {
                code: None,
                stderr: err.to_string(),
            }
        })
    }
}

#[async_trait]
impl CommandRunner for SvnRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<Output, SvnError> {
        let limit = spec.output_limit.unwrap_or(self.config.output_limit);
        let mut child = self.spawn(spec)?;
        let stderr = collect_stderr(&mut child);

        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child).await;
            return Err(SvnError::Command {
                code: None,
                stderr: "stdout was not captured".to_string(),
            });
        };

        let mut buffer = Vec::new();
        let read = (&mut stdout)
            .take(limit as u64 + 1)
            .read_to_end(&mut buffer)
            .await;

        if let Err(err) = read {
            reap(&mut child).await;
            return Err(err.into());
        }

        if buffer.len() > limit {
            warn!("{} output exceeded {limit} bytes, killing process", spec.verb);
            reap(&mut child).await;
            return Err(SvnError::OutputTooLarge { limit });
        }

        let status = child.wait().await?;
        let stderr = join_stderr(stderr).await;
        check_status(status, &stderr)?;

        Ok(Output {
            stdout: Bytes::from(buffer),
            stderr,
        })
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        chunks: Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<u64, SvnError> {
        let mut child = self.spawn(spec)?;
        let stderr = collect_stderr(&mut child);

        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child).await;
            return Err(SvnError::Command {
                code: None,
                stderr: "stdout was not captured".to_string(),
            });
        };

        let mut forwarded: u64 = 0;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} cancelled after {forwarded} bytes", spec.verb);
                    reap(&mut child).await;
                    return Err(SvnError::Cancelled);
                }
                read = stdout.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => break,
                Ok(n) => {
                    if chunks
                        .send(Bytes::copy_from_slice(&buffer[..n]))
                        .await
                        .is_err()
                    {
                        warn!("chunk receiver dropped, stopping {}", spec.verb);
                        reap(&mut child).await;
                        return Err(SvnError::Cancelled);
                    }
                    forwarded += n as u64;
                }
                Err(err) => {
                    warn!("error reading {} output: {err}", spec.verb);
                    reap(&mut child).await;
                    return Err(err.into());
                }
            }
        }

        drop(chunks);
        let status = child.wait().await?;
        let stderr = join_stderr(stderr).await;
        check_status(status, &stderr)?;

        Ok(forwarded)
    }
}

fn collect_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(read_lossy(stderr, STDERR_LIMIT)))
}

async fn read_lossy<R: AsyncRead + Unpin>(reader: R, limit: usize) -> String {
    let mut buffer = Vec::new();
    if let Err(err) = reader.take(limit as u64).read_to_end(&mut buffer).await {
        debug!("failed to read stderr: {err}");
    }
    String::from_utf8_lossy(&buffer).trim().to_string()
}

async fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Kills the child if it is still running and waits for it so no zombie is left.
async fn reap(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!("kill after early stop failed: {err}");
    }
}

fn check_status(status: ExitStatus, stderr: &str) -> Result<(), SvnError> {
    if status.success() {
        return Ok(());
    }

    if AUTH_FAILURE_CODES.iter().any(|code| stderr.contains(code)) {
        return Err(SvnError::CredentialRejected {
            stderr: stderr.to_string(),
        });
    }

    Err(SvnError::Command {
        code: status.code(),
        stderr: stderr.to_string(),
    })
}

#[cfg(target_os = "macos")]
fn macos_search_path() -> String {
    // Packaged apps start with a minimal PATH that misses Homebrew.
    let mut paths = vec![
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ];
    if let Ok(current) = std::env::var("PATH") {
        paths.push(current);
    }
    paths.join(":")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::Verb;
    use tokio::sync::mpsc;

    fn runner(program: &str) -> SvnRunner {
        SvnRunner::new(RunnerConfig {
            program: PathBuf::from(program),
            ..RunnerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        // `echo` stands in for the backend and prints the normalized arguments
        let spec = CommandSpec::new(Verb::List).target("https://h/repo");
        let output = runner("echo").run(&spec).await.unwrap();
        let text = output.text().unwrap();
        assert!(text.starts_with("list --xml --non-interactive"));
        assert!(text.trim_end().ends_with("https://h/repo"));
    }

    #[tokio::test]
    async fn test_run_reports_non_zero_exit() {
        let spec = CommandSpec::new(Verb::Delete).target("https://h/repo/a.txt");
        match runner("false").run(&spec).await {
            Err(SvnError::Command { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_command_error() {
        let spec = CommandSpec::new(Verb::List).target("https://h/repo");
        let result = runner("/nonexistent/svn-binary").run(&spec).await;
        assert!(matches!(result, Err(SvnError::Command { code: None, .. })));
    }

    #[tokio::test]
    async fn test_run_enforces_output_limit() {
        // `yes` never stops on its own; the limit must stop and reap it
        let spec = CommandSpec::new(Verb::Cat)
            .target("https://h/repo/big.bin")
            .output_limit(1024);
        let result = runner("yes").run(&spec).await;
        assert!(matches!(
            result,
            Err(SvnError::OutputTooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_run_streaming_forwards_all_bytes() {
        let spec = CommandSpec::new(Verb::Cat).target("https://h/repo/a.txt");
        let expected = format!("{}\n", spec.args().join(" "));
        let (tx, mut rx) = mpsc::channel(4);

        let runner = runner("echo");
        let stream = runner.run_streaming(&spec, tx, CancellationToken::new());
        let collect = async {
            let mut received = Vec::new();
            while let Some(chunk) = rx.recv().await {
                received.extend_from_slice(&chunk);
            }
            received
        };

        let (forwarded, received) = tokio::join!(stream, collect);
        assert_eq!(forwarded.unwrap(), expected.len() as u64);
        assert_eq!(received, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_run_streaming_stops_on_cancel() {
        let spec = CommandSpec::new(Verb::Cat).target("https://h/repo/endless");
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let runner = runner("yes");
        let stream = runner.run_streaming(&spec, tx, cancel.clone());
        let consume = async {
            // take one chunk, then ask the transfer to stop
            let _ = rx.recv().await;
            cancel.cancel();
            while rx.recv().await.is_some() {}
        };

        let (result, _) = tokio::join!(stream, consume);
        assert!(matches!(result, Err(SvnError::Cancelled)));
    }

    #[test]
    fn test_auth_failure_detected_by_error_code() {
        use std::os::unix::process::ExitStatusExt;
        let status = ExitStatus::from_raw(1 << 8);
        let result = check_status(status, "svn: E170001: Autorisierung fehlgeschlagen");
        assert!(matches!(result, Err(SvnError::CredentialRejected { .. })));

        let result = check_status(status, "svn: E160013: path not found");
        assert!(matches!(result, Err(SvnError::Command { code: Some(1), .. })));
    }
}
