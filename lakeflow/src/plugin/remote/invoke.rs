//! One-shot launcher invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};
use lakeflow_shared::protocol::{LAUNCHER_FILE, LogLevel, RemoteMessage, encode_context, parse_line};

/// Runs `run.sh <command>` inside a remote plugin directory.
#[derive(Debug, Clone)]
pub struct Launcher {
    plugin: String,
    dir: PathBuf,
}

impl Launcher {
    pub fn new(plugin: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin: plugin.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn rename(&mut self, plugin: &str) {
        self.plugin = plugin.to_string();
    }

    /// Run `command` with `context` on stdin and return the `result` payload.
    ///
    /// `progress` receives `(current, total)` for every progress message. The child is
    /// killed when `cancel` fires.
    pub async fn call<F>(
        &self,
        command: &str,
        context: &Value,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> LakeflowResult<Value>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let mut child = Command::new("sh")
            .arg(LAUNCHER_FILE)
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.error(command, format!("failed to spawn launcher: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.error(command, "stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.error(command, "stderr unavailable"))?;
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        if let Some(mut stdin) = child.stdin.take() {
            let line = encode_context(context)?;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                // The launcher may exit without reading its context.
                tracing::debug!(plugin = %self.plugin, command, error = %e, "Failed to write context");
            }
        }

        let mut lines = BufReader::new(stdout).lines();
        let mut terminal: Option<RemoteMessage> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    kill(&mut child).await;
                    return Err(LakeflowError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = next else { break };

            let message = match parse_line(&line) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    kill(&mut child).await;
                    return Err(self.error(command, format!("malformed message {line:?}: {e}")));
                }
            };

            match message {
                RemoteMessage::Log { level, message } => self.log(command, level, &message),
                RemoteMessage::Progress { current, total } => progress(current, total),
                terminal_message => {
                    if terminal.is_some() {
                        kill(&mut child).await;
                        return Err(self.error(command, "more than one terminal message"));
                    }
                    terminal = Some(terminal_message);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_reader.await.unwrap_or_default();
        if !status.success() {
            let stderr = stderr.trim();
            let detail = if stderr.is_empty() {
                String::new()
            } else {
                format!(": {stderr}")
            };
            return Err(self.error(command, format!("launcher exited with {status}{detail}")));
        }

        match terminal {
            Some(RemoteMessage::Result { data }) => Ok(data),
            Some(RemoteMessage::Error { message, name }) => Err(self.error(
                command,
                match name {
                    Some(name) => format!("{name}: {message}"),
                    None => message,
                },
            )),
            _ => Err(self.error(command, "launcher exited without a result")),
        }
    }

    fn error(&self, command: &str, message: impl Into<String>) -> LakeflowError {
        LakeflowError::Remote {
            plugin: self.plugin.clone(),
            command: command.to_string(),
            message: message.into(),
        }
    }

    fn log(&self, command: &str, level: LogLevel, message: &str) {
        let plugin = self.plugin.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(plugin, command, "{message}"),
            LogLevel::Info => tracing::info!(plugin, command, "{message}"),
            LogLevel::Warn => tracing::warn!(plugin, command, "{message}"),
            LogLevel::Error => tracing::error!(plugin, command, "{message}"),
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Failed to kill launcher");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn launcher(script: &str) -> (TempDir, Launcher) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LAUNCHER_FILE), script).unwrap();
        let launcher = Launcher::new("fixture", dir.path());
        (dir, launcher)
    }

    #[tokio::test]
    async fn test_result_and_progress() {
        let (_dir, launcher) = launcher(
            r#"read ctx
echo '{"type":"log","level":"info","message":"starting"}'
echo '{"type":"progress","current":3,"total":10}'
echo ''
echo "{\"type\":\"result\",\"data\":{\"command\":\"$1\"}}"
"#,
        );
        let mut seen = Vec::new();
        let data = launcher
            .call("run-subtask", &json!({}), &CancellationToken::new(), |c, t| {
                seen.push((c, t))
            })
            .await
            .unwrap();
        assert_eq!(data, json!({"command": "run-subtask"}));
        assert_eq!(seen, vec![(3, Some(10))]);
    }

    #[tokio::test]
    async fn test_error_message() {
        let (_dir, launcher) =
            launcher(r#"echo '{"type":"error","message":"bad token","name":"Auth"}'"#);
        let err = launcher
            .call("test-connection", &json!({}), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LakeflowError::Remote { ref command, ref message, .. }
                if command == "test-connection" && message == "Auth: bad token"
        ));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_fatal() {
        let (_dir, launcher) = launcher(
            r#"echo '{"type":"result","data":null}'
echo 'kaboom' >&2
exit 3
"#,
        );
        let err = launcher
            .call("init", &json!({}), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap_err();
        let LakeflowError::Remote { message, .. } = err else {
            panic!("expected remote error");
        };
        assert!(message.contains("kaboom"), "{message}");
    }

    #[tokio::test]
    async fn test_missing_terminal_and_malformed_output() {
        let (_dir, launcher) = launcher("echo '{\"type\":\"progress\",\"current\":1}'");
        assert!(launcher
            .call("close", &json!({}), &CancellationToken::new(), |_, _| {})
            .await
            .is_err());

        let (_dir2, launcher2) = self::launcher("echo 'hello'");
        assert!(matches!(
            launcher2
                .call("close", &json!({}), &CancellationToken::new(), |_, _| {})
                .await,
            Err(LakeflowError::Remote { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let (_dir, launcher) = launcher("sleep 30\necho '{\"type\":\"result\"}'");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = launcher
            .call("run-subtask", &json!({}), &cancel, |_, _| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
