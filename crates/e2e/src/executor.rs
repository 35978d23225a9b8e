//! Notebook execution through an external engine

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use nbregress_common::Notebook;

use crate::error::ExecutionError;

/// How long a timed-out engine gets between SIGTERM and SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// What to execute and under which limits
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Location of the persisted notebook (for naming and logs)
    pub notebook_path: PathBuf,

    /// Directory the kernel runs in; relative paths in cells (and the
    /// screenshots they write) resolve here
    pub working_dir: PathBuf,

    /// Wall-clock budget for the whole notebook
    pub timeout: Duration,
}

/// An engine that runs every cell of a notebook and returns the document
/// with outputs populated.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        notebook: Notebook,
        request: &ExecutionRequest,
    ) -> Result<Notebook, ExecutionError>;
}

/// Executes notebooks with `jupyter nbconvert --execute`
#[derive(Debug, Clone)]
pub struct NbconvertExecutor {
    program: PathBuf,
    kernel: Option<String>,
}

impl Default for NbconvertExecutor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("jupyter"),
            kernel: None,
        }
    }
}

impl NbconvertExecutor {
    pub fn new(program: impl Into<PathBuf>, kernel: Option<String>) -> Self {
        Self {
            program: program.into(),
            kernel,
        }
    }

    fn command(&self, input: &std::path::Path, output_dir: &std::path::Path, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("nbconvert")
            .args(["--to", "notebook", "--execute"])
            .arg(format!(
                "--ExecutePreprocessor.timeout={}",
                request.timeout.as_secs().max(1)
            ))
            .arg("--output-dir")
            .arg(output_dir)
            .args(["--output", "executed"]);

        if let Some(kernel) = &self.kernel {
            cmd.arg(format!("--ExecutePreprocessor.kernel_name={}", kernel));
        }

        cmd.arg(input)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Executor for NbconvertExecutor {
    async fn run(
        &self,
        notebook: Notebook,
        request: &ExecutionRequest,
    ) -> Result<Notebook, ExecutionError> {
        // nbconvert starts the kernel next to its input, so the input lives in
        // the working directory; only the output goes to scratch space
        let input = tempfile::Builder::new()
            .prefix(".nbregress-")
            .suffix(".ipynb")
            .tempfile_in(&request.working_dir)?;
        notebook.write(input.path())?;
        let scratch = tempfile::tempdir()?;

        info!(
            "Executing {} (timeout {}s)",
            request.notebook_path.display(),
            request.timeout.as_secs()
        );

        let mut child = self
            .command(input.path(), scratch.path(), request)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(request.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "Execution of {} exceeded {}s, terminating",
                    request.notebook_path.display(),
                    request.timeout.as_secs()
                );
                terminate(&mut child).await;
                return Err(ExecutionError::Timeout(request.timeout));
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        debug!("nbconvert stderr:\n{}", stderr);

        if !status.success() {
            return Err(ExecutionError::Failed {
                status: status.to_string(),
                summary: summarize_stderr(&stderr),
            });
        }

        Ok(Notebook::read(&scratch.path().join("executed.ipynb"))?)
    }
}

/// Try graceful shutdown first, then kill.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok()
            {
                return;
            }
        }
    }

    let _ = child.kill().await;
}

/// One line describing why the engine failed: the last exception line of
/// the traceback when there is one, otherwise the last line of output.
pub fn summarize_stderr(stderr: &str) -> String {
    let plain = match Regex::new(r"\x1b\[[0-9;]*m") {
        Ok(ansi) => ansi.replace_all(stderr, "").into_owned(),
        Err(_) => stderr.to_string(),
    };

    let exception = Regex::new(r"(?m)^\s*[A-Za-z_][\w.]*(?:Error|Exception|Interrupt)\b:.*$")
        .ok()
        .and_then(|re| re.find_iter(&plain).last().map(|m| m.as_str().trim().to_string()));

    exception
        .or_else(|| {
            plain
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(String::from)
        })
        .unwrap_or_else(|| "no diagnostic output".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_picks_last_exception() {
        let stderr = "\
[NbConvertApp] Converting notebook input.ipynb to notebook
Traceback (most recent call last):
  File \"x.py\", line 1
nbclient.exceptions.CellExecutionError: An error occurred while executing the following cell:
------------------
1/0
------------------
\x1b[0;31mZeroDivisionError\x1b[0m: division by zero
";
        assert_eq!(summarize_stderr(stderr), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_summarize_falls_back_to_last_line() {
        assert_eq!(summarize_stderr("starting\nkernel died\n\n"), "kernel died");
        assert_eq!(summarize_stderr(""), "no diagnostic output");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let executor = NbconvertExecutor::new("/nonexistent/jupyter-binary", None);
        let request = ExecutionRequest {
            notebook_path: PathBuf::from("nb.ipynb"),
            working_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
        };
        let err = executor.run(Notebook::new(vec![]), &request).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn fake_jupyter(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-jupyter");
        std::fs::write(&script, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_is_placed_in_working_dir() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let record = bin.path().join("input-path");

        // Record the input argument, then "execute" by copying it to the output
        let script = fake_jupyter(
            bin.path(),
            &format!(
                "out=\"\"; prev=\"\"\n\
                 for a; do [ \"$prev\" = \"--output-dir\" ] && out=\"$a\"; prev=\"$a\"; last=\"$a\"; done\n\
                 echo \"$last\" > {}\n\
                 cp \"$last\" \"$out/executed.ipynb\"\n",
                record.display()
            ),
        );

        let executor = NbconvertExecutor::new(&script, None);
        let request = ExecutionRequest {
            notebook_path: PathBuf::from("nb.ipynb"),
            working_dir: work.path().to_path_buf(),
            timeout: Duration::from_secs(30),
        };
        executor.run(Notebook::new(vec![]), &request).await.unwrap();

        let recorded = std::fs::read_to_string(&record).unwrap();
        let input = PathBuf::from(recorded.trim());
        assert_eq!(input.parent(), Some(work.path()));
        assert_eq!(input.extension().unwrap(), "ipynb");

        // The scratch input does not outlive the run
        assert!(!input.exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_engine() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_jupyter(dir.path(), "sleep 30\n");

        let executor = NbconvertExecutor::new(&script, None);
        let request = ExecutionRequest {
            notebook_path: PathBuf::from("nb.ipynb"),
            working_dir: dir.path().to_path_buf(),
            timeout: Duration::from_millis(200),
        };
        let start = std::time::Instant::now();
        let err = executor.run(Notebook::new(vec![]), &request).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
