//! Stage work execution.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bus::{LoopStage, StageError};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Does the actual work of a stage.
///
/// `input` is the trigger event's data. The returned map is merged into the
/// next stage's trigger.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(
        &self,
        stage: LoopStage,
        input: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StageError>;
}

/// Default upper bound on one stage command.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Runs `<program> [args..] <stage>` with the trigger data as JSON on stdin
/// and parses stdout as a JSON object.
///
/// A non-zero exit is a stage failure whose message is the trimmed stderr
/// (or the exit status when stderr is empty). Empty stdout is an empty
/// output.
#[derive(Debug, Clone)]
pub struct CommandStageRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandStageRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Parses a shell-style command line (`"agent-stage --profile dev"`) on
    /// whitespace. `None` when blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout: DEFAULT_STAGE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StageRunner for CommandStageRunner {
    async fn run(
        &self,
        stage: LoopStage,
        input: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StageError> {
        let stdin = serde_json::to_vec(input)
            .map_err(|e| StageError::new(format!("cannot encode stage input: {e}")))?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(stage.name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StageError::new(format!("cannot start {}: {e}", self.program)))?;

        // Feed stdin while stdout and stderr drain, all under the timeout. A
        // child that exits without reading its input closes the pipe early;
        // the exit status decides the outcome then.
        let pipe = child.stdin.take();
        let feed = async move {
            let Some(mut pipe) = pipe else {
                return Ok(());
            };
            match pipe.write_all(&stdin).await {
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                result => result,
            }
        };
        let run = async { tokio::join!(feed, child.wait_with_output()) };
        let (fed, output) = tokio::time::timeout(self.timeout, run).await.map_err(|_| {
            StageError::new(format!("{stage} timed out after {}s", self.timeout.as_secs()))
        })?;
        let output = output.map_err(|e| StageError::new(format!("{stage} did not finish: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(StageError::new(if stderr.is_empty() {
                format!("{stage} exited with {}", output.status)
            } else {
                stderr
            }));
        }
        if let Err(e) = fed {
            return Err(StageError::new(format!("cannot write stage input: {e}")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Map::new());
        }
        debug!(stage = %stage, bytes = output.stdout.len(), "Stage command finished");
        match serde_json::from_str::<Value>(&stdout) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StageError::new(format!("{stage} output is not a JSON object"))),
            Err(e) => Err(StageError::new(format!("{stage} output is not JSON: {e}"))),
        }
    }
}
