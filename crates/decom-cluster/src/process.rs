//! Node process management.

use crate::{Error, NodeSpec, Result};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Lifecycle operations the harness needs from a node process.
#[async_trait]
pub trait ProcessControl: Send {
    /// Launches the process and waits until it is ready to serve.
    async fn start(&mut self) -> Result<()>;

    /// Stops the process. Succeeds without blocking if it already exited.
    async fn stop(&mut self) -> Result<()>;

    /// Waits up to `timeout` for exit. `None` means still running.
    ///
    /// Fails with [`Error::NodeNotRunning`] when there is no process to wait
    /// for and no recorded exit.
    async fn wait(&mut self, timeout: Duration) -> Result<Option<i32>>;

    /// Asks the process to leave gracefully (distinct from a hard kill).
    fn send_graceful_shutdown(&mut self) -> Result<()>;

    /// True while the process is alive.
    fn is_running(&mut self) -> bool;

    /// OS process id while running.
    fn pid(&self) -> Option<u32>;
}

/// Status of a node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Never started, or stopped by the harness.
    Stopped,

    /// Spawned, waiting for readiness.
    Starting,

    /// Ready and serving.
    Running,

    /// Exited on its own with the given code.
    Exited(i32),

    /// Failed to reach readiness.
    Crashed,
}

/// How to decide that a freshly spawned process is ready.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// A TCP connect to `host:port` succeeds.
    TcpPort { host: String, port: u16 },
    /// The process is still alive after the given delay.
    AliveAfter(Duration),
}

/// Signal requesting a graceful stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GracefulSignal {
    name: String,
    #[cfg(unix)]
    signal: nix::sys::signal::Signal,
}

impl GracefulSignal {
    /// Parses `SIGUSR2`, `USR2`, `SIGTERM` and friends.
    pub fn parse(name: &str) -> Result<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let canonical = if upper.starts_with("SIG") {
            upper
        } else {
            format!("SIG{upper}")
        };

        #[cfg(unix)]
        {
            let signal = canonical
                .parse::<nix::sys::signal::Signal>()
                .map_err(|_| Error::UnsupportedSignal(name.to_string()))?;
            Ok(Self {
                name: canonical,
                signal,
            })
        }

        #[cfg(not(unix))]
        {
            Err(Error::UnsupportedSignal(canonical))
        }
    }

    /// The decommission signal of the database under test.
    pub fn usr2() -> Self {
        Self::parse("SIGUSR2").unwrap_or_else(|_| Self::term())
    }

    /// Plain termination request.
    pub fn term() -> Self {
        Self {
            name: "SIGTERM".to_string(),
            #[cfg(unix)]
            signal: nix::sys::signal::Signal::SIGTERM,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, node: &str, pid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            let raw = i32::try_from(pid).map_err(|_| Error::Signal {
                node: node.to_string(),
                reason: format!("pid {pid} out of range"),
            })?;
            match kill(Pid::from_raw(raw), self.signal) {
                Ok(()) => Ok(()),
                Err(Errno::ESRCH) => {
                    warn!(node, pid, signal = %self.name, "process did not exist when signalled");
                    Ok(())
                }
                Err(errno) => Err(Error::Signal {
                    node: node.to_string(),
                    reason: errno.to_string(),
                }),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            Err(Error::Signal {
                node: node.to_string(),
                reason: format!("{} is not supported on this platform", self.name),
            })
        }
    }
}

/// Program, arguments and environment of a node process.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The database binary under `crate_home`, launched for `spec` with data
    /// and logs under `node_dir`.
    pub fn for_node(crate_home: &Path, spec: &NodeSpec, node_dir: &Path) -> Self {
        Self::new(crate_home.join("bin").join("crate"))
            .args(spec.launch_args())
            .arg(format!("-Cpath.data={}", node_dir.join("data").display()))
            .arg(format!("-Cpath.logs={}", node_dir.join("logs").display()))
            .env("CRATE_HEAP_SIZE", "256m")
    }
}

/// A managed node process.
pub struct NodeProcess {
    name: String,
    command: LaunchCommand,
    readiness: Readiness,
    start_timeout: Duration,
    log_dir: PathBuf,
    graceful_signal: GracefulSignal,
    child: Option<Child>,
    status: NodeStatus,
}

impl NodeProcess {
    /// Creates a new node process (not started).
    pub fn new(name: impl Into<String>, command: LaunchCommand, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command,
            readiness: Readiness::AliveAfter(Duration::from_millis(200)),
            start_timeout: Duration::from_secs(60),
            log_dir: log_dir.into(),
            graceful_signal: GracefulSignal::usr2(),
            child: None,
            status: NodeStatus::Stopped,
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_graceful_signal(mut self, signal: GracefulSignal) -> Self {
        self.graceful_signal = signal;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Best-effort read of the captured output log.
    pub fn read_log(&self) -> String {
        fs::read_to_string(self.log_path()).unwrap_or_default()
    }

    fn log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.name))
    }

    fn spawn(&self) -> Result<Child> {
        fs::create_dir_all(&self.log_dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .envs(self.command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| Error::SpawnError(format!("{}: {e}", self.command.program.display())))
    }

    /// Polls until the readiness condition holds, the process exits, or the
    /// start timeout elapses.
    async fn await_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.start_timeout;

        if let Readiness::AliveAfter(delay) = &self.readiness {
            sleep(*delay).await;
        }

        loop {
            if let Some(code) = self.reap()? {
                return Err(Error::NodeStartFailed(
                    self.name.clone(),
                    format!("exited with code {code} during startup"),
                ));
            }

            match &self.readiness {
                Readiness::AliveAfter(_) => return Ok(()),
                Readiness::TcpPort { host, port } => {
                    if TcpStream::connect((host.as_str(), *port)).await.is_ok() {
                        return Ok(());
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::NodeStartFailed(
                    self.name.clone(),
                    format!("not ready within {:?}", self.start_timeout),
                ));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Collects the exit code if the child has exited.
    fn reap(&mut self) -> Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match child.try_wait()? {
            Some(status) => {
                let code = exit_code(status);
                self.child = None;
                self.status = NodeStatus::Exited(code);
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProcessControl for NodeProcess {
    async fn start(&mut self) -> Result<()> {
        if matches!(self.status, NodeStatus::Starting | NodeStatus::Running) {
            return Err(Error::NodeAlreadyRunning(self.name.clone()));
        }

        self.status = NodeStatus::Starting;
        let child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = NodeStatus::Crashed;
                return Err(e);
            }
        };
        debug!(node = %self.name, pid = child.id(), "spawned");
        self.child = Some(child);

        match self.await_ready().await {
            Ok(()) => {
                self.status = NodeStatus::Running;
                info!(node = %self.name, pid = self.pid(), "node running");
                Ok(())
            }
            Err(e) => {
                if let Some(mut child) = self.child.take() {
                    child.kill().await.ok();
                }
                self.status = NodeStatus::Crashed;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            if self.status != NodeStatus::Crashed && !matches!(self.status, NodeStatus::Exited(_)) {
                self.status = NodeStatus::Stopped;
            }
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            self.status = NodeStatus::Exited(exit_code(status));
            return Ok(());
        }

        // Sends SIGKILL on Unix, TerminateProcess on Windows.
        child.kill().await.ok();
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(_)) | Err(_) => {
                self.status = NodeStatus::Stopped;
                info!(node = %self.name, "node stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                self.status = NodeStatus::Stopped;
                Err(Error::Io(e))
            }
        }
    }

    async fn wait(&mut self, timeout: Duration) -> Result<Option<i32>> {
        let Some(child) = self.child.as_mut() else {
            return match self.status {
                NodeStatus::Exited(code) => Ok(Some(code)),
                _ => Err(Error::NodeNotRunning(self.name.clone())),
            };
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let code = exit_code(status);
                self.child = None;
                self.status = NodeStatus::Exited(code);
                Ok(Some(code))
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Ok(None),
        }
    }

    fn send_graceful_shutdown(&mut self) -> Result<()> {
        match self.child.as_ref().and_then(Child::id) {
            Some(pid) => {
                info!(node = %self.name, pid, signal = self.graceful_signal.name(), "requesting graceful stop");
                self.graceful_signal.send(&self.name, pid)
            }
            None => {
                warn!(node = %self.name, "graceful stop requested but process is not running");
                Ok(())
            }
        }
    }

    fn is_running(&mut self) -> bool {
        match self.reap() {
            Ok(None) => self.child.is_some(),
            Ok(Some(_)) | Err(_) => false,
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

/// Exit code of a finished process; death by signal maps to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
