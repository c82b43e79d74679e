use crate::errors::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{
    net::TcpStream,
    process::{Child, Command},
    time::Instant,
};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Backend,
    LoadManager,
}

/// Where the stdout/stderr of a spawned service goes.
#[derive(Debug, Deserialize, PartialEq, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Redirect {
    Null,
    Parent,
    /// Append to `./.stdout` and `./.stderr`.
    #[default]
    File,
}

/// A fully resolved command line for one service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCommand {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub redirect: Redirect,
}
impl ServiceCommand {
    /// Splits `command_line` into POSIX words and appends `extra_args`.
    ///
    /// # Arguments
    ///
    /// * name - Used for logging only.
    /// * command_line - The configured command, e.g. `go run .`.
    /// * extra_args - Arguments produced for this instance by the argument builder.
    /// * cwd - Working directory the process is started in.
    pub fn new(
        name: &str,
        command_line: &str,
        extra_args: &[String],
        cwd: &Path,
        redirect: Redirect,
    ) -> HarnessResult<Self> {
        let words = shlex::split(command_line).ok_or_else(|| HarnessError::LaunchFailed {
            name: name.to_string(),
            reason: format!("command '{command_line}' is not POSIX compliant"),
        })?;

        match &words[..] {
            [program, args @ ..] => Ok(Self {
                name: name.to_string(),
                program: program.clone(),
                args: args.iter().chain(extra_args.iter()).cloned().collect(),
                cwd: cwd.to_path_buf(),
                redirect,
            }),
            [] => Err(HarnessError::LaunchFailed {
                name: name.to_string(),
                reason: "empty command".to_string(),
            }),
        }
    }
}

/// A service process started by the supervisor in its own process group.
///
/// Owned by whoever started it until `ProcessSupervisor::stop` has been called on it, after which
/// it is inert.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    pgid: u32,
    role: Role,
    listen_host: String,
    listen_port: Option<u16>,
    child: Option<Child>,
    /// The leader has been reaped, so `pid` may already belong to another process.
    exited: bool,
    stopped: bool,
}
impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pgid(&self) -> u32 {
        self.pgid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Returns false once the process has exited (and reaps it if so).
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("{} [{}] exited with {}", self.name, self.pid, status);
                self.child = None;
                self.exited = true;
                false
            }
            Some(Err(err)) => {
                warn!("Unable to query status of {} [{}]: {}", self.name, self.pid, err);
                false
            }
            None => false,
        }
    }

    /// Sends SIGKILL to the whole group without waiting. Only used when a handle is abandoned.
    fn force_kill(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        #[cfg(unix)]
        {
            if !self.exited || signal::group_alive(self.pgid) {
                if let Err(err) = signal::send(signal::Target::Group(self.pgid), signal::KILL) {
                    debug!("SIGKILL to group {} failed: {}", self.pgid, err);
                }
            }
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.start_kill() {
                debug!("Unable to kill {} [{}]: {}", self.name, self.pid, err);
            }
        }
    }
}

/// What `stop` managed to do.
#[derive(Debug)]
pub enum StopOutcome {
    Stopped,
    /// The handle had already been stopped; nothing was signalled.
    AlreadyStopped,
    /// Neither the group nor the process could be signalled. The handle is still invalidated.
    SignalFailed(HarnessError),
}

/// Starts, probes and tears down service processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace_period: Duration,
}
impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}
impl ProcessSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Launches `command` detached in a new process group so the group can be signalled later.
    ///
    /// # Returns
    ///
    /// A handle which must be passed to exactly one `stop` call.
    pub fn start(
        &self,
        command: &ServiceCommand,
        role: Role,
        listen_host: &str,
        listen_port: Option<u16>,
    ) -> HarnessResult<ProcessHandle> {
        let launch_failed = |reason: String| HarnessError::LaunchFailed {
            name: command.name.clone(),
            reason,
        };

        if !command.cwd.is_dir() {
            return Err(launch_failed(format!(
                "working directory {} does not exist",
                command.cwd.display()
            )));
        }

        let (stdout, stderr) = redirect_stdio(command.redirect)
            .map_err(|err| launch_failed(format!("unable to open output files: {err}")))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|err| launch_failed(format!("{}: {}", command.program, err)))?;
        let pid = child
            .id()
            .ok_or_else(|| launch_failed("process exited before reporting a pid".to_string()))?;

        info!(
            "Started {} [pid {}] {} {}",
            command.name,
            pid,
            command.program,
            command.args.join(" ")
        );

        Ok(ProcessHandle {
            name: command.name.clone(),
            pid,
            // process_group(0) makes the child the leader of a group with its own pid
            pgid: pid,
            role,
            listen_host: listen_host.to_string(),
            listen_port,
            child: Some(child),
            exited: false,
            stopped: false,
        })
    }

    /// Polls `host:port` until a TCP connection succeeds.
    ///
    /// Returns false, rather than an error, when `timeout` elapses first or the process exits
    /// while waiting. Callers decide whether that matters.
    pub async fn wait_ready(
        &self,
        handle: &mut ProcessHandle,
        host: &str,
        port: u16,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let addr = format!("{host}:{port}");
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => {
                    debug!("{} is accepting connections on {}", handle.name, addr);
                    return true;
                }
                Ok(Err(err)) => trace!("{} not ready on {}: {}", handle.name, addr, err),
                Err(_) => break,
            }

            if !handle.is_running() {
                warn!("{} exited before accepting connections on {}", handle.name, addr);
                return false;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }

        warn!(
            "{}",
            HarnessError::ReadinessTimeout {
                name: handle.name.clone(),
                addr,
                timeout_ms: timeout.as_millis(),
            }
        );
        false
    }

    /// Interrupts the handle's process group, falling back to the single process, then waits up
    /// to the grace period for it to exit before killing the group.
    ///
    /// Once the leader has been reaped its pid is never signalled again; only a group that still
    /// has members is interrupted and then drained.
    ///
    /// Never fails: signalling problems are logged and reported in the outcome. Calling it again
    /// on the same handle is a no-op.
    pub async fn stop(&self, handle: &mut ProcessHandle) -> StopOutcome {
        if handle.stopped {
            debug!("{} [{}] already stopped", handle.name, handle.pid);
            return StopOutcome::AlreadyStopped;
        }
        handle.stopped = true;

        info!("Stopping {} [pid {}]", handle.name, handle.pid);
        let outcome = match interrupt(handle) {
            Ok(()) => StopOutcome::Stopped,
            Err(err) => {
                warn!("{}", err);
                StopOutcome::SignalFailed(err)
            }
        };

        if let Some(mut child) = handle.child.take() {
            self.reap(&handle.name, handle.pgid, &mut child).await;
        } else {
            #[cfg(unix)]
            {
                if matches!(outcome, StopOutcome::Stopped) {
                    self.drain_group(&handle.name, handle.pgid).await;
                }
            }
        }

        outcome
    }

    async fn reap(&self, name: &str, pgid: u32, child: &mut Child) {
        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {}", name, status),
            Ok(Err(err)) => warn!("Failed waiting for {} to exit: {}", name, err),
            Err(_) => {
                warn!(
                    "{} still running after {}ms, killing it",
                    name,
                    self.grace_period.as_millis()
                );

                #[cfg(unix)]
                {
                    if let Err(err) = signal::send(signal::Target::Group(pgid), signal::KILL) {
                        debug!("SIGKILL to group {} failed: {}", pgid, err);
                    }
                }
                #[cfg(not(unix))]
                let _ = pgid;

                if let Err(err) = child.start_kill() {
                    debug!("Unable to kill {}: {}", name, err);
                }
                if let Err(err) = child.wait().await {
                    warn!("Failed reaping {}: {}", name, err);
                }
            }
        }
    }

    /// Waits for what is left of a group whose leader was already reaped, killing it once the
    /// grace period runs out.
    #[cfg(unix)]
    async fn drain_group(&self, name: &str, pgid: u32) {
        let deadline = Instant::now() + self.grace_period;
        while signal::group_alive(pgid) {
            if Instant::now() >= deadline {
                warn!(
                    "{} group {} still running after {}ms, killing it",
                    name,
                    pgid,
                    self.grace_period.as_millis()
                );
                if let Err(err) = signal::send(signal::Target::Group(pgid), signal::KILL) {
                    debug!("SIGKILL to group {} failed: {}", pgid, err);
                }
                return;
            }
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
    }
}

#[cfg(unix)]
fn interrupt(handle: &ProcessHandle) -> HarnessResult<()> {
    let failed = |reason: String| HarnessError::TeardownFailure {
        pid: handle.pid,
        reason,
    };

    if handle.exited {
        // only the group id is still ours, and only while the group has members
        if !signal::group_alive(handle.pgid) {
            return Err(failed("process already exited".to_string()));
        }
        return signal::send(signal::Target::Group(handle.pgid), signal::INTERRUPT)
            .map_err(|err| failed(err.to_string()));
    }

    signal::send(signal::Target::Group(handle.pgid), signal::INTERRUPT)
        .or_else(|group_err| {
            debug!(
                "SIGINT to group {} failed ({}), signalling pid {}",
                handle.pgid, group_err, handle.pid
            );
            signal::send(signal::Target::Process(handle.pid), signal::INTERRUPT)
        })
        .map_err(|err| failed(err.to_string()))
}

#[cfg(not(unix))]
fn interrupt(handle: &mut ProcessHandle) -> HarnessResult<()> {
    match handle.child.as_mut() {
        Some(child) => child.start_kill().map_err(|err| HarnessError::TeardownFailure {
            pid: handle.pid,
            reason: err.to_string(),
        }),
        None => Ok(()),
    }
}

fn redirect_stdio(redirect: Redirect) -> std::io::Result<(Stdio, Stdio)> {
    match redirect {
        Redirect::Null => Ok((Stdio::null(), Stdio::null())),
        Redirect::Parent => Ok((Stdio::inherit(), Stdio::inherit())),
        Redirect::File => {
            let out_file = OpenOptions::new()
                .append(true)
                .create(true)
                .open("./.stdout")?;
            let err_file = OpenOptions::new()
                .append(true)
                .create(true)
                .open("./.stderr")?;
            Ok((Stdio::from(out_file), Stdio::from(err_file)))
        }
    }
}

#[cfg(unix)]
mod signal {
    use nix::{
        sys::signal::{kill, killpg, Signal},
        unistd::Pid,
    };

    pub const INTERRUPT: Signal = Signal::SIGINT;
    pub const KILL: Signal = Signal::SIGKILL;

    pub enum Target {
        Group(u32),
        Process(u32),
    }

    pub fn send(target: Target, signal: Signal) -> nix::Result<()> {
        match target {
            Target::Group(pgid) => killpg(Pid::from_raw(pgid as i32), signal),
            Target::Process(pid) => kill(Pid::from_raw(pid as i32), signal),
        }
    }

    /// Whether any process, zombies included, is still in the group.
    pub fn group_alive(pgid: u32) -> bool {
        killpg(Pid::from_raw(pgid as i32), None).is_ok()
    }
}

/// The processes started for one variant. Stopping is explicit via `stop_all`; anything still
/// running when this is dropped is killed so no process group outlives its variant.
#[derive(Debug, Default)]
pub struct RunningServices {
    handles: Vec<ProcessHandle>,
}
impl RunningServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: ProcessHandle) -> &mut ProcessHandle {
        self.handles.push(handle);
        let last = self.handles.len() - 1;
        &mut self.handles[last]
    }

    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops every handle exactly once, most recently started first.
    ///
    /// # Returns
    ///
    /// The teardown failures, which callers should log and otherwise ignore.
    pub async fn stop_all(&mut self, supervisor: &ProcessSupervisor) -> Vec<HarnessError> {
        let mut failures = vec![];
        for handle in self.handles.iter_mut().rev() {
            if let StopOutcome::SignalFailed(err) = supervisor.stop(handle).await {
                failures.push(err);
            }
        }
        failures
    }
}
impl Drop for RunningServices {
    fn drop(&mut self) {
        for handle in self.handles.iter_mut().filter(|h| !h.stopped) {
            warn!("{} [{}] was never stopped, killing it", handle.name, handle.pid);
            handle.force_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn tmp() -> PathBuf {
        env::temp_dir()
    }

    #[test]
    fn service_command_appends_extra_args() -> anyhow::Result<()> {
        let extra = vec!["--host".to_string(), "localhost".to_string()];
        let cmd = ServiceCommand::new("backend-0", "go run 'main.go'", &extra, &tmp(), Redirect::Null)?;

        assert_eq!(cmd.program, "go");
        assert_eq!(cmd.args, vec!["run", "main.go", "--host", "localhost"]);
        Ok(())
    }

    #[test]
    fn empty_or_malformed_commands_fail_to_launch() {
        let empty = ServiceCommand::new("x", "  ", &[], &tmp(), Redirect::Null);
        assert!(matches!(empty, Err(HarnessError::LaunchFailed { .. })));

        let unbalanced = ServiceCommand::new("x", "sh -c 'sleep", &[], &tmp(), Redirect::Null);
        assert!(matches!(unbalanced, Err(HarnessError::LaunchFailed { .. })));
    }

    #[tokio::test]
    async fn missing_working_directory_is_launch_failed() -> anyhow::Result<()> {
        let cmd = ServiceCommand::new(
            "backend-0",
            "sleep 1",
            &[],
            Path::new("/definitely/not/a/dir"),
            Redirect::Null,
        )?;
        let res = ProcessSupervisor::default().start(&cmd, Role::Backend, "localhost", None);
        assert!(matches!(res, Err(HarnessError::LaunchFailed { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_program_is_launch_failed() -> anyhow::Result<()> {
        let cmd = ServiceCommand::new("nope", "no-such-program-xyz", &[], &tmp(), Redirect::Null)?;
        let res = ProcessSupervisor::default().start(&cmd, Role::Backend, "localhost", None);
        assert!(matches!(res, Err(HarnessError::LaunchFailed { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn wait_ready_succeeds_once_port_is_open() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let supervisor = ProcessSupervisor::default();
        let cmd = ServiceCommand::new("sleeper", "sleep 5", &[], &tmp(), Redirect::Null)?;
        let mut handle = supervisor.start(&cmd, Role::LoadManager, "127.0.0.1", Some(port))?;

        let ready = supervisor
            .wait_ready(
                &mut handle,
                "127.0.0.1",
                port,
                Duration::from_secs(2),
                Duration::from_millis(20),
            )
            .await;
        assert!(ready);

        supervisor.stop(&mut handle).await;
        Ok(())
    }

    #[tokio::test]
    async fn wait_ready_times_out_softly() -> anyhow::Result<()> {
        // bind then drop to find a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?.port()
        };

        let supervisor = ProcessSupervisor::default();
        let cmd = ServiceCommand::new("sleeper", "sleep 5", &[], &tmp(), Redirect::Null)?;
        let mut handle = supervisor.start(&cmd, Role::Backend, "127.0.0.1", Some(port))?;

        let started = std::time::Instant::now();
        let ready = supervisor
            .wait_ready(
                &mut handle,
                "127.0.0.1",
                port,
                Duration::from_millis(300),
                Duration::from_millis(50),
            )
            .await;

        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(2));

        supervisor.stop(&mut handle).await;
        Ok(())
    }

    #[cfg(target_family = "unix")]
    mod unix {
        use super::*;
        use nix::{
            sys::signal::{kill, killpg},
            unistd::getpgid,
        };
        use sysinfo::{Pid as SysPid, System};

        fn pid_of(pid: u32) -> nix::unistd::Pid {
            nix::unistd::Pid::from_raw(pid as i32)
        }

        #[tokio::test]
        async fn started_process_leads_its_own_group() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::default();
            let cmd = ServiceCommand::new("sleep", "sleep 15", &[], &tmp(), Redirect::Null)?;
            let mut handle = supervisor.start(&cmd, Role::Backend, "localhost", Some(5000))?;

            let mut system = System::new();
            system.refresh_all();
            assert!(system.process(SysPid::from_u32(handle.pid())).is_some());

            let pgid = getpgid(Some(pid_of(handle.pid())))?;
            assert_eq!(pgid.as_raw() as u32, handle.pid());
            assert_eq!(handle.pgid(), handle.pid());
            assert!(handle.is_running());

            supervisor.stop(&mut handle).await;
            Ok(())
        }

        #[tokio::test]
        async fn stop_interrupts_and_reaps_the_process() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::new(Duration::from_secs(2));
            let cmd = ServiceCommand::new("sleep", "sleep 30", &[], &tmp(), Redirect::Null)?;
            let mut handle = supervisor.start(&cmd, Role::Backend, "localhost", None)?;
            let pid = handle.pid();

            let outcome = supervisor.stop(&mut handle).await;
            assert!(matches!(outcome, StopOutcome::Stopped));
            assert!(handle.is_stopped());
            assert!(!handle.is_running());

            // reaped, so the pid no longer exists
            assert!(kill(pid_of(pid), None).is_err());
            Ok(())
        }

        #[tokio::test]
        async fn stopping_twice_is_a_no_op() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::default();
            let cmd = ServiceCommand::new("sleep", "sleep 30", &[], &tmp(), Redirect::Null)?;
            let mut handle = supervisor.start(&cmd, Role::Backend, "localhost", None)?;

            supervisor.stop(&mut handle).await;
            let second = supervisor.stop(&mut handle).await;
            assert!(matches!(second, StopOutcome::AlreadyStopped));
            Ok(())
        }

        #[tokio::test]
        async fn stopping_an_exited_process_does_not_panic() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::default();
            let cmd = ServiceCommand::new("true", "true", &[], &tmp(), Redirect::Null)?;
            let mut handle = supervisor.start(&cmd, Role::Backend, "localhost", None)?;

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(!handle.is_running());

            // the group is gone, so signalling reports a failure instead of raising
            let outcome = supervisor.stop(&mut handle).await;
            assert!(matches!(outcome, StopOutcome::SignalFailed(_)));
            assert!(matches!(
                supervisor.stop(&mut handle).await,
                StopOutcome::AlreadyStopped
            ));
            Ok(())
        }

        #[tokio::test]
        async fn exited_leader_only_signals_its_surviving_group() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::new(Duration::from_millis(500));
            // the background sleep outlives the shell and ignores SIGINT
            let cmd = ServiceCommand::new(
                "orphaning",
                "sh -c 'sleep 37.5 & exit 0'",
                &[],
                &tmp(),
                Redirect::Null,
            )?;
            let mut handle = supervisor.start(&cmd, Role::Backend, "localhost", None)?;
            tokio::time::sleep(Duration::from_millis(200)).await;

            assert!(!handle.is_running());
            assert!(killpg(pid_of(handle.pgid()), None).is_ok());

            let outcome = supervisor.stop(&mut handle).await;
            assert!(matches!(outcome, StopOutcome::Stopped));

            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut system = System::new();
            system.refresh_all();
            let survivors = system
                .processes()
                .values()
                .filter(|p| p.status() != sysinfo::ProcessStatus::Zombie)
                .filter(|p| {
                    let argv = p
                        .cmd()
                        .iter()
                        .map(|a| AsRef::<std::ffi::OsStr>::as_ref(a).to_string_lossy().into_owned())
                        .collect::<Vec<_>>();
                    argv == ["sleep", "37.5"]
                })
                .count();
            assert_eq!(survivors, 0);
            Ok(())
        }

        #[tokio::test]
        async fn ignored_interrupt_escalates_to_kill() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::new(Duration::from_millis(300));
            let cmd = ServiceCommand::new(
                "stubborn",
                "sh -c 'trap \"\" INT; sleep 30'",
                &[],
                &tmp(),
                Redirect::Null,
            )?;
            let mut handle = supervisor.start(&cmd, Role::Backend, "localhost", None)?;
            tokio::time::sleep(Duration::from_millis(100)).await;

            let started = std::time::Instant::now();
            supervisor.stop(&mut handle).await;

            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(kill(pid_of(handle.pid()), None).is_err());
            Ok(())
        }

        #[tokio::test]
        async fn stop_all_stops_every_handle_once() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::default();
            let mut services = RunningServices::new();
            for i in 0..3 {
                let cmd = ServiceCommand::new(
                    &format!("backend-{i}"),
                    "sleep 30",
                    &[],
                    &tmp(),
                    Redirect::Null,
                )?;
                services.push(supervisor.start(&cmd, Role::Backend, "localhost", None)?);
            }

            let failures = services.stop_all(&supervisor).await;
            assert!(failures.is_empty());
            assert!(services.handles().iter().all(|h| h.is_stopped()));

            // a second pass finds nothing left to signal
            assert!(services.stop_all(&supervisor).await.is_empty());
            Ok(())
        }

        #[tokio::test]
        async fn dropping_running_services_kills_the_groups() -> anyhow::Result<()> {
            let supervisor = ProcessSupervisor::default();
            let cmd = ServiceCommand::new("sleep", "sleep 30", &[], &tmp(), Redirect::Null)?;

            let pid = {
                let mut services = RunningServices::new();
                let handle = services.push(supervisor.start(&cmd, Role::Backend, "localhost", None)?);
                handle.pid()
            };

            // SIGKILL is asynchronous; give the kernel a moment
            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut system = System::new();
            system.refresh_all();
            let alive = system
                .process(SysPid::from_u32(pid))
                .map(|p| p.status() != sysinfo::ProcessStatus::Zombie)
                .unwrap_or(false);
            assert!(!alive);
            Ok(())
        }
    }
}
