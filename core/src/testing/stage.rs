use std::{
    ffi::OsString,
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
};

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult<T> {
    Success(T),
    TimedOut(Duration),
    Failed(String),
}

impl<T> StageResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageResult<U> {
        use StageResult::*;
        match self {
            Success(x) => Success(f(x)),
            TimedOut(limit) => TimedOut(limit),
            Failed(diag) => Failed(diag),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success(_))
    }
}

impl StageResult<ProcessOutput> {
    /// Turns a non-zero exit into `Failed`, carrying the captured stderr as diagnostic.
    pub fn require_success(self) -> Self {
        match self {
            StageResult::Success(out) if out.exit_code != 0 => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                StageResult::Failed(format!("exitcode={}\n{}", out.exit_code, stderr))
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Discard,
    Memory,
}

impl Capture {
    fn stdio(self) -> Stdio {
        match self {
            Capture::Discard => Stdio::null(),
            Capture::Memory => Stdio::piped(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    Null,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code taken modulo 256.
    pub exit_code: u8,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A single external process run with an optional wall-clock limit.
///
/// The child is started in its own process group. When the limit is hit, or when the
/// future running it is dropped, the whole group gets `SIGKILL`, so grandchildren die too.
#[derive(Debug, Clone)]
pub struct StageCommand {
    argv: Vec<OsString>,
    current_dir: Option<PathBuf>,
    stdin: StdinSource,
    stdout: Capture,
    stderr: Capture,
    time_limit: Option<Duration>,
}

impl StageCommand {
    pub fn new(argv: Vec<OsString>) -> Self {
        Self {
            argv,
            current_dir: None,
            stdin: StdinSource::Null,
            stdout: Capture::Discard,
            stderr: Capture::Discard,
            time_limit: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, src: StdinSource) -> Self {
        self.stdin = src;
        self
    }

    pub fn stdout(mut self, capture: Capture) -> Self {
        self.stdout = capture;
        self
    }

    pub fn stderr(mut self, capture: Capture) -> Self {
        self.stderr = capture;
        self
    }

    pub fn time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn get_time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn run(&self) -> StageResult<ProcessOutput> {
        let Some((program, args)) = self.argv.split_first() else {
            return StageResult::Failed("Empty command".to_owned());
        };

        let stdin = match &self.stdin {
            StdinSource::Null => Stdio::null(),
            StdinSource::File(path) => match std::fs::File::open(path) {
                Ok(f) => Stdio::from(f),
                Err(e) => {
                    return StageResult::Failed(format!(
                        "Cannot open stdin file '{}': {}",
                        path.to_string_lossy(),
                        e
                    ))
                }
            },
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(stdin)
            .stdout(self.stdout.stdio())
            .stderr(self.stderr.stdio())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut proc = match cmd.spawn() {
            Ok(proc) => proc,
            Err(e) => return StageResult::Failed(format!("Failed to spawn '{}': {}", self.display(), e)),
        };
        let mut group = ProcessGroupGuard::new(&proc);
        log::trace!("Spawned pid={:?}: {}", proc.id(), self.display());

        let mut stdout_pipe = proc.stdout.take();
        let mut stderr_pipe = proc.stderr.take();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let res = {
            let communicate = async {
                let (_, _, status) = tokio::try_join!(
                    read_pipe(stdout_pipe.as_mut(), &mut stdout_buf),
                    read_pipe(stderr_pipe.as_mut(), &mut stderr_buf),
                    proc.wait(),
                )?;
                Ok::<_, io::Error>(status)
            };
            match self.time_limit {
                Some(limit) => tokio::time::timeout(limit, communicate).await.ok(),
                None => Some(communicate.await),
            }
        };

        match res {
            None => {
                group.kill();
                Self::reap(&mut proc).await;
                let limit = self.time_limit.unwrap_or_default();
                log::debug!("Timed out after {:?}: {}", limit, self.display());
                StageResult::TimedOut(limit)
            }
            Some(Err(e)) => {
                group.kill();
                Self::reap(&mut proc).await;
                StageResult::Failed(format!(
                    "Failed to communicate with '{}': {}",
                    self.display(),
                    e
                ))
            }
            Some(Ok(status)) => {
                // Reaped by `wait()`, the pid may be reused from now on.
                group.disarm();
                StageResult::Success(ProcessOutput {
                    exit_code: normalize_exit_code(raw_exit_code(status)),
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                })
            }
        }
    }

    async fn reap(proc: &mut Child) {
        proc.kill()
            .await
            .unwrap_or_else(|e| log::warn!("Failed to kill TLE process: {:#}", e));
    }
}

async fn read_pipe<R>(pipe: Option<&mut R>, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => pipe.read_to_end(buf).await,
        None => Ok(0),
    }
}

/// Exit code as reported by the OS; a process killed by signal `n` reports `-n`.
pub fn raw_exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    -1
}

/// Only the low 8 bits of an exit status are meaningful for native processes.
pub fn normalize_exit_code(raw: i32) -> u8 {
    raw.rem_euclid(256) as u8
}

/// Sends `SIGKILL` to the child's process group when dropped, unless disarmed.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(proc: &Child) -> Self {
        Self {
            pgid: proc.id().map(|pid| pid as i32),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: i32) {
    // The group leader is not reaped yet, so `pgid` still names our group.
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret != 0 {
        log::debug!(
            "kill(-{}, SIGKILL) failed: {}",
            pgid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: i32) {}

#[cfg(test)]
mod test {
    use super::*;

    fn sh(script: &str) -> StageCommand {
        StageCommand::new(vec!["/bin/sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn exit_code_is_taken_modulo_256() {
        assert_eq!(normalize_exit_code(0), 0);
        assert_eq!(normalize_exit_code(3), 3);
        assert_eq!(normalize_exit_code(256), 0);
        assert_eq!(normalize_exit_code(300), 44);
        assert_eq!(normalize_exit_code(-1), 255);
        assert_eq!(normalize_exit_code(-11), 245);
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let res = sh("echo hello; echo oops >&2; exit 3")
            .stdout(Capture::Memory)
            .stderr(Capture::Memory)
            .run()
            .await;
        assert_eq!(
            res,
            StageResult::Success(ProcessOutput {
                exit_code: 3,
                stdout: b"hello\n".to_vec(),
                stderr: b"oops\n".to_vec(),
            })
        );
    }

    #[tokio::test]
    async fn discarded_streams_are_empty() {
        let res = sh("echo hello; echo oops >&2").run().await;
        assert_eq!(
            res,
            StageResult::Success(ProcessOutput {
                exit_code: 0,
                stdout: vec![],
                stderr: vec![],
            })
        );
    }

    #[tokio::test]
    async fn feeds_stdin_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("a.in");
        fsutil::write(&input, "1 2\n").unwrap();

        let res = sh("read a b; echo $((a + b))")
            .stdin(StdinSource::File(input))
            .stdout(Capture::Memory)
            .run()
            .await;
        let StageResult::Success(out) = res else {
            panic!("unexpected {:?}", res)
        };
        assert_eq!(out.stdout, b"3\n");
    }

    #[tokio::test]
    async fn require_success_reports_stderr() {
        let res = sh("echo 'syntax error' >&2; exit 1")
            .stderr(Capture::Memory)
            .run()
            .await
            .require_success();
        match res {
            StageResult::Failed(diag) => {
                assert!(diag.contains("exitcode=1"), "{}", diag);
                assert!(diag.contains("syntax error"), "{}", diag);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_failed() {
        let res = StageCommand::new(vec!["./definitely/not/a/program".into()])
            .run()
            .await;
        assert!(matches!(res, StageResult::Failed(_)), "{:?}", res);
    }

    #[tokio::test]
    async fn empty_command_is_failed() {
        let res = StageCommand::new(vec![]).run().await;
        assert_eq!(res, StageResult::Failed("Empty command".to_owned()));
    }

    #[tokio::test]
    async fn missing_stdin_file_is_failed() {
        let res = sh("cat")
            .stdin(StdinSource::File("/no/such/input.in".into()))
            .run()
            .await;
        assert!(matches!(res, StageResult::Failed(_)), "{:?}", res);
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        // A zombie waiting for its reaper is not running anymore.
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_whole_process_group() {
        let tmp = tempfile::tempdir().unwrap();
        let pidfile = tmp.path().join("grandchild.pid");
        let script = format!(
            "sleep 30 & echo $! > '{}'; wait",
            pidfile.to_string_lossy()
        );

        let res = sh(&script)
            .stdout(Capture::Memory)
            .time_limit(Some(Duration::from_millis(300)))
            .run()
            .await;
        assert_eq!(res, StageResult::TimedOut(Duration::from_millis(300)));

        let pid: u32 = fsutil::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_running(pid), "grandchild {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn finishes_within_time_limit() {
        let res = sh("echo fast")
            .stdout(Capture::Memory)
            .time_limit(Some(Duration::from_secs(5)))
            .run()
            .await;
        assert!(res.is_success(), "{:?}", res);
    }
}
