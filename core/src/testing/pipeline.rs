use std::{
    collections::HashMap,
    ffi::OsStr,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use futures_util::FutureExt as _;

use super::{
    compare,
    result::{Stage, TestReport, Verdict},
    stage::{Capture, StageCommand, StageResult, StdinSource},
    testcase::TestCase,
};
use crate::error::*;
use crate::str_interp::interp_args;

/// What the produced executable did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: Vec<u8>,
    pub exit_code: u8,
}

/// Command templates. Arguments may refer to `#{source}`, `#{ir}`, `#{exe}`, `#{runtime}`,
/// `#{input}`, `#{expected}`, `#{actual}` and `#{name}`.
#[derive(Debug, Clone)]
pub struct PipelineCommands {
    pub compile: Vec<String>,
    pub link: Vec<String>,
    pub diff: Vec<String>,
    pub runtime_object: PathBuf,
}

/// Per-testcase file locations. Every name starts with the run index,
/// so two testcases of the same run never share a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPaths {
    pub ir: PathBuf,
    pub exe: PathBuf,
    pub actual_output: PathBuf,
    pub diff_script: PathBuf,
    pub diagnostic: PathBuf,
}

impl TestPaths {
    pub const ACTUAL_OUTPUT_SUBDIR: &str = "wa_out";

    pub fn new(
        scratch_dir: &Path,
        failure_dir: &Path,
        index: usize,
        testcase: &TestCase,
    ) -> Self {
        let flat = testcase.flat_name();
        Self {
            ir: scratch_dir.join(format!("{}_{}.ll", index, flat)),
            exe: scratch_dir.join(format!("{}_{}.exe", index, flat)),
            actual_output: failure_dir
                .join(Self::ACTUAL_OUTPUT_SUBDIR)
                .join(format!("{}_WA_{}.out", index, flat)),
            diff_script: failure_dir.join(format!("{}_WA_show_diff.sh", index)),
            diagnostic: failure_dir.join(format!("{}_RE_{}.txt", index, flat)),
        }
    }

    pub fn scratch_files(&self) -> [&Path; 2] {
        [&self.ir, &self.exe]
    }

    pub fn failure_files(&self) -> [&Path; 3] {
        [&self.actual_output, &self.diff_script, &self.diagnostic]
    }
}

/// Compiles, links, runs and judges a single testcase.
#[derive(Debug, Clone)]
pub struct Pipeline {
    commands: PipelineCommands,
    work_dir: PathBuf,
    scratch_dir: PathBuf,
    failure_dir: PathBuf,
    compile_time_limit: Duration,
    exec_time_limit: Duration,
}

impl Pipeline {
    pub fn new(
        commands: PipelineCommands,
        work_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        failure_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            commands,
            work_dir: work_dir.into(),
            scratch_dir: scratch_dir.into(),
            failure_dir: failure_dir.into(),
            compile_time_limit: Duration::from_secs(5),
            exec_time_limit: Duration::from_secs(60),
        }
    }

    pub fn compile_time_limit(mut self, limit: Duration) -> Self {
        self.compile_time_limit = limit;
        self
    }

    pub fn exec_time_limit(mut self, limit: Duration) -> Self {
        self.exec_time_limit = limit;
        self
    }

    pub fn get_compile_time_limit(&self) -> Duration {
        self.compile_time_limit
    }

    pub fn get_exec_time_limit(&self) -> Duration {
        self.exec_time_limit
    }

    pub fn paths_for(&self, index: usize, testcase: &TestCase) -> TestPaths {
        TestPaths::new(&self.scratch_dir, &self.failure_dir, index, testcase)
    }

    /// Never fails: harness-side errors, even a panic, become `Verdict::InternalError`.
    pub async fn judge(&self, index: usize, testcase: &TestCase) -> TestReport {
        let start_at = Instant::now();
        let paths = self.paths_for(index, testcase);

        let verdict = match AssertUnwindSafe(self.run_stages(testcase, &paths))
            .catch_unwind()
            .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                log::error!("Testcase {}: {:#}", testcase.name(), e);
                Verdict::InternalError {
                    message: format!("{:#}", e),
                }
            }
            Err(_) => Verdict::InternalError {
                message: "judge worker panicked".to_owned(),
            },
        };

        TestReport {
            index,
            name: testcase.name().to_owned(),
            verdict,
            elapsed: start_at.elapsed(),
        }
    }

    async fn run_stages(&self, testcase: &TestCase, paths: &TestPaths) -> Result<Verdict> {
        let vars = self.interp_vars(testcase, paths);

        let ir = match self.compile(&vars, paths).await? {
            StageResult::Success(ir) => ir,
            res => return self.short_circuit(Stage::Compile, res, paths),
        };
        log::debug!("{}: compiled to {:?}", testcase.name(), ir);

        let exe = match self.link(&vars, paths).await? {
            StageResult::Success(exe) => exe,
            res => return self.short_circuit(Stage::Link, res, paths),
        };
        log::debug!("{}: linked to {:?}", testcase.name(), exe);

        let outcome = match self.execute(&exe, testcase.input_path()).await {
            StageResult::Success(outcome) => outcome,
            res => return self.short_circuit(Stage::Run, res, paths),
        };
        log::debug!(
            "{}: exited with {} ({} bytes of stdout)",
            testcase.name(),
            outcome.exit_code,
            outcome.stdout.len()
        );

        self.compare(testcase, &outcome, &vars, paths)
    }

    async fn compile(
        &self,
        vars: &HashMap<&str, &OsStr>,
        paths: &TestPaths,
    ) -> Result<StageResult<PathBuf>> {
        let argv = interp_args(&self.commands.compile, vars)
            .context("Invalid compile command template")?;
        let res = StageCommand::new(argv)
            .current_dir(&self.work_dir)
            .stderr(Capture::Memory)
            .time_limit(Some(self.compile_time_limit))
            .run()
            .await
            .require_success();
        Ok(res.map(|_| paths.ir.clone()))
    }

    async fn link(
        &self,
        vars: &HashMap<&str, &OsStr>,
        paths: &TestPaths,
    ) -> Result<StageResult<PathBuf>> {
        let argv =
            interp_args(&self.commands.link, vars).context("Invalid link command template")?;
        let res = StageCommand::new(argv)
            .current_dir(&self.work_dir)
            .stderr(Capture::Memory)
            .run()
            .await
            .require_success();
        Ok(res.map(|_| paths.exe.clone()))
    }

    async fn execute(&self, exe: &Path, input: Option<&Path>) -> StageResult<ExecutionOutcome> {
        let stdin = match input {
            Some(path) => StdinSource::File(path.to_owned()),
            None => StdinSource::Null,
        };
        StageCommand::new(vec![exe.as_os_str().to_owned()])
            .current_dir(&self.work_dir)
            .stdin(stdin)
            .stdout(Capture::Memory)
            .time_limit(Some(self.exec_time_limit))
            .run()
            .await
            .map(|out| ExecutionOutcome {
                stdout: out.stdout,
                exit_code: out.exit_code,
            })
    }

    fn compare(
        &self,
        testcase: &TestCase,
        outcome: &ExecutionOutcome,
        vars: &HashMap<&str, &OsStr>,
        paths: &TestPaths,
    ) -> Result<Verdict> {
        let expected = fsutil::read_to_string(testcase.expected_path())?;
        let stdout = String::from_utf8_lossy(&outcome.stdout);
        let verdict = compare::judge(&stdout, outcome.exit_code, &expected);

        if !verdict.is_accepted() {
            fsutil::write_with_mkdir(
                &paths.actual_output,
                compare::render_actual(&stdout, outcome.exit_code),
            )?;
            let diff_argv =
                interp_args(&self.commands.diff, vars).context("Invalid diff command template")?;
            fsutil::write_with_mkdir(&paths.diff_script, compare::shell_script(&diff_argv))?;
            #[cfg(unix)]
            fsutil::set_executable(&paths.diff_script)?;
        }
        Ok(verdict)
    }

    fn short_circuit<T>(
        &self,
        stage: Stage,
        res: StageResult<T>,
        paths: &TestPaths,
    ) -> Result<Verdict> {
        match res {
            StageResult::TimedOut(limit) => Ok(Verdict::TimeExceeded { stage, limit }),
            StageResult::Failed(diag) => {
                fsutil::write_with_mkdir(&paths.diagnostic, format!("[{}]\n{}", stage, diag))?;
                Ok(Verdict::RuntimeError { stage })
            }
            StageResult::Success(_) => bail!("{} succeeded but was handled as a failure", stage),
        }
    }

    fn interp_vars<'a>(
        &'a self,
        testcase: &'a TestCase,
        paths: &'a TestPaths,
    ) -> HashMap<&'static str, &'a OsStr> {
        let mut m: HashMap<_, &OsStr> = HashMap::new();
        m.insert("name", OsStr::new(testcase.name()));
        m.insert("source", testcase.source_path().as_os_str());
        m.insert("expected", testcase.expected_path().as_os_str());
        m.insert(
            "input",
            testcase
                .input_path()
                .map(Path::as_os_str)
                .unwrap_or(OsStr::new("/dev/null")),
        );
        m.insert("ir", paths.ir.as_os_str());
        m.insert("exe", paths.exe.as_os_str());
        m.insert("runtime", self.commands.runtime_object.as_os_str());
        m.insert("actual", paths.actual_output.as_os_str());
        m
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    fn testcase(name: &str) -> TestCase {
        TestCase::new(
            name,
            format!("testcase/{}.sy", name),
            None,
            format!("testcase/{}.out", name),
        )
    }

    #[test]
    fn paths_are_disjoint_even_when_flat_names_collide() {
        let names = [
            "a/b", "a_b", "a\\b", "a/b_c", "a_b/c", "a/b/c", "a_b_c", "x", "x/", "basic/add",
            "basic_add", "basic/add/1", "basic_add_1",
        ];
        let scratch = Path::new("/run/tmp");
        let failures = Path::new("/run/wa");

        let mut seen = HashSet::new();
        for (i, name) in names.iter().enumerate() {
            let t = testcase(name);
            let paths = TestPaths::new(scratch, failures, i + 1, &t);
            for p in paths.scratch_files().iter().chain(paths.failure_files().iter()) {
                assert!(seen.insert(p.to_path_buf()), "{:?} is shared", p);
            }
        }
        assert_eq!(seen.len(), names.len() * 5);
    }

    #[test]
    fn paths_live_under_their_dirs() {
        let t = testcase("basic/add");
        let paths = TestPaths::new(Path::new("/tmp/s"), Path::new("/tmp/f"), 7, &t);
        assert_eq!(paths.ir, Path::new("/tmp/s/7_basic_add.ll"));
        assert_eq!(paths.exe, Path::new("/tmp/s/7_basic_add.exe"));
        assert_eq!(
            paths.actual_output,
            Path::new("/tmp/f/wa_out/7_WA_basic_add.out")
        );
        assert_eq!(paths.diff_script, Path::new("/tmp/f/7_WA_show_diff.sh"));
        assert_eq!(paths.diagnostic, Path::new("/tmp/f/7_RE_basic_add.txt"));
    }

    #[test]
    fn interp_vars_default_input_to_dev_null() {
        let pipeline = Pipeline::new(
            PipelineCommands {
                compile: vec![],
                link: vec![],
                diff: vec![],
                runtime_object: "lib/lib.o".into(),
            },
            "/repo",
            "/repo/tmp",
            "/repo/wa",
        );
        let t = testcase("x");
        let paths = pipeline.paths_for(1, &t);
        let vars = pipeline.interp_vars(&t, &paths);
        assert_eq!(vars["input"], OsStr::new("/dev/null"));
        assert_eq!(vars["runtime"], OsStr::new("lib/lib.o"));
        assert_eq!(vars["ir"], OsStr::new("/repo/tmp/1_x.ll"));
    }
}
