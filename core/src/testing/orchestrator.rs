use std::sync::Arc;

use tokio::{sync::watch, task::JoinSet};

use super::{
    pipeline::Pipeline,
    result::{RunSummary, TestReport},
    testcase::TestCase,
};

/// Trips a [`CancelToken`]. Cloneable so it can be moved into a signal handler.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    /// A token nobody can trip.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Fans testcases out over a bounded set of tasks and collects the verdicts.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    jobs: usize,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, jobs: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            jobs: jobs.max(1),
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Judges every testcase, calling `on_report` as each verdict arrives (completion order).
    /// Testcases are numbered from 1 in the given order.
    ///
    /// When `cancel` trips, nothing new is started, running tests are aborted (dropping
    /// them kills their process groups) and the partial summary is returned with
    /// `interrupted` set.
    pub async fn run<F>(
        &self,
        testcases: Vec<TestCase>,
        mut cancel: CancelToken,
        mut on_report: F,
    ) -> RunSummary
    where
        F: FnMut(&TestReport, &RunSummary),
    {
        let mut summary = RunSummary::new(testcases.len());
        let mut queue = testcases
            .into_iter()
            .enumerate()
            .map(|(i, t)| (i + 1, t));
        let mut running: JoinSet<TestReport> = JoinSet::new();

        loop {
            if cancel.is_cancelled() && !summary.interrupted {
                log::warn!("Interrupted: aborting {} running testcases", running.len());
                summary.interrupted = true;
                running.shutdown().await;
            }
            if !summary.interrupted {
                while running.len() < self.jobs {
                    let Some((index, testcase)) = queue.next() else {
                        break;
                    };
                    let pipeline = self.pipeline.clone();
                    log::trace!("Schedule #{} {}", index, testcase.name());
                    running.spawn(async move { pipeline.judge(index, &testcase).await });
                }
            }
            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                // handled at the top of the loop
                _ = cancel.cancelled(), if !summary.interrupted => {}
                Some(joined) = running.join_next() => match joined {
                    Ok(report) => {
                        summary.record(report);
                        if let Some(report) = summary.reports.last() {
                            on_report(report, &summary);
                        }
                    }
                    Err(e) => log::error!("Judge task ended abnormally: {}", e),
                },
            }
        }

        summary
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashSet,
        path::{Path, PathBuf},
        time::Duration,
    };

    use super::*;
    use crate::testing::{JudgeCode, PipelineCommands, Verdict};

    fn sh_cmd(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    /// The "compiler" copies the source to IR; the "linker" makes the IR executable.
    /// So each `.sy` file is a shell script acting as the compiled program.
    fn pipeline(root: &Path) -> Pipeline {
        let commands = PipelineCommands {
            compile: sh_cmd("cp \"$0\" \"$1\"")
                .into_iter()
                .chain(["#{source}".into(), "#{ir}".into()])
                .collect(),
            link: sh_cmd("cp \"$0\" \"$1\" && chmod +x \"$1\"")
                .into_iter()
                .chain(["#{ir}".into(), "#{exe}".into()])
                .collect(),
            diff: vec!["diff".into(), "#{expected}".into(), "#{actual}".into()],
            runtime_object: PathBuf::from("/dev/null"),
        };
        fsutil::mkdir_all(root.join("tmp")).unwrap();
        fsutil::mkdir_all(root.join("wa")).unwrap();
        Pipeline::new(commands, root, root.join("tmp"), root.join("wa"))
            .exec_time_limit(Duration::from_secs(1))
    }

    fn add_case(root: &Path, name: &str, program: &str, expected: &str) -> TestCase {
        let source = root.join("cases").join(format!("{}.sy", name));
        let out = root.join("cases").join(format!("{}.out", name));
        fsutil::write_with_mkdir(&source, format!("#!/bin/sh\n{}\n", program)).unwrap();
        fsutil::write_with_mkdir(&out, expected).unwrap();
        TestCase::new(name, source, None, out)
    }

    #[tokio::test]
    async fn every_testcase_gets_exactly_one_verdict() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let testcases: Vec<_> = (0..8)
            .map(|i| {
                if i % 3 == 0 {
                    add_case(root, &format!("t{}", i), "echo 1", "2\n0\n")
                } else {
                    add_case(root, &format!("t{}", i), "echo 1", "1\n0\n")
                }
            })
            .collect();

        let orch = Orchestrator::new(pipeline(root), 3);
        let mut seen = Vec::new();
        let summary = orch
            .run(testcases, CancelToken::never(), |report, summary| {
                seen.push(report.index);
                assert_eq!(summary.finished(), seen.len());
            })
            .await;

        assert_eq!(summary.total, 8);
        assert_eq!(summary.finished(), 8);
        assert_eq!(summary.count(JudgeCode::AC), 5);
        assert_eq!(summary.count(JudgeCode::WA), 3);
        assert!(!summary.interrupted);
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique, (1..=8).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn cancel_stops_the_run_and_marks_it_interrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let testcases: Vec<_> = (0..6)
            .map(|i| add_case(root, &format!("slow{}", i), "sleep 30", "0\n"))
            .collect();

        let orch = Orchestrator::new(
            pipeline(root).exec_time_limit(Duration::from_secs(60)),
            2,
        );
        let (handle, token) = cancel_pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.cancel();
        });

        let started = std::time::Instant::now();
        let summary = orch.run(testcases, token, |_, _| {}).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(summary.interrupted);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.finished(), 0);
        assert_eq!(summary.unfinished(), 6);
        assert!(!summary.all_accepted());
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let testcases = vec![add_case(root, "a", "echo 1", "1\n0\n")];

        let (handle, token) = cancel_pair();
        handle.cancel();
        let summary = Orchestrator::new(pipeline(root), 4)
            .run(testcases, token, |_, _| panic!("no report expected"))
            .await;
        assert_eq!(summary.finished(), 0);
        assert_eq!(summary.unfinished(), 1);
        assert!(summary.interrupted);
    }

    #[tokio::test]
    async fn verdict_kinds_from_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let testcases = vec![
            add_case(root, "ok", "echo 3", "3\n0\n"),
            add_case(root, "exit", "exit 7", "7\n"),
            add_case(root, "tle", "while :; do :; done", "0\n"),
        ];

        let mut summary = Orchestrator::new(pipeline(root), 2)
            .run(testcases, CancelToken::never(), |_, _| {})
            .await;
        summary.sort_reports();

        let verdicts: Vec<_> = summary.reports.iter().map(|r| &r.verdict).collect();
        assert_eq!(verdicts[0], &Verdict::Accepted);
        assert_eq!(verdicts[1], &Verdict::Accepted);
        assert!(matches!(verdicts[2], Verdict::TimeExceeded { .. }));
    }
}
