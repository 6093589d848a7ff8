use std::{collections::BTreeMap, fmt, time::Duration};

use serde::Serialize;

/// One of the three ordered steps applied to a testcase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[strum(serialize = "Source -> IR")]
    Compile,
    #[strum(serialize = "IR -> Executable")]
    Link,
    #[strum(serialize = "Running Executable")]
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchKind {
    /// Both sides have the line but the contents differ.
    Content { expected: String, actual: String },
    /// The expected stdout has more lines than the actual one.
    MissingLine { expected: String },
    /// The actual stdout has more lines than the expected one.
    ExtraLine { actual: String },
    /// Stdout matched, the exit code did not.
    ExitCode { expected: Option<String>, actual: u8 },
}

/// First divergence between actual and expected output.
/// `line` is 1-based and counts lines of the expected-output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub line: usize,
    #[serde(flatten)]
    pub kind: MismatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer(Mismatch),
    RuntimeError { stage: Stage },
    TimeExceeded { stage: Stage, limit: Duration },
    /// The judge itself failed on this testcase; not the compiler's fault.
    InternalError { message: String },
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, strum::Display,
)]
pub enum JudgeCode {
    AC,
    WA,
    TLE,
    RE,
    IE,
}

impl Verdict {
    pub fn code(&self) -> JudgeCode {
        use Verdict::*;
        match self {
            Accepted => JudgeCode::AC,
            WrongAnswer(_) => JudgeCode::WA,
            RuntimeError { .. } => JudgeCode::RE,
            TimeExceeded { .. } => JudgeCode::TLE,
            InternalError { .. } => JudgeCode::IE,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Verdict::*;
        match self {
            Accepted => write!(f, "Accepted"),
            WrongAnswer(m) => write!(f, "Wrong Answer: first mismatch at line {}", m.line),
            RuntimeError { stage } => write!(f, "Runtime Error: {}", stage),
            TimeExceeded { stage, limit } => {
                write!(f, "Time Limit Exceeded: {} ({:?})", stage, limit)
            }
            InternalError { message } => write!(f, "Internal Error: {}", message),
        }
    }
}

/// The verdict of one testcase as reported back to the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub index: usize,
    pub name: String,
    pub verdict: Verdict,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub counts: BTreeMap<JudgeCode, usize>,
    pub interrupted: bool,
    pub reports: Vec<TestReport>,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, report: TestReport) {
        *self.counts.entry(report.verdict.code()).or_default() += 1;
        self.reports.push(report);
    }

    pub fn count(&self, code: JudgeCode) -> usize {
        self.counts.get(&code).copied().unwrap_or(0)
    }

    pub fn finished(&self) -> usize {
        self.reports.len()
    }

    pub fn passed(&self) -> usize {
        self.count(JudgeCode::AC)
    }

    pub fn failed(&self) -> usize {
        self.finished() - self.passed()
    }

    /// Tests that never produced a verdict (only non-zero after an interruption).
    pub fn unfinished(&self) -> usize {
        self.total - self.finished()
    }

    pub fn all_accepted(&self) -> bool {
        !self.interrupted && self.total > 0 && self.passed() == self.total
    }

    /// Puts reports back into discovery order.
    pub fn sort_reports(&mut self) {
        self.reports.sort_by(|a, b| a.index.cmp(&b.index));
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestReport> {
        self.reports.iter().filter(|r| !r.verdict.is_accepted())
    }
}

fn serialize_millis<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u128(d.as_millis())
}
