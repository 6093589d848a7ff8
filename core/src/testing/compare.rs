//! Output comparison.
//!
//! Expected-output file format: the file is right-trimmed as a whole and split into
//! lines, each line right-trimmed. The last line is the expected exit code, the lines
//! before it are the expected stdout. Stdout and exit code are compared separately:
//! stdout first, line by line, then the exit code.

use std::ffi::OsStr;

use super::result::{Mismatch, MismatchKind, Verdict};

/// Splits text into right-trimmed lines, ignoring trailing blank lines.
pub fn normalized_lines(s: &str) -> Vec<&str> {
    s.trim_end().lines().map(str::trim_end).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput<'a> {
    pub stdout: Vec<&'a str>,
    /// `None` only when the file is blank.
    pub exit_code: Option<&'a str>,
}

impl<'a> ExpectedOutput<'a> {
    pub fn parse(text: &'a str) -> Self {
        let mut stdout = normalized_lines(text);
        let exit_code = stdout.pop();
        Self { stdout, exit_code }
    }
}

/// Finds the first divergence. Line numbers are 1-based positions in the expected file.
pub fn find_mismatch(
    actual_stdout: &str,
    actual_exit_code: u8,
    expected: &ExpectedOutput,
) -> Option<Mismatch> {
    let actual = normalized_lines(actual_stdout);

    let first_diff = actual
        .iter()
        .zip(&expected.stdout)
        .position(|(a, e)| a != e);
    if let Some(i) = first_diff {
        return Some(Mismatch {
            line: i + 1,
            kind: MismatchKind::Content {
                expected: expected.stdout[i].to_owned(),
                actual: actual[i].to_owned(),
            },
        });
    }

    let common = actual.len().min(expected.stdout.len());
    if actual.len() < expected.stdout.len() {
        return Some(Mismatch {
            line: common + 1,
            kind: MismatchKind::MissingLine {
                expected: expected.stdout[common].to_owned(),
            },
        });
    }
    if actual.len() > expected.stdout.len() {
        return Some(Mismatch {
            line: common + 1,
            kind: MismatchKind::ExtraLine {
                actual: actual[common].to_owned(),
            },
        });
    }

    let code = actual_exit_code.to_string();
    if expected.exit_code != Some(code.as_str()) {
        return Some(Mismatch {
            line: expected.stdout.len() + 1,
            kind: MismatchKind::ExitCode {
                expected: expected.exit_code.map(str::to_owned),
                actual: actual_exit_code,
            },
        });
    }
    None
}

pub fn judge(actual_stdout: &str, actual_exit_code: u8, expected_text: &str) -> Verdict {
    let expected = ExpectedOutput::parse(expected_text);
    match find_mismatch(actual_stdout, actual_exit_code, &expected) {
        None => Verdict::Accepted,
        Some(m) => Verdict::WrongAnswer(m),
    }
}

/// The actual output laid out like an expected-output file, so both can be diffed.
pub fn render_actual(actual_stdout: &str, exit_code: u8) -> String {
    let mut res = String::with_capacity(actual_stdout.len() + 8);
    for line in normalized_lines(actual_stdout) {
        res += line;
        res.push('\n');
    }
    res += &exit_code.to_string();
    res.push('\n');
    res
}

/// A `/bin/sh` script that runs `argv`.
pub fn shell_script(argv: &[impl AsRef<OsStr>]) -> String {
    let cmd = argv
        .iter()
        .map(|arg| shell_quote(&arg.as_ref().to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ");
    format!("#!/bin/sh\nexec {}\n", cmd)
}

fn shell_quote(s: &str) -> String {
    // terminate '  ->  enclose ' with "  ->  restart '
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
