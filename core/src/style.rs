use colored::{Color, ColoredString, Colorize};
use crossterm::terminal;

use crate::testing::{JudgeCode, MismatchKind, RunSummary, TestReport, Verdict};

#[macro_export]
macro_rules! print_success {
    ($fmt:literal, $($e:tt)*) => {
        use ::colored::Colorize as _;
        println!("{}", format!($fmt, $($e)*).green())
    }
}

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for JudgeCode {
    fn color(&self) -> Color {
        use JudgeCode::*;
        if !self::is_truecolor_supported() {
            return match self {
                AC => Color::Green,
                WA => Color::Yellow,
                TLE => Color::Red,
                RE => Color::Magenta,
                IE => Color::Blue,
            };
        }

        match self {
            AC => Color::TrueColor {
                r: 30,
                g: 180,
                b: 40,
            },
            WA => Color::TrueColor {
                r: 210,
                g: 138,
                b: 4,
            },
            TLE => Color::TrueColor {
                r: 220,
                g: 42,
                b: 42,
            },
            RE => Color::TrueColor {
                r: 171,
                g: 40,
                b: 200,
            },
            IE => Color::TrueColor {
                r: 60,
                g: 110,
                b: 220,
            },
        }
    }
}

pub fn judge_icon(judge: JudgeCode) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {} ", judge)
        .on_color(judge.color())
        .bold()
        .color(fg)
}

/// `(k/total) <name>: <badge> <verdict> [ms]`
pub fn verdict_line(report: &TestReport, total: usize) -> String {
    let code = report.verdict.code();
    let msg = report.verdict.to_string();
    let msg = if report.verdict.is_accepted() {
        msg.green()
    } else {
        msg.color(code.color())
    };
    format!(
        "({}/{}) {}: {}{} {} {}",
        report.index,
        total,
        report.name.bold(),
        self::judge_icon(code),
        " ".repeat(3 - code.to_string().len()),
        msg,
        format!("[{}ms]", report.elapsed.as_millis()).dimmed(),
    )
}

/// Running tally for the spinner, e.g. `7/20 done  AC 5  WA 2`.
pub fn tally(summary: &RunSummary) -> String {
    let counts = summary
        .counts
        .iter()
        .map(|(code, cnt)| format!("{} {}", code, cnt))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}/{} done  {}", summary.finished(), summary.total, counts)
}

pub fn print_summary(summary: &RunSummary) {
    let bar = "-".repeat(5);
    print!("{} ", bar);

    let total = summary.total;
    let passed = summary.passed();
    let accepted = format!("Accepted: ({}/{})", passed, total);
    let failed = format!("Failed: ({}/{})", summary.failed(), total);

    if summary.all_accepted() {
        print!("{}  {}", accepted.green(), failed.dimmed());
    } else {
        let detail_msg = summary
            .counts
            .iter()
            .filter(|(&judge, _)| judge != JudgeCode::AC)
            .map(|(&judge, &cnt)| {
                format!(
                    "{}{}{}",
                    self::judge_icon(judge),
                    "x".dimmed(),
                    cnt.to_string().bold().bright_white(),
                )
            })
            .collect::<Vec<String>>()
            .join(", ");

        print!("{}  {}", accepted.green(), failed.bright_red());
        if !detail_msg.is_empty() {
            print!(" ({})", detail_msg);
        }
    }

    if summary.interrupted {
        print!(
            "  {}",
            format!("Interrupted: {} not judged", summary.unfinished())
                .on_yellow()
                .black()
                .bold()
        );
    }

    println!(" {}", bar);
}

pub fn print_failure_detail(report: &TestReport) {
    let (cols, _) = terminal::size().unwrap_or((40, 40));

    const BOLD_LINE: &str = "━";
    const THIN_LINE: &str = "─";

    let bold_bar = BOLD_LINE.repeat(cols as usize).blue().bold();

    println!(
        "\n{}: {} [{}ms]\n{}",
        report.name.color(Color::BrightYellow).bold(),
        self::judge_icon(report.verdict.code()),
        report.elapsed.as_millis(),
        bold_bar,
    );

    let sub_title = |s: &str| {
        println!(
            "{}{}",
            s.cyan().bold(),
            THIN_LINE
                .repeat((cols as usize).saturating_sub(s.len() + 1))
                .bright_black(),
        )
    };

    match &report.verdict {
        Verdict::WrongAnswer(m) => {
            sub_title(&format!("[first mismatch at line {}]", m.line));
            let (expected, actual) = match &m.kind {
                MismatchKind::Content { expected, actual } => {
                    (expected.to_owned(), actual.to_owned())
                }
                MismatchKind::MissingLine { expected } => (expected.to_owned(), missing()),
                MismatchKind::ExtraLine { actual } => (missing(), actual.to_owned()),
                MismatchKind::ExitCode { expected, actual } => (
                    format!("exit code {}", expected.as_deref().unwrap_or("<none>")),
                    format!("exit code {}", actual),
                ),
            };
            println!("{} {}", "expected:".bright_black(), expected);
            println!("{} {}", "  actual:".bright_black(), actual);
        }
        verdict => println!("{}", verdict),
    }

    println!("{}", bold_bar);
}

fn missing() -> String {
    "<EOF>".magenta().dimmed().to_string()
}
