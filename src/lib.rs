//! This crate converts [Test Anything Protocol](https://testanything.org) output into a JUnit
//! XML report.
//!
//! Reading is permissive: unknown lines are skipped, irregularities such as sequence gaps or a
//! plan that does not match the number of test points are recorded as [Warning]s. Only a plan
//! that cannot be placed (a second plan, or test points after a trailing plan) is an [Error].
//!
//! The main entrypoints are the [TapParser] structure, which builds a [ResultSet], and the
//! [JunitWriter], which renders it.
//!
//! # Example
//!
//! ```rust
//! use tap2junit::{JunitWriter, TapParser};
//!
//! let document = "1..2\nok 1 - first check\nnot ok 2 - second check\n";
//! let mut parser = TapParser::new();
//! let results = parser.parse(document).unwrap();
//!
//! let counts = results.counts();
//! assert_eq!(counts.tests, 2);
//! assert_eq!(counts.failed, 1);
//!
//! let xml = JunitWriter::new("example").to_string(&results).unwrap();
//! assert!(xml.contains(r#"<testsuite name="example" tests="2" failures="1""#));
//! ```

use std::{borrow::Cow, fmt, time::Duration};

pub mod junit;

pub use junit::{JunitWriter, WriteError};


/// The TAP versions that may be declared by a `TAP version N` line.
pub const SUPPORTED_VERSIONS: [u32; 2] = [13, 14];

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TapPlan<'a> {
    /// Upper bound of the plan, `N` in `1..N`.
    pub count: usize,
    /// Whether the whole suite was skipped (`1..0 # SKIP reason`).
    pub skip: bool,
    /// Text following the `#` of the plan, without the skip keyword.
    pub reason: Option<&'a str>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum DirectiveKind {
    Skip,
    Todo,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TapDirective<'a> {
    pub kind: DirectiveKind,
    pub reason: Option<&'a str>,
}

/// Text attached to a test point (or to the suite) after it was reported.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Diagnostic<'a> {
    /// A `# comment` line, without the leading `#`.
    Comment(&'a str),
    /// The lines of a `  ---` / `  ...` block, without their indentation.
    Yaml(Vec<&'a str>),
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comment(comment) => f.write_str(comment),
            Self::Yaml(lines) => f.write_str(&lines.join("\n")),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TapTest<'a> {
    pub result: bool,
    /// Explicit number of the result line, or its position in the stream.
    pub number: usize,
    pub desc: Option<Cow<'a, str>>,
    pub directive: Option<TapDirective<'a>>,
    pub diagnostics: Vec<Diagnostic<'a>>,
    pub duration: Option<Duration>,
}

/// How a test point counts towards the report.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Classification {
    Passed,
    Failed,
    Skipped,
    /// `not ok` with a `TODO` directive.
    ExpectedFailure,
    /// `ok` with a `TODO` directive.
    UnexpectedPass,
}

impl TapTest<'_> {
    pub fn classification(&self) -> Classification {
        match (&self.directive, self.result) {
            (
                Some(TapDirective {
                    kind: DirectiveKind::Skip,
                    ..
                }),
                _,
            ) => Classification::Skipped,
            (
                Some(TapDirective {
                    kind: DirectiveKind::Todo,
                    ..
                }),
                false,
            ) => Classification::ExpectedFailure,
            (
                Some(TapDirective {
                    kind: DirectiveKind::Todo,
                    ..
                }),
                true,
            ) => Classification::UnexpectedPass,
            (None, true) => Classification::Passed,
            (None, false) => Classification::Failed,
        }
    }

    /// The description, or `test <n>` when the result line had none.
    pub fn name(&self) -> Cow<'_, str> {
        match &self.desc {
            Some(desc) => Cow::Borrowed(desc.as_ref()),
            None => Cow::Owned(format!("test {}", self.number)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct BailOut<'a> {
    pub reason: Option<&'a str>,
    /// Diagnostics read after the bail out line.
    pub diagnostics: Vec<Diagnostic<'a>>,
}

/// Irregularities that were tolerated while reading a TAP stream.
///
/// `line` fields are 1-based line numbers in the input.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Warning {
    DuplicateVersion { line: usize },
    UnsupportedVersion { line: usize, version: String },
    SequenceGap { line: usize, expected: usize, found: usize },
    OutOfOrder { line: usize, expected: usize, found: usize },
    PlanMismatch { planned: usize, found: usize },
    OrphanYaml { line: usize },
    UnterminatedYaml { line: usize },
    IgnoredAfterBailOut { line: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateVersion { line } => {
                write!(f, "line {line}: repeated TAP version line ignored")
            }
            Self::UnsupportedVersion { line, version } => {
                write!(f, "line {line}: unsupported TAP version `{version}` ignored")
            }
            Self::SequenceGap {
                line,
                expected,
                found,
            } => write!(
                f,
                "line {line}: expected test {expected}, found test {found}"
            ),
            Self::OutOfOrder {
                line,
                expected,
                found,
            } => write!(
                f,
                "line {line}: test {found} is out of order, expected test {expected}"
            ),
            Self::PlanMismatch { planned, found } => {
                write!(f, "planned {planned} tests but found {found}")
            }
            Self::OrphanYaml { line } => {
                write!(f, "line {line}: YAML block does not follow a test point")
            }
            Self::UnterminatedYaml { line } => {
                write!(f, "line {line}: YAML block is never closed")
            }
            Self::IgnoredAfterBailOut { line } => {
                write!(f, "line {line}: ignored after bail out")
            }
        }
    }
}

/// Aggregate counts of a [ResultSet].
///
/// `passed + failed + skipped == tests`. Expected failures and unexpected passes count as
/// passed and are also reported in `todo`.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct Counts {
    pub tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
}

/// Everything read from one TAP stream.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct ResultSet<'a> {
    pub version: Option<u32>,
    pub plan: Option<TapPlan<'a>>,
    pub tests: Vec<TapTest<'a>>,
    /// Diagnostics seen before the first test point.
    pub diagnostics: Vec<Diagnostic<'a>>,
    pub bail_out: Option<BailOut<'a>>,
    pub warnings: Vec<Warning>,
}

impl<'a> ResultSet<'a> {
    pub fn is_skipped_suite(&self) -> bool {
        self.plan.as_ref().is_some_and(|plan| plan.skip)
    }

    /// Classification of `test` within this suite: every point of a skipped suite is skipped.
    pub fn classify(&self, test: &TapTest<'a>) -> Classification {
        if self.is_skipped_suite() {
            Classification::Skipped
        } else {
            test.classification()
        }
    }

    pub fn counts(&self) -> Counts {
        self.tests
            .iter()
            .fold(Counts::default(), |mut counts, test| {
                counts.tests += 1;
                match self.classify(test) {
                    Classification::Passed => counts.passed += 1,
                    Classification::Failed => counts.failed += 1,
                    Classification::Skipped => counts.skipped += 1,
                    Classification::ExpectedFailure | Classification::UnexpectedPass => {
                        counts.passed += 1;
                        counts.todo += 1;
                    }
                }
                counts
            })
    }

    /// Sum of the known durations of the test points, saturating at [Duration::MAX].
    pub fn duration(&self) -> Duration {
        self.tests
            .iter()
            .filter_map(|test| test.duration)
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Plan on line {line} follows the plan declared on line {first}")]
    DuplicatePlan { line: usize, first: usize },
    #[error("Test point on line {line} follows the trailing plan on line {plan}")]
    TestAfterPlan { line: usize, plan: usize },
}

/// A result line before it is numbered.
#[derive(PartialEq, Eq, Debug)]
struct ResultLine<'a> {
    result: bool,
    number: Option<usize>,
    desc: Option<Cow<'a, str>>,
    directive: Option<TapDirective<'a>>,
    duration: Option<Duration>,
}

/// A classified input line.
#[derive(PartialEq, Eq, Debug)]
enum Line<'a> {
    Version(&'a str),
    Plan(TapPlan<'a>),
    Result(ResultLine<'a>),
    BailOut(Option<&'a str>),
    Diagnostic(&'a str),
    YamlStart,
    YamlEnd,
    Unrecognized,
}

/// Line matchers, in precedence order.
const MATCHERS: [for<'l> fn(&'l str) -> Option<Line<'l>>; 6] = [
    version_line,
    plan_line,
    result_line,
    bail_out_line,
    diagnostic_line,
    yaml_marker,
];

fn classify(line: &str) -> Line<'_> {
    MATCHERS
        .iter()
        .find_map(|matcher| matcher(line))
        .unwrap_or(Line::Unrecognized)
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn version_line(line: &str) -> Option<Line<'_>> {
    line.strip_prefix("TAP version")
        .map(|version| Line::Version(version.trim()))
}

fn plan_line(line: &str) -> Option<Line<'_>> {
    let (low, rest) = line.split_once("..")?;
    if low.is_empty() || !low.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let count = rest[..digits].parse().ok()?;
    let tail = rest[digits..].trim();

    let (skip, reason) = if tail.is_empty() {
        (false, None)
    } else {
        let comment = tail.strip_prefix('#')?.trim();
        let (word, after) = comment
            .split_once(char::is_whitespace)
            .unwrap_or((comment, ""));
        if word.get(..4).is_some_and(|w| w.eq_ignore_ascii_case("skip")) {
            (true, non_empty(after))
        } else {
            (false, non_empty(comment))
        }
    };

    Some(Line::Plan(TapPlan {
        count,
        skip,
        reason,
    }))
}

fn result_line(line: &str) -> Option<Line<'_>> {
    let (result, rest) = if let Some(rest) = line.strip_prefix("not ok") {
        (false, rest)
    } else if let Some(rest) = line.strip_prefix("ok") {
        (true, rest)
    } else {
        return None;
    };

    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    let rest = rest.trim();

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (number, rest) = match rest[digits..].chars().next() {
        None | Some(' ' | '\t') if digits > 0 => (rest[..digits].parse().ok(), &rest[digits..]),
        _ => (None, rest),
    };

    let rest = rest.trim_start();
    let rest = rest.strip_prefix('-').unwrap_or(rest).trim();

    let mut desc = rest;
    let mut directive = None;
    let mut duration = None;
    for idx in unescaped_hashes(rest) {
        let tail = &rest[idx + 1..];
        if let Some(found) = parse_directive(tail) {
            directive = Some(found);
        } else if let Some(found) = parse_timing(tail) {
            duration = Some(found);
        } else {
            continue;
        }
        desc = rest[..idx].trim();
        break;
    }

    Some(Line::Result(ResultLine {
        result,
        number,
        desc: non_empty(desc).map(unescape),
        directive,
        duration,
    }))
}

fn bail_out_line(line: &str) -> Option<Line<'_>> {
    const BAIL_OUT: &str = "bail out!";
    if line.len() >= BAIL_OUT.len()
        && line.is_char_boundary(BAIL_OUT.len())
        && line[..BAIL_OUT.len()].eq_ignore_ascii_case(BAIL_OUT)
    {
        Some(Line::BailOut(non_empty(&line[BAIL_OUT.len()..])))
    } else {
        None
    }
}

fn diagnostic_line(line: &str) -> Option<Line<'_>> {
    line.strip_prefix('#')
        .map(|comment| Line::Diagnostic(comment.trim()))
}

fn yaml_marker(line: &str) -> Option<Line<'_>> {
    match line.trim_end() {
        "  ---" => Some(Line::YamlStart),
        "  ..." => Some(Line::YamlEnd),
        _ => None,
    }
}

/// Byte offsets of the `#` characters that are not escaped by a backslash.
fn unescaped_hashes(text: &str) -> impl Iterator<Item = usize> + '_ {
    let mut escaped = false;
    text.bytes().enumerate().filter_map(move |(idx, c)| {
        let found = c == b'#' && !escaped;
        escaped = c == b'\\' && !escaped;
        found.then_some(idx)
    })
}

fn unescape(desc: &str) -> Cow<'_, str> {
    if !desc.contains('\\') {
        return Cow::Borrowed(desc);
    }

    let mut out = String::with_capacity(desc.len());
    let mut chars = desc.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ ('#' | '\\')) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Parses the text after a `#` as a `SKIP` or `TODO` directive.
///
/// The keyword is case-insensitive and must not be followed by an alphanumeric character. An
/// optional `:` after the keyword is dropped from the reason.
fn parse_directive(text: &str) -> Option<TapDirective<'_>> {
    let text = text.trim_start();
    let keyword = text.get(..4)?;
    let kind = if keyword.eq_ignore_ascii_case("skip") {
        DirectiveKind::Skip
    } else if keyword.eq_ignore_ascii_case("todo") {
        DirectiveKind::Todo
    } else {
        return None;
    };

    let rest = &text[4..];
    if rest.starts_with(|c: char| c.is_alphanumeric()) {
        return None;
    }
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':').unwrap_or(rest);

    Some(TapDirective {
        kind,
        reason: non_empty(rest),
    })
}

/// Parses a `time=12.5ms` / `time=0.3s` annotation.
fn parse_timing(text: &str) -> Option<Duration> {
    let value = text.trim().strip_prefix("time=")?;
    let seconds = if let Some(ms) = value.strip_suffix("ms") {
        ms.parse::<f64>().ok()? / 1000.0
    } else {
        value.strip_suffix('s')?.parse::<f64>().ok()?
    };
    Duration::try_from_secs_f64(seconds).ok()
}

/// Reads `duration_ms: <float>` from the lines of a YAML block.
fn yaml_duration(lines: &[&str]) -> Option<Duration> {
    lines.iter().find_map(|line| {
        let ms = line.trim().strip_prefix("duration_ms:")?.trim();
        let ms = ms.trim_matches(|c| c == '"' || c == '\'');
        Duration::try_from_secs_f64(ms.parse::<f64>().ok()? / 1000.0).ok()
    })
}

enum State<'a> {
    Body,
    Yaml { start: usize, lines: Vec<&'a str> },
}

#[derive(Clone, Copy)]
struct PlanPosition {
    line: usize,
    trailing: bool,
}

///
/// Entrypoint of this library. This struct holds the stream state while parsing.
/// You should only need to call [parse](Self::parse).
///
pub struct TapParser<'a> {
    state: State<'a>,
    results: ResultSet<'a>,
    /// Index of the test point that receives trailing diagnostics.
    current: Option<usize>,
    plan: Option<PlanPosition>,
    line_no: usize,
}

impl<'a> TapParser<'a> {
    pub fn new() -> Self {
        Self {
            state: State::Body,
            results: ResultSet::default(),
            current: None,
            plan: None,
            line_no: 0,
        }
    }

    fn warn(&mut self, warning: Warning) {
        tracing::warn!("{warning}");
        self.results.warnings.push(warning);
    }

    fn attach(&mut self, diagnostic: Diagnostic<'a>) {
        if let Some(bail_out) = &mut self.results.bail_out {
            bail_out.diagnostics.push(diagnostic);
        } else if let Some(idx) = self.current {
            let test = &mut self.results.tests[idx];
            if let Diagnostic::Yaml(lines) = &diagnostic {
                test.duration = test.duration.or_else(|| yaml_duration(lines));
            }
            test.diagnostics.push(diagnostic);
        } else {
            self.results.diagnostics.push(diagnostic);
        }
    }

    fn close_yaml(&mut self, start: usize, lines: Vec<&'a str>) {
        if self.current.is_none() && self.results.bail_out.is_none() {
            self.warn(Warning::OrphanYaml { line: start });
        }
        self.attach(Diagnostic::Yaml(lines));
    }

    fn read_version(&mut self, version: &str) {
        let line = self.line_no;
        if self.results.version.is_some() {
            self.warn(Warning::DuplicateVersion { line });
            return;
        }

        match version.parse() {
            Ok(v) if SUPPORTED_VERSIONS.contains(&v) => self.results.version = Some(v),
            _ => self.warn(Warning::UnsupportedVersion {
                line,
                version: version.to_string(),
            }),
        }
    }

    fn read_plan(&mut self, plan: TapPlan<'a>) -> Result<(), Error> {
        let line = self.line_no;
        if self.results.bail_out.is_some() {
            self.warn(Warning::IgnoredAfterBailOut { line });
            return Ok(());
        }
        if let Some(first) = self.plan {
            return Err(Error::DuplicatePlan {
                line,
                first: first.line,
            });
        }

        self.plan = Some(PlanPosition {
            line,
            trailing: !self.results.tests.is_empty(),
        });
        self.results.plan = Some(plan);
        Ok(())
    }

    fn read_result(&mut self, test: ResultLine<'a>) -> Result<(), Error> {
        let line = self.line_no;
        if self.results.bail_out.is_some() {
            self.warn(Warning::IgnoredAfterBailOut { line });
            return Ok(());
        }
        if let Some(PlanPosition {
            line: plan,
            trailing: true,
        }) = self.plan
        {
            return Err(Error::TestAfterPlan { line, plan });
        }

        let expected = self.results.tests.len() + 1;
        let number = test.number.unwrap_or(expected);
        if number > expected {
            self.warn(Warning::SequenceGap {
                line,
                expected,
                found: number,
            });
        } else if number < expected {
            self.warn(Warning::OutOfOrder {
                line,
                expected,
                found: number,
            });
        }

        self.current = Some(self.results.tests.len());
        self.results.tests.push(TapTest {
            result: test.result,
            number,
            desc: test.desc,
            directive: test.directive,
            diagnostics: Vec::new(),
            duration: test.duration,
        });
        Ok(())
    }

    fn read_line(&mut self, line: &'a str) -> Result<(), Error> {
        self.line_no += 1;

        if let State::Yaml { start, lines } = &mut self.state {
            if line.trim_end() == "  ..." {
                let (start, lines) = (*start, std::mem::take(lines));
                self.state = State::Body;
                self.close_yaml(start, lines);
            } else {
                lines.push(line.strip_prefix("  ").unwrap_or(line).trim_end());
            }
            return Ok(());
        }

        let classified = classify(line);
        tracing::trace!(line = self.line_no, ?classified, "classified line");

        match classified {
            Line::Version(version) => self.read_version(version),
            Line::Plan(plan) => self.read_plan(plan)?,
            Line::Result(test) => self.read_result(test)?,
            Line::BailOut(reason) => {
                if self.results.bail_out.is_none() {
                    tracing::debug!(line = self.line_no, ?reason, "bailed out");
                    self.results.bail_out = Some(BailOut {
                        reason,
                        diagnostics: Vec::new(),
                    });
                }
            }
            Line::Diagnostic(comment) => self.attach(Diagnostic::Comment(comment)),
            Line::YamlStart => {
                self.state = State::Yaml {
                    start: self.line_no,
                    lines: Vec::new(),
                }
            }
            Line::YamlEnd | Line::Unrecognized => {}
        }

        Ok(())
    }

    fn finish(&mut self) {
        if let State::Yaml { start, lines } = std::mem::replace(&mut self.state, State::Body) {
            self.warn(Warning::UnterminatedYaml { line: start });
            self.close_yaml(start, lines);
        }

        if self.results.bail_out.is_none() {
            if let Some(plan) = &self.results.plan {
                let (planned, found) = (plan.count, self.results.tests.len());
                if !plan.skip && planned != found {
                    self.warn(Warning::PlanMismatch { planned, found });
                }
            }
        }
    }

    ///
    /// This function allows you to extract the results from a parser even if parsing failed.
    /// The results hold everything read before the error.
    ///
    pub fn into_result_set(self) -> ResultSet<'a> {
        self.results
    }

    ///
    /// Reads the lines of a TAP stream into a [ResultSet].
    ///
    /// In case of errors you can access the previous results with the
    /// [into_result_set](Self::into_result_set) method
    ///
    pub fn parse_lines<I>(&mut self, lines: I) -> Result<ResultSet<'a>, Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines {
            self.read_line(line)?;
        }
        self.finish();

        tracing::debug!(
            tests = self.results.tests.len(),
            warnings = self.results.warnings.len(),
            "parsed TAP stream"
        );

        Ok(std::mem::take(&mut self.results))
    }

    /// Splits `input` into lines (`\n` or `\r\n`) and reads them, see
    /// [parse_lines](Self::parse_lines).
    pub fn parse(&mut self, input: &'a str) -> Result<ResultSet<'a>, Error> {
        self.parse_lines(input.lines())
    }
}

impl<'a> Default for TapParser<'a> {
    fn default() -> Self {
        Self::new()
    }
}
