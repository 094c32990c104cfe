//! Render a [ResultSet] as a JUnit XML `testsuite` document.

use std::{
    borrow::Cow,
    io::{self, Write},
    time::Duration,
};

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::{Classification, Diagnostic, DirectiveKind, ResultSet, TapTest};

static TESTSUITE_TAG: &str = "testsuite";
static TESTCASE_TAG: &str = "testcase";
static FAILURE_TAG: &str = "failure";
static SKIPPED_TAG: &str = "skipped";
static SYSTEM_OUT_TAG: &str = "system-out";

/// Name of the testcase appended when the stream bailed out.
pub const BAIL_OUT_NAME: &str = "Bail out!";

/// An error that occurs while writing a JUnit report.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("error serializing JUnit report")]
    Xml(#[from] quick_xml::Error),
    #[error("error writing JUnit report")]
    Io(#[from] io::Error),
}

/// Writes a [ResultSet] as a single `testsuite` element.
///
/// ```rust
/// use tap2junit::{JunitWriter, TapParser};
///
/// let results = TapParser::new().parse("ok 1 - a\nBail out! crashed").unwrap();
/// let xml = JunitWriter::new("suite")
///     .classname("pkg")
///     .to_string(&results)
///     .unwrap();
/// assert!(xml.contains(r#"<testcase name="Bail out!" classname="pkg" time="0.000000">"#));
/// ```
#[derive(Clone, Debug)]
pub struct JunitWriter {
    name: String,
    classname: Option<String>,
    indent: usize,
}

impl JunitWriter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classname: None,
            indent: 4,
        }
    }

    /// Sets the `classname` attribute of every testcase.
    pub fn classname(mut self, classname: impl Into<String>) -> Self {
        self.classname = Some(classname.into());
        self
    }

    /// Number of spaces per nesting level; `0` writes everything on one line.
    pub fn indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn write(&self, results: &ResultSet<'_>, out: impl Write) -> Result<(), WriteError> {
        if self.indent == 0 {
            let mut writer = Writer::new(out);
            self.write_document(results, &mut writer)?;
            writer.get_mut().write_all(b"\n")?;
        } else {
            let mut writer = Writer::new_with_indent(out, b' ', self.indent);
            self.write_document(results, &mut writer)?;
            // Add a trailing newline.
            writer.write_indent()?;
        }
        Ok(())
    }

    pub fn to_string(&self, results: &ResultSet<'_>) -> Result<String, WriteError> {
        let mut buf = Vec::new();
        self.write(results, &mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| WriteError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    fn write_document(
        &self,
        results: &ResultSet<'_>,
        writer: &mut Writer<impl Write>,
    ) -> quick_xml::Result<()> {
        let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
        writer.write_event(Event::Decl(decl))?;

        let counts = results.counts();
        tracing::debug!(?counts, bailed_out = results.bail_out.is_some(), "writing report");

        let mut testsuite_tag = BytesStart::new(TESTSUITE_TAG);
        testsuite_tag.extend_attributes([
            ("name", &*xml_safe(&self.name)),
            ("tests", counts.tests.to_string().as_str()),
            ("failures", counts.failed.to_string().as_str()),
            ("errors", "0"),
            ("skipped", counts.skipped.to_string().as_str()),
            ("time", serialize_time(results.duration()).as_str()),
        ]);
        writer.write_event(Event::Start(testsuite_tag))?;

        for test in &results.tests {
            self.write_testcase(results, test, writer)?;
        }

        if let Some(bail_out) = &results.bail_out {
            let message = bail_out.reason.unwrap_or("test run aborted");
            let body = join_diagnostics(&bail_out.diagnostics);
            writer.write_event(Event::Start(self.testcase_tag(BAIL_OUT_NAME, None)))?;
            serialize_status(FAILURE_TAG, Some(message), non_empty(&body), writer)?;
            serialize_end_tag(TESTCASE_TAG, writer)?;
        }

        let system_out = suite_output(results);
        if !system_out.is_empty() {
            writer.write_event(Event::Start(BytesStart::new(SYSTEM_OUT_TAG)))?;
            writer.write_event(Event::Text(BytesText::new(&xml_safe(&system_out))))?;
            serialize_end_tag(SYSTEM_OUT_TAG, writer)?;
        }

        serialize_end_tag(TESTSUITE_TAG, writer)
    }

    fn testcase_tag<'t>(&self, name: &'t str, time: Option<Duration>) -> BytesStart<'t> {
        let mut tag = BytesStart::new(TESTCASE_TAG);
        tag.push_attribute(("name", &*xml_safe(name)));
        if let Some(classname) = &self.classname {
            tag.push_attribute(("classname", &*xml_safe(classname)));
        }
        tag.push_attribute(("time", serialize_time(time.unwrap_or_default()).as_str()));
        tag
    }

    fn write_testcase(
        &self,
        results: &ResultSet<'_>,
        test: &TapTest<'_>,
        writer: &mut Writer<impl Write>,
    ) -> quick_xml::Result<()> {
        let name = test.name();
        let tag = self.testcase_tag(&name, test.duration);

        match results.classify(test) {
            Classification::Failed => {
                let message = match &test.desc {
                    Some(desc) => desc.to_string(),
                    None => format!("test {} failed", test.number),
                };
                let body = join_diagnostics(&test.diagnostics);
                writer.write_event(Event::Start(tag))?;
                serialize_status(FAILURE_TAG, Some(&message), non_empty(&body), writer)?;
                serialize_end_tag(TESTCASE_TAG, writer)
            }
            Classification::Skipped => {
                let reason = match &test.directive {
                    Some(directive) if directive.kind == DirectiveKind::Skip => directive.reason,
                    _ => results.plan.as_ref().and_then(|plan| plan.reason),
                };
                writer.write_event(Event::Start(tag))?;
                serialize_status(SKIPPED_TAG, None, reason, writer)?;
                serialize_end_tag(TESTCASE_TAG, writer)
            }
            Classification::Passed
            | Classification::ExpectedFailure
            | Classification::UnexpectedPass => writer.write_event(Event::Empty(tag)),
        }
    }
}

fn serialize_status(
    tag_name: &'static str,
    message: Option<&str>,
    body: Option<&str>,
    writer: &mut Writer<impl Write>,
) -> quick_xml::Result<()> {
    let mut tag = BytesStart::new(tag_name);
    if let Some(message) = message {
        tag.push_attribute(("message", &*xml_safe(message)));
    }

    match body {
        Some(body) => {
            writer.write_event(Event::Start(tag))?;
            writer.write_event(Event::Text(BytesText::new(&xml_safe(body))))?;
            serialize_end_tag(tag_name, writer)
        }
        None => writer.write_event(Event::Empty(tag)),
    }
}

fn serialize_end_tag(
    tag_name: &'static str,
    writer: &mut Writer<impl Write>,
) -> quick_xml::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag_name)))
}

// Serialize time as seconds with 6 decimal points.
fn serialize_time(time: Duration) -> String {
    format!("{:.6}", time.as_secs_f64())
}

/// Replaces the characters XML 1.0 cannot carry, even escaped, with U+FFFD.
fn xml_safe(text: &str) -> Cow<'_, str> {
    fn allowed(c: char) -> bool {
        matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
    }

    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(
            text.chars()
                .map(|c| if allowed(c) { c } else { char::REPLACEMENT_CHARACTER })
                .collect(),
        )
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn join_diagnostics(diagnostics: &[Diagnostic<'_>]) -> String {
    diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Suite level text: the skip reason, leading diagnostics, unexpected passes and warnings.
fn suite_output(results: &ResultSet<'_>) -> String {
    let mut lines = Vec::new();

    if let Some(plan) = results.plan.as_ref().filter(|plan| plan.skip) {
        lines.push(match plan.reason {
            Some(reason) => format!("skipped: {reason}"),
            None => "skipped".to_string(),
        });
    }
    lines.extend(results.diagnostics.iter().map(Diagnostic::to_string));
    lines.extend(
        results
            .tests
            .iter()
            .filter(|test| results.classify(test) == Classification::UnexpectedPass)
            .map(|test| format!("test {} unexpectedly passed: {}", test.number, test.name())),
    );
    lines.extend(
        results
            .warnings
            .iter()
            .map(|warning| format!("warning: {warning}")),
    );

    lines.join("\n")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TapParser;
    use indoc::indoc;

    fn convert(document: &str) -> String {
        let results = TapParser::new().parse(document).unwrap();
        JunitWriter::new("suite").to_string(&results).unwrap()
    }

    #[test]
    fn pass_and_fail() {
        let xml = convert(indoc! {"
            1..2
            ok 1 - first check
            not ok 2 - second check
        "});
        insta::assert_snapshot!(xml, @r###"
        <?xml version="1.0" encoding="UTF-8"?>
        <testsuite name="suite" tests="2" failures="1" errors="0" skipped="0" time="0.000000">
            <testcase name="first check" time="0.000000"/>
            <testcase name="second check" time="0.000000">
                <failure message="second check"/>
            </testcase>
        </testsuite>
        "###);
    }

    #[test]
    fn bail_out_appends_failure() {
        let xml = convert(indoc! {"
            1..3
            ok 1 - a
            Bail out! crashed
            # core dumped
        "});
        insta::assert_snapshot!(xml, @r###"
        <?xml version="1.0" encoding="UTF-8"?>
        <testsuite name="suite" tests="1" failures="0" errors="0" skipped="0" time="0.000000">
            <testcase name="a" time="0.000000"/>
            <testcase name="Bail out!" time="0.000000">
                <failure message="crashed">core dumped</failure>
            </testcase>
        </testsuite>
        "###);
    }

    #[test]
    fn bail_out_without_tests() {
        let xml = convert("Bail out!");
        assert!(xml.contains(r#"tests="0" failures="0""#));
        assert!(xml.contains(r#"<failure message="test run aborted"/>"#));
    }

    #[test]
    fn directives() {
        let xml = convert(indoc! {"
            1..4
            ok 1 - plain
            not ok 2 - known # TODO known issue
            ok 3 - lucky # TODO not done
            ok 4 - bar # SKIP no network
        "});
        insta::assert_snapshot!(xml, @r###"
        <?xml version="1.0" encoding="UTF-8"?>
        <testsuite name="suite" tests="4" failures="0" errors="0" skipped="1" time="0.000000">
            <testcase name="plain" time="0.000000"/>
            <testcase name="known" time="0.000000"/>
            <testcase name="lucky" time="0.000000"/>
            <testcase name="bar" time="0.000000">
                <skipped>no network</skipped>
            </testcase>
            <system-out>test 3 unexpectedly passed: lucky</system-out>
        </testsuite>
        "###);
    }

    #[test]
    fn failure_body_holds_diagnostics() {
        let xml = convert(indoc! {"
            TAP version 13
            not ok 1
              ---
              duration_ms: 1500
              message: 'a < b'
              ...
            # see log
            1..1
        "});
        insta::assert_snapshot!(xml, @r###"
        <?xml version="1.0" encoding="UTF-8"?>
        <testsuite name="suite" tests="1" failures="1" errors="0" skipped="0" time="1.500000">
            <testcase name="test 1" time="1.500000">
                <failure message="test 1 failed">duration_ms: 1500
        message: &apos;a &lt; b&apos;
        see log</failure>
            </testcase>
        </testsuite>
        "###);
    }

    #[test]
    fn skipped_suite() {
        let xml = convert("1..0 # SKIP no database");
        assert!(xml.contains(r#"tests="0" failures="0" errors="0" skipped="0""#));
        assert!(xml.contains("<system-out>skipped: no database</system-out>"));
    }

    #[test]
    fn escapes_attributes_and_text() {
        let xml = convert("not ok 1 - a & b <c>\n# \"quoted\"");
        assert!(xml.contains(r#"<testcase name="a &amp; b &lt;c&gt;""#));
        assert!(xml.contains(r#"<failure message="a &amp; b &lt;c&gt;">&quot;quoted&quot;</failure>"#));
    }

    #[test]
    fn sums_durations() {
        let xml = convert(indoc! {"
            ok 1 - fast # time=0.5ms
            ok 2 - slow # time=1.25s
            ok 3 - unknown
        "});
        assert!(xml.contains(r#"tests="3" failures="0" errors="0" skipped="0" time="1.250500""#));
        assert!(xml.contains(r#"<testcase name="fast" time="0.000500"/>"#));
        assert!(xml.contains(r#"<testcase name="unknown" time="0.000000"/>"#));
    }

    #[test]
    fn warnings_are_reported() {
        let xml = convert("1..3\nok 1\nok 3\n");
        assert!(xml.contains("warning: line 3: expected test 2, found test 3"));
        assert!(xml.contains("warning: planned 3 tests but found 2"));
    }

    #[test]
    fn classname_and_compact_output() {
        let results = TapParser::new().parse("ok 1 - a").unwrap();
        let xml = JunitWriter::new("suite")
            .classname("pkg")
            .indent(0)
            .to_string(&results)
            .unwrap();
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <testsuite name=\"suite\" tests=\"1\" failures=\"0\" errors=\"0\" skipped=\"0\" time=\"0.000000\">\
             <testcase name=\"a\" classname=\"pkg\" time=\"0.000000\"/>\
             </testsuite>\n"
        );
    }

    #[test]
    fn preserves_order() {
        let xml = convert("ok 3 - c\nok 1 - a\nok 2 - b\n");
        let c = xml.find(r#"name="c""#).unwrap();
        let a = xml.find(r#"name="a""#).unwrap();
        let b = xml.find(r#"name="b""#).unwrap();
        assert!(c < a && a < b);
    }

    #[test]
    fn replaces_control_characters() {
        let xml = convert("not ok 1 - a\u{1}b\n# bell\u{7} tab\there\nBail out! \u{1b}[31mred");
        assert!(!xml.contains(|c: char| c.is_control() && !matches!(c, '\t' | '\n' | '\r')));
        assert!(xml.contains("<testcase name=\"a\u{FFFD}b\""));
        assert!(xml.contains("<failure message=\"a\u{FFFD}b\">bell\u{FFFD} tab\there</failure>"));
        assert!(xml.contains("<failure message=\"\u{FFFD}[31mred\"/>"));
        assert_eq!(xml_safe("plain\ttext"), Cow::Borrowed("plain\ttext"));
    }

    #[test]
    fn huge_durations_do_not_panic() {
        let xml = convert(indoc! {"
            ok 1 - a # time=10000000000000000000s
            ok 2 - b # time=10000000000000000000s
        "});
        assert!(xml.contains(r#"<testsuite name="suite" tests="2""#));
        assert!(xml.ends_with("</testsuite>\n"));
    }

    #[test]
    fn idempotent() {
        let document = "1..2\nok 1 - a # time=3ms\nnot ok 2 - b\n# why\n";
        assert_eq!(convert(document), convert(document));
    }
}
