//! `tap2junit` — convert a TAP stream into a JUnit XML report.
//!
//! ```text
//! tap2junit [-i <input>] [-o <output>] [-n <name>] [-p <package>]
//! ```
//!
//! Reads standard input when no input (or `-`) is given and writes standard output when no
//! output (or `-`) is given. Failing test points do not change the exit code; only I/O errors
//! and a misplaced plan do.

use std::{
    fs,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tap2junit::{JunitWriter, TapParser};
use tracing_subscriber::EnvFilter;

const DEFAULT_NAME: &str = "tap2junit";

/// Convert TAP output into a JUnit XML report.
#[derive(Parser, Debug)]
#[command(name = "tap2junit", author, version, about, long_about = None)]
struct Args {
    /// TAP file to read, `-` for standard input.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// XML file to write, `-` for standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Name of the test suite, defaults to the input file stem.
    #[arg(short, long)]
    name: Option<String>,

    /// Classname stamped on every testcase.
    #[arg(short, long)]
    package: Option<String>,

    /// Log more, can be repeated.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// The file to use, or `None` for standard input or output (no path, or `-`).
fn file_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|path| *path != Path::new("-"))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so standard output stays clean for the report.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn read_input(input: Option<&Path>) -> Result<String> {
    match file_path(input) {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read TAP input `{}`", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read TAP input from standard input")?;
            Ok(buf)
        }
    }
}

fn suite_name(args: &Args) -> String {
    if let Some(name) = &args.name {
        return name.clone();
    }
    file_path(args.input.as_deref())
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let input = read_input(args.input.as_deref())?;
    let results = TapParser::new()
        .parse(&input)
        .context("malformed TAP input")?;

    let counts = results.counts();
    tracing::info!(
        tests = counts.tests,
        failed = counts.failed,
        skipped = counts.skipped,
        bailed_out = results.bail_out.is_some(),
        "converted TAP stream"
    );

    let mut writer = JunitWriter::new(suite_name(&args));
    if let Some(package) = &args.package {
        writer = writer.classname(package.as_str());
    }

    match file_path(args.output.as_deref()) {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("failed to create `{}`", path.display()))?;
            let mut out = BufWriter::new(file);
            writer
                .write(&results, &mut out)
                .with_context(|| format!("failed to write `{}`", path.display()))?;
            out.flush()
                .with_context(|| format!("failed to write `{}`", path.display()))?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            writer
                .write(&results, &mut out)
                .context("failed to write report to standard output")?;
            out.flush()
                .context("failed to write report to standard output")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dash_and_absent_paths_are_stdio() {
        assert_eq!(file_path(None), None);
        assert_eq!(file_path(Some(Path::new("-"))), None);
        assert_eq!(
            file_path(Some(Path::new("out/unit.xml"))),
            Some(Path::new("out/unit.xml"))
        );
    }

    #[test]
    fn suite_name_defaults_to_input_stem() {
        let args = Args::parse_from(["tap2junit", "-i", "results/unit.tap"]);
        assert_eq!(suite_name(&args), "unit");

        let args = Args::parse_from(["tap2junit", "-i", "-"]);
        assert_eq!(suite_name(&args), DEFAULT_NAME);

        let args = Args::parse_from(["tap2junit", "-i", "unit.tap", "-n", "named"]);
        assert_eq!(suite_name(&args), "named");
    }
}
