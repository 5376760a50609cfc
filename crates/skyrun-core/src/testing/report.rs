use std::collections::HashSet;
use std::io::{self, Write};

use crossterm::style::{StyledContent, Stylize};

use super::case::{Case, CaseKind, CaseResult};
use super::suite::Suite;

/// Console rendering of a suite run.
///
/// Only reads the suite. `progress` can be called on every tick; `errors`,
/// `failures` and `summary` print nothing until every template has finished.
pub struct ShellReport<W: Write> {
    out: W,
    reported: HashSet<usize>,
}

fn label(case: &Case) -> String {
    match case.kind() {
        CaseKind::Operation(spec) => format!("operation ({})", spec.name),
        kind => kind.type_name().to_string(),
    }
}

fn styled(result: Option<CaseResult>) -> StyledContent<&'static str> {
    match result {
        Some(CaseResult::Success) => "SUCCESS".black().on_green(),
        Some(CaseResult::Fixed) => "FIXED".black().on_blue(),
        Some(CaseResult::Failed) => "FAILED".black().on_red(),
        Some(CaseResult::FailedExpected) => "FAILED (EXPECTED)".black().on_yellow(),
        Some(CaseResult::Error) => "ERROR".black().on_red(),
        None => "NOT RUN".stylize(),
    }
}

impl<W: Write> ShellReport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            reported: HashSet::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Prints each newly finished template with its case results.
    pub fn progress(&mut self, suite: &Suite) -> io::Result<()> {
        for (index, template) in suite.templates().iter().enumerate() {
            if !template.is_finished() || self.reported.contains(&index) {
                continue;
            }
            writeln!(self.out, "{}: {}", template.name(), template.state())?;
            for case in template.cases() {
                writeln!(self.out, "  {}: {}", label(case), styled(case.result()))?;
            }
            self.reported.insert(index);
        }
        self.out.flush()
    }

    /// Prints template and case errors, grouped by template.
    pub fn errors(&mut self, suite: &Suite) -> io::Result<()> {
        if !suite.is_finished() {
            return Ok(());
        }

        let mut block = String::new();
        for template in suite.templates() {
            let failing: Vec<&Case> = template
                .cases()
                .iter()
                .filter(|c| !c.errors().is_empty())
                .collect();
            if template.errors().is_empty() && failing.is_empty() {
                continue;
            }

            block.push_str(&format!("{}:\n", template.name()));
            for error in template.errors() {
                block.push_str(&format!("  {}\n", error));
            }
            for case in failing {
                block.push_str(&format!("  {}:\n", label(case)));
                for error in case.errors() {
                    block.push_str(&format!("    {}\n", error));
                }
            }
        }

        if block.is_empty() {
            return Ok(());
        }
        writeln!(self.out, "{}", "ERRORS:".black().on_red())?;
        writeln!(self.out, "{}", block.red())?;
        self.out.flush()
    }

    /// Prints case failures, grouped by template.
    pub fn failures(&mut self, suite: &Suite) -> io::Result<()> {
        if !suite.is_finished() {
            return Ok(());
        }

        let mut block = String::new();
        for template in suite.templates() {
            let failing: Vec<&Case> = template
                .cases()
                .iter()
                .filter(|c| !c.failures().is_empty())
                .collect();
            if failing.is_empty() {
                continue;
            }

            block.push_str(&format!("{}:\n", template.name()));
            for case in failing {
                block.push_str(&format!("  {}:\n", label(case)));
                for failure in case.failures() {
                    block.push_str(&format!("    {}\n", failure));
                }
            }
        }

        if block.is_empty() {
            return Ok(());
        }
        write!(self.out, "Failures:\n{}", block)?;
        self.out.flush()
    }

    /// One line tally of case results.
    pub fn summary(&mut self, suite: &Suite) -> io::Result<()> {
        if !suite.is_finished() {
            return Ok(());
        }

        let summary = suite.summary();
        let line = format!(
            "{} templates, {} cases: {} succeeded, {} fixed, {} failed, {} failed as expected, {} errored",
            suite.templates().len(),
            summary.total(),
            summary.success,
            summary.fixed,
            summary.failed,
            summary.failed_expected,
            summary.error,
        );
        if summary.is_green() {
            writeln!(self.out, "{}", line.green())?;
        } else {
            writeln!(self.out, "{}", line.red())?;
        }
        self.out.flush()
    }
}
