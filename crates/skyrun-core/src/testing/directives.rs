//! `#test` directives embedded in documents.
//!
//! ```text
//! #test:compile_only=true
//! #test:execution_state=running
//! #test:execution_alternate_state=failed
//!
//! #test_operation:execution_state=completed
//! #test_operation:execution_alternate_state=failed
//! #test_operation_param:size=large
//! operation "scale" do
//! ```
//!
//! The compile-only marker overrides everything else. Otherwise the document
//! yields one execution case followed by one operation case per tagged
//! `operation` block, in source order.

use regex::Regex;
use thiserror::Error;

use super::case::{Case, Expectation, OperationSpec};

/// Present anywhere in a document, turns it into a single compile check.
pub const COMPILE_ONLY_MARKER: &str = "#test:compile_only=true";

pub const EXECUTION_STATE_PATTERN: &str = r"(?m)^#test:execution_state=([0-9a-zA-Z ]*)";

pub const EXECUTION_ALTERNATE_STATE_PATTERN: &str =
    r"(?m)^#test:execution_alternate_state=([0-9a-zA-Z ]*)";

/// Directive lines directly above an `operation "<name>" do` line.
/// Captures the directive text and the operation name.
pub const OPERATION_BLOCK_PATTERN: &str = r#"(?s)(#test_operation:.*?)\noperation ["'](.*?)["'] do"#;

pub const OPERATION_STATE_PATTERN: &str = r"(?m)^#test_operation:execution_state=([0-9a-zA-Z ]*)";

pub const OPERATION_ALTERNATE_STATE_PATTERN: &str =
    r"(?m)^#test_operation:execution_alternate_state=([0-9a-zA-Z ]*)";

pub const OPERATION_PARAM_PATTERN: &str = r"(?m)#test_operation_param:(.*?)=(.*?)$";

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("No #test:execution_state directive and not marked #test:compile_only=true")]
    MissingExecutionState,

    #[error("Operation ({operation}) has no #test_operation:execution_state directive")]
    MissingOperationState { operation: String },

    #[error("Invalid directive pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Directive patterns, compiled once per document.
struct Patterns {
    execution_state: Regex,
    execution_alternate_state: Regex,
    operation_block: Regex,
    operation_state: Regex,
    operation_alternate_state: Regex,
    operation_param: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, DirectiveError> {
        Ok(Self {
            execution_state: Regex::new(EXECUTION_STATE_PATTERN)?,
            execution_alternate_state: Regex::new(EXECUTION_ALTERNATE_STATE_PATTERN)?,
            operation_block: Regex::new(OPERATION_BLOCK_PATTERN)?,
            operation_state: Regex::new(OPERATION_STATE_PATTERN)?,
            operation_alternate_state: Regex::new(OPERATION_ALTERNATE_STATE_PATTERN)?,
            operation_param: Regex::new(OPERATION_PARAM_PATTERN)?,
        })
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|value| !value.is_empty())
}

fn expectation(state: &Regex, alternate: &Regex, text: &str) -> Option<Expectation> {
    let expectation = Expectation::new(capture(state, text)?);
    Some(match capture(alternate, text) {
        Some(alternate) => expectation.with_alternate(alternate),
        None => expectation,
    })
}

/// Builds the cases a document declares.
pub fn parse_cases(text: &str) -> Result<Vec<Case>, DirectiveError> {
    if text.contains(COMPILE_ONLY_MARKER) {
        return Ok(vec![Case::compile_only()]);
    }

    let patterns = Patterns::compile()?;

    let execution = expectation(
        &patterns.execution_state,
        &patterns.execution_alternate_state,
        text,
    )
    .ok_or(DirectiveError::MissingExecutionState)?;

    let mut cases = vec![Case::execution(execution)];

    for operation in patterns.operation_block.captures_iter(text) {
        let tags = &operation[1];
        let name = operation[2].to_string();

        let expectation = expectation(
            &patterns.operation_state,
            &patterns.operation_alternate_state,
            tags,
        )
        .ok_or_else(|| DirectiveError::MissingOperationState {
            operation: name.clone(),
        })?;

        let mut spec = OperationSpec::new(name, expectation);
        for pair in patterns.operation_param.captures_iter(tags) {
            spec = spec.with_param(
                pair[1].trim(),
                pair[2].trim_end_matches('\r'),
            );
        }
        cases.push(Case::operation(spec));
    }

    Ok(cases)
}
