mod common;

use std::sync::Arc;

use common::*;
use skyrun_core::testing::{ShellReport, Suite, Template};

fn text(report: ShellReport<Vec<u8>>) -> String {
    String::from_utf8(report.into_inner()).unwrap()
}

async fn finish(suite: &mut Suite) {
    let mut pumps = 0;
    while suite.pump().await {
        pumps += 1;
        assert!(pumps < 20, "suite never finished");
    }
}

#[tokio::test]
async fn test_progress_prints_each_template_once() {
    let fake = Arc::new(FakeService::new());
    fake.ok(Call::Compile, no_content());
    let mut suite = Suite::from_templates(
        fake,
        vec![Template::from_source("foo.cat.rb", COMPILE_ONLY_DOC).unwrap()],
    );
    let mut report = ShellReport::new(Vec::new());

    report.progress(&suite).unwrap();
    assert!(report.get_ref().is_empty());

    finish(&mut suite).await;
    report.progress(&suite).unwrap();
    report.progress(&suite).unwrap();

    let out = text(report);
    assert_eq!(out.matches("foo.cat.rb: finished").count(), 1);
    assert_eq!(out.matches("  compile_only: ").count(), 1);
    assert!(out.contains("SUCCESS"));
}

#[tokio::test]
async fn test_errors_wait_for_every_template() {
    let fake = Arc::new(FakeService::new());
    fake.fail(Call::CreateExecution, 500, r#"{"foo":"barbaz"}"#);
    let mut suite = Suite::from_templates(
        fake,
        vec![Template::from_source("launch.cat.rb", "#test:execution_state=running\n").unwrap()],
    );

    suite.pump().await;
    let mut report = ShellReport::new(Vec::new());
    report.errors(&suite).unwrap();
    report.failures(&suite).unwrap();
    report.summary(&suite).unwrap();
    assert!(text(report).is_empty());

    finish(&mut suite).await;
    let mut report = ShellReport::new(Vec::new());
    report.errors(&suite).unwrap();
    let out = text(report);

    assert!(out.contains("ERRORS:"));
    assert!(out.contains("launch.cat.rb:\n  Failed to create execution from template"));
    assert!(out.contains("HTTP Response Code: 500"));
}

#[tokio::test]
async fn test_case_errors_labelled_by_case_type() {
    let fake = Arc::new(FakeService::new());
    fake.fail(Call::Compile, 500, "internal error");
    let mut suite = Suite::from_templates(
        fake,
        vec![Template::from_source("foo.cat.rb", COMPILE_ONLY_DOC).unwrap()],
    );
    finish(&mut suite).await;

    let mut report = ShellReport::new(Vec::new());
    report.errors(&suite).unwrap();
    let out = text(report);

    assert!(out.contains("foo.cat.rb:\n  compile_only:\n    HTTP Response Code: 500"));
    assert!(!out.contains(" case:"));
}

#[tokio::test]
async fn test_failures_grouped_by_case() {
    let fake = Arc::new(FakeService::new());
    fake.ok(Call::CreateExecution, execution_created("e1"))
        .ok(Call::ShowExecution, execution_status("failed"))
        .ok(Call::CreateOperation, operation_created("t1"))
        .ok(Call::ShowExecution, execution_status("terminated"))
        .ok(Call::DeleteExecution, no_content());
    let mut suite = Suite::from_templates(
        fake,
        vec![Template::from_source("launch.cat.rb", EXECUTION_DOC).unwrap()],
    );
    finish(&mut suite).await;

    let mut report = ShellReport::new(Vec::new());
    report.progress(&suite).unwrap();
    report.errors(&suite).unwrap();
    report.failures(&suite).unwrap();
    let out = text(report);

    assert!(out.contains("  operation (scale): "));
    assert!(!out.contains("ERRORS:"));
    assert!(out.contains(
        "Failures:\nlaunch.cat.rb:\n  execution:\n    Expected execution end state to be (running) but got execution end state (failed)\n"
    ));
    assert!(out.contains(
        "  operation (scale):\n    Execution never started, so operation (scale) was not run\n"
    ));
    assert!(!out.contains(" case:"));
}

#[tokio::test]
async fn test_summary_line() {
    let fake = Arc::new(FakeService::new());
    fake.ok(Call::Compile, no_content());
    let mut suite = Suite::from_templates(
        fake,
        vec![Template::from_source("foo.cat.rb", COMPILE_ONLY_DOC).unwrap()],
    );
    finish(&mut suite).await;

    let mut report = ShellReport::new(Vec::new());
    report.summary(&suite).unwrap();
    assert!(text(report).contains("1 templates, 1 cases: 1 succeeded"));
}
