//! Tests for the local runner, event printer and report sink.

#[cfg(test)]
mod tests {
    use crate::runner::{DirectoryReportSink, OutcomeFile, ScriptedRunner};
    use reflow_core::context::EventContext;
    use reflow_core::ids::{JobId, RunId, WorkflowId};
    use reflow_core::ports::{Conclusion, JobRequest, JobRunner, ReportSink};
    use reflow_core::run::{ReportArtifact, ReportFormat};
    use reflow_core::workflow::Integration;
    use reflow_core::Error;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn request(instance: &str, job: &str) -> JobRequest {
        JobRequest {
            run_id: RunId::new(),
            workflow: WorkflowId::new("python-ci"),
            job_id: JobId::new(instance),
            job: JobId::new(job),
            uses: Integration::Test,
            matrix: BTreeMap::new(),
            options: BTreeMap::new(),
            context: EventContext::pull_request(42, false),
            secrets: vec![],
        }
    }

    fn scripts(yaml: &str) -> OutcomeFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_unscripted_job_succeeds() {
        let runner = ScriptedRunner::succeed_all();
        let outcome = runner.execute(&request("lint", "lint")).await.unwrap();
        assert_eq!(outcome.conclusion, Conclusion::Success);
        assert!(outcome.report.is_none());
    }

    #[tokio::test]
    async fn test_instance_script_overrides_job_script() {
        let runner = ScriptedRunner::new(
            scripts(
                r#"
test: failure
"test (3.12, ubuntu-latest)": success
"#,
            ),
            ".",
        );

        let cell = runner
            .execute(&request("test (3.12, ubuntu-latest)", "test"))
            .await
            .unwrap();
        assert_eq!(cell.conclusion, Conclusion::Success);

        let other = runner
            .execute(&request("test (3.9, ubuntu-latest)", "test"))
            .await
            .unwrap();
        assert_eq!(other.conclusion, Conclusion::Failure);
    }

    #[tokio::test]
    async fn test_error_conclusion_is_runner_error() {
        let runner = ScriptedRunner::new(
            scripts(
                r#"
publish:
  conclusion: error
  message: runner lost
"#,
            ),
            ".",
        );

        let err = runner.execute(&request("publish", "publish")).await.unwrap_err();
        assert!(matches!(err, Error::Runner(ref m) if m == "runner lost"));
    }

    #[tokio::test]
    async fn test_load_attaches_report_relative_to_outcomes_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sonar.sarif"),
            r#"{"version": "2.1.0", "runs": []}"#,
        )
        .unwrap();
        let outcomes = dir.path().join("outcomes.yaml");
        let mut file = std::fs::File::create(&outcomes).unwrap();
        writeln!(
            file,
            "sonar:\n  conclusion: failure\n  message: quality gate failed\n  report: sonar.sarif"
        )
        .unwrap();

        let runner = ScriptedRunner::load(&outcomes).await.unwrap();
        let outcome = runner.execute(&request("sonar", "sonar")).await.unwrap();

        assert_eq!(outcome.conclusion, Conclusion::Failure);
        assert_eq!(outcome.message.as_deref(), Some("quality gate failed"));
        let report = outcome.report.unwrap();
        assert_eq!(report.name, "sonar.sarif");
        assert_eq!(report.format, ReportFormat::Sarif);
        assert_eq!(report.content["version"], "2.1.0");
    }

    #[tokio::test]
    async fn test_directory_sink_sanitizes_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectoryReportSink::new(dir.path()).unwrap();
        let run_id = RunId::new();
        let job = JobId::new("test (3.12, ubuntu-latest)");
        let report = ReportArtifact {
            name: "results.json".into(),
            format: ReportFormat::Json,
            content: serde_json::json!({"passed": 12}),
        };

        sink.publish(run_id, &job, &report).await.unwrap();

        let path = sink.path_for(run_id, &job, &report);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "test_3.12_ubuntu-latest__results.json"
        );
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["passed"], 12);
    }
}
