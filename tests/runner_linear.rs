mod common;

use common::*;
use flowgraph::runtimes::{CheckpointConfig, ListFilter, RunRequest, RunStatus};
use flowgraph::types::CheckpointSource;
use flowgraph::value::ChannelValue;

#[tokio::test]
async fn linear_workflow_runs_to_completion() {
    let runner = in_memory_runner(linear_graph());
    let report = runner.run(RunRequest::new("w1")).await.unwrap();

    assert!(report.status.is_completed());
    assert_eq!(report.final_values["counter"], ChannelValue::Int(3));
    assert_eq!(report.final_values["steps"], ChannelValue::Int(3));
    match &report.status {
        RunStatus::Completed { final_node } => {
            assert_eq!(final_node.as_deref(), Some("N3"));
        }
        other => panic!("expected completed status, got {other:?}"),
    }

    // N1, N2, N3 execute on consecutive steps, one node per step.
    let ran: Vec<Vec<String>> = report
        .step_reports
        .iter()
        .map(|r| r.ran_nodes.iter().map(|n| n.to_string()).collect())
        .collect();
    assert_eq!(
        ran,
        vec![
            vec!["N1".to_string()],
            vec!["N2".to_string()],
            vec!["N3".to_string()],
        ]
    );
}

#[tokio::test]
async fn linear_workflow_persists_five_checkpoints() {
    let runner = in_memory_runner(linear_graph());
    runner.run(RunRequest::new("w1")).await.unwrap();

    let checkpoints = runner
        .manager()
        .list_checkpoints(&CheckpointConfig::latest("w1", "main"), &ListFilter::default())
        .await
        .unwrap();
    assert_eq!(checkpoints.len(), 5);

    // Newest-first: terminal step 3 down to the initial step -1.
    let steps: Vec<i64> = checkpoints.iter().map(|t| t.checkpoint.step).collect();
    assert_eq!(steps, vec![3, 2, 1, 0, -1]);

    let initial = &checkpoints[4].checkpoint;
    assert_eq!(initial.source, CheckpointSource::Input);
    assert_eq!(initial.parent_id, None);
    assert_eq!(initial.channel_values["counter"], ChannelValue::Int(0));
    assert_eq!(initial.channel_values["steps"], ChannelValue::Int(0));
    assert_eq!(initial.channel_versions["counter"], 0);

    // Every later checkpoint chains to its predecessor and advances the
    // step by exactly one.
    for pair in checkpoints.windows(2) {
        let (child, parent) = (&pair[0].checkpoint, &pair[1].checkpoint);
        assert_eq!(child.parent_id, Some(parent.id));
        assert_eq!(child.step, parent.step + 1);
        assert_eq!(child.source, CheckpointSource::Loop);
    }

    // Terminal checkpoint has an empty next-nodes hint.
    assert!(checkpoints[0].checkpoint.next_nodes.is_empty());
}

#[tokio::test]
async fn channel_versions_increase_strictly_across_checkpoints() {
    let runner = in_memory_runner(linear_graph());
    runner.run(RunRequest::new("w1")).await.unwrap();

    let mut checkpoints = runner
        .manager()
        .list_checkpoints(&CheckpointConfig::latest("w1", "main"), &ListFilter::default())
        .await
        .unwrap();
    checkpoints.reverse(); // oldest first

    for channel in ["counter", "steps"] {
        let mut last = None;
        for tuple in &checkpoints {
            let version = tuple.checkpoint.channel_versions[channel];
            if let Some(prev) = last {
                assert!(version >= prev, "versions must never regress");
                // The value at a new version differs from the prior fold.
                if version > prev {
                    assert!(version == prev + 1, "one bump per commit");
                }
            }
            last = Some(version);
        }
        // Three increment commits happened.
        assert_eq!(last, Some(3));
    }
}

#[tokio::test]
async fn versions_seen_matches_commit_versions() {
    let runner = in_memory_runner(linear_graph());
    let report = runner.run(RunRequest::new("w1")).await.unwrap();

    let mut checkpoints = runner
        .manager()
        .list_checkpoints(&CheckpointConfig::latest("w1", "main"), &ListFilter::default())
        .await
        .unwrap();
    checkpoints.reverse();

    // For each step's checkpoint, the node that ran records exactly the
    // post-commit versions of its trigger channels.
    for step_report in &report.step_reports {
        let tuple = checkpoints
            .iter()
            .find(|t| t.checkpoint.step == step_report.step)
            .expect("checkpoint per step");
        for ran in &step_report.ran_nodes {
            let seen = tuple
                .checkpoint
                .versions_seen
                .get(&ran.to_string())
                .expect("ran node has versions_seen entry");
            for (channel, version) in seen {
                assert_eq!(
                    *version,
                    tuple.checkpoint.channel_versions[channel],
                    "versions_seen must equal the commit version"
                );
            }
        }
    }
}

#[tokio::test]
async fn replay_is_deterministic_across_lineages() {
    let runner = in_memory_runner(linear_graph());
    runner.run(RunRequest::new("w1")).await.unwrap();
    runner.run(RunRequest::new("w2")).await.unwrap();

    let list = |lineage: &str| {
        let lineage = lineage.to_string();
        let manager = runner.manager().clone();
        async move {
            manager
                .list_checkpoints(
                    &CheckpointConfig::latest(lineage, "main"),
                    &ListFilter::default(),
                )
                .await
                .unwrap()
        }
    };
    let a = list("w1").await;
    let b = list("w2").await;
    assert_eq!(a.len(), b.len());
    for (ta, tb) in a.iter().zip(b.iter()) {
        assert_eq!(ta.checkpoint.step, tb.checkpoint.step);
        assert_eq!(ta.checkpoint.channel_values, tb.checkpoint.channel_values);
        assert_eq!(
            ta.checkpoint.channel_versions,
            tb.checkpoint.channel_versions
        );
    }
}

#[tokio::test]
async fn resume_after_completion_terminates_immediately() {
    let runner = in_memory_runner(linear_graph());
    runner.run(RunRequest::new("w1")).await.unwrap();

    let report = runner.run(RunRequest::new("w1")).await.unwrap();
    assert!(report.status.is_completed());
    assert!(report.step_reports.is_empty());

    // No extra checkpoints were written by the idle resume.
    let checkpoints = runner
        .manager()
        .list_checkpoints(&CheckpointConfig::latest("w1", "main"), &ListFilter::default())
        .await
        .unwrap();
    assert_eq!(checkpoints.len(), 5);
}

#[tokio::test]
async fn replay_from_initial_checkpoint_reproduces_the_run() {
    let runner = in_memory_runner(linear_graph());
    let first = runner.run(RunRequest::new("w1")).await.unwrap();

    let checkpoints = runner
        .manager()
        .list_checkpoints(&CheckpointConfig::latest("w1", "main"), &ListFilter::default())
        .await
        .unwrap();
    let initial = checkpoints
        .iter()
        .find(|t| t.checkpoint.source == CheckpointSource::Input)
        .unwrap();

    let replay = runner
        .run(RunRequest::new("w1").with_checkpoint_id(initial.checkpoint.id))
        .await
        .unwrap();
    assert_eq!(replay.final_values, first.final_values);
    assert_eq!(replay.final_versions, first.final_versions);
}
