//! The fixtures a node can run and the report lines they produce.
//!
//! Every fixture follows the same shape: local work, a barrier, then node 0
//! alone observes the shared state and reports it.

use crate::context::HarnessContext;
use crate::queue::fill_until_full;
use crate::HarnessError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
/// A fixture selectable from the configuration
pub enum Scenario {
    /// Fill a queue with 0, 1, 2, ...
    #[default]
    QueueInt,
    /// Fill a queue with false, true, false, ...
    QueueBool,
    /// Fill a queue with "", "A", "AA", ...
    QueueStr,
    /// Increment the shared counter once per node and report the total
    Counter,
}

/// A value that can travel through a fixture queue and be reported
pub trait Payload: Clone + Ord + Send + Sync {
    fn render(&self) -> String;
}

impl Payload for i64 {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl Payload for bool {
    fn render(&self) -> String {
        let word = if *self { "True" } else { "False" };
        word.to_string()
    }
}

impl Payload for String {
    fn render(&self) -> String {
        self.clone()
    }
}

/// Run the configured fixture for this node
/// # Returns
/// * The report lines; empty for every node but node 0
/// # Errors
/// * Any barrier, lock or counter failure, all fatal for this node
pub async fn run_scenario(context: &HarnessContext) -> Result<Vec<String>, HarnessError> {
    log::info!(
        "node {}/{} running {:?}",
        context.node_id,
        context.participant_count,
        context.scenario
    );
    match context.scenario {
        Scenario::QueueInt => run_queue(context, 0i64, |n| n + 1).await,
        Scenario::QueueBool => run_queue(context, false, |b| !b).await,
        Scenario::QueueStr => run_queue(context, String::new(), |s| format!("{s}A")).await,
        Scenario::Counter => run_counter(context).await,
    }
}

async fn run_queue<T, F>(
    context: &HarnessContext,
    seed: T,
    advance: F,
) -> Result<Vec<String>, HarnessError>
where
    T: Payload,
    F: FnMut(&T) -> T + Send,
{
    let mut run = context.queue_run::<T>();
    let inserted = fill_until_full(&run.queue, seed, advance);
    log::debug!("node {} inserted {} values", context.node_id, inserted);

    let barrier = &context.hooks.queue_barrier;
    barrier.arrive(1).await?;
    barrier.wait().await?;
    if !context.is_reporter() {
        return Ok(Vec::new());
    }

    let mut lines = vec![format!("size before empty: {}", run.queue.size())];
    run.drain();
    lines.push(format!("size after empty: {}", run.queue.size()));
    run.collected.sort();
    lines.extend(run.collected.iter().map(Payload::render));
    Ok(lines)
}

async fn run_counter(context: &HarnessContext) -> Result<Vec<String>, HarnessError> {
    let value = context.counter.increment().await?;
    log::debug!("node {} raised the counter to {}", context.node_id, value);

    let barrier = &context.hooks.counter_barrier;
    barrier.arrive(1).await?;
    if !context.is_reporter() {
        return Ok(Vec::new());
    }
    barrier.wait().await?;
    let total = context.counter.read().await?;
    Ok(vec![format!("total: {total}")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncHooks;
    use futures::future::join_all;
    use std::path::Path;
    use std::sync::Arc;

    fn single_node(scenario: Scenario, counter: &Path) -> HarnessContext {
        HarnessContext::new(0, 1, scenario, SyncHooks::noop(), counter.to_path_buf())
    }

    async fn run_group(nodes: u32, scenario: Scenario, counter: &Path) -> Vec<Vec<String>> {
        let runs = SyncHooks::local_group(nodes, None)
            .into_iter()
            .enumerate()
            .map(|(id, hooks)| {
                let context = Arc::new(HarnessContext::new(
                    id as u32,
                    nodes,
                    scenario,
                    hooks,
                    counter.to_path_buf(),
                ));
                tokio::spawn(async move { run_scenario(&context).await })
            });
        join_all(runs)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_int_queue_reports_sorted_values() {
        let dir = tempfile::tempdir().unwrap();
        let lines = run_scenario(&single_node(Scenario::QueueInt, &dir.path().join("c")))
            .await
            .unwrap();
        let mut expected = vec![
            "size before empty: 10".to_string(),
            "size after empty: 0".to_string(),
        ];
        expected.extend((0..10).map(|n| n.to_string()));
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_bool_queue_reports_false_then_true() {
        let dir = tempfile::tempdir().unwrap();
        let lines = run_scenario(&single_node(Scenario::QueueBool, &dir.path().join("c")))
            .await
            .unwrap();
        assert_eq!(lines[2..7], ["False"; 5]);
        assert_eq!(lines[7..], ["True"; 5]);
    }

    #[tokio::test]
    async fn test_str_queue_reports_growing_strings() {
        let dir = tempfile::tempdir().unwrap();
        let lines = run_scenario(&single_node(Scenario::QueueStr, &dir.path().join("c")))
            .await
            .unwrap();
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[2], "");
        assert_eq!(lines[11], "A".repeat(9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counter_totals_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("_counter.dat");
        let first = run_group(3, Scenario::Counter, &counter).await;
        assert_eq!(first[0], vec!["total: 3"]);
        assert!(first[1..].iter().all(Vec::is_empty));
        let second = run_group(3, Scenario::Counter, &counter).await;
        assert_eq!(second[0], vec!["total: 6"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_only_node_zero_reports_queue() {
        let dir = tempfile::tempdir().unwrap();
        let reports = run_group(4, Scenario::QueueInt, &dir.path().join("c")).await;
        assert_eq!(reports[0][0], "size before empty: 10");
        assert!(reports[1..].iter().all(Vec::is_empty));
    }

    #[test]
    fn test_scenario_names() {
        let parsed: Vec<Scenario> =
            serde_yaml::from_str("[queue_int, queue_bool, queue_str, counter]").unwrap();
        assert_eq!(
            parsed,
            [Scenario::QueueInt, Scenario::QueueBool, Scenario::QueueStr, Scenario::Counter]
        );
    }
}
