use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use rowmesh_core::{JobId, Row};
use tokio::sync::watch;
use tokio::time::Instant;

/// Per-job result map keyed by partition index. The first value recorded for
/// a partition is kept; later writes are ignored.
#[derive(Debug)]
pub struct ResultAggregator {
    job_id: JobId,
    results: watch::Sender<BTreeMap<usize, Row>>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new(job_id: JobId) -> Self {
        let (results, _) = watch::channel(BTreeMap::new());
        Self { job_id, results }
    }

    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Returns `false` if the partition already had a value.
    pub fn record(&self, partition: usize, row: Row) -> bool {
        self.results.send_if_modified(|results| match results.entry(partition) {
            Entry::Vacant(slot) => {
                slot.insert(row);
                true
            }
            Entry::Occupied(_) => false,
        })
    }

    #[must_use]
    pub fn get(&self, partition: usize) -> Option<Row> {
        self.results.borrow().get(&partition).cloned()
    }

    #[must_use]
    pub fn recorded(&self) -> usize {
        self.results.borrow().len()
    }

    #[must_use]
    pub fn is_complete(&self, total: usize) -> bool {
        let results = self.results.borrow();
        (0..total).all(|partition| results.contains_key(&partition))
    }

    /// Waits until partitions `0..total` are all present or `deadline`
    /// passes, then returns what is there. Missing partitions are `None`.
    pub async fn assemble(&self, total: usize, deadline: Instant) -> Vec<Option<Row>> {
        let mut rx = self.results.subscribe();
        let complete = tokio::time::timeout_at(
            deadline,
            rx.wait_for(|results| (0..total).all(|p| results.contains_key(&p))),
        )
        .await
        .is_ok();

        if !complete {
            tracing::warn!(
                job_id = %self.job_id,
                total,
                recorded = self.recorded(),
                "Job deadline reached before all partitions returned"
            );
        }

        let results = self.results.borrow();
        (0..total).map(|p| results.get(&p).cloned()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn first_writer_wins() {
        let aggregator = ResultAggregator::new(JobId::new(1));
        assert!(aggregator.record(0, vec![1, 2]));
        assert!(!aggregator.record(0, vec![9, 9]));
        assert_eq!(aggregator.get(0), Some(vec![1, 2]));
        assert_eq!(aggregator.get(1), None);
    }

    #[test]
    fn completeness_counts_every_partition() {
        let aggregator = ResultAggregator::new(JobId::new(1));
        aggregator.record(1, vec![1]);
        assert!(!aggregator.is_complete(2));
        aggregator.record(0, vec![0]);
        assert!(aggregator.is_complete(2));
        assert!(aggregator.is_complete(0));
    }

    #[tokio::test]
    async fn assemble_returns_once_complete() {
        let aggregator = Arc::new(ResultAggregator::new(JobId::new(1)));
        let writer = {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                aggregator.record(1, vec![10]);
                aggregator.record(0, vec![5]);
            })
        };

        let start = Instant::now();
        let rows = aggregator
            .assemble(2, Instant::now() + Duration::from_secs(5))
            .await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(rows, vec![Some(vec![5]), Some(vec![10])]);
        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn assemble_marks_missing_at_deadline() {
        let aggregator = ResultAggregator::new(JobId::new(1));
        aggregator.record(0, vec![1, 1]);

        let rows = aggregator
            .assemble(3, Instant::now() + Duration::from_millis(30))
            .await;
        assert_eq!(rows, vec![Some(vec![1, 1]), None, None]);
    }
}
