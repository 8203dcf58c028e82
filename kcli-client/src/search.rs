//! Parallel substring search across every partition of a topic

use crossbeam::queue::SegQueue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ResultOrder;
use crate::partition::{Offset, Partition};
use crate::reader::ReadContext;
use crate::scanner;
use crate::Result;

/// How many matches end a topic search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Stop everything at the first partition that matches
    FirstMatch,
    /// Scan every partition and report all that match
    AllMatches,
}

impl SearchMode {
    pub fn from_first_only(first_only: bool) -> Self {
        if first_only {
            SearchMode::FirstMatch
        } else {
            SearchMode::AllMatches
        }
    }

    fn target(self, partitions: usize) -> usize {
        match self {
            SearchMode::FirstMatch => 1,
            SearchMode::AllMatches => partitions,
        }
    }
}

/// One worker's outcome for one partition
#[derive(Debug)]
struct SearchResult {
    partition: Partition,
    offset: Result<Option<Offset>>,
}

/// Fans partition searches out to a fixed pool of workers
#[derive(Clone)]
pub struct TopicSearchCoordinator {
    ctx: ReadContext,
    concurrency: usize,
    order: ResultOrder,
}

impl TopicSearchCoordinator {
    pub fn new(ctx: ReadContext, concurrency: usize, order: ResultOrder) -> Self {
        Self {
            ctx,
            concurrency: concurrency.max(1),
            order,
        }
    }

    /// Search `partitions` for `needle`, returning the matching partitions with
    /// their offset set to the match.
    ///
    /// `progress(drained, total)` runs once per partition result received.
    /// The first worker error cancels the remaining work and is returned once
    /// every worker has released its stream.
    pub async fn run<P>(
        &self,
        partitions: &[Partition],
        needle: &[u8],
        mode: SearchMode,
        cancel: &CancellationToken,
        mut progress: P,
    ) -> Result<Vec<Partition>>
    where
        P: FnMut(i64, i64),
    {
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        let total = partitions.len();
        let target = mode.target(total);
        self.ctx.metrics.record_search_started();

        let queue = Arc::new(SegQueue::new());
        for partition in partitions {
            queue.push(partition.clone());
        }

        let stop = cancel.child_token();
        let needle: Arc<[u8]> = Arc::from(needle);
        let (result_tx, mut result_rx) = mpsc::channel::<SearchResult>(self.concurrency);

        let workers = self.concurrency.min(total);
        info!(
            "Searching {} partitions of {} with {} workers",
            total, partitions[0].topic, workers
        );

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let queue = queue.clone();
            let result_tx = result_tx.clone();
            let stop = stop.clone();
            let needle = needle.clone();
            let ctx = self.ctx.clone();

            tasks.spawn(async move {
                while let Some(partition) = queue.pop() {
                    let offset = if stop.is_cancelled() {
                        Ok(None)
                    } else {
                        scanner::search(&ctx, &partition, &needle, stop.clone(), |_, _| {}).await
                    };

                    if result_tx.send(SearchResult { partition, offset }).await.is_err() {
                        break;
                    }
                }
                debug!("Search worker {} finished", worker_id);
            });
        }
        drop(result_tx);

        let mut results = Vec::new();
        let mut outcome = Ok(());
        let mut drained = 0;
        while drained < total {
            let Some(result) = result_rx.recv().await else {
                break;
            };
            progress(drained as i64, total as i64);
            drained += 1;

            match result.offset {
                Err(e) => {
                    error!("Search of {} failed: {}", result.partition, e);
                    outcome = Err(e);
                    break;
                }
                Ok(Some(offset)) => {
                    self.ctx.metrics.record_match();
                    let mut partition = result.partition;
                    partition.offset = offset;
                    results.push(partition);
                    if results.len() >= target {
                        if drained < total {
                            info!("Found {} match(es), stopping remaining workers", results.len());
                        }
                        break;
                    }
                }
                Ok(None) => {}
            }
        }

        stop.cancel();
        drop(result_rx);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Search worker failed: {}", e);
                if outcome.is_ok() {
                    outcome = Err(e.into());
                }
            }
        }
        outcome?;

        sort_results(&mut results, self.order);
        debug!("Search finished with {} match(es)", results.len());
        Ok(results)
    }
}

fn sort_results(results: &mut [Partition], order: ResultOrder) {
    match order {
        ResultOrder::Serialized => results.sort_by_cached_key(|p| p.to_compact_string()),
        ResultOrder::PartitionIndex => results.sort_by_key(|p| p.partition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_targets() {
        assert_eq!(SearchMode::from_first_only(true), SearchMode::FirstMatch);
        assert_eq!(SearchMode::from_first_only(false), SearchMode::AllMatches);
        assert_eq!(SearchMode::FirstMatch.target(12), 1);
        assert_eq!(SearchMode::AllMatches.target(12), 12);
    }

    #[test]
    fn test_result_orders() {
        let mut results: Vec<Partition> = [2, 10, 1]
            .iter()
            .map(|&id| Partition::new("t", id, 0, 5).unwrap())
            .collect();

        // "10" sorts between "1" and "2" in the serialized form
        sort_results(&mut results, ResultOrder::Serialized);
        let ids: Vec<_> = results.iter().map(|p| p.partition).collect();
        assert_eq!(ids, vec![1, 10, 2]);

        sort_results(&mut results, ResultOrder::PartitionIndex);
        let ids: Vec<_> = results.iter().map(|p| p.partition).collect();
        assert_eq!(ids, vec![1, 2, 10]);
    }
}
