use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// One page finished recognition.
    PageDone { increment: usize },
    /// Denominator computed by the page-count pre-pass.
    TotalPages { pages: usize },
}

pub type ProgressSink = mpsc::UnboundedSender<ProgressEvent>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub pages_done: usize,
    pub total_pages: usize,
}

impl ProgressSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        (self.pages_done as f64 / self.total_pages as f64).min(1.0)
    }
}

/// The only owner of `(pages_done, total_pages)`. Runs until every sink is dropped.
pub struct ProgressAggregator {
    updates: watch::Receiver<ProgressSnapshot>,
    task: JoinHandle<ProgressSnapshot>,
}

impl ProgressAggregator {
    /// Creates a sink and spawns the aggregator draining it.
    pub fn channel() -> (ProgressSink, ProgressAggregator) {
        let (sink, events) = mpsc::unbounded_channel();
        (sink, Self::spawn(events))
    }

    pub fn spawn(mut events: mpsc::UnboundedReceiver<ProgressEvent>) -> Self {
        let (publisher, updates) = watch::channel(ProgressSnapshot::default());

        let task = tokio::spawn(async move {
            let mut snapshot = ProgressSnapshot::default();
            while let Some(event) = events.recv().await {
                match event {
                    ProgressEvent::PageDone { increment } => snapshot.pages_done += increment,
                    ProgressEvent::TotalPages { pages } => snapshot.total_pages = pages,
                }
                debug!("OCR progress: {}/{} pages", snapshot.pages_done, snapshot.total_pages);
                // Nobody watching is fine.
                let _ = publisher.send(snapshot);
            }
            snapshot
        });

        Self { updates, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.updates.clone()
    }

    pub fn current(&self) -> ProgressSnapshot {
        *self.updates.borrow()
    }

    /// Waits for all sinks to close and returns the final tally.
    pub async fn finish(self) -> ProgressSnapshot {
        match self.task.await {
            Ok(snapshot) => snapshot,
            Err(_) => *self.updates.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_aggregator_tallies_events() {
        let (sink, aggregator) = ProgressAggregator::channel();
        let mut updates = aggregator.subscribe();

        sink.send(ProgressEvent::TotalPages { pages: 4 }).unwrap();
        for _ in 0..3 {
            sink.send(ProgressEvent::PageDone { increment: 1 }).unwrap();
        }

        updates.changed().await.unwrap();
        drop(sink);

        let final_snapshot = aggregator.finish().await;
        assert_eq!(final_snapshot, ProgressSnapshot { pages_done: 3, total_pages: 4 });
        assert!((final_snapshot.fraction() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fraction_without_total() {
        assert_eq!(ProgressSnapshot::default().fraction(), 0.0);
    }
}
