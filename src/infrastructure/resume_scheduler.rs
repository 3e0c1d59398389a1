use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};

use crate::infrastructure::kafka_abstraction::{ConsumerControl, TopicPartition};

/// Resumes paused partitions after their backoff delay.
///
/// A single task owns a delay queue keyed by topic-partition, so sustained
/// retry load never creates more than one timer per partition. Scheduling a
/// partition that is already waiting replaces its deadline.
#[derive(Clone)]
pub struct ResumeScheduler {
    tx: mpsc::UnboundedSender<(TopicPartition, Duration)>,
}

impl ResumeScheduler {
    pub fn spawn(
        control: Arc<dyn ConsumerControl>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(control, rx, cancel));
        (Self { tx }, handle)
    }

    /// Returns false when the scheduler has shut down.
    pub fn schedule(&self, tp: TopicPartition, delay: Duration) -> bool {
        self.tx.send((tp, delay)).is_ok()
    }
}

async fn run(
    control: Arc<dyn ConsumerControl>,
    mut rx: mpsc::UnboundedReceiver<(TopicPartition, Duration)>,
    cancel: CancellationToken,
) {
    let mut queue: DelayQueue<TopicPartition> = DelayQueue::new();
    let mut keys: HashMap<TopicPartition, delay_queue::Key> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("ResumeScheduler: shutting down with {} pending resumes", keys.len());
                break;
            }
            request = rx.recv() => match request {
                Some((tp, delay)) => match keys.get(&tp) {
                    Some(key) => queue.reset(key, delay),
                    None => {
                        let key = queue.insert(tp.clone(), delay);
                        keys.insert(tp, key);
                    }
                },
                None => break,
            },
            Some(expired) = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                let tp = expired.into_inner();
                keys.remove(&tp);
                match control.resume(&tp) {
                    Ok(()) => tracing::info!("Resumed consumption for partition {}", tp),
                    Err(e) => tracing::error!("Failed to resume partition {}: {}", tp, e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kafka_in_memory::{ControlCall, RecordingConsumerControl};

    #[tokio::test(start_paused = true)]
    async fn test_resumes_after_delay() {
        let control = Arc::new(RecordingConsumerControl::new());
        let cancel = CancellationToken::new();
        let (scheduler, _task) = ResumeScheduler::spawn(control.clone(), cancel.clone());
        let tp = TopicPartition::new("user-create-json", 0);

        control.pause(&tp).unwrap();
        assert!(scheduler.schedule(tp.clone(), Duration::from_millis(1000)));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(control.is_paused(&tp));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!control.is_paused(&tp));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_deadline() {
        let control = Arc::new(RecordingConsumerControl::new());
        let cancel = CancellationToken::new();
        let (scheduler, _task) = ResumeScheduler::spawn(control.clone(), cancel.clone());
        let tp = TopicPartition::new("t", 1);

        control.pause(&tp).unwrap();
        scheduler.schedule(tp.clone(), Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.schedule(tp.clone(), Duration::from_millis(2000));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(control.is_paused(&tp));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let resumes = control
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ControlCall::Resume(_)))
            .count();
        assert_eq!(resumes, 1);
        cancel.cancel();
    }
}
