//! Single-worker summarization queue
//!
//! Jobs go through an mpsc channel to one worker thread, so at most one
//! completion call is in flight at any time. The worker paces itself with the
//! [`RetryPolicy`] cooldown and backs off on rate limits.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::{CompletionError, RetryPolicy, Sleeper, Summarizer};
use crate::models::{Message, MessageId, Summary};

struct Job {
    message: Message,
    reply: Sender<Summary>,
}

/// Handle to a summary that is still being produced
pub struct PendingSummary {
    id: MessageId,
    rx: Receiver<Summary>,
    fallback: Summary,
}

impl PendingSummary {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Block until the worker replies. Resolves to the degraded summary if the
    /// worker went away without answering.
    pub fn wait(self) -> Summary {
        match self.rx.recv() {
            Ok(summary) => summary,
            Err(_) => {
                warn!("Summary worker dropped message {}", self.id);
                self.fallback
            }
        }
    }
}

/// Shared worker flags
#[derive(Default)]
struct Progress {
    draining: AtomicBool,
    pending: AtomicUsize,
}

pub struct SummaryQueue {
    jobs: Option<Sender<Job>>,
    progress: Arc<Progress>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SummaryQueue {
    /// Start the worker thread
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let progress = Arc::new(Progress::default());

        let worker = {
            let progress = progress.clone();
            thread::Builder::new()
                .name("summary-queue".to_string())
                .spawn(move || run_worker(rx, summarizer, sleeper, policy, progress))
                .context("Failed to spawn summary worker")?
        };

        Ok(Self {
            jobs: Some(tx),
            progress,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue a message. The returned handle always resolves.
    pub fn summarize(&self, message: Message) -> PendingSummary {
        let (reply, rx) = mpsc::channel();
        let id = message.id.clone();
        let fallback = Summary::degraded(&message);

        self.progress.pending.fetch_add(1, Ordering::SeqCst);
        let sent = match &self.jobs {
            Some(jobs) => jobs.send(Job { message, reply }).is_ok(),
            None => false,
        };
        if !sent {
            // Handle resolves to the fallback once `reply` is dropped
            self.progress.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Summary worker is not running; message {} left unsummarized", id);
        }

        PendingSummary { id, rx, fallback }
    }

    /// True while the worker is processing or cooling down between jobs
    pub fn is_draining(&self) -> bool {
        self.progress.draining.load(Ordering::SeqCst)
    }

    /// Jobs enqueued but not yet answered
    pub fn pending(&self) -> usize {
        self.progress.pending.load(Ordering::SeqCst)
    }
}

impl Drop for SummaryQueue {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.jobs.take();
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Summary worker panicked");
            }
        }
    }
}

fn run_worker(
    rx: Receiver<Job>,
    summarizer: Arc<dyn Summarizer>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    progress: Arc<Progress>,
) {
    while let Ok(first) = rx.recv() {
        progress.draining.store(true, Ordering::SeqCst);

        let mut next = Some(first);
        while let Some(job) = next.take() {
            let summary = summarize_with_retry(
                summarizer.as_ref(),
                sleeper.as_ref(),
                &policy,
                &job.message,
            );
            progress.pending.fetch_sub(1, Ordering::SeqCst);
            if job.reply.send(summary).is_err() {
                debug!("Nobody waiting for summary of {}", job.message.id);
            }

            sleeper.sleep(policy.cooldown);
            next = rx.try_recv().ok();
        }

        progress.draining.store(false, Ordering::SeqCst);
    }
    info!("Summary worker stopped");
}

fn summarize_with_retry(
    summarizer: &dyn Summarizer,
    sleeper: &dyn Sleeper,
    policy: &RetryPolicy,
    message: &Message,
) -> Summary {
    let mut attempt = 0;
    loop {
        match summarizer.summarize_once(message) {
            Ok(summary) => return summary,
            Err(CompletionError::RateLimited) if attempt < policy.max_retries => {
                let delay = policy.backoff_delay(attempt);
                debug!(
                    "Rate limited on {}; retry {} in {:?}",
                    message.id,
                    attempt + 1,
                    delay
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                warn!("Summary for {} failed: {}", message.id, e);
                return Summary::degraded(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted outcomes and records which messages were attempted
    struct ScriptedSummarizer {
        outcomes: Mutex<VecDeque<Result<Summary, CompletionError>>>,
        attempts: Mutex<Vec<String>>,
    }

    impl ScriptedSummarizer {
        fn new(outcomes: Vec<Result<Summary, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Summarizer for ScriptedSummarizer {
        fn summarize_once(&self, message: &Message) -> Result<Summary, CompletionError> {
            self.attempts
                .lock()
                .unwrap()
                .push(message.id.as_str().to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_summary(message.id.as_str())))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn ok_summary(text: &str) -> Summary {
        Summary {
            main_points: text.to_string(),
            action_items: vec![],
            needs_response: false,
            error: None,
        }
    }

    fn message(id: &str) -> Message {
        Message::builder(id).snippet(format!("body of {}", id)).build()
    }

    #[test]
    fn test_retry_then_success() {
        let policy = RetryPolicy::default();
        let summarizer = ScriptedSummarizer::new(vec![
            Err(CompletionError::RateLimited),
            Err(CompletionError::RateLimited),
            Ok(ok_summary("done")),
        ]);
        let sleeper = RecordingSleeper::default();

        let summary = summarize_with_retry(summarizer.as_ref(), &sleeper, &policy, &message("a"));
        assert_eq!(summary.main_points, "done");
        assert_eq!(summarizer.attempts().len(), 3);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }

    #[test]
    fn test_retries_exhausted_degrades() {
        let policy = RetryPolicy::default();
        let summarizer = ScriptedSummarizer::new(vec![Err(CompletionError::RateLimited); 4]);
        let sleeper = RecordingSleeper::default();

        let summary = summarize_with_retry(summarizer.as_ref(), &sleeper, &policy, &message("a"));
        assert!(summary.is_degraded());
        assert_eq!(summary.main_points, "Failed to analyze: body of a");
        assert_eq!(summarizer.attempts().len(), 4);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_other_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let summarizer =
            ScriptedSummarizer::new(vec![Err(CompletionError::Failed("boom".to_string()))]);
        let sleeper = RecordingSleeper::default();

        let summary = summarize_with_retry(summarizer.as_ref(), &sleeper, &policy, &message("a"));
        assert!(summary.is_degraded());
        assert_eq!(summarizer.attempts().len(), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    /// Calls and pauses in the order they happened
    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Summarizer for EventLog {
        fn summarize_once(&self, message: &Message) -> Result<Summary, CompletionError> {
            self.push(format!("call {}", message.id));
            Ok(ok_summary(message.id.as_str()))
        }
    }

    impl Sleeper for EventLog {
        fn sleep(&self, duration: Duration) {
            self.push(format!("sleep {}", duration.as_millis()));
        }
    }

    #[test]
    fn test_queue_answers_in_order_with_cooldowns() {
        let log = EventLog::default();
        let queue = SummaryQueue::new(
            Arc::new(log.clone()),
            Arc::new(log.clone()),
            RetryPolicy::default(),
        )
        .unwrap();

        let handles: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| queue.summarize(message(id)))
            .collect();
        let summaries: Vec<_> = handles.into_iter().map(|h| h.wait()).collect();

        assert_eq!(
            summaries.iter().map(|s| s.main_points.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        // Joins the worker, so the last cooldown is in the log
        drop(queue);
        assert_eq!(
            log.events(),
            vec![
                "call a",
                "sleep 1000",
                "call b",
                "sleep 1000",
                "call c",
                "sleep 1000"
            ]
        );
    }

    #[test]
    fn test_queue_settles_idle() {
        let summarizer = ScriptedSummarizer::new(vec![]);
        let queue = SummaryQueue::new(
            summarizer,
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        )
        .unwrap();

        let summary = queue.summarize(message("a")).wait();
        assert_eq!(summary.main_points, "a");
        assert_eq!(queue.pending(), 0);

        for _ in 0..200 {
            if !queue.is_draining() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!queue.is_draining());
    }

    #[test]
    fn test_pending_handle_exposes_id() {
        let queue = SummaryQueue::new(
            ScriptedSummarizer::new(vec![]),
            Arc::new(RecordingSleeper::default()),
            RetryPolicy::default(),
        )
        .unwrap();

        let pending = queue.summarize(message("xyz"));
        assert_eq!(pending.id().as_str(), "xyz");
        pending.wait();
    }
}
