//! Cron producer: polls repository activity on a fixed interval.

use std::collections::BTreeSet;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{Disposition, EventKind, EventSource, Ingestor, TriggerEvent, comment_event};
use crate::errors::{StoreError, TriggerError};
use crate::repo::{ActivityKind, RepositoryAdapter};

pub const CHECKPOINT_FILE: &str = "poll_checkpoint.json";

/// Where the poller left off. `handled` covers events at exactly `since`,
/// which the next query returns again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollCheckpoint {
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub handled: BTreeSet<String>,
}

impl PollCheckpoint {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
    }

    pub fn is_handled(&self, key: &str, at: DateTime<Utc>) -> bool {
        match self.since {
            Some(since) if at < since => true,
            Some(since) if at == since => self.handled.contains(key),
            _ => false,
        }
    }

    pub fn mark(&mut self, key: String, at: DateTime<Utc>) {
        match self.since {
            Some(since) if at < since => {}
            Some(since) if at == since => {
                self.handled.insert(key);
            }
            _ => {
                self.since = Some(at);
                self.handled.clear();
                self.handled.insert(key);
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub seen: usize,
    pub dispatched: usize,
    pub skipped: usize,
}

pub struct Poller {
    repo: Arc<dyn RepositoryAdapter>,
    ingestor: Ingestor,
    checkpoint_path: PathBuf,
    keyword: String,
    interval: Duration,
}

impl Poller {
    pub fn new(
        repo: Arc<dyn RepositoryAdapter>,
        ingestor: Ingestor,
        state_dir: &Path,
        keyword: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            repo,
            ingestor,
            checkpoint_path: state_dir.join(CHECKPOINT_FILE),
            keyword: keyword.into(),
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// One poll cycle. The checkpoint advances past an item only after the
    /// ingestor accepted it, so an interrupted cycle is picked up again.
    pub async fn poll_once(&self) -> Result<PollSummary, TriggerError> {
        let mut checkpoint = PollCheckpoint::load(&self.checkpoint_path)?;
        let activity = self.repo.list_activity(checkpoint.since).await?;
        let mut summary = PollSummary::default();

        for item in activity {
            let (key, event) = match &item.kind {
                ActivityKind::Opened => {
                    let event = TriggerEvent::new(EventSource::Cron, item.issue, EventKind::IssueOpened, None);
                    (event.event_key.clone(), Ok(event))
                }
                ActivityKind::Comment { id, body } => {
                    let id = id.to_string();
                    let key = TriggerEvent::key_for(item.issue, EventKind::Comment, Some(&id));
                    (key, comment_event(EventSource::Cron, item.issue, Some(&id), body, &self.keyword))
                }
            };
            if checkpoint.is_handled(&key, item.at) {
                continue;
            }
            summary.seen += 1;

            match event {
                Ok(event) => {
                    let disposition = self.ingestor.submit(event).await?;
                    match &disposition {
                        Disposition::Started(id) | Disposition::Resumed(id) => {
                            summary.dispatched += 1;
                            info!(issue = %item.issue, workflow_id = %id, event_key = %key, "poll dispatched workflow");
                        }
                        Disposition::Ignored { reason, .. } => {
                            summary.skipped += 1;
                            debug!(issue = %item.issue, event_key = %key, reason = reason.as_str(), "poll event ignored");
                        }
                    }
                }
                Err(reason) => {
                    summary.skipped += 1;
                    debug!(issue = %item.issue, event_key = %key, reason = reason.as_str(), "comment skipped");
                }
            }

            checkpoint.mark(key, item.at);
            checkpoint.save(&self.checkpoint_path)?;
        }

        Ok(summary)
    }

    /// Poll every interval until `shutdown` resolves. A failed cycle is
    /// logged and retried on the next tick.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "poller started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.poll_once().await {
                    Ok(summary) if summary.seen > 0 => info!(
                        seen = summary.seen,
                        dispatched = summary.dispatched,
                        skipped = summary.skipped,
                        "poll cycle complete"
                    ),
                    Ok(_) => debug!("poll cycle found nothing new"),
                    Err(e) => warn!(error = %e, "poll cycle failed, retrying next interval"),
                },
            }
        }
        info!("poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::IssueActivity;
    use crate::state::{IssueNumber, WorkflowStore};
    use crate::test_support::Harness;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn opened(issue: u64, secs: i64) -> IssueActivity {
        IssueActivity {
            issue: IssueNumber(issue),
            kind: ActivityKind::Opened,
            at: at(secs),
        }
    }

    fn comment(issue: u64, id: u64, body: &str, secs: i64) -> IssueActivity {
        IssueActivity {
            issue: IssueNumber(issue),
            kind: ActivityKind::Comment {
                id,
                body: body.to_string(),
            },
            at: at(secs),
        }
    }

    fn poller(h: &Harness, ingestor: Ingestor) -> Poller {
        Poller::new(h.repo.clone(), ingestor, h.dir.path(), "adw", Duration::from_secs(20))
    }

    #[test]
    fn checkpoint_tracks_ties_at_the_boundary() {
        let mut cp = PollCheckpoint::default();
        assert!(!cp.is_handled("a", at(5)));
        cp.mark("a".into(), at(5));
        assert!(cp.is_handled("a", at(5)));
        assert!(!cp.is_handled("b", at(5)));
        assert!(cp.is_handled("z", at(4)));
        cp.mark("c".into(), at(9));
        assert_eq!(cp.since, Some(at(9)));
        assert_eq!(cp.handled.len(), 1);
    }

    #[test]
    fn checkpoint_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        assert_eq!(PollCheckpoint::load(&path).unwrap(), PollCheckpoint::default());

        let mut cp = PollCheckpoint::default();
        cp.mark("issue-1:issue_opened".into(), at(1));
        cp.save(&path).unwrap();
        assert_eq!(PollCheckpoint::load(&path).unwrap(), cp);
    }

    #[tokio::test]
    async fn second_poll_does_not_redispatch() {
        let h = Harness::new();
        h.repo.set_activity(vec![opened(1, 0), opened(2, 1)]);
        let (ingestor, handle) = Ingestor::spawn(h.orchestrator.clone());
        let poller = poller(&h, ingestor);

        let first = poller.poll_once().await.unwrap();
        assert_eq!(first.dispatched, 2);
        let second = poller.poll_once().await.unwrap();
        assert_eq!(second, PollSummary::default());

        drop(poller);
        handle.await.unwrap();
        assert_eq!(h.store.list_all().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn only_keyword_comments_dispatch() {
        let h = Harness::new();
        h.repo.set_activity(vec![
            comment(5, 1, "looks nice", 0),
            comment(5, 2, "[ADW-BOT] abc_ops: adw done", 1),
            comment(6, 3, "adw please", 2),
        ]);
        let (ingestor, handle) = Ingestor::spawn(h.orchestrator.clone());
        let poller = poller(&h, ingestor);

        let summary = poller.poll_once().await.unwrap();
        assert_eq!(summary.seen, 3);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.skipped, 2);

        drop(poller);
        handle.await.unwrap();
        assert_eq!(h.only_workflow().issue_reference, IssueNumber(6));
    }

    #[tokio::test]
    async fn unavailable_repository_fails_the_cycle_only() {
        let h = Harness::new();
        h.repo.set_activity(vec![opened(1, 0)]);
        h.repo.set_unavailable(true);
        let (ingestor, handle) = Ingestor::spawn(h.orchestrator.clone());
        let poller = poller(&h, ingestor);

        assert!(matches!(
            poller.poll_once().await,
            Err(TriggerError::Collaborator(_))
        ));
        assert!(h.store.list_all().unwrap().is_empty());

        h.repo.set_unavailable(false);
        assert_eq!(poller.poll_once().await.unwrap().dispatched, 1);

        drop(poller);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = Harness::new();
        let (ingestor, _handle) = Ingestor::spawn(h.orchestrator.clone());
        let poller = poller(&h, ingestor);
        tokio::time::timeout(Duration::from_secs(5), poller.run(async {}))
            .await
            .unwrap();
    }
}
