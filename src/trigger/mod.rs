//! Trigger ingestion.
//!
//! Webhook and cron producers normalise what they see into [`TriggerEvent`]s
//! and hand them to one [`Ingestor`]. A single dispatcher task owns the
//! dedupe decision, so at most one live workflow per issue exists no matter
//! which producer saw the event first. Accepted workflows run as independent
//! tasks; a workflow id is never run by two tasks at once.

pub mod poller;
pub mod webhook;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::errors::{StoreError, TriggerError};
use crate::state::{IssueNumber, WorkflowId};
use crate::workflow::Orchestrator;
use crate::workflow::report::is_bot_comment;

const QUEUE_DEPTH: usize = 256;
const SEEN_KEYS_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Webhook,
    Cron,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Webhook => write!(f, "webhook"),
            EventSource::Cron => write!(f, "cron"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IssueOpened,
    Comment,
    Resume,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::IssueOpened => "issue_opened",
            EventKind::Comment => "comment",
            EventKind::Resume => "resume",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "issue_opened" | "opened" | "new_issue" => Ok(EventKind::IssueOpened),
            "comment" | "issue_comment" => Ok(EventKind::Comment),
            "resume" => Ok(EventKind::Resume),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// Normalised inbound event. Not persisted beyond dedupe bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub source: EventSource,
    pub issue: IssueNumber,
    pub kind: EventKind,
    pub event_key: String,
    pub received_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(
        source: EventSource,
        issue: IssueNumber,
        kind: EventKind,
        discriminator: Option<&str>,
    ) -> Self {
        Self {
            source,
            issue,
            kind,
            event_key: Self::key_for(issue, kind, discriminator),
            received_at: Utc::now(),
        }
    }

    /// `issue-{n}:{kind}[:{discriminator}]`, e.g. `issue-12:comment:998`.
    pub fn key_for(issue: IssueNumber, kind: EventKind, discriminator: Option<&str>) -> String {
        match discriminator {
            Some(d) if !d.is_empty() => format!("issue-{}:{}:{}", issue.0, kind, d),
            _ => format!("issue-{}:{}", issue.0, kind),
        }
    }
}

/// Whether `body` mentions the activation keyword as a whole word.
pub fn mentions_keyword(body: &str, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    body.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word == keyword)
}

/// Turn a repository comment into an event, or say why it does not count.
pub fn comment_event(
    source: EventSource,
    issue: IssueNumber,
    comment_id: Option<&str>,
    body: &str,
    keyword: &str,
) -> Result<TriggerEvent, IgnoreReason> {
    if is_bot_comment(body) {
        return Err(IgnoreReason::BotComment);
    }
    if !mentions_keyword(body, keyword) {
        return Err(IgnoreReason::NotActivated);
    }
    Ok(TriggerEvent::new(source, issue, EventKind::Comment, comment_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The issue already has a non-terminal workflow.
    ActiveWorkflow,
    /// A resume arrived while the workflow is already executing.
    AlreadyRunning,
    /// The same event key was already dispatched.
    DuplicateEvent,
    /// Comment without the activation keyword.
    NotActivated,
    BotComment,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::ActiveWorkflow => "active_workflow",
            IgnoreReason::AlreadyRunning => "already_running",
            IgnoreReason::DuplicateEvent => "duplicate_event",
            IgnoreReason::NotActivated => "not_activated",
            IgnoreReason::BotComment => "bot_comment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Started(WorkflowId),
    Resumed(WorkflowId),
    Ignored {
        workflow_id: Option<WorkflowId>,
        reason: IgnoreReason,
    },
}

impl Disposition {
    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        match self {
            Disposition::Started(id) | Disposition::Resumed(id) => Some(id),
            Disposition::Ignored { workflow_id, .. } => workflow_id.as_ref(),
        }
    }

    fn ignored(workflow_id: Option<WorkflowId>, reason: IgnoreReason) -> Self {
        Disposition::Ignored {
            workflow_id,
            reason,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, TriggerError>>;

enum Command {
    Event(TriggerEvent, Reply<Disposition>),
    Recover(Reply<Vec<WorkflowId>>),
}

/// Producer-side handle to the dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Ingestor {
    tx: mpsc::Sender<Command>,
}

impl Ingestor {
    /// Start the dispatcher. It stops once every `Ingestor` clone is dropped,
    /// after waiting for the workflows it launched.
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let dispatcher = Dispatcher {
            orchestrator,
            running: Arc::new(Mutex::new(HashSet::new())),
            tasks: JoinSet::new(),
            seen: SeenKeys::default(),
        };
        let handle = tokio::spawn(dispatcher.run(rx));
        (Self { tx }, handle)
    }

    pub async fn submit(&self, event: TriggerEvent) -> Result<Disposition, TriggerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Event(event, reply))
            .await
            .map_err(|_| TriggerError::Dispatch("dispatcher stopped".into()))?;
        rx.await
            .map_err(|_| TriggerError::Dispatch("dispatcher dropped the event".into()))?
    }

    /// Resume every non-terminal workflow that is not already running.
    pub async fn recover(&self) -> Result<Vec<WorkflowId>, TriggerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Recover(reply))
            .await
            .map_err(|_| TriggerError::Dispatch("dispatcher stopped".into()))?;
        rx.await
            .map_err(|_| TriggerError::Dispatch("dispatcher dropped the request".into()))?
    }
}

/// Bounded memory of dispatched event keys.
#[derive(Default)]
struct SeenKeys {
    order: VecDeque<String>,
    by_key: HashMap<String, WorkflowId>,
}

impl SeenKeys {
    fn get(&self, key: &str) -> Option<&WorkflowId> {
        self.by_key.get(key)
    }

    fn insert(&mut self, key: String, workflow_id: WorkflowId) {
        if self.by_key.insert(key.clone(), workflow_id).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > SEEN_KEYS_CAP {
            if let Some(old) = self.order.pop_front() {
                self.by_key.remove(&old);
            }
        }
    }
}

struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    running: Arc<Mutex<HashSet<WorkflowId>>>,
    tasks: JoinSet<()>,
    seen: SeenKeys,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Event(event, reply)) => {
                        let result = self.decide(event).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Recover(reply)) => {
                        let result = self.recover().await;
                        let _ = reply.send(result);
                    }
                    None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "workflow task panicked");
                    }
                }
            }
        }

        debug!(in_flight = self.tasks.len(), "dispatcher draining");
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "workflow task panicked");
            }
        }
    }

    async fn decide(&mut self, event: TriggerEvent) -> Result<Disposition, TriggerError> {
        let store = self.orchestrator.store().clone();

        if event.kind != EventKind::Resume
            && let Some(id) = self.seen.get(&event.event_key)
        {
            debug!(event_key = %event.event_key, workflow_id = %id, "duplicate event");
            return Ok(Disposition::ignored(Some(id.clone()), IgnoreReason::DuplicateEvent));
        }

        if let Some(active) = store.find_active(event.issue)? {
            let id = active.workflow_id;
            if event.kind != EventKind::Resume {
                info!(
                    issue = %event.issue,
                    workflow_id = %id,
                    event_key = %event.event_key,
                    "issue already has an active workflow, ignoring event"
                );
                self.seen.insert(event.event_key, id.clone());
                return Ok(Disposition::ignored(Some(id), IgnoreReason::ActiveWorkflow));
            }
            if self.running.lock().await.contains(&id) {
                return Ok(Disposition::ignored(Some(id), IgnoreReason::AlreadyRunning));
            }
            info!(issue = %event.issue, workflow_id = %id, phase = %active.current_phase, "resuming workflow");
            self.launch(id.clone()).await;
            return Ok(Disposition::Resumed(id));
        }

        let state = match store.create(event.issue) {
            Ok(state) => state,
            Err(StoreError::DuplicateWorkflow { workflow_id, .. }) => {
                // Created by another process between the lookup and now.
                return Ok(Disposition::ignored(Some(workflow_id), IgnoreReason::ActiveWorkflow));
            }
            Err(e) => return Err(e.into()),
        };
        let id = state.workflow_id;
        info!(
            issue = %event.issue,
            workflow_id = %id,
            source = %event.source,
            event_key = %event.event_key,
            "starting workflow"
        );
        self.seen.insert(event.event_key, id.clone());
        self.launch(id.clone()).await;
        Ok(Disposition::Started(id))
    }

    async fn recover(&mut self) -> Result<Vec<WorkflowId>, TriggerError> {
        let active = self.orchestrator.store().list_active()?;
        let mut resumed = Vec::new();
        for state in active {
            if self.running.lock().await.contains(&state.workflow_id) {
                continue;
            }
            info!(workflow_id = %state.workflow_id, phase = %state.current_phase, "recovering workflow");
            self.launch(state.workflow_id.clone()).await;
            resumed.push(state.workflow_id);
        }
        Ok(resumed)
    }

    async fn launch(&mut self, workflow_id: WorkflowId) {
        self.running.lock().await.insert(workflow_id.clone());
        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();
        self.tasks.spawn(async move {
            match orchestrator.resume(&workflow_id).await {
                Ok(state) => {
                    info!(workflow_id = %workflow_id, phase = %state.current_phase, "workflow run finished")
                }
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "workflow run stopped"),
            }
            running.lock().await.remove(&workflow_id);
        });
    }
}
