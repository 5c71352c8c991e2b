//! Serialized upload queue.
//!
//! Items are admitted while the queue is idle, then processed one at a time
//! in admission order by a single spawned task. Progress and outcomes are
//! reported as [`QueueEvent`]s on an unbounded channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use ingest_protocol::UploadItem;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::PayloadBuilder;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::orchestrator::{ItemEvent, Orchestrator};
use crate::submitter::submit_payload;
use crate::types::{EntryStatus, QueueEntry, QueueEvent, QueueIndex, QueueState};

/// Upload queue over a shared [`Orchestrator`].
pub struct UploadQueue {
    shared: Arc<Shared>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<QueueEvent>>>,
}

struct Shared {
    inner: Mutex<QueueInner>,
    orchestrator: Arc<Orchestrator>,
    builder: Arc<dyn PayloadBuilder>,
    multiple: bool,
    events_tx: mpsc::UnboundedSender<QueueEvent>,
}

/// Entry map and dedup multiset; always mutated together.
struct QueueInner {
    state: QueueState,
    /// Token for the current (or next) run. Replaced by `start` once fired.
    cancel: CancellationToken,
    next_index: u64,
    entries: BTreeMap<QueueIndex, QueueEntry>,
    dedup: HashMap<String, usize>,
}

impl QueueInner {
    fn claim_key(&mut self, key: String) {
        *self.dedup.entry(key).or_insert(0) += 1;
    }

    fn release_key(&mut self, key: &str) {
        if let Some(count) = self.dedup.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.dedup.remove(key);
            }
        }
    }

    /// Removes a queued entry and its dedup key.
    fn take_queued(&mut self, index: QueueIndex) -> Option<QueueEntry> {
        if self.entries.get(&index)?.status != EntryStatus::Queued {
            return None;
        }
        let entry = self.entries.remove(&index)?;
        self.release_key(&entry.item.dedup_key());
        Some(entry)
    }

    /// Marks the oldest queued entry active and releases its dedup key.
    fn activate_next(&mut self) -> Option<(QueueIndex, UploadItem)> {
        let index = self
            .entries
            .values()
            .find(|e| e.status == EntryStatus::Queued)
            .map(|e| e.index)?;
        let entry = self.entries.get_mut(&index)?;
        entry.status = EntryStatus::Active;
        let item = entry.item.clone();
        self.release_key(&item.dedup_key());
        Some((index, item))
    }
}

impl UploadQueue {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        builder: Arc<dyn PayloadBuilder>,
        config: &UploadConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(QueueInner {
                    state: QueueState::Idle,
                    cancel: CancellationToken::new(),
                    next_index: 0,
                    entries: BTreeMap::new(),
                    dedup: HashMap::new(),
                }),
                orchestrator,
                builder,
                multiple: config.multiple,
                events_tx,
            }),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<QueueEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Token for the current run, or the next one while idle.
    ///
    /// Cancelling it aborts the active transfer at its next chunk or retry
    /// and ends the run as if paused; queued entries stay queued. The next
    /// [`start`](Self::start) replaces a fired token with a fresh one.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.inner.lock().unwrap().cancel.clone()
    }

    /// Admits `items` and returns the indices they were given.
    ///
    /// Does nothing unless the queue is idle. An item whose name and size
    /// match a queued item is skipped unless its origin is `new`.
    pub fn add(&self, items: Vec<UploadItem>) -> Vec<QueueIndex> {
        let mut admitted = Vec::new();
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.state != QueueState::Idle {
            debug!(state = ?inner.state, count = items.len(), "queue busy, add ignored");
            return admitted;
        }

        for item in items {
            if !self.shared.multiple && !inner.entries.is_empty() {
                debug!(name = %item.name(), "queue holds a single entry, item skipped");
                continue;
            }
            let key = item.dedup_key();
            if item.origin != ingest_protocol::Origin::New && inner.dedup.contains_key(&key) {
                debug!(name = %item.name(), "duplicate item skipped");
                continue;
            }

            inner.claim_key(key);
            let index = QueueIndex(inner.next_index);
            inner.next_index += 1;

            let announced = Arc::new(item.clone());
            inner.entries.insert(
                index,
                QueueEntry {
                    index,
                    item,
                    status: EntryStatus::Queued,
                },
            );
            self.shared.emit(QueueEvent::Announced {
                index,
                item: announced,
            });
            admitted.push(index);
        }
        admitted
    }

    /// Starts processing on a new task. Returns `None` if already running.
    ///
    /// With `batch_staged`, queued items with origin `ftp-staged` are taken
    /// out first and committed together, one payload per container.
    pub fn start(&self, batch_staged: bool) -> Option<JoinHandle<()>> {
        let (staged, cancel): (Vec<QueueEntry>, CancellationToken) = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state != QueueState::Idle {
                return None;
            }
            inner.state = QueueState::Running;
            if inner.cancel.is_cancelled() {
                inner.cancel = CancellationToken::new();
            }
            let cancel = inner.cancel.clone();

            let staged = if batch_staged {
                let indices: Vec<QueueIndex> = inner
                    .entries
                    .values()
                    .filter(|e| e.status == EntryStatus::Queued && e.item.is_staged())
                    .map(|e| e.index)
                    .collect();
                indices
                    .into_iter()
                    .filter_map(|i| inner.take_queued(i))
                    .collect()
            } else {
                Vec::new()
            };
            (staged, cancel)
        };

        info!(batched = staged.len(), "upload queue started");
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(shared.run(staged, cancel)))
    }

    /// Starts the queue and waits until it is idle again.
    pub async fn run(&self, batch_staged: bool) {
        if let Some(handle) = self.start(batch_staged)
            && let Err(e) = handle.await
        {
            error!(error = %e, "upload queue task failed");
        }
    }

    /// Requests a pause. The active entry finishes; nothing new starts.
    pub fn stop(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.state == QueueState::Running {
            inner.state = QueueState::Paused;
            debug!("upload queue pause requested");
        }
    }

    /// Drops a queued entry. Active entries cannot be removed.
    pub fn remove(&self, index: QueueIndex) -> Option<UploadItem> {
        self.shared
            .inner
            .lock()
            .unwrap()
            .take_queued(index)
            .map(|e| e.item)
    }

    /// Drops every queued entry.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock().unwrap();
        let queued: Vec<QueueIndex> = inner
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::Queued)
            .map(|e| e.index)
            .collect();
        for index in queued {
            inner.take_queued(index);
        }
    }

    /// Number of entries, active included.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.shared
            .inner
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::Active)
            .count()
    }

    pub fn state(&self) -> QueueState {
        self.shared.inner.lock().unwrap().state
    }

    /// Snapshot of all entries in admission order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.shared
            .inner
            .lock()
            .unwrap()
            .entries
            .values()
            .cloned()
            .collect()
    }
}

impl Shared {
    fn emit(&self, event: QueueEvent) {
        // The receiver may have been dropped; events are then discarded.
        let _ = self.events_tx.send(event);
    }

    async fn run(self: Arc<Self>, staged: Vec<QueueEntry>, cancel: CancellationToken) {
        if !staged.is_empty() {
            self.commit_staged(staged).await;
        }

        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == QueueState::Paused || cancel.is_cancelled() {
                    None
                } else {
                    inner.activate_next()
                }
            };
            let Some((index, item)) = next else {
                break;
            };
            self.process(index, item, &cancel).await;
        }

        self.inner.lock().unwrap().state = QueueState::Idle;
        info!("upload queue idle");
        self.emit(QueueEvent::Complete);
    }

    async fn process(&self, index: QueueIndex, item: UploadItem, cancel: &CancellationToken) {
        info!(index = %index, name = %item.name(), "upload started");
        self.emit(QueueEvent::Started { index });

        let request = self
            .builder
            .build(std::slice::from_ref(&item), &item.container_id);
        let on_event = |event: ItemEvent| match event {
            ItemEvent::Progress(percent) => self.emit(QueueEvent::Progress { index, percent }),
            ItemEvent::Warning(message) => {
                warn!(index = %index, message = %message, "upload warning");
                self.emit(QueueEvent::Warning { index, message });
            }
        };
        let result = self
            .orchestrator
            .submit_upload(request, cancel, &on_event)
            .await;

        self.inner.lock().unwrap().entries.remove(&index);
        match result {
            Ok(response) => {
                info!(index = %index, "upload succeeded");
                self.emit(QueueEvent::Success {
                    index,
                    response: Arc::new(response),
                });
            }
            Err(e) => {
                error!(index = %index, name = %item.name(), error = %e, "upload failed");
                self.emit(QueueEvent::Error {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Commits staged entries in one payload per container.
    async fn commit_staged(&self, staged: Vec<QueueEntry>) {
        let mut groups: BTreeMap<String, Vec<QueueEntry>> = BTreeMap::new();
        for entry in staged {
            groups
                .entry(entry.item.container_id.clone())
                .or_default()
                .push(entry);
        }

        for (container_id, entries) in groups {
            let items: Vec<UploadItem> = entries.iter().map(|e| e.item.clone()).collect();
            let request = self.builder.build(&items, &container_id);
            info!(
                container_id = %container_id,
                count = entries.len(),
                "committing staged batch"
            );

            let result = match request.error_message {
                Some(message) => Err(UploadError::Precondition(message)),
                None => submit_payload(self.orchestrator.api(), &request.payload).await,
            };

            match result {
                Ok(response) => {
                    let response = Arc::new(response);
                    for entry in &entries {
                        self.emit(QueueEvent::Success {
                            index: entry.index,
                            response: Arc::clone(&response),
                        });
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    for entry in &entries {
                        error!(index = %entry.index, error = %message, "staged upload failed");
                        self.emit(QueueEvent::Error {
                            index: entry.index,
                            message: message.clone(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DefaultPayloadBuilder;
    use crate::submitter::{IngestApi, IngestFuture};
    use ingest_protocol::{Blob, CommitPayload, Origin, UploadSource};
    use ingest_transfer::{MemoryTransport, TransportError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const MIB: usize = 1024 * 1024;

    struct CountingApi {
        calls: AtomicU32,
        commits: Mutex<Vec<CommitPayload>>,
    }

    impl CountingApi {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                commits: Mutex::new(Vec::new()),
            }
        }
    }

    impl IngestApi for CountingApi {
        fn fetch<'a>(&'a self, payload: &'a CommitPayload) -> IngestFuture<'a> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.commits.lock().unwrap().push(payload.clone());
            Box::pin(async move { Ok(serde_json::json!({ "commit": n })) })
        }
    }

    struct Harness {
        queue: UploadQueue,
        transport: Arc<MemoryTransport>,
        api: Arc<CountingApi>,
        events: mpsc::UnboundedReceiver<QueueEvent>,
    }

    fn harness_with(config: UploadConfig, latency: Duration) -> Harness {
        let transport = Arc::new(MemoryTransport::default().with_latency(latency));
        let api = Arc::new(CountingApi::new());
        let orchestrator = Arc::new(Orchestrator::new(transport.clone(), api.clone(), &config));
        let queue = UploadQueue::new(orchestrator, Arc::new(DefaultPayloadBuilder), &config);
        let events = queue.take_events().unwrap();
        Harness {
            queue,
            transport,
            api,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(UploadConfig::default(), Duration::ZERO)
    }

    fn file(name: &str, bytes: &[u8], origin: Origin) -> UploadItem {
        UploadItem::new(name, "h1", origin)
            .with_source(UploadSource::Blob(Blob::from_bytes(name, bytes.to_vec())))
    }

    fn staged(path: &str) -> UploadItem {
        UploadItem::new(path, "h1", Origin::FtpStaged).with_source(UploadSource::Staged {
            path: path.into(),
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn started(events: &[QueueEvent]) -> Vec<QueueIndex> {
        events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Started { index } => Some(*index),
                _ => None,
            })
            .collect()
    }

    fn errors(events: &[QueueEvent]) -> Vec<(QueueIndex, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Error { index, message } => Some((*index, message.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn add_announces_in_order() {
        let mut h = harness();
        let indices = h.queue.add(vec![
            file("a", b"1", Origin::Pasted),
            file("b", b"2", Origin::Pasted),
        ]);
        assert_eq!(indices, vec![QueueIndex(0), QueueIndex(1)]);
        assert_eq!(h.queue.len(), 2);

        let events = drain(&mut h.events);
        assert!(matches!(
            &events[0],
            QueueEvent::Announced { index: QueueIndex(0), item }
                if item.name() == "a" && item.origin == Origin::Pasted
        ));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_name_and_size_rejected_unless_new() {
        let h = harness();
        h.queue.add(vec![file("r.fq", b"ACGT", Origin::Pasted)]);
        assert!(h.queue.add(vec![file("r.fq", b"TTTT", Origin::Url)]).is_empty());
        assert_eq!(h.queue.len(), 1);

        let admitted = h.queue.add(vec![
            file("r.fq", b"ACGT", Origin::New),
            file("r.fq", b"ACGT", Origin::New),
        ]);
        assert_eq!(admitted.len(), 2);
        assert_eq!(h.queue.len(), 3);
    }

    #[tokio::test]
    async fn removing_entry_frees_its_key() {
        let h = harness();
        let first = h.queue.add(vec![file("a", b"1", Origin::Pasted)])[0];
        assert!(h.queue.add(vec![file("a", b"1", Origin::Pasted)]).is_empty());

        assert!(h.queue.remove(first).is_some());
        assert!(h.queue.remove(first).is_none());
        assert_eq!(h.queue.add(vec![file("a", b"1", Origin::Pasted)]).len(), 1);

        h.queue.reset();
        assert!(h.queue.is_empty());
        assert_eq!(h.queue.add(vec![file("a", b"1", Origin::Pasted)]).len(), 1);
    }

    #[tokio::test]
    async fn single_entry_mode() {
        let h = harness_with(
            UploadConfig {
                multiple: false,
                ..UploadConfig::default()
            },
            Duration::ZERO,
        );
        let admitted = h.queue.add(vec![
            file("a", b"1", Origin::New),
            file("b", b"2", Origin::New),
        ]);
        assert_eq!(admitted.len(), 1);
        assert_eq!(h.queue.entries()[0].item.name(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn add_while_running_is_ignored() {
        let h = harness_with(UploadConfig::default(), Duration::from_millis(50));
        h.queue.add(vec![file("a", b"1", Origin::New)]);
        let handle = h.queue.start(false).unwrap();

        assert_eq!(h.queue.state(), QueueState::Running);
        assert!(h.queue.add(vec![file("b", b"2", Origin::New)]).is_empty());
        assert_eq!(h.queue.len(), 1);
        assert!(h.queue.start(false).is_none());

        handle.await.unwrap();
        assert_eq!(h.queue.state(), QueueState::Idle);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn processes_fifo_one_at_a_time() {
        let mut h = harness_with(UploadConfig::default(), Duration::from_millis(10));
        h.queue.add(vec![
            file("a", b"aaaa", Origin::New),
            file("b", b"bbbb", Origin::New),
            file("c", b"cccc", Origin::New),
        ]);
        h.queue.run(false).await;

        let events = drain(&mut h.events);
        assert_eq!(
            started(&events),
            vec![QueueIndex(0), QueueIndex(1), QueueIndex(2)]
        );

        let mut active = 0i32;
        for event in &events {
            match event {
                QueueEvent::Started { .. } => active += 1,
                e if e.is_terminal() => active -= 1,
                _ => {}
            }
            assert!((0..=1).contains(&active));
        }
        assert!(matches!(events.last(), Some(QueueEvent::Complete)));
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_active_entry_finish() {
        let mut h = harness_with(UploadConfig::default(), Duration::from_millis(100));
        h.queue.add(vec![
            file("a", b"aaaa", Origin::New),
            file("b", b"bbbb", Origin::New),
            file("c", b"cccc", Origin::New),
        ]);
        let handle = h.queue.start(false).unwrap();

        let mut seen = Vec::new();
        while let Some(event) = h.events.recv().await {
            if matches!(event, QueueEvent::Started { index: QueueIndex(1) }) {
                h.queue.stop();
                assert_eq!(h.queue.state(), QueueState::Paused);
                assert_eq!(h.queue.active_count(), 1);
            }
            let done = matches!(event, QueueEvent::Complete);
            seen.push(event);
            if done {
                break;
            }
        }
        handle.await.unwrap();

        assert_eq!(started(&seen), vec![QueueIndex(0), QueueIndex(1)]);
        assert!(seen.iter().any(|e| matches!(
            e,
            QueueEvent::Success { index: QueueIndex(1), .. }
        )));
        assert_eq!(h.queue.state(), QueueState::Idle);
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.entries()[0].index, QueueIndex(2));
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_no_op() {
        let h = harness();
        h.queue.stop();
        assert_eq!(h.queue.state(), QueueState::Idle);
        h.queue.add(vec![file("a", b"1", Origin::New)]);
        h.queue.run(false).await;
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_active_entry_and_next_start_resumes() {
        let config = UploadConfig {
            chunk_size: 2,
            ..UploadConfig::default()
        };
        let mut h = harness_with(config, Duration::from_millis(100));
        h.queue.add(vec![
            file("a", b"aaaaaaaa", Origin::New),
            file("b", b"bbbb", Origin::New),
        ]);
        let cancel = h.queue.cancel_token();
        let handle = h.queue.start(false).unwrap();

        let mut seen = Vec::new();
        while let Some(event) = h.events.recv().await {
            if matches!(event, QueueEvent::Started { index: QueueIndex(0) }) {
                cancel.cancel();
            }
            let done = matches!(event, QueueEvent::Complete);
            seen.push(event);
            if done {
                break;
            }
        }
        handle.await.unwrap();

        assert_eq!(started(&seen), vec![QueueIndex(0)]);
        assert_eq!(errors(&seen), vec![(QueueIndex(0), "cancelled".to_string())]);
        assert_eq!(h.queue.state(), QueueState::Idle);
        assert_eq!(h.queue.len(), 1);
        assert!(h.queue.cancel_token().is_cancelled());

        h.queue.run(false).await;
        let events = drain(&mut h.events);
        assert_eq!(started(&events), vec![QueueIndex(1)]);
        assert!(events.iter().any(|e| matches!(
            e,
            QueueEvent::Success { index: QueueIndex(1), .. }
        )));
        assert!(h.queue.is_empty());
        assert!(!h.queue.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn token_fired_while_idle_does_not_block_next_run() {
        let mut h = harness();
        h.queue.cancel_token().cancel();
        h.queue.add(vec![file("a", b"1", Origin::New)]);
        h.queue.run(false).await;

        let events = drain(&mut h.events);
        assert_eq!(started(&events), vec![QueueIndex(0)]);
        assert!(errors(&events).is_empty());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn large_file_reports_ten_steps_then_success() {
        let mut h = harness();
        h.queue.add(vec![file("big.bin", &vec![0u8; 100 * MIB], Origin::New)]);
        h.queue.run(false).await;

        let events = drain(&mut h.events);
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);

        let successes = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::Success { .. }))
            .count();
        assert_eq!(successes, 1);

        let commits = h.api.commits.lock().unwrap();
        let reference = commits[0].reference(0).unwrap();
        assert_eq!(reference.name, "big.bin");
        assert!(!reference.session_id.is_empty());
    }

    #[tokio::test]
    async fn unnamed_paste_is_sent_as_default() {
        let h = harness();
        h.queue.add(vec![UploadItem::new("p", "h1", Origin::Pasted).with_source(
            UploadSource::Pasted {
                content: "ACGT".into(),
                name: None,
            },
        )]);
        h.queue.run(false).await;

        let commits = h.api.commits.lock().unwrap();
        assert_eq!(commits[0].reference(0).unwrap().name, "default");
        assert_eq!(h.transport.pushed_bytes(), 4);
    }

    #[tokio::test]
    async fn staged_items_commit_once() {
        let mut h = harness();
        h.queue
            .add(vec![staged("one.txt"), staged("two.txt"), staged("three.txt")]);
        h.queue.run(true).await;

        assert_eq!(h.api.calls.load(Ordering::SeqCst), 1);
        let events = drain(&mut h.events);
        let responses: Vec<&Arc<serde_json::Value>> = events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Success { response, .. } => Some(response),
                _ => None,
            })
            .collect();
        assert_eq!(responses.len(), 3);
        assert!(responses.windows(2).all(|w| Arc::ptr_eq(w[0], w[1])));
        assert_eq!(h.api.commits.lock().unwrap()[0].targets[0].elements.len(), 3);
        assert!(started(&events).is_empty());
    }

    #[tokio::test]
    async fn staged_batch_leaves_other_items_to_the_loop() {
        let mut h = harness();
        h.queue.add(vec![
            staged("one.txt"),
            file("local.txt", b"data", Origin::New),
            staged("two.txt"),
        ]);
        h.queue.run(true).await;

        assert_eq!(h.api.calls.load(Ordering::SeqCst), 2);
        let events = drain(&mut h.events);
        assert_eq!(started(&events), vec![QueueIndex(1)]);
    }

    #[tokio::test]
    async fn forbidden_item_fails_once_and_queue_continues() {
        let mut h = harness();
        h.transport
            .fail_next_push(TransportError::http(403, "forbidden"));
        h.queue.add(vec![
            file("a", b"aaaa", Origin::New),
            file("b", b"bbbb", Origin::New),
        ]);
        h.queue.run(false).await;

        let events = drain(&mut h.events);
        let errs = errors(&events);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].0, QueueIndex(0));
        assert!(!events.iter().any(|e| matches!(e, QueueEvent::Warning { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            QueueEvent::Success { index: QueueIndex(1), .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_only_warn() {
        let mut h = harness();
        for _ in 0..3 {
            h.transport
                .fail_next_push(TransportError::network("connection reset"));
        }
        h.queue.add(vec![file("a", b"aaaa", Origin::New)]);
        h.queue.run(false).await;

        let events = drain(&mut h.events);
        assert!(errors(&events).is_empty());
        let warnings = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::Warning { .. }))
            .count();
        assert_eq!(warnings, 3);
        assert!(events.iter().any(|e| matches!(e, QueueEvent::Success { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn capped_retries_report_attempts_message() {
        let mut h = harness_with(
            UploadConfig {
                attempts: Some(1),
                ..UploadConfig::default()
            },
            Duration::ZERO,
        );
        for _ in 0..2 {
            h.transport.fail_next_push(TransportError::network("down"));
        }
        h.queue.add(vec![file("a", b"aaaa", Origin::New)]);
        h.queue.run(false).await;

        let errs = errors(&drain(&mut h.events));
        assert_eq!(errs, vec![(QueueIndex(0), "Maximum number of attempts reached.".to_string())]);
    }

    #[tokio::test]
    async fn precondition_failure_is_reported_per_item() {
        let mut h = harness();
        h.queue.add(vec![UploadItem::new("empty", "h1", Origin::New)]);
        h.queue.run(false).await;

        let errs = errors(&drain(&mut h.events));
        assert_eq!(errs, vec![(QueueIndex(0), "File not provided.".to_string())]);
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
    }
}
