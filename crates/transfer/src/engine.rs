//! Chunked transfer engine.
//!
//! Drives one blob through resume discovery, ordered chunk pushes and the
//! retry policy. Authorization failures end the transfer immediately; every
//! other transport failure is retried on the same session until it succeeds,
//! the retry cap (if any) is hit, or the caller cancels.

use std::time::Duration;

use ingest_protocol::{Blob, SessionReference};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunked::ChunkReader;
use crate::fingerprint::fingerprint;
use crate::retry::RetryPolicy;
use crate::transport::{NewSession, ResumableTransport, TransportError};
use crate::types::TransferSession;
use crate::TransferError;

/// Notification emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A chunk was accepted.
    Progress {
        bytes_accepted: u64,
        bytes_total: u64,
        percent: u8,
    },
    /// A transient failure occurred; the same session is retried after `delay`.
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
}

/// Pushes blobs through a [`ResumableTransport`].
pub struct ChunkedTransfer<'a> {
    transport: &'a dyn ResumableTransport,
    chunk_size: u64,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> ChunkedTransfer<'a> {
    pub fn new(
        transport: &'a dyn ResumableTransport,
        chunk_size: u64,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            chunk_size,
            policy,
            cancel,
        }
    }

    /// Transfers `blob` into `container_id` and returns the session reference.
    pub async fn transfer(
        &self,
        blob: &Blob,
        container_id: &str,
        on_event: &(dyn Fn(TransferEvent) + Send + Sync),
    ) -> Result<SessionReference, TransferError> {
        let mut session =
            TransferSession::new(fingerprint(blob, container_id), blob.size, self.chunk_size);
        debug!(
            name = %blob.name,
            chunk_size = self.chunk_size,
            size = blob.size,
            "starting chunked upload"
        );

        loop {
            self.check_cancelled()?;

            let err = match self.attempt(blob, container_id, &mut session, on_event).await {
                Ok(()) => break,
                Err(TransferError::Transport(e)) => e,
                Err(other) => return Err(other),
            };

            if err.is_forbidden() {
                error!(name = %blob.name, error = %err, "upload failed because of missing authorization");
                return Err(TransferError::Forbidden(err.message));
            }

            let attempt = session.record_failure();
            if self.policy.is_exhausted(attempt) {
                error!(name = %blob.name, attempts = attempt - 1, "retry budget exhausted");
                return Err(TransferError::AttemptsExhausted);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                name = %blob.name,
                attempt,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "upload interrupted, will retry"
            );
            on_event(TransferEvent::Retrying {
                attempt,
                delay,
                reason: err.message,
            });

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(name = %blob.name, "retry cancelled");
                    return Err(TransferError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let url = session.url().unwrap_or_default().to_string();
        let session_id = session_id_from_url(&url)?;

        if let Err(e) = self.transport.forget(session.fingerprint()).await {
            warn!(error = %e, "failed to forget completed session");
        }

        info!(
            name = %blob.name,
            url = %url,
            elapsed_secs = session.elapsed().as_secs_f64(),
            "upload finished"
        );

        Ok(SessionReference {
            session_id,
            name: blob.name.clone(),
        })
    }

    /// One pass: bind a session if needed, then push every remaining chunk.
    async fn attempt(
        &self,
        blob: &Blob,
        container_id: &str,
        session: &mut TransferSession,
        on_event: &(dyn Fn(TransferEvent) + Send + Sync),
    ) -> Result<(), TransferError> {
        match session.url().map(str::to_owned) {
            Some(url) => match self.transport.query_offset(&url).await {
                Ok(offset) => session.accept(offset),
                Err(e) if e.is_gone() => {
                    warn!(url = %url, "session vanished server-side, starting over");
                    session.unbind();
                    self.negotiate(blob, container_id, session).await?;
                }
                Err(e) => return Err(e.into()),
            },
            None => self.negotiate(blob, container_id, session).await?,
        }

        let url = session
            .url()
            .map(str::to_owned)
            .ok_or_else(|| TransferError::InvalidSessionUrl(String::new()))?;

        if session.bytes_total() == 0 {
            on_event(progress_event(0, 0));
            return Ok(());
        }

        let mut reader = ChunkReader::open(blob, session.chunk_size()).await?;
        reader.seek_to(session.bytes_accepted()).await?;

        while let Some(chunk) = reader.next_chunk().await? {
            self.check_cancelled()?;

            let sent_end = chunk.offset + chunk.data.len() as u64;
            let offset = self
                .transport
                .push_chunk(&url, chunk.offset, chunk.data)
                .await?;

            if offset <= chunk.offset {
                return Err(TransportError::network(format!(
                    "server accepted no bytes at offset {}",
                    chunk.offset
                ))
                .into());
            }
            session.accept(offset);
            if offset != sent_end {
                debug!(offset, sent_end, "partial chunk accepted, rewinding");
                reader.seek_to(offset).await?;
            }

            on_event(progress_event(session.bytes_accepted(), session.bytes_total()));
        }

        Ok(())
    }

    /// Resumes the most recent previous session for this fingerprint, or
    /// creates a new one.
    async fn negotiate(
        &self,
        blob: &Blob,
        container_id: &str,
        session: &mut TransferSession,
    ) -> Result<(), TransferError> {
        let fp = session.fingerprint().to_string();
        let previous = self.transport.find_previous(&fp).await?;

        if let Some(prev) = previous.first() {
            match self.transport.query_offset(&prev.url).await {
                Ok(offset) => {
                    info!(
                        name = %blob.name,
                        url = %prev.url,
                        offset,
                        "resuming previous upload"
                    );
                    session.bind(prev.url.clone(), offset);
                    return Ok(());
                }
                Err(e) if e.is_gone() => {
                    debug!(url = %prev.url, "previous session expired");
                    if let Err(e) = self.transport.forget(&fp).await {
                        warn!(error = %e, "failed to forget expired session");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut metadata = vec![
            ("filename".to_string(), blob.name.clone()),
            ("history_id".to_string(), container_id.to_string()),
        ];
        if !blob.content_type.is_empty() {
            metadata.push(("filetype".to_string(), blob.content_type.clone()));
        }

        let request = NewSession {
            fingerprint: fp,
            length: blob.size,
            metadata,
        };
        let url = self.transport.create_session(&request).await?;
        debug!(name = %blob.name, url = %url, "created upload session");
        session.bind(url, 0);
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn progress_event(bytes_accepted: u64, bytes_total: u64) -> TransferEvent {
    TransferEvent::Progress {
        bytes_accepted,
        bytes_total,
        percent: percent_complete(bytes_accepted, bytes_total),
    }
}

/// Whole-number percentage, rounded to nearest. An empty source is complete.
pub fn percent_complete(bytes_accepted: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 100;
    }
    let pct = (bytes_accepted as f64 / bytes_total as f64) * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

/// Extracts the session id: the last path segment of the session URL.
pub fn session_id_from_url(url: &str) -> Result<String, TransferError> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransferError::InvalidSessionUrl(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const MIB: u64 = 1024 * 1024;

    fn recorder() -> (
        Arc<Mutex<Vec<TransferEvent>>>,
        impl Fn(TransferEvent) + Send + Sync,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |e| sink.lock().unwrap().push(e))
    }

    fn percents(events: &[TransferEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn retries(events: &[TransferEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Retrying { .. }))
            .count()
    }

    #[test]
    fn percent_rounds_to_nearest() {
        assert_eq!(percent_complete(0, 10), 0);
        assert_eq!(percent_complete(1, 3), 33);
        assert_eq!(percent_complete(2, 3), 67);
        assert_eq!(percent_complete(10, 10), 100);
        assert_eq!(percent_complete(0, 0), 100);
    }

    #[test]
    fn session_id_is_last_segment() {
        assert_eq!(
            session_id_from_url("https://h/api/upload/resumable_upload/abc123").unwrap(),
            "abc123"
        );
        assert_eq!(session_id_from_url("https://h/u/xyz/").unwrap(), "xyz");
        assert!(session_id_from_url("").is_err());
    }

    #[tokio::test]
    async fn hundred_mib_in_ten_mib_chunks_reports_ten_steps() {
        let transport = MemoryTransport::default();
        let engine = ChunkedTransfer::new(
            &transport,
            10 * MIB,
            RetryPolicy::default(),
            CancellationToken::new(),
        );
        let blob = Blob::from_bytes("big.bin", vec![7u8; (100 * MIB) as usize]);
        let (events, on_event) = recorder();

        let reference = engine.transfer(&blob, "h1", &on_event).await.unwrap();

        let pcts = percents(&events.lock().unwrap());
        assert_eq!(pcts, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(reference.name, "big.bin");
        assert_eq!(reference.session_id.len(), 32);
        assert_eq!(transport.pushed_bytes(), 100 * MIB);
    }

    #[tokio::test]
    async fn resumes_previous_session_from_accepted_offset() {
        let transport = MemoryTransport::default();
        let blob = Blob::from_bytes("r.bin", vec![1u8; 1000]);
        let fp = fingerprint(&blob, "h1");
        let url = transport.seed_session(&fp, 1000, 400);

        let engine =
            ChunkedTransfer::new(&transport, 250, RetryPolicy::default(), CancellationToken::new());
        let (_events, on_event) = recorder();
        let reference = engine.transfer(&blob, "h1", &on_event).await.unwrap();

        assert_eq!(transport.pushed_bytes(), 1000 - 400);
        assert_eq!(transport.sessions_created(), 0);
        assert_eq!(transport.pushes()[0].1, 400);
        assert_eq!(session_id_from_url(&url).unwrap(), reference.session_id);
        assert!(!transport.remembers(&fp));
    }

    #[tokio::test]
    async fn stale_previous_session_starts_fresh() {
        let transport = MemoryTransport::default();
        let blob = Blob::from_bytes("r.bin", vec![1u8; 10]);
        transport.seed_stale_session(&fingerprint(&blob, "h1"));

        let engine =
            ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), CancellationToken::new());
        let (_events, on_event) = recorder();
        engine.transfer(&blob, "h1", &on_event).await.unwrap();

        assert_eq!(transport.sessions_created(), 1);
        assert_eq!(transport.pushed_bytes(), 10);
    }

    #[tokio::test]
    async fn forbidden_is_terminal_without_retry() {
        let transport = MemoryTransport::default();
        transport.fail_next_push(TransportError::http(403, "forbidden"));
        let engine =
            ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), CancellationToken::new());
        let blob = Blob::from_bytes("f.bin", vec![0u8; 8]);
        let (events, on_event) = recorder();

        let err = engine.transfer(&blob, "h1", &on_event).await.unwrap_err();
        assert!(matches!(err, TransferError::Forbidden(_)));
        assert_eq!(retries(&events.lock().unwrap()), 0);
        assert_eq!(transport.pushed_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_same_session_on_schedule() {
        let transport = MemoryTransport::default();
        for _ in 0..4 {
            transport.fail_next_push(TransportError::http(503, "unavailable"));
        }
        let engine =
            ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), CancellationToken::new());
        let blob = Blob::from_bytes("t.bin", vec![0u8; 8]);
        let (events, on_event) = recorder();

        let started = Instant::now();
        engine.transfer(&blob, "h1", &on_event).await.unwrap();

        // 0s + 3s + 10s + 10s of backoff before the fifth attempt.
        assert!(started.elapsed() >= Duration::from_secs(23));
        let events = events.lock().unwrap();
        let delays: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Retrying { delay, .. } => Some(delay.as_secs()),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![0, 3, 10, 10]);
        assert_eq!(transport.sessions_created(), 1);
        assert_eq!(percents(&events), vec![50, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_continues_from_server_offset() {
        let transport = MemoryTransport::default();
        let engine =
            ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), CancellationToken::new());
        let blob = Blob::from_bytes("t.bin", vec![0u8; 12]);
        // first chunk lands, second push fails once
        let (events, on_event) = {
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&events);
            let t = &transport;
            let on_event = move |e: TransferEvent| {
                if matches!(e, TransferEvent::Progress { bytes_accepted: 4, .. }) {
                    t.fail_next_push(TransportError::network("connection reset"));
                }
                sink.lock().unwrap().push(e);
            };
            (events, on_event)
        };

        engine.transfer(&blob, "h1", &on_event).await.unwrap();

        let offsets: Vec<u64> = transport.pushes().iter().map(|p| p.1).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(retries(&events.lock().unwrap()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capped_policy_gives_up() {
        let transport = MemoryTransport::default();
        for _ in 0..3 {
            transport.fail_next_push(TransportError::network("timeout"));
        }
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..RetryPolicy::default()
        };
        let engine = ChunkedTransfer::new(&transport, 4, policy, CancellationToken::new());
        let blob = Blob::from_bytes("t.bin", vec![0u8; 4]);
        let (events, on_event) = recorder();

        let err = engine.transfer(&blob, "h1", &on_event).await.unwrap_err();
        assert!(matches!(err, TransferError::AttemptsExhausted));
        assert_eq!(err.to_string(), "Maximum number of attempts reached.");
        assert_eq!(retries(&events.lock().unwrap()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let transport = MemoryTransport::default();
        for _ in 0..10 {
            transport.fail_next_push(TransportError::network("down"));
        }
        let cancel = CancellationToken::new();
        let engine = ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), cancel.clone());
        let blob = Blob::from_bytes("t.bin", vec![0u8; 4]);
        let on_event = move |e: TransferEvent| {
            if matches!(e, TransferEvent::Retrying { attempt: 3, .. }) {
                cancel.cancel();
            }
        };

        let err = engine.transfer(&blob, "h1", &on_event).await.unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn empty_blob_completes_with_full_progress() {
        let transport = MemoryTransport::default();
        let engine =
            ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), CancellationToken::new());
        let blob = Blob::from_bytes("empty.txt", Vec::<u8>::new());
        let (events, on_event) = recorder();

        engine.transfer(&blob, "h1", &on_event).await.unwrap();
        assert_eq!(percents(&events.lock().unwrap()), vec![100]);
        assert_eq!(transport.sessions_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_is_retried() {
        let transport = MemoryTransport::default();
        transport.fail_next_create(TransportError::http(500, "boom"));
        let engine =
            ChunkedTransfer::new(&transport, 4, RetryPolicy::default(), CancellationToken::new());
        let blob = Blob::from_bytes("c.bin", vec![0u8; 4]);
        let (events, on_event) = recorder();

        engine.transfer(&blob, "h1", &on_event).await.unwrap();
        assert_eq!(retries(&events.lock().unwrap()), 1);
        assert_eq!(transport.sessions_created(), 1);
    }
}
