//! In-process resumable transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::transport::{
    NewSession, PreviousSession, ResumableTransport, TransportError, TransportFuture,
};

/// Sessions kept in memory, with optional simulated latency and injected
/// failures.
///
/// Useful for dry runs and for exercising retry and resume paths without a
/// server.
pub struct MemoryTransport {
    inner: Mutex<MemoryInner>,
    latency: Duration,
}

struct MemoryInner {
    base_url: String,
    next_id: u64,
    sessions: HashMap<String, MemorySession>,
    by_fingerprint: HashMap<String, Vec<PreviousSession>>,
    push_failures: VecDeque<TransportError>,
    create_failures: VecDeque<TransportError>,
    pushes: Vec<(String, u64, u64)>,
    creates: u32,
}

struct MemorySession {
    length: u64,
    offset: u64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new("memory://uploads")
    }
}

impl MemoryTransport {
    /// Creates a transport whose session URLs start with `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                next_id: 1,
                sessions: HashMap::new(),
                by_fingerprint: HashMap::new(),
                push_failures: VecDeque::new(),
                create_failures: VecDeque::new(),
                pushes: Vec::new(),
                creates: 0,
            }),
            latency: Duration::ZERO,
        }
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers a partially uploaded session for `fingerprint` and returns its URL.
    pub fn seed_session(&self, fingerprint: &str, length: u64, offset: u64) -> String {
        let mut inner = self.inner.lock().unwrap();
        let url = inner.allocate(length);
        if let Some(session) = inner.sessions.get_mut(&url) {
            session.offset = offset.min(length);
        }
        inner
            .by_fingerprint
            .entry(fingerprint.to_string())
            .or_default()
            .insert(
                0,
                PreviousSession {
                    url: url.clone(),
                    created_at: Utc::now(),
                },
            );
        url
    }

    /// Registers a fingerprint pointing at a session the server has dropped.
    pub fn seed_stale_session(&self, fingerprint: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let url = format!("{}/stale-{}", inner.base_url, inner.next_id);
        inner.next_id += 1;
        inner
            .by_fingerprint
            .entry(fingerprint.to_string())
            .or_default()
            .insert(
                0,
                PreviousSession {
                    url: url.clone(),
                    created_at: Utc::now(),
                },
            );
        url
    }

    /// Makes the next chunk push fail with `error`.
    pub fn fail_next_push(&self, error: TransportError) {
        self.inner.lock().unwrap().push_failures.push_back(error);
    }

    /// Makes the next session creation fail with `error`.
    pub fn fail_next_create(&self, error: TransportError) {
        self.inner.lock().unwrap().create_failures.push_back(error);
    }

    /// Bytes accepted across all successful pushes.
    pub fn pushed_bytes(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.pushes.iter().map(|(_, _, len)| len).sum()
    }

    /// `(url, offset, len)` of every accepted push, in order.
    pub fn pushes(&self) -> Vec<(String, u64, u64)> {
        self.inner.lock().unwrap().pushes.clone()
    }

    /// Number of sessions created through [`ResumableTransport::create_session`].
    pub fn sessions_created(&self) -> u32 {
        self.inner.lock().unwrap().creates
    }

    /// Accepted offset of a session.
    pub fn offset_of(&self, url: &str) -> Option<u64> {
        self.inner.lock().unwrap().sessions.get(url).map(|s| s.offset)
    }

    /// Whether any session is remembered for `fingerprint`.
    pub fn remembers(&self, fingerprint: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .by_fingerprint
            .get(fingerprint)
            .is_some_and(|v| !v.is_empty())
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl MemoryInner {
    fn allocate(&mut self, length: u64) -> String {
        let url = format!("{}/{:032x}", self.base_url, self.next_id);
        self.next_id += 1;
        self.sessions
            .insert(url.clone(), MemorySession { length, offset: 0 });
        url
    }
}

impl ResumableTransport for MemoryTransport {
    fn find_previous<'a>(
        &'a self,
        fingerprint: &'a str,
    ) -> TransportFuture<'a, Vec<PreviousSession>> {
        Box::pin(async move {
            self.delay().await;
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .by_fingerprint
                .get(fingerprint)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn create_session<'a>(&'a self, session: &'a NewSession) -> TransportFuture<'a, String> {
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.inner.lock().unwrap();
            if let Some(err) = inner.create_failures.pop_front() {
                return Err(err);
            }
            inner.creates += 1;
            let url = inner.allocate(session.length);
            inner
                .by_fingerprint
                .entry(session.fingerprint.clone())
                .or_default()
                .insert(
                    0,
                    PreviousSession {
                        url: url.clone(),
                        created_at: Utc::now(),
                    },
                );
            Ok(url)
        })
    }

    fn query_offset<'a>(&'a self, url: &'a str) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            self.delay().await;
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .get(url)
                .map(|s| s.offset)
                .ok_or_else(|| TransportError::http(404, format!("no session at {url}")))
        })
    }

    fn push_chunk<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.inner.lock().unwrap();
            if let Some(err) = inner.push_failures.pop_front() {
                return Err(err);
            }
            let session = inner
                .sessions
                .get_mut(url)
                .ok_or_else(|| TransportError::http(404, format!("no session at {url}")))?;
            if offset != session.offset {
                return Err(TransportError::http(
                    409,
                    format!("offset mismatch: expected {}, got {offset}", session.offset),
                ));
            }
            let len = data.len() as u64;
            if session.offset + len > session.length {
                return Err(TransportError::http(413, "chunk exceeds upload length"));
            }
            session.offset += len;
            let new_offset = session.offset;
            inner.pushes.push((url.to_string(), offset, len));
            Ok(new_offset)
        })
    }

    fn forget<'a>(&'a self, fingerprint: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.inner.lock().unwrap().by_fingerprint.remove(fingerprint);
            Ok(())
        })
    }
}
