// This file is part of Xenon.
//
// Xenon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Xenon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Xenon.  If not, see <http://www.gnu.org/licenses/>.
use log::trace;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::{
    mpsc::{channel, Receiver, Sender, TryRecvError},
    Arc,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
}

/// Caller-minted identity for a request; the fetcher never interprets it.
/// Consumers encode enough to route a completion back to a tile or manifest
/// and to recognize stale completions for work dropped in the meantime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FetchKey(pub u64);

#[derive(Debug)]
pub struct Completion {
    pub key: FetchKey,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Inclusive HTTP Range header for the half-open byte span [start, end).
pub fn range_header(start: u64, end: u64) -> String {
    debug_assert!(end > start);
    format!("bytes={}-{}", start, end - 1)
}

struct Inner {
    client: reqwest::Client,
    handle: tokio::runtime::Handle,
    // Keeps a self-owned runtime alive for the standalone constructor.
    _runtime: Option<tokio::runtime::Runtime>,
}

/// Shared HTTP front end: one client and one runtime for the whole process.
/// Each consumer (a layer, a layout resolution) opens its own `FetchQueue`,
/// so completion routing never crosses consumers and key uniqueness is a
/// per-consumer concern.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<Inner>,
}

impl Fetcher {
    /// Ride an existing runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                handle,
                _runtime: None,
            }),
        }
    }

    /// Own a private runtime; the common case for a viewer embedding.
    pub fn standalone() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                handle,
                _runtime: Some(runtime),
            }),
        })
    }

    pub fn queue(&self) -> FetchQueue {
        let (tx, rx) = channel();
        FetchQueue {
            inner: self.inner.clone(),
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Fetcher").finish_non_exhaustive()
    }
}

/// One consumer's lane: requests go up tagged with a key, completions come
/// back down on `drain` without ever blocking the frame thread. The
/// channel ends sit behind mutexes only so a queue can live inside shared
/// objects; there is no contention on the frame thread.
pub struct FetchQueue {
    inner: Arc<Inner>,
    tx: Mutex<Sender<Completion>>,
    rx: Mutex<Receiver<Completion>>,
}

impl FetchQueue {
    /// Begin fetching `url`, optionally only the byte span [start, end).
    pub fn request(&self, key: FetchKey, url: &str, range: Option<(u64, u64)>) {
        trace!("fetch {:?} {} range={:?}", key, url, range);
        let client = self.inner.client.clone();
        let url = url.to_owned();
        let tx = self.tx.lock().clone();
        self.inner.handle.spawn(async move {
            let result = run_request(client, &url, range).await;
            // The receiver going away means the consumer shut down.
            let _ = tx.send(Completion { key, result });
        });
    }

    /// All completions that have arrived since the last call; never blocks.
    pub fn drain(&self) -> SmallVec<[Completion; 8]> {
        let mut out = SmallVec::new();
        let rx = self.rx.lock();
        loop {
            match rx.try_recv() {
                Ok(completion) => out.push(completion),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Injection point for tests and for callers that complete work from
    /// somewhere other than HTTP (e.g. locally sliced archive segments).
    pub fn complete_local(&self, key: FetchKey, result: Result<Vec<u8>, FetchError>) {
        let _ = self.tx.lock().send(Completion { key, result });
    }
}

impl std::fmt::Debug for FetchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FetchQueue").finish_non_exhaustive()
    }
}

async fn run_request(
    client: reqwest::Client,
    url: &str,
    range: Option<(u64, u64)>,
) -> Result<Vec<u8>, FetchError> {
    let mut builder = client.get(url);
    if let Some((start, end)) = range {
        builder = builder.header(reqwest::header::RANGE, range_header(start, end));
    }
    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_owned(),
        });
    }
    Ok(response.bytes().await?.to_vec())
}
