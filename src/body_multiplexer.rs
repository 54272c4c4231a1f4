//! Duplicates one source body into N independent streaming readers without buffering more
//! than one chunk at a time: a write blocks until every still-open reader has consumed it,
//! so a slow backend applies back-pressure all the way to the client upload. Readers are
//! plain `Stream<Item = io::Result<Bytes>>` handles (wrapped into a `reqwest::Body` at the
//! call site via `Body::wrap_stream`), backed by a bounded, capacity-one `mpsc` channel per
//! reader — the channel bound *is* the back-pressure mechanism, so no extra buffering is
//! needed to get it.

use bytes::Bytes;
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::AkubraError;

/// One demultiplexed reader. Drop it (or call [`MultiplexedReader::close`]) to detach from
/// the fan-out without stalling the writer past the time remaining readers catch up.
pub struct MultiplexedReader {
    inner: ReceiverStream<std::io::Result<Bytes>>,
}

impl MultiplexedReader {
    pub fn close(self) {
        drop(self);
    }
}

impl Stream for MultiplexedReader {
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.inner).poll_next(cx)
    }
}

/// How the writer's drive loop concluded. Useful for logging; no caller is required to
/// inspect it.
#[derive(Debug, PartialEq, Eq)]
pub enum MultiplexOutcome {
    /// The source was fully drained and every reader observed a clean EOF.
    Completed,
    /// Every reader had closed before the source was drained; the remainder of the source
    /// was abandoned.
    BrokenPipe,
    /// The source reader itself failed with a non-EOF error; broadcast to all readers.
    SourceError,
    /// The declared `Content-Length` disagreed with the bytes actually observed.
    LengthMismatch,
}

/// Splits `source` into `n` independent readers. Returns the readers plus a future that
/// drives the fan-out to completion — callers should spawn it rather than await it inline,
/// since it must keep running concurrently with every backend dispatch reading from its
/// reader.
pub fn multiplex<S>(
    source: S,
    n: usize,
    declared_len: Option<u64>,
) -> (Vec<MultiplexedReader>, impl std::future::Future<Output = MultiplexOutcome>)
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
{
    let mut senders = Vec::with_capacity(n);
    let mut readers = Vec::with_capacity(n);
    for _ in 0..n {
        // Capacity 1: a send completes only once the reader has pulled the previous chunk,
        // which is exactly the back-pressure contract the fan-out is built around.
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        senders.push(Some(tx));
        readers.push(MultiplexedReader {
            inner: ReceiverStream::new(rx),
        });
    }

    let drive = drive_fanout(source, senders, declared_len);
    (readers, drive)
}

async fn drive_fanout<S>(
    source: S,
    mut senders: Vec<Option<tokio::sync::mpsc::Sender<std::io::Result<Bytes>>>>,
    declared_len: Option<u64>,
) -> MultiplexOutcome
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
{
    futures::pin_mut!(source);
    use futures::StreamExt;

    let mut total: u64 = 0;

    loop {
        let Some(next) = source.next().await else {
            break;
        };

        match next {
            Ok(chunk) => {
                total += chunk.len() as u64;
                if let Some(declared) = declared_len {
                    if total > declared {
                        broadcast_error(
                            &senders,
                            AkubraError::BodyContentLengthMismatch {
                                declared,
                                delivered: total,
                            },
                        )
                        .await;
                        return MultiplexOutcome::LengthMismatch;
                    }
                }

                if !send_to_all(&mut senders, chunk).await {
                    return MultiplexOutcome::BrokenPipe;
                }
            }
            Err(err) => {
                broadcast_error(&senders, AkubraError::BodyRead(err.to_string())).await;
                return MultiplexOutcome::SourceError;
            }
        }
    }

    if let Some(declared) = declared_len {
        if total != declared {
            broadcast_error(
                &senders,
                AkubraError::BodyContentLengthMismatch {
                    declared,
                    delivered: total,
                },
            )
            .await;
            return MultiplexOutcome::LengthMismatch;
        }
    }

    // Dropping every sender closes each reader's channel, which surfaces as a clean EOF.
    MultiplexOutcome::Completed
}

/// Sends `chunk` to every still-open reader. Returns `false` once every reader has closed,
/// so the caller can stop driving the source.
async fn send_to_all(
    senders: &mut [Option<tokio::sync::mpsc::Sender<std::io::Result<Bytes>>>],
    chunk: Bytes,
) -> bool {
    let mut any_open = false;
    for slot in senders.iter_mut() {
        if let Some(tx) = slot {
            if tx.send(Ok(chunk.clone())).await.is_ok() {
                any_open = true;
            } else {
                *slot = None;
            }
        }
    }
    any_open
}

async fn broadcast_error(
    senders: &[Option<tokio::sync::mpsc::Sender<std::io::Result<Bytes>>>],
    err: AkubraError,
) {
    for slot in senders.iter() {
        if let Some(tx) = slot {
            let _ = tx.send(Err(err.clone().into())).await;
        }
    }
}
