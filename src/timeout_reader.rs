//! Wraps a byte stream such that any poll that doesn't produce an item within a configured
//! inactivity deadline fails with [`AkubraError::Timeout`]. Used on outbound response bodies
//! so a slow backend cannot indefinitely hold a connection-ceiling slot.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::errors::AkubraError;

pin_project! {
    pub struct TimeoutStream<S> {
        #[pin]
        inner: S,
        deadline: Duration,
        sleep: std::pin::Pin<Box<tokio::time::Sleep>>,
    }
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, deadline: Duration) -> Self {
        TimeoutStream {
            inner,
            deadline,
            sleep: Box::pin(tokio::time::sleep(deadline)),
        }
    }
}

impl<S, E> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let mut this = self.project();

        match this.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(bytes))) => {
                // A byte arrived: reset the inactivity clock.
                this.sleep.set(tokio::time::sleep(*this.deadline));
                std::task::Poll::Ready(Some(Ok(bytes)))
            }
            std::task::Poll::Ready(Some(Err(err))) => {
                std::task::Poll::Ready(Some(Err(std::io::Error::other(err.to_string()))))
            }
            std::task::Poll::Ready(None) => std::task::Poll::Ready(None),
            std::task::Poll::Pending => match this.sleep.as_mut().poll(cx) {
                std::task::Poll::Ready(()) => {
                    std::task::Poll::Ready(Some(Err(AkubraError::Timeout.into())))
                }
                std::task::Poll::Pending => std::task::Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn passes_through_bytes_within_deadline() {
        let source = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ]);
        let mut timeout = TimeoutStream::new(source, Duration::from_millis(200));
        assert_eq!(timeout.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(timeout.next().await.unwrap().unwrap(), Bytes::from_static(b"b"));
        assert!(timeout.next().await.is_none());
    }

    #[tokio::test]
    async fn times_out_on_inactivity() {
        let source = futures::stream::pending::<Result<Bytes, std::io::Error>>();
        let mut timeout = TimeoutStream::new(source, Duration::from_millis(20));
        let item = timeout.next().await.unwrap();
        let err = item.unwrap_err();
        assert_eq!(err.to_string(), AkubraError::Timeout.to_string());
    }
}
