// ── Latest-value streams ──
//
// A coalescing view over one channel: only the most recent value is kept.
// Listeners registered through the multiplexer see every sample; a
// `ValueStream` deliberately does not.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::SyncError;
use crate::multiplexer::Multiplexer;
use crate::registry::Subscription;
use crate::schema::{Channel, Schema};

/// The latest value seen on a channel.
///
/// Provides both point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting to a `Stream`. Dropping
/// the stream releases its subscription.
pub struct ValueStream<T: Clone + Send + Sync + 'static> {
    current: Option<Arc<T>>,
    receiver: watch::Receiver<Option<Arc<T>>>,
    subscription: Subscription,
}

impl<T: Clone + Send + Sync + 'static> ValueStream<T> {
    /// Subscribe to `channel` through `mux`.
    pub fn open<S>(mux: &Multiplexer, channel: &Channel<S>) -> Result<Self, SyncError>
    where
        S: Schema<Value = T> + Clone,
    {
        let (sender, receiver) = watch::channel(None);
        let subscription = mux.register(channel, move |value: &T| {
            sender.send_replace(Some(Arc::new(value.clone())));
        })?;
        Ok(Self {
            current: None,
            receiver,
            subscription,
        })
    }

    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    /// The value seen by the last call to [`changed()`](Self::changed).
    pub fn current(&self) -> Option<&Arc<T>> {
        self.current.as_ref()
    }

    /// The most recent value, which may be newer than [`current()`](Self::current).
    pub fn latest(&self) -> Option<Arc<T>> {
        self.receiver.borrow().clone()
    }

    /// Wait for a value newer than the last one returned.
    /// Returns `None` once the subscription has been released.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        let latest = self.receiver.borrow_and_update().clone();
        self.current.clone_from(&latest);
        latest
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// The stream yields values that arrive after the conversion, skipping
    /// intermediate values it was too slow to observe.
    pub fn into_stream(self) -> ValueWatchStream<T> {
        ValueWatchStream {
            inner: WatchStream::from_changes(self.receiver),
            _subscription: self.subscription,
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct ValueWatchStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<Option<Arc<T>>>,
    _subscription: Subscription,
}

impl<T: Clone + Send + Sync + 'static> Stream for ValueWatchStream<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // WatchStream is Unpin and so is Option<Arc<T>>.
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Some(value))) => return Poll::Ready(Some(value)),
                Poll::Ready(Some(None)) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
