//! Completion handshake for an authorization popup.
//!
//! Two channels can report completion: a poll against the token store and a
//! direct message from the popup. Whichever fires first resolves the
//! handshake and the other future is dropped, which cancels it.

use std::future::Future;
use std::time::Duration;

/// Which channel completed the handshake, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal<P, M> {
    Polled(P),
    Message(M),
}

/// Resolve with the first of `poll` and `message` to complete.
pub async fn await_first_signal<P, M, FP, FM>(poll: FP, message: FM) -> CompletionSignal<P, M>
where
    FP: Future<Output = P>,
    FM: Future<Output = M>,
{
    tokio::select! {
        polled = poll => CompletionSignal::Polled(polled),
        received = message => CompletionSignal::Message(received),
    }
}

/// Call `check` every `every` until it yields a value.
pub async fn poll_until<T, F, Fut>(every: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Some(value) = check().await {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_wins_and_poll_is_dropped() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_poll = calls.clone();

        let poll = async move {
            let _flag = flag;
            poll_until(Duration::from_secs(1), || {
                let calls = calls_in_poll.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    None::<&str>
                }
            })
            .await
        };
        let (tx, rx) = tokio::sync::oneshot::channel::<&str>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            let _ = tx.send("from popup");
        });

        let signal = await_first_signal(poll, async { rx.await.ok() }).await;
        assert_eq!(signal, CompletionSignal::Message(Some("from popup")));
        assert!(dropped.load(Ordering::SeqCst));

        // No more polling once the handshake resolved
        let seen = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wins_when_no_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poll = poll_until(Duration::from_secs(2), || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                (n >= 2).then_some("tokens")
            }
        });

        let signal: CompletionSignal<&str, ()> =
            await_first_signal(poll, std::future::pending()).await;
        assert_eq!(signal, CompletionSignal::Polled("tokens"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
