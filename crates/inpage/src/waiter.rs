//! Polling waits.
//!
//! Every wait here polls on [`POLL_INTERVAL`] rather than subscribing to host
//! events: not every condition the driver cares about has an event behind it,
//! but every condition can be re-checked.
//!
//! Only [`wait_for_function`] (and therefore [`wait_for`]) enforces a timeout.
//! Selector waits stay pending until their condition holds; compose them with
//! [`with_deadline`] when a bound is needed.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use log::debug;
use tokio::time::sleep;

use crate::agent::InPageAgent;
use crate::error::{AgentError, HostError, Result};
use crate::host::ElementRef;
use crate::POLL_INTERVAL;

/// Type-erased asynchronous predicate.
pub type BoxPredicate = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<bool>> + Send>;

/// What [`wait_for`] should wait on.
pub enum WaitCondition {
    /// Poll until the predicate yields `true`.
    Predicate(BoxPredicate),
    /// Sleep for a fixed duration.
    Delay(Duration),
}

impl WaitCondition {
    pub fn predicate<F, Fut>(mut predicate: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        WaitCondition::Predicate(Box::new(move || Box::pin(predicate())))
    }

    pub fn delay(duration: Duration) -> Self {
        WaitCondition::Delay(duration)
    }
}

impl std::fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::Predicate(_) => f.write_str("Predicate(..)"),
            WaitCondition::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
        }
    }
}

/// Options for selector and XPath waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectorWaitOptions {
    /// Wait for the query to stop matching instead of starting to.
    pub hidden: bool,
}

/// Poll `predicate` until it yields `true`.
///
/// The first check runs immediately, each following one [`POLL_INTERVAL`]
/// after the previous check settled. A predicate error rejects the wait with
/// [`AgentError::Predicate`]. If `timeout` elapses first the wait rejects with
/// [`AgentError::Timeout`] and the predicate is not called again. A zero
/// timeout means no timeout.
pub async fn wait_for_function<F, Fut>(mut predicate: F, timeout: Option<Duration>) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    match timeout.filter(|limit| !limit.is_zero()) {
        Some(limit) => match tokio::time::timeout(limit, poll_until(&mut predicate)).await {
            Ok(result) => result,
            Err(_) => {
                debug!("[waiter] Condition not fulfilled within {:?}", limit);
                Err(AgentError::Timeout(limit))
            }
        },
        None => poll_until(&mut predicate).await,
    }
}

async fn poll_until<F, Fut>(predicate: &mut F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    loop {
        if predicate().await.map_err(AgentError::Predicate)? {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Resolve after `duration`.
pub async fn wait_for_timeout(duration: Duration) {
    sleep(duration).await;
}

/// Wait on either a predicate or a plain delay.
///
/// `timeout` only applies to predicates.
pub async fn wait_for(condition: WaitCondition, timeout: Option<Duration>) -> Result<()> {
    match condition {
        WaitCondition::Predicate(predicate) => wait_for_function(predicate, timeout).await,
        WaitCondition::Delay(duration) => {
            wait_for_timeout(duration).await;
            Ok(())
        }
    }
}

/// Bound an otherwise unbounded wait.
pub async fn with_deadline<F: Future>(limit: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| AgentError::Timeout(limit))
}

/// Poll `query` every [`POLL_INTERVAL`] until it matches, or with `hidden`
/// until it stops matching. A query the host rejects ends the wait.
async fn wait_for_query<Q>(mut query: Q, options: SelectorWaitOptions) -> Result<Option<ElementRef>>
where
    Q: FnMut() -> std::result::Result<Option<ElementRef>, HostError>,
{
    loop {
        sleep(POLL_INTERVAL).await;
        let found = query()?;
        if options.hidden {
            if found.is_none() {
                return Ok(None);
            }
        } else if found.is_some() {
            return Ok(found);
        }
    }
}

impl InPageAgent {
    /// Wait for a CSS selector to match under `root` (whole document if `None`).
    ///
    /// Resolves with the first match, or with `None` once nothing matches when
    /// `options.hidden` is set. Never times out; rejects if the selector is
    /// invalid.
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        root: Option<&ElementRef>,
        options: SelectorWaitOptions,
    ) -> Result<Option<ElementRef>> {
        debug!(
            "[waiter] Waiting for selector {:?} (hidden: {})",
            selector, options.hidden
        );
        let dom = self.host().dom();
        wait_for_query(|| dom.query_selector(root, selector), options).await
    }

    /// XPath counterpart of [`InPageAgent::wait_for_selector`].
    pub async fn wait_for_xpath(
        &self,
        xpath: &str,
        root: Option<&ElementRef>,
        options: SelectorWaitOptions,
    ) -> Result<Option<ElementRef>> {
        debug!(
            "[waiter] Waiting for xpath {:?} (hidden: {})",
            xpath, options.hidden
        );
        let dom = self.host().dom();
        wait_for_query(|| dom.query_xpath(root, xpath), options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn counting_predicate(
        calls: Arc<AtomicUsize>,
        true_after: Option<Duration>,
    ) -> impl FnMut() -> futures::future::Ready<anyhow::Result<bool>> {
        let start = Instant::now();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let done = true_after.is_some_and(|after| start.elapsed() >= after);
            futures::future::ready(Ok(done))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_function_resolves_before_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let predicate = counting_predicate(calls.clone(), Some(Duration::from_millis(500)));

        wait_for_function(predicate, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        let polls = calls.load(Ordering::SeqCst);
        // ceil(500 / 200) + 1
        assert!((1..=4).contains(&polls), "unexpected poll count {polls}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_function_immediate_truthy_polls_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let predicate = counting_predicate(calls.clone(), Some(Duration::ZERO));

        wait_for_function(predicate, None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_function_times_out_and_stops_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let predicate = counting_predicate(calls.clone(), None);

        let err = wait_for_function(predicate, Some(Duration::from_millis(1000)))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Timeout(d) if d == Duration::from_millis(1000)));
        assert!(start.elapsed() >= Duration::from_millis(1000));

        let polls_at_timeout = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), polls_at_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_function_zero_timeout_is_unbounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let predicate = counting_predicate(calls.clone(), Some(Duration::from_millis(400)));

        wait_for_function(predicate, Some(Duration::ZERO))
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(400));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_function_predicate_error_rejects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        let result = wait_for_function(
            move || {
                let n = calls_in.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 2 {
                        anyhow::bail!("boom")
                    }
                    Ok(false)
                }
            },
            None,
        )
        .await;

        match result {
            Err(AgentError::Predicate(e)) => assert_eq!(e.to_string(), "boom"),
            other => panic!("expected predicate error, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_timeout_sleeps_at_least_duration() {
        let start = Instant::now();
        wait_for_timeout(Duration::from_millis(750)).await;
        assert!(start.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_dispatches_delay() {
        let start = Instant::now();
        wait_for(WaitCondition::delay(Duration::from_millis(300)), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_dispatches_predicate_with_timeout() {
        let condition = WaitCondition::predicate(|| async { Ok(false) });
        let err = wait_for(condition, Some(Duration::from_millis(400)))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_bounds_pending_future() {
        let err = with_deadline(Duration::from_millis(100), futures::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));

        let value = with_deadline(Duration::from_millis(100), async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
