use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracestash_core::{Result, TracestashError};

type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// What a call does, for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Names,
    Trace,
    Traces,
    Dependencies,
    Write,
    /// Result known up front; no I/O.
    Immediate,
}

/// Receives the outcome of [`Call::enqueue`]. Exactly one method runs,
/// exactly once.
pub trait Callback<T>: Send + 'static {
    fn on_success(self, value: T);
    fn on_error(self, error: TracestashError);
}

impl<T, F> Callback<T> for F
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    fn on_success(self, value: T) {
        self(Ok(value))
    }

    fn on_error(self, error: TracestashError) {
        self(Err(error))
    }
}

/// A deferred operation that runs at most once per instance. Clone it to
/// get a fresh instance of the same operation.
pub struct Call<T> {
    op: Operation<T>,
    kind: QueryKind,
    executed: AtomicBool,
}

impl<T: Send + 'static> Call<T> {
    pub fn new<F, Fut>(kind: QueryKind, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            op: Arc::new(move || op().boxed()),
            kind,
            executed: AtomicBool::new(false),
        }
    }

    /// Already successful; every execution yields a clone of `value`.
    pub fn done(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(QueryKind::Immediate, move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Result<()> {
        if self.executed.swap(true, Ordering::SeqCst) {
            return Err(TracestashError::AlreadyExecuted);
        }
        Ok(())
    }

    pub async fn execute(&self) -> Result<T> {
        self.claim()?;
        let result = (self.op)().await;
        if let Err(err) = &result {
            tracing::debug!(kind = ?self.kind, error = ?err, "call failed");
        }
        result
    }

    /// Runs the operation on the tokio runtime and reports to `callback`.
    /// Must be called from within a runtime.
    pub fn enqueue<C: Callback<T>>(&self, callback: C) {
        if let Err(err) = self.claim() {
            callback.on_error(err);
            return;
        }
        let fut = (self.op)();
        let kind = self.kind;
        tokio::spawn(async move {
            match fut.await {
                Ok(value) => callback.on_success(value),
                Err(err) => {
                    tracing::debug!(kind = ?kind, error = ?err, "enqueued call failed");
                    callback.on_error(err)
                }
            }
        });
    }

    /// Post-processes the result. The returned call has not run yet.
    pub fn map<U, F>(self, f: F) -> Call<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let op = self.op;
        let f = Arc::new(f);
        Call {
            op: Arc::new(move || {
                let fut = op();
                let f = Arc::clone(&f);
                async move { fut.await.map(|v| f(v)) }.boxed()
            }),
            kind: self.kind,
            executed: AtomicBool::new(false),
        }
    }
}

impl<T> Clone for Call<T> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            kind: self.kind,
            executed: AtomicBool::new(false),
        }
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("kind", &self.kind)
            .field("executed", &self.executed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use super::*;

    fn counting_call(counter: Arc<AtomicUsize>) -> Call<usize> {
        Call::new(QueryKind::Names, move || {
            let counter = Arc::clone(&counter);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        })
    }

    #[tokio::test]
    async fn second_execute_fails_and_clone_reruns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let call = counting_call(Arc::clone(&counter));

        assert_eq!(call.execute().await.unwrap(), 1);
        assert!(matches!(
            call.execute().await,
            Err(TracestashError::AlreadyExecuted)
        ));

        let again = call.clone();
        assert!(!again.is_executed());
        assert_eq!(again.execute().await.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn enqueue_reports_once() {
        let call = Call::done(vec!["a".to_string()]);
        let (tx, rx) = oneshot::channel();
        call.enqueue(move |result: Result<Vec<String>>| {
            let _ = tx.send(result);
        });
        assert_eq!(rx.await.unwrap().unwrap(), vec!["a".to_string()]);

        let (tx, rx) = oneshot::channel();
        call.enqueue(move |result: Result<Vec<String>>| {
            let _ = tx.send(result);
        });
        assert!(matches!(
            rx.await.unwrap(),
            Err(TracestashError::AlreadyExecuted)
        ));
    }

    struct Recorder(oneshot::Sender<String>);

    impl Callback<u32> for Recorder {
        fn on_success(self, value: u32) {
            let _ = self.0.send(format!("ok {value}"));
        }

        fn on_error(self, error: TracestashError) {
            let _ = self.0.send(format!("err {error}"));
        }
    }

    #[tokio::test]
    async fn enqueue_routes_errors_to_on_error() {
        let call: Call<u32> = Call::new(QueryKind::Trace, || async {
            Err(TracestashError::Search("boom".into()))
        });
        let (tx, rx) = oneshot::channel();
        call.enqueue(Recorder(tx));
        assert_eq!(rx.await.unwrap(), "err search error: boom");
    }

    #[tokio::test]
    async fn map_transforms_result() {
        let call = Call::done(21u32).map(|v| v * 2);
        assert_eq!(call.kind(), QueryKind::Immediate);
        assert_eq!(call.execute().await.unwrap(), 42);
    }
}
