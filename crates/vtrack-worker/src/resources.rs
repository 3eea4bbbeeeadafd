//! Lazily initialized shared client handles.

use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

type Initializer<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// A client handle built on first use.
///
/// The first caller runs the initializer; concurrent first callers wait for
/// that single attempt and later callers reuse the value. A failed attempt
/// is not cached, so the next caller tries again.
pub struct LazyResource<T, E> {
    name: &'static str,
    cell: OnceCell<T>,
    init: Initializer<T, E>,
}

impl<T, E: fmt::Display> LazyResource<T, E> {
    pub fn new<F, Fut>(name: &'static str, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            name,
            cell: OnceCell::new(),
            init: Box::new(move || Box::pin(init())),
        }
    }

    /// Get the handle, initializing it if needed.
    pub async fn get(&self) -> Result<&T, E> {
        self.cell
            .get_or_try_init(|| async {
                debug!(resource = self.name, "Initializing resource");
                let result = (self.init)().await;
                if let Err(e) = &result {
                    warn!(resource = self.name, error = %e, "Resource initialization failed");
                }
                result
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
