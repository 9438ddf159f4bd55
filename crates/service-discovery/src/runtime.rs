//! Runtime-agnostic spawning and timers
//!
//! Import bridges run background loops. The crate never picks an executor:
//! callers hand in a [`Spawner`]. Implementations for smol and tokio are
//! available behind the `smol` and `tokio` features. Timers come from
//! `async-io` and work under any executor.

use futures::future::BoxFuture;
use std::time::Duration;

/// Something that can run a future to completion in the background
pub trait Spawner: Send + Sync {
    /// Spawn a detached future
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

impl<F> Spawner for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync,
{
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self(future)
    }
}

/// Spawner for the smol runtime
#[cfg(feature = "smol")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

#[cfg(feature = "smol")]
impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        smol::spawn(future).detach();
    }
}

/// Spawner for the tokio runtime; must be used inside a tokio context
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[cfg(feature = "tokio")]
impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        tokio::spawn(future);
    }
}

/// Sleep for the specified duration
pub async fn sleep(duration: Duration) {
    async_io::Timer::after(duration).await;
}
