use crate::error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// A point in time after which a storage call must give up.
///
/// Every storage operation takes one. Batch loops call [`Deadline::check`]
/// at each item boundary; single backend round-trips are wrapped with
/// [`Deadline::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Self { at: None }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` for an unbounded deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`StorageError::Canceled`] once the deadline has passed.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(StorageError::Canceled(format!(
                "{operation}: deadline exceeded"
            )));
        }
        Ok(())
    }

    /// Runs `fut`, failing with [`StorageError::Canceled`] if it outlives the deadline.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;
        match self.remaining() {
            None => fut.await,
            Some(left) => tokio::time::timeout(left, fut).await.map_err(|_| {
                StorageError::Canceled(format!("{operation}: deadline exceeded"))
            })?,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}
