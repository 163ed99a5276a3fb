//! Scoped acquisition with guaranteed release.
//!
//! Each acquired resource registers its release step as soon as it is
//! acquired. [`ReleaseStack::release_all`] runs every registered step in
//! reverse order and never fails: a step that errors is logged and the rest
//! still run.

use crate::error::Result;
use futures_util::future::BoxFuture;
use std::future::Future;
use tracing::debug;

type ReleaseStep = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

#[derive(Default)]
pub struct ReleaseStack {
    steps: Vec<(&'static str, ReleaseStep)>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer<F, Fut>(&mut self, resource: &'static str, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let step: ReleaseStep =
            Box::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(release()) });
        self.steps.push((resource, step));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn release_all(&mut self) {
        while let Some((resource, release)) = self.steps.pop() {
            match release().await {
                Ok(()) => debug!(resource, "Released"),
                Err(e) => debug!(resource, error = %e, "Release failed; ignoring"),
            }
        }
    }
}

impl std::fmt::Debug for ReleaseStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(name, _)| name))
            .finish()
    }
}
