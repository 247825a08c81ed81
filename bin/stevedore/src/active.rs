use std::sync::Arc;

use cache::CloneCache;

/// The process-wide per-deployment active-slot lock (§4.5): a map
/// `ident -> bool` guarded internally by `CloneCache`'s `RwLock`.
/// Guarantees at-most-one active operation per deployment across the
/// poll loop, the reconcile loop, and admin-triggered workers. There is
/// no queue -- a contended acquire is simply refused, and the caller
/// drops the attempt rather than waiting.
#[derive(Default)]
pub struct ActiveSlots(CloneCache<String, bool>);

impl ActiveSlots {
  /// Attempts to acquire the slot for `deployment`. Returns a guard
  /// that releases it on drop, or `None` if already active. `self`
  /// must be held in an `Arc` so the guard can release asynchronously
  /// on drop without borrowing past its own lifetime.
  pub async fn try_acquire(
    self: &Arc<Self>,
    deployment: &str,
  ) -> Option<ActiveSlotGuard> {
    if self.0.get(&deployment.to_string()).await.is_some() {
      return None;
    }
    self.0.insert(deployment.to_string(), true).await;
    Some(ActiveSlotGuard { slots: self.clone(), deployment: deployment.to_string() })
  }

  pub async fn is_active(&self, deployment: &str) -> bool {
    self.0.get(&deployment.to_string()).await.is_some()
  }
}

/// Releases the active slot when dropped.
pub struct ActiveSlotGuard {
  slots: Arc<ActiveSlots>,
  deployment: String,
}

impl Drop for ActiveSlotGuard {
  fn drop(&mut self) {
    let slots = self.slots.clone();
    let deployment = std::mem::take(&mut self.deployment);
    tokio::spawn(async move {
      slots.0.remove(&deployment).await;
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn second_acquire_is_refused_while_held() {
    let slots = Arc::new(ActiveSlots::default());
    let guard = slots.try_acquire("app1").await;
    assert!(guard.is_some());
    assert!(slots.try_acquire("app1").await.is_none());
  }

  #[tokio::test]
  async fn release_on_drop_frees_the_slot() {
    let slots = Arc::new(ActiveSlots::default());
    let guard = slots.try_acquire("app1").await.unwrap();
    drop(guard);
    // The release task is spawned on drop; yield so it can run.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert!(slots.try_acquire("app1").await.is_some());
  }

  #[tokio::test]
  async fn different_deployments_do_not_contend() {
    let slots = Arc::new(ActiveSlots::default());
    let _a = slots.try_acquire("app1").await.unwrap();
    assert!(slots.try_acquire("app2").await.is_some());
  }
}
