use std::collections::VecDeque;
use std::sync::Mutex;

use stevedore_types::Event;
use tokio::sync::broadcast;

/// In-process pub/sub with a bounded ring of history (§4.6). `publish`
/// appends to history, dropping the oldest entry past capacity, and
/// fans out non-blockingly: a `broadcast` channel already drops a
/// slow subscriber's oldest unread messages rather than blocking the
/// publisher, which is exactly the "completeness for liveness" tradeoff
/// the design calls for.
pub struct EventBus {
  history: Mutex<VecDeque<Event>>,
  capacity: usize,
  sender: broadcast::Sender<Event>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { history: Mutex::new(VecDeque::with_capacity(capacity)), capacity, sender }
  }

  pub fn publish(&self, event: Event) {
    {
      let mut history = self.history.lock().expect("event history mutex poisoned");
      if history.len() >= self.capacity {
        history.pop_front();
      }
      history.push_back(event.clone());
    }
    // `send` only errors when there are no receivers; a local bus with
    // nobody long-polling yet is a normal, non-error state.
    let _ = self.sender.send(event);
  }

  /// History strictly after `since` (unix seconds).
  pub fn events_since(&self, since: i64) -> Vec<Event> {
    self
      .history
      .lock()
      .expect("event history mutex poisoned")
      .iter()
      .filter(|e| e.timestamp > since)
      .cloned()
      .collect()
  }

  pub fn last_change_at(&self) -> i64 {
    self
      .history
      .lock()
      .expect("event history mutex poisoned")
      .back()
      .map(|e| e.timestamp)
      .unwrap_or(0)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Event> {
    self.sender.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use stevedore_types::EventKind;

  fn event(kind: EventKind, ts: i64) -> Event {
    Event { kind, deployment: Some("app1".to_string()), timestamp: ts, data: serde_json::json!({}) }
  }

  #[test]
  fn history_drops_oldest_past_capacity() {
    let bus = EventBus::new(2);
    bus.publish(event(EventKind::DeploymentCreated, 1));
    bus.publish(event(EventKind::DeploymentUpdated, 2));
    bus.publish(event(EventKind::DeploymentUpdated, 3));

    let all = bus.events_since(0);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].timestamp, 2);
    assert_eq!(all[1].timestamp, 3);
  }

  #[test]
  fn events_since_is_strictly_after() {
    let bus = EventBus::new(10);
    bus.publish(event(EventKind::DeploymentCreated, 5));
    bus.publish(event(EventKind::DeploymentUpdated, 10));

    assert_eq!(bus.events_since(5).len(), 1);
    assert_eq!(bus.events_since(4).len(), 2);
  }

  #[tokio::test]
  async fn subscriber_is_woken_on_publish() {
    let bus = EventBus::new(10);
    let mut rx = bus.subscribe();
    bus.publish(event(EventKind::ParamsChanged, 42));

    let received = rx.recv().await.unwrap();
    assert_eq!(received.timestamp, 42);
  }
}
