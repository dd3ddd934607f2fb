//! Trigger set and timer loop.
//!
//! The engine keeps one trigger per task id in a sorted
//! `(next_instant, task_id)` queue. A single loop sleeps until the earliest
//! instant, hands every due trigger to the [`FireHandler`] on its own tokio
//! task, re-arms the rule and goes back to sleep. Registrations wake the loop
//! so it can shorten its nap.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::compiler::{ScheduleZone, TriggerRule};

/// What happens to a trigger once its firing has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Keep,
    /// The task is gone; drop its trigger.
    Discard,
}

/// Receives fired triggers. Called on a freshly spawned task per firing.
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn on_fire(&self, task_id: String, next_fire: Option<DateTime<Utc>>) -> FireOutcome;
}

struct Trigger {
    rule: TriggerRule,
    next: Option<DateTime<Utc>>,
    last_fired: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TriggerSet {
    by_id: HashMap<String, Trigger>,
    queue: BTreeSet<(DateTime<Utc>, String)>,
}

impl TriggerSet {
    /// Install or replace. A replaced trigger keeps its last fired slot so a
    /// re-registration inside that slot cannot fire it twice.
    fn insert(
        &mut self,
        task_id: &str,
        rule: TriggerRule,
        now: DateTime<Utc>,
        zone: ScheduleZone,
    ) -> Option<DateTime<Utc>> {
        let last_fired = self.remove(task_id).and_then(|t| t.last_fired);
        let from = last_fired.map_or(now, |fired| fired.max(now));
        let next = rule.next_after(from, zone);
        if let Some(at) = next {
            self.queue.insert((at, task_id.to_string()));
        }
        self.by_id.insert(
            task_id.to_string(),
            Trigger {
                rule,
                next,
                last_fired,
            },
        );
        next
    }

    fn remove(&mut self, task_id: &str) -> Option<Trigger> {
        let trigger = self.by_id.remove(task_id)?;
        if let Some(at) = trigger.next {
            self.queue.remove(&(at, task_id.to_string()));
        }
        Some(trigger)
    }

    /// Pop every trigger due at `now` and re-arm it. Slots missed while the
    /// process was not looking collapse into a single firing.
    fn take_due(
        &mut self,
        now: DateTime<Utc>,
        zone: ScheduleZone,
    ) -> Vec<(String, Option<DateTime<Utc>>)> {
        let mut due = Vec::new();
        while let Some((at, task_id)) = self.queue.pop_first() {
            if at > now {
                self.queue.insert((at, task_id));
                break;
            }
            let Some(trigger) = self.by_id.get_mut(&task_id) else {
                continue;
            };
            trigger.last_fired = Some(at);
            trigger.next = trigger.rule.next_after(now, zone);
            if let Some(next) = trigger.next {
                self.queue.insert((next, task_id.clone()));
            }
            due.push((task_id, trigger.next));
        }
        due
    }

    fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.queue.first().map(|(at, _)| *at)
    }
}

pub struct SchedulerEngine {
    triggers: Arc<Mutex<TriggerSet>>,
    zone: ScheduleZone,
    max_sleep: Duration,
    handler: Arc<dyn FireHandler>,
    wake: Notify,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerEngine {
    pub fn new(zone: ScheduleZone, max_sleep: Duration, handler: Arc<dyn FireHandler>) -> Self {
        Self {
            triggers: Arc::new(Mutex::new(TriggerSet::default())),
            zone,
            max_sleep: max_sleep.max(Duration::from_millis(10)),
            handler,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Install or replace the trigger for `task_id`. Returns its next instant.
    pub async fn register(&self, task_id: &str, rule: TriggerRule) -> Option<DateTime<Utc>> {
        self.register_at(task_id, rule, Utc::now()).await
    }

    pub async fn register_at(
        &self,
        task_id: &str,
        rule: TriggerRule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next = self
            .triggers
            .lock()
            .await
            .insert(task_id, rule, now, self.zone);
        debug!("Registered trigger for task {} ({}), next at {:?}", task_id, rule, next);
        self.wake.notify_one();
        next
    }

    /// Remove the trigger for `task_id`. Returns whether one was registered.
    pub async fn unregister(&self, task_id: &str) -> bool {
        let removed = self.triggers.lock().await.remove(task_id).is_some();
        if removed {
            debug!("Unregistered trigger for task {}", task_id);
            self.wake.notify_one();
        }
        removed
    }

    pub async fn is_registered(&self, task_id: &str) -> bool {
        self.triggers.lock().await.by_id.contains_key(task_id)
    }

    #[cfg(test)]
    pub async fn next_fire(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.triggers
            .lock()
            .await
            .by_id
            .get(task_id)
            .and_then(|t| t.next)
    }

    pub async fn len(&self) -> usize {
        self.triggers.lock().await.by_id.len()
    }

    /// Fire everything due at `now`. Each firing runs on its own task so a
    /// slow run never holds up the loop. Returns the fired task ids.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        let due = self.triggers.lock().await.take_due(now, self.zone);
        let mut fired = Vec::with_capacity(due.len());
        for (task_id, next_fire) in due {
            info!("Trigger fired for task {}", task_id);
            let handler = self.handler.clone();
            let triggers = self.triggers.clone();
            let id = task_id.clone();
            tokio::spawn(async move {
                if handler.on_fire(id.clone(), next_fire).await == FireOutcome::Discard
                    && triggers.lock().await.remove(&id).is_some()
                {
                    info!("Dropped orphaned trigger for task {}", id);
                }
            });
            fired.push(task_id);
        }
        fired
    }

    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let engine = Arc::clone(self);
        *handle = Some(tokio::spawn(engine.run_loop()));
    }

    async fn run_loop(self: Arc<Self>) {
        info!("Scheduler loop started ({} triggers)", self.len().await);
        loop {
            let now = Utc::now();
            self.fire_due(now).await;

            let nap = match self.triggers.lock().await.next_wake() {
                Some(at) => (at - now)
                    .to_std()
                    .unwrap_or_default()
                    .min(self.max_sleep),
                None => self.max_sleep,
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
        info!("Scheduler loop stopped");
    }

    /// Stop the loop. No trigger fires once this has been called.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!("Scheduler loop ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::compiler::{TimeOfDay, compile};
    use crate::core::store::ScheduleType;
    use tokio::sync::mpsc;

    struct ChannelHandler {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FireHandler for ChannelHandler {
        async fn on_fire(&self, task_id: String, _next_fire: Option<DateTime<Utc>>) -> FireOutcome {
            let outcome = if task_id.starts_with("gone-") {
                FireOutcome::Discard
            } else {
                FireOutcome::Keep
            };
            let _ = self.tx.send(task_id);
            outcome
        }
    }

    fn engine() -> (Arc<SchedulerEngine>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = SchedulerEngine::new(
            ScheduleZone::Utc,
            Duration::from_millis(50),
            Arc::new(ChannelHandler { tx }),
        );
        (Arc::new(engine), rx)
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn nine_am() -> TriggerRule {
        compile(ScheduleType::Daily, "09:00", None).unwrap()
    }

    #[tokio::test]
    async fn registering_twice_keeps_one_trigger() {
        let (engine, mut rx) = engine();
        let now = utc("2026-03-01T08:00:00Z");
        engine.register_at("task-1", nine_am(), now).await;
        engine.register_at("task-1", nine_am(), now).await;
        assert_eq!(engine.len().await, 1);

        let fired = engine.fire_due(utc("2026-03-01T09:00:00Z")).await;
        assert_eq!(fired, vec!["task-1".to_string()]);
        assert_eq!(rx.recv().await.as_deref(), Some("task-1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replacing_rule_moves_the_trigger() {
        let (engine, _rx) = engine();
        let now = utc("2026-03-01T08:00:00Z");
        engine.register_at("task-1", nine_am(), now).await;
        let ten = compile(ScheduleType::Daily, "10:00", None).unwrap();
        let next = engine.register_at("task-1", ten, now).await;
        assert_eq!(next, Some(utc("2026-03-01T10:00:00Z")));
        assert!(engine.fire_due(utc("2026-03-01T09:30:00Z")).await.is_empty());
        assert_eq!(
            engine.fire_due(utc("2026-03-01T10:00:00Z")).await,
            vec!["task-1".to_string()]
        );
    }

    #[tokio::test]
    async fn re_registering_inside_a_fired_slot_does_not_fire_again() {
        let (engine, _rx) = engine();
        engine
            .register_at("task-1", nine_am(), utc("2026-03-01T08:00:00Z"))
            .await;
        let slot = utc("2026-03-01T09:00:00Z");
        assert_eq!(engine.fire_due(slot).await.len(), 1);

        // An update racing the firing computes "now" slightly before the slot.
        let next = engine
            .register_at("task-1", nine_am(), utc("2026-03-01T08:59:59Z"))
            .await;
        assert_eq!(next, Some(utc("2026-03-02T09:00:00Z")));
        assert!(engine.fire_due(slot).await.is_empty());
    }

    #[tokio::test]
    async fn fired_trigger_is_rearmed_for_the_next_day() {
        let (engine, _rx) = engine();
        engine
            .register_at("task-1", nine_am(), utc("2026-03-01T08:00:00Z"))
            .await;
        engine.fire_due(utc("2026-03-01T09:00:05Z")).await;
        assert_eq!(
            engine.next_fire("task-1").await,
            Some(utc("2026-03-02T09:00:00Z"))
        );
    }

    #[tokio::test]
    async fn missed_slots_fire_once() {
        let (engine, _rx) = engine();
        engine
            .register_at("task-1", nine_am(), utc("2026-03-01T08:00:00Z"))
            .await;
        let fired = engine.fire_due(utc("2026-03-05T12:00:00Z")).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(
            engine.next_fire("task-1").await,
            Some(utc("2026-03-06T09:00:00Z"))
        );
    }

    #[tokio::test]
    async fn unregistered_trigger_never_fires() {
        let (engine, _rx) = engine();
        engine
            .register_at("task-1", nine_am(), utc("2026-03-01T08:00:00Z"))
            .await;
        assert!(engine.unregister("task-1").await);
        assert!(!engine.unregister("task-1").await);
        assert!(engine.fire_due(utc("2026-03-10T00:00:00Z")).await.is_empty());
        assert!(!engine.is_registered("task-1").await);
    }

    #[tokio::test]
    async fn independent_tasks_fire_in_time_order() {
        let (engine, _rx) = engine();
        let now = utc("2026-03-01T06:00:00Z");
        let seven = TriggerRule::Daily {
            at: TimeOfDay { hour: 7, minute: 0 },
        };
        engine.register_at("late", nine_am(), now).await;
        engine.register_at("early", seven, now).await;
        assert_eq!(
            engine.fire_due(utc("2026-03-01T09:00:00Z")).await,
            vec!["early".to_string(), "late".to_string()]
        );
    }

    #[tokio::test]
    async fn loop_fires_due_triggers_and_stops_on_shutdown() {
        let (engine, mut rx) = engine();
        // Registered "a day ago", so the next slot is already due.
        let rule = nine_am();
        let past = Utc::now() - chrono::Duration::days(1);
        engine.register_at("task-1", rule, past).await;

        engine.start().await;
        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("loop should fire the overdue trigger");
        assert_eq!(fired.as_deref(), Some("task-1"));

        engine.shutdown().await;
        engine.register_at("task-2", rule, past).await;
        assert!(engine.fire_due(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn trigger_of_a_vanished_task_is_dropped_after_firing() {
        let (engine, mut rx) = engine();
        let armed = utc("2026-03-01T08:00:00Z");
        engine.register_at("gone-1", nine_am(), armed).await;
        engine.register_at("task-1", nine_am(), armed).await;

        let fired = engine.fire_due(utc("2026-03-01T09:00:00Z")).await;
        assert_eq!(fired.len(), 2);
        rx.recv().await;
        rx.recv().await;
        for _ in 0..100 {
            if !engine.is_registered("gone-1").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!engine.is_registered("gone-1").await);
        assert!(engine.is_registered("task-1").await);
    }
}
