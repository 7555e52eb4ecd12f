//! In-process event bus.
//!
//! Subscribers register a callback for a named event; [`EventBus::emit`]
//! invokes them synchronously in descending priority order, ties in
//! subscription order. A failing callback is logged and skipped over, the
//! remaining subscribers still run.
//!
//! The bus never holds a borrow while a callback runs, so callbacks may
//! subscribe, unsubscribe or emit re-entrantly.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error};

use nvframe_core::{CallbackError, Value};

/// Event names emitted by the framework itself.
pub mod names {
    /// Before a plugin's dependencies are resolved. Payload: `{name}`.
    pub const PLUGIN_BEFORE_LOAD: &str = "plugin:before_load";
    /// A plugin finished loading. Payload: `{name}`.
    pub const PLUGIN_LOADED: &str = "plugin:loaded";
    /// A plugin's config function ran. Payload: `{name}`.
    pub const PLUGIN_CONFIGURED: &str = "plugin:configured";
    /// A plugin's config function failed. Payload: `{name, error}`.
    pub const PLUGIN_ERROR: &str = "plugin:error";
    /// A module was required for the first time. Payload: `{name}`.
    pub const MODULE_LOADED: &str = "module:loaded";
    /// A module was evicted and required again. Payload: `{name}`.
    pub const MODULE_RELOADED: &str = "module:reloaded";
}

/// Callback invoked with the emitted payload.
pub type EventCallback = Rc<dyn Fn(&Value) -> Result<(), CallbackError>>;

/// Unique id of a subscription, increasing in subscription order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Rebuild an id from its raw value (e.g. one handed to Lua).
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Options for [`EventBus::on`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Higher runs first. Default 0.
    pub priority: i32,
    /// Remove the subscription after its first invocation.
    pub once: bool,
}

impl SubscribeOptions {
    pub fn priority(priority: i32) -> Self {
        Self {
            priority,
            once: false,
        }
    }

    pub fn once() -> Self {
        Self {
            priority: 0,
            once: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    callback: EventCallback,
    priority: i32,
    once: bool,
}

/// Public view of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriptionId,
    pub event: String,
    pub priority: i32,
    pub once: bool,
}

/// What [`EventBus::off`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsubscribe {
    /// Exactly one subscription.
    Id(SubscriptionId),
    /// Every subscription of an event.
    Event(String),
}

impl From<SubscriptionId> for Unsubscribe {
    fn from(id: SubscriptionId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for Unsubscribe {
    fn from(event: &str) -> Self {
        Self::Event(event.to_string())
    }
}

impl From<String> for Unsubscribe {
    fn from(event: String) -> Self {
        Self::Event(event)
    }
}

/// Outcome of one [`EventBus::emit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Callbacks that ran.
    pub invoked: usize,
    /// Callbacks that ran and returned an error.
    pub failed: usize,
}

/// Publish/subscribe registry keyed by event name.
#[derive(Default)]
pub struct EventBus {
    // Each list is kept in dispatch order.
    subscriptions: RefCell<IndexMap<String, Vec<Subscription>>>,
    next_id: Cell<u64>,
    depth: Cell<usize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callback` to `event`.
    ///
    /// # Panics
    ///
    /// Panics if `event` is empty: a nameless subscription is a bug in the
    /// caller, not a runtime condition.
    pub fn on<F>(&self, event: &str, callback: F, opts: SubscribeOptions) -> SubscriptionId
    where
        F: Fn(&Value) -> Result<(), CallbackError> + 'static,
    {
        self.subscribe(event, Rc::new(callback), opts)
    }

    /// Subscribe an already shared callback.
    pub fn subscribe(
        &self,
        event: &str,
        callback: EventCallback,
        opts: SubscribeOptions,
    ) -> SubscriptionId {
        assert!(
            !event.is_empty(),
            "InvalidArgument: event name must be a non-empty string"
        );

        let id = SubscriptionId(self.next_id.get() + 1);
        self.next_id.set(id.0);

        let mut subscriptions = self.subscriptions.borrow_mut();
        let list = subscriptions.entry(event.to_string()).or_default();
        // Insert after every subscription with priority >= ours: stable on ties.
        let at = list.partition_point(|s| s.priority >= opts.priority);
        list.insert(
            at,
            Subscription {
                id,
                callback,
                priority: opts.priority,
                once: opts.once,
            },
        );

        debug!(
            event,
            subscription = id.0,
            priority = opts.priority,
            once = opts.once,
            "subscribed"
        );
        id
    }

    /// Invoke every subscriber of `event` with `data`.
    pub fn emit(&self, event: &str, data: Value) -> EmitReport {
        let snapshot: Vec<Subscription> = match self.subscriptions.borrow().get(event) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return EmitReport::default(),
        };

        self.depth.set(self.depth.get() + 1);
        let mut report = EmitReport::default();
        for sub in snapshot {
            if !self.claim(event, &sub) {
                continue;
            }
            report.invoked += 1;
            if let Err(err) = (sub.callback)(&data) {
                report.failed += 1;
                error!(event, subscription = sub.id.0, error = %err, "event callback failed");
            }
        }
        self.depth.set(self.depth.get() - 1);
        report
    }

    /// How many emits are dispatching right now, counting nested ones.
    ///
    /// Inside a callback this is at least 1; a callback can tell whether it
    /// was reached from a given emit by comparing depths.
    pub fn emit_depth(&self) -> usize {
        self.depth.get()
    }

    /// Check a snapshot entry is still live, removing it first if it is `once`.
    fn claim(&self, event: &str, sub: &Subscription) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let Some(list) = subscriptions.get_mut(event) else {
            return false;
        };
        let Some(pos) = list.iter().position(|s| s.id == sub.id) else {
            return false;
        };
        if sub.once {
            list.remove(pos);
        }
        true
    }

    /// Remove one subscription by id, or every subscription of an event.
    ///
    /// Returns how many were removed; unknown ids and events remove nothing.
    pub fn off(&self, target: impl Into<Unsubscribe>) -> usize {
        let mut subscriptions = self.subscriptions.borrow_mut();
        match target.into() {
            Unsubscribe::Id(id) => {
                for list in subscriptions.values_mut() {
                    if let Some(pos) = list.iter().position(|s| s.id == id) {
                        list.remove(pos);
                        return 1;
                    }
                }
                0
            }
            Unsubscribe::Event(event) => subscriptions
                .shift_remove(&event)
                .map_or(0, |list| list.len()),
        }
    }

    /// Remove every subscription, or only those of `event`.
    pub fn clear(&self, event: Option<&str>) {
        let mut subscriptions = self.subscriptions.borrow_mut();
        match event {
            Some(event) => {
                subscriptions.shift_remove(event);
            }
            None => subscriptions.clear(),
        }
    }

    /// Live subscriptions of `event`, in dispatch order.
    pub fn get_subscribers(&self, event: &str) -> Vec<SubscriberInfo> {
        self.subscriptions
            .borrow()
            .get(event)
            .map(|list| list.iter().map(|s| info(event, s)).collect())
            .unwrap_or_default()
    }

    /// Live subscriptions of every event that has any.
    pub fn all_subscribers(&self) -> IndexMap<String, Vec<SubscriberInfo>> {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(event, list)| {
                (
                    event.clone(),
                    list.iter().map(|s| info(event, s)).collect(),
                )
            })
            .collect()
    }

    pub fn has_subscribers(&self, event: &str) -> bool {
        self.subscriptions
            .borrow()
            .get(event)
            .is_some_and(|list| !list.is_empty())
    }

    /// Total number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.borrow().values().map(Vec::len).sum()
    }
}

fn info(event: &str, sub: &Subscription) -> SubscriberInfo {
    SubscriberInfo {
        id: sub.id,
        event: event.to_string(),
        priority: sub.priority,
        once: sub.once,
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.subscriptions.borrow().len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
