//! Shared selection
//!
//! Tracks, per type tag (e.g. `"asset"`, `"node"`), the ordered set of
//! selected ids, the active id, the hovered id and the context ids.
//!
//! Changes are staged first and become visible to other processes only when
//! confirmed: confirming diffs the working selection against the last
//! confirmed baseline and publishes `unselected`, `selected`,
//! `deactivated`/`activated` and one `changed`. Every notification goes out
//! twice, as an internal `_selection:*` event to every other process (which
//! applies it to its replica via [`SelectionCoordinator::apply_remote`]) and
//! as a public `selection:*` event to everyone, the origin included.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::events::{EventSink, NoOpEventSink};
use crate::ipc::Address;

/// Prefix of replica-sync channels
pub const INTERNAL_PREFIX: &str = "_selection:";

/// Prefix of observer channels
pub const PUBLIC_PREFIX: &str = "selection:";

const EVENT_NAMES: [&str; 8] = [
    "selected",
    "unselected",
    "activated",
    "deactivated",
    "hoverin",
    "hoverout",
    "context",
    "changed",
];

/// Channels a process listens on to keep its replica in sync
pub fn internal_channels() -> Vec<String> {
    EVENT_NAMES
        .iter()
        .map(|name| format!("{INTERNAL_PREFIX}{name}"))
        .collect()
}

/// A selection notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    Selected { type_tag: String, ids: Vec<String> },
    Unselected { type_tag: String, ids: Vec<String> },
    Activated { type_tag: String, id: String },
    Deactivated { type_tag: String, id: String },
    HoverIn { type_tag: String, id: String },
    HoverOut { type_tag: String, id: String },
    Context { type_tag: String, ids: Vec<String> },
    Changed { type_tag: String },
}

impl SelectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionEvent::Selected { .. } => "selected",
            SelectionEvent::Unselected { .. } => "unselected",
            SelectionEvent::Activated { .. } => "activated",
            SelectionEvent::Deactivated { .. } => "deactivated",
            SelectionEvent::HoverIn { .. } => "hoverin",
            SelectionEvent::HoverOut { .. } => "hoverout",
            SelectionEvent::Context { .. } => "context",
            SelectionEvent::Changed { .. } => "changed",
        }
    }

    pub fn type_tag(&self) -> &str {
        match self {
            SelectionEvent::Selected { type_tag, .. }
            | SelectionEvent::Unselected { type_tag, .. }
            | SelectionEvent::Activated { type_tag, .. }
            | SelectionEvent::Deactivated { type_tag, .. }
            | SelectionEvent::HoverIn { type_tag, .. }
            | SelectionEvent::HoverOut { type_tag, .. }
            | SelectionEvent::Context { type_tag, .. }
            | SelectionEvent::Changed { type_tag } => type_tag,
        }
    }

    /// Public observer channel
    pub fn channel(&self) -> String {
        format!("{PUBLIC_PREFIX}{}", self.name())
    }

    /// Replica-sync channel
    pub fn internal_channel(&self) -> String {
        format!("{INTERNAL_PREFIX}{}", self.name())
    }

    pub fn to_args(&self) -> Vec<Value> {
        let tag = Value::from(self.type_tag());
        match self {
            SelectionEvent::Selected { ids, .. }
            | SelectionEvent::Unselected { ids, .. }
            | SelectionEvent::Context { ids, .. } => vec![tag, Value::from(ids.clone())],
            SelectionEvent::Activated { id, .. }
            | SelectionEvent::Deactivated { id, .. }
            | SelectionEvent::HoverIn { id, .. }
            | SelectionEvent::HoverOut { id, .. } => vec![tag, Value::from(id.as_str())],
            SelectionEvent::Changed { .. } => vec![tag],
        }
    }

    /// Decode an event received on either the internal or the public channel
    pub fn from_wire(channel: &str, args: &[Value]) -> Option<Self> {
        let name = channel
            .strip_prefix(INTERNAL_PREFIX)
            .or_else(|| channel.strip_prefix(PUBLIC_PREFIX))?;
        let type_tag = args.first()?.as_str()?.to_string();
        let id = || args.get(1).and_then(Value::as_str).map(str::to_string);
        let ids = || {
            args.get(1).and_then(Value::as_array).map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
        };

        let event = match name {
            "selected" => SelectionEvent::Selected { type_tag, ids: ids()? },
            "unselected" => SelectionEvent::Unselected { type_tag, ids: ids()? },
            "activated" => SelectionEvent::Activated { type_tag, id: id()? },
            "deactivated" => SelectionEvent::Deactivated { type_tag, id: id()? },
            "hoverin" => SelectionEvent::HoverIn { type_tag, id: id()? },
            "hoverout" => SelectionEvent::HoverOut { type_tag, id: id()? },
            "context" => SelectionEvent::Context { type_tag, ids: ids()? },
            "changed" => SelectionEvent::Changed { type_tag },
            _ => return None,
        };
        Some(event)
    }
}

/// Options for [`SelectionCoordinator::select`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    /// Publish immediately instead of staging
    pub confirm: bool,
    /// Add to the current selection; when false, ids not in the input are dropped
    pub auto_add: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            confirm: true,
            auto_add: true,
        }
    }
}

impl SelectOptions {
    pub fn staged(mut self) -> Self {
        self.confirm = false;
        self
    }

    pub fn replace(mut self) -> Self {
        self.auto_add = false;
        self
    }
}

#[derive(Debug, Default, Clone)]
struct SelectionUnit {
    selection: Vec<String>,
    active: Option<String>,
    confirmed: Vec<String>,
    confirmed_active: Option<String>,
    /// Set by a select naming an active candidate; lets a reselect reclaim global active
    activate_requested: bool,
    hovering: Option<String>,
    contexts: Vec<String>,
}

impl SelectionUnit {
    fn settle_active(&mut self) {
        let stale = self
            .active
            .as_ref()
            .map_or(false, |id| !self.selection.contains(id));
        if stale {
            self.active = self.selection.last().cloned();
        }
    }
}

fn normalize<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let id = id.into();
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Per-process selection state for every type tag
pub struct SelectionCoordinator {
    sink: Arc<dyn EventSink>,
    units: BTreeMap<String, SelectionUnit>,
    global_active: Option<(String, String)>,
}

impl SelectionCoordinator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            units: BTreeMap::new(),
            global_active: None,
        }
    }

    /// Same state machine with publishing suppressed
    pub fn local() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }

    fn unit(&mut self, type_tag: &str) -> &mut SelectionUnit {
        self.units.entry(type_tag.to_string()).or_default()
    }

    /// Select ids; the last input id becomes the active candidate
    pub async fn select<I, S>(
        &mut self,
        type_tag: &str,
        ids: I,
        options: SelectOptions,
    ) -> Vec<SelectionEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let raw: Vec<String> = ids.into_iter().map(Into::into).collect();
        let candidate = raw.last().cloned();
        let ids = normalize(raw);
        let unit = self.unit(type_tag);

        if !options.auto_add {
            unit.selection.retain(|id| ids.contains(id));
        }
        for id in &ids {
            if !unit.selection.contains(id) {
                unit.selection.push(id.clone());
            }
        }
        if let Some(last) = candidate {
            unit.active = Some(last);
            unit.activate_requested = true;
        }
        unit.settle_active();

        if options.confirm {
            self.flush_and_publish(type_tag).await
        } else {
            Vec::new()
        }
    }

    /// Remove ids; ids that aren't selected are ignored
    pub async fn unselect<I, S>(
        &mut self,
        type_tag: &str,
        ids: I,
        confirm: bool,
    ) -> Vec<SelectionEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = normalize(ids);
        let unit = self.unit(type_tag);
        unit.selection.retain(|id| !ids.contains(id));
        unit.settle_active();

        if confirm {
            self.flush_and_publish(type_tag).await
        } else {
            Vec::new()
        }
    }

    /// Unselect everything of one type
    pub async fn clear(&mut self, type_tag: &str) -> Vec<SelectionEvent> {
        let current = self.selection(type_tag);
        self.unselect(type_tag, current, true).await
    }

    /// Flush staged changes of every type
    pub async fn confirm(&mut self) -> Vec<SelectionEvent> {
        let tags: Vec<String> = self.units.keys().cloned().collect();
        let mut events = Vec::new();
        for tag in tags {
            events.extend(self.flush(&tag));
        }
        self.publish(&events).await;
        events
    }

    /// Drop staged changes of every type
    pub fn cancel(&mut self) {
        for unit in self.units.values_mut() {
            unit.selection = unit.confirmed.clone();
            unit.active = unit.confirmed_active.clone();
            unit.activate_requested = false;
        }
    }

    /// Move the hover; the previous hover is always announced as left first
    pub async fn hover(&mut self, type_tag: &str, id: Option<&str>) -> Vec<SelectionEvent> {
        let unit = self.unit(type_tag);
        let mut events = Vec::new();
        if let Some(previous) = unit.hovering.take() {
            events.push(SelectionEvent::HoverOut {
                type_tag: type_tag.to_string(),
                id: previous,
            });
        }
        if let Some(id) = id {
            unit.hovering = Some(id.to_string());
            events.push(SelectionEvent::HoverIn {
                type_tag: type_tag.to_string(),
                id: id.to_string(),
            });
        }
        self.publish(&events).await;
        events
    }

    /// Replace the context ids of one type
    pub async fn set_context<I, S>(&mut self, type_tag: &str, ids: I) -> Vec<SelectionEvent>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = normalize(ids);
        self.unit(type_tag).contexts = ids.clone();
        let events = vec![SelectionEvent::Context {
            type_tag: type_tag.to_string(),
            ids,
        }];
        self.publish(&events).await;
        events
    }

    /// Apply an event published by another process without re-publishing
    pub fn apply_remote(&mut self, channel: &str, args: &[Value]) -> bool {
        let Some(event) = SelectionEvent::from_wire(channel, args) else {
            debug!("Ignoring malformed selection event on '{}'", channel);
            return false;
        };
        self.apply(&event);
        true
    }

    fn apply(&mut self, event: &SelectionEvent) {
        let unit = self.unit(event.type_tag());
        match event {
            SelectionEvent::Selected { ids, .. } => {
                for id in ids {
                    if !unit.selection.contains(id) {
                        unit.selection.push(id.clone());
                    }
                    if !unit.confirmed.contains(id) {
                        unit.confirmed.push(id.clone());
                    }
                }
            }
            SelectionEvent::Unselected { ids, .. } => {
                unit.selection.retain(|id| !ids.contains(id));
                unit.confirmed.retain(|id| !ids.contains(id));
            }
            SelectionEvent::Activated { id, .. } => {
                unit.active = Some(id.clone());
                unit.confirmed_active = Some(id.clone());
            }
            SelectionEvent::Deactivated { id, .. } => {
                if unit.active.as_ref() == Some(id) {
                    unit.active = None;
                }
                if unit.confirmed_active.as_ref() == Some(id) {
                    unit.confirmed_active = None;
                }
            }
            SelectionEvent::HoverIn { id, .. } => unit.hovering = Some(id.clone()),
            SelectionEvent::HoverOut { id, .. } => {
                if unit.hovering.as_ref() == Some(id) {
                    unit.hovering = None;
                }
            }
            SelectionEvent::Context { ids, .. } => unit.contexts = ids.clone(),
            SelectionEvent::Changed { .. } => {}
        }
        self.track_global(event);
    }

    fn track_global(&mut self, event: &SelectionEvent) {
        match event {
            SelectionEvent::Activated { type_tag, id } => {
                self.global_active = Some((type_tag.clone(), id.clone()));
            }
            SelectionEvent::Deactivated { type_tag, id } => {
                let is_global = self
                    .global_active
                    .as_ref()
                    .map_or(false, |(t, i)| t == type_tag && i == id);
                if is_global {
                    self.global_active = None;
                }
            }
            _ => {}
        }
    }

    fn flush(&mut self, type_tag: &str) -> Vec<SelectionEvent> {
        let Some(unit) = self.units.get_mut(type_tag) else {
            return Vec::new();
        };
        let tag = || type_tag.to_string();
        let mut events = Vec::new();

        let removed: Vec<String> = unit
            .confirmed
            .iter()
            .filter(|id| !unit.selection.contains(id))
            .cloned()
            .collect();
        let added: Vec<String> = unit
            .selection
            .iter()
            .filter(|id| !unit.confirmed.contains(id))
            .cloned()
            .collect();
        if !removed.is_empty() {
            events.push(SelectionEvent::Unselected {
                type_tag: tag(),
                ids: removed,
            });
        }
        if !added.is_empty() {
            events.push(SelectionEvent::Selected {
                type_tag: tag(),
                ids: added,
            });
        }

        if unit.active != unit.confirmed_active {
            if let Some(old) = &unit.confirmed_active {
                events.push(SelectionEvent::Deactivated {
                    type_tag: tag(),
                    id: old.clone(),
                });
            }
            if let Some(new) = &unit.active {
                events.push(SelectionEvent::Activated {
                    type_tag: tag(),
                    id: new.clone(),
                });
            }
        } else if unit.activate_requested {
            // Reselecting the active id of this type takes global active back
            if let Some(active) = &unit.active {
                let holds_global = self
                    .global_active
                    .as_ref()
                    .map_or(false, |(t, i)| t == type_tag && i == active);
                if !holds_global {
                    events.push(SelectionEvent::Activated {
                        type_tag: tag(),
                        id: active.clone(),
                    });
                }
            }
        }

        unit.confirmed = unit.selection.clone();
        unit.confirmed_active = unit.active.clone();
        unit.activate_requested = false;

        if !events.is_empty() {
            events.push(SelectionEvent::Changed { type_tag: tag() });
        }
        for event in &events {
            self.track_global(event);
        }
        events
    }

    async fn flush_and_publish(&mut self, type_tag: &str) -> Vec<SelectionEvent> {
        let events = self.flush(type_tag);
        self.publish(&events).await;
        events
    }

    async fn publish(&self, events: &[SelectionEvent]) {
        for event in events {
            let args = event.to_args();
            if let Err(e) = self
                .sink
                .emit(Address::AllExcludingSelf, &event.internal_channel(), args.clone())
                .await
            {
                warn!("Failed to publish {}: {}", event.internal_channel(), e);
            }
            if let Err(e) = self.sink.emit(Address::All, &event.channel(), args).await {
                warn!("Failed to publish {}: {}", event.channel(), e);
            }
        }
    }

    /// Working selection of a type, in selection order
    pub fn selection(&self, type_tag: &str) -> Vec<String> {
        self.units
            .get(type_tag)
            .map(|u| u.selection.clone())
            .unwrap_or_default()
    }

    pub fn is_selected(&self, type_tag: &str, id: &str) -> bool {
        self.units
            .get(type_tag)
            .map_or(false, |u| u.selection.iter().any(|s| s == id))
    }

    pub fn active(&self, type_tag: &str) -> Option<String> {
        self.units.get(type_tag).and_then(|u| u.active.clone())
    }

    pub fn hovering(&self, type_tag: &str) -> Option<String> {
        self.units.get(type_tag).and_then(|u| u.hovering.clone())
    }

    pub fn contexts(&self, type_tag: &str) -> Vec<String> {
        self.units
            .get(type_tag)
            .map(|u| u.contexts.clone())
            .unwrap_or_default()
    }

    /// Most recently activated `(type, id)` across all types
    pub fn global_active(&self) -> Option<(String, String)> {
        self.global_active.clone()
    }

    /// Whether any type has unconfirmed changes
    pub fn has_staged(&self) -> bool {
        self.units
            .values()
            .any(|u| u.selection != u.confirmed || u.active != u.confirmed_active)
    }
}
