//! Label-filtered event routing.
//!
//! Each event type has a channel holding its labelers and a filter tree.
//! A subscription with conditions `[(l1, v1), (l2, v2)]` (sorted by labeler
//! id) lives at the node reached by following branch `l1 = v1` and then
//! `l2 = v2` from the root. Matching an event walks the tree from the root,
//! computing each labeler at most once and descending only into the branch
//! whose label matches, so subscribers waiting on other labels are never
//! visited.
//!
//! Matches are returned in subscription order, which makes notification
//! order a function of the subscription sequence alone.

use core::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use cohort_types::SubscriberId;

use crate::event::ErasedLabeler;
use crate::{Context, DataView, KernelError, Label, LabelerId};

pub(crate) type Handler = Rc<dyn Fn(&mut Context<'_>, &dyn Any) -> Result<(), KernelError>>;

pub(crate) fn erase_handler<F>(handler: F) -> Handler
where
    F: Fn(&mut Context<'_>, &dyn Any) -> Result<(), KernelError> + 'static,
{
    Rc::new(handler)
}

type Path = Vec<(LabelerId, Label)>;

#[derive(Default)]
struct FilterNode {
    subscribers: BTreeSet<SubscriberId>,
    branches: BTreeMap<LabelerId, BTreeMap<Label, FilterNode>>,
}

impl FilterNode {
    fn insert(&mut self, path: &[(LabelerId, Label)], id: SubscriberId) {
        match path.split_first() {
            None => {
                self.subscribers.insert(id);
            }
            Some(((labeler, label), rest)) => self
                .branches
                .entry(labeler.clone())
                .or_default()
                .entry(label.clone())
                .or_default()
                .insert(rest, id),
        }
    }

    fn remove(&mut self, path: &[(LabelerId, Label)], id: SubscriberId) -> bool {
        let Some(((labeler, label), rest)) = path.split_first() else {
            return self.subscribers.remove(&id);
        };
        let Some(values) = self.branches.get_mut(labeler) else {
            return false;
        };
        let Some(child) = values.get_mut(label) else {
            return false;
        };
        let removed = child.remove(rest, id);
        if child.is_empty() {
            values.remove(label);
        }
        if values.is_empty() {
            self.branches.remove(labeler);
        }
        removed
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.branches.is_empty()
    }

    fn collect(
        &self,
        labelers: &BTreeMap<LabelerId, ErasedLabeler>,
        view: &DataView<'_>,
        event: &dyn Any,
        memo: &mut BTreeMap<LabelerId, Label>,
        out: &mut BTreeSet<SubscriberId>,
    ) -> Result<(), KernelError> {
        out.extend(self.subscribers.iter().copied());
        for (labeler_id, values) in &self.branches {
            let label = match memo.get(labeler_id) {
                Some(label) => label.clone(),
                None => {
                    let labeler = labelers
                        .get(labeler_id)
                        .ok_or_else(|| KernelError::unknown("labeler", labeler_id))?;
                    let label = labeler(view, event)?;
                    memo.insert(labeler_id.clone(), label.clone());
                    label
                }
            };
            if let Some(child) = values.get(&label) {
                child.collect(labelers, view, event, memo, out)?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct EventChannel {
    labelers: BTreeMap<LabelerId, ErasedLabeler>,
    root: FilterNode,
}

struct Subscription {
    event: TypeId,
    path: Path,
    handler: Handler,
}

/// Routes published events to matching subscribers.
#[derive(Default)]
pub(crate) struct Dispatcher {
    channels: BTreeMap<TypeId, EventChannel>,
    subscriptions: BTreeMap<SubscriberId, Subscription>,
    next_subscriber: u64,
}

impl Dispatcher {
    pub(crate) fn add_labeler(
        &mut self,
        event: TypeId,
        event_name: &'static str,
        id: LabelerId,
        labeler: ErasedLabeler,
    ) -> Result<(), KernelError> {
        let channel = self.channels.entry(event).or_default();
        if channel.labelers.contains_key(&id) {
            return Err(KernelError::DuplicateLabeler {
                event: event_name,
                labeler: id.to_string(),
            });
        }
        channel.labelers.insert(id, labeler);
        Ok(())
    }

    pub(crate) fn subscribe(
        &mut self,
        event: TypeId,
        mut conditions: Path,
        handler: Handler,
    ) -> Result<SubscriberId, KernelError> {
        conditions.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(repeated) = conditions.windows(2).find_map(|pair| match pair {
            [a, b] if a.0 == b.0 => Some(a.0.clone()),
            _ => None,
        }) {
            return Err(KernelError::duplicate("filter labeler", &repeated));
        }
        let channel = self.channels.entry(event).or_default();
        if let Some((missing, _)) = conditions
            .iter()
            .find(|(labeler, _)| !channel.labelers.contains_key(labeler))
        {
            return Err(KernelError::unknown("labeler", missing));
        }

        let id = SubscriberId::new(self.next_subscriber);
        self.next_subscriber = self.next_subscriber.saturating_add(1);
        channel.root.insert(&conditions, id);
        self.subscriptions.insert(
            id,
            Subscription {
                event,
                path: conditions,
                handler,
            },
        );
        Ok(id)
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return false;
        };
        if let Some(channel) = self.channels.get_mut(&subscription.event) {
            channel.root.remove(&subscription.path, id);
        }
        true
    }

    pub(crate) fn is_active(&self, id: SubscriberId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handlers whose filters match `event`, in subscription order.
    pub(crate) fn matching(
        &self,
        event_type: TypeId,
        event: &dyn Any,
        view: &DataView<'_>,
    ) -> Result<Vec<(SubscriberId, Handler)>, KernelError> {
        let Some(channel) = self.channels.get(&event_type) else {
            return Ok(Vec::new());
        };
        let mut matched = BTreeSet::new();
        channel
            .root
            .collect(&channel.labelers, view, event, &mut BTreeMap::new(), &mut matched)?;
        Ok(matched
            .into_iter()
            .filter_map(|id| {
                self.subscriptions
                    .get(&id)
                    .map(|subscription| (id, Rc::clone(&subscription.handler)))
            })
            .collect())
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("event_types", &self.channels.len())
            .field("subscribers", &self.subscriptions.len())
            .finish()
    }
}
