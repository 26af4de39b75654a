//! Events, labels and the subscription vocabulary.
//!
//! An [`Event`] is an immutable record of a completed change, published by
//! the data manager that made it. Subscribers do not see every event of a
//! type: each subscription carries an [`EventFilter`], a set of
//! `(labeler, label)` conditions. An [`EventLabeler`] derives a [`Label`]
//! from an event (and, when needed, the current state), and a subscriber is
//! notified only when every labeler in its filter yields the label it asked
//! for.
//!
//! [`Sensitivity`] is the observer-side counterpart: it lists which event
//! types can affect a cached result and how to extract the affected key from
//! each, so the observer can update that one key instead of rescanning.

use core::any::{Any, TypeId};
use core::fmt;
use core::marker::PhantomData;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{DataView, KernelError};

/// Marker for types that can be published and subscribed to.
pub trait Event: Any + fmt::Debug {}

/// Opaque routing key computed by a labeler.
///
/// Labels compare by value. Floating point values compare by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(LabelRepr);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LabelRepr {
    Unit,
    Bool(bool),
    Int(i64),
    Bits(u64),
    Text(String),
    Tuple(Vec<Label>),
}

impl Label {
    /// The label of events that carry no distinguishing information.
    pub const UNIT: Self = Self(LabelRepr::Unit);

    /// Combine labels into one, order-sensitive.
    pub fn tuple(parts: impl IntoIterator<Item = Self>) -> Self {
        Self(LabelRepr::Tuple(parts.into_iter().collect()))
    }
}

impl From<bool> for Label {
    fn from(value: bool) -> Self {
        Self(LabelRepr::Bool(value))
    }
}

impl From<i64> for Label {
    fn from(value: i64) -> Self {
        Self(LabelRepr::Int(value))
    }
}

impl From<u32> for Label {
    fn from(value: u32) -> Self {
        Self(LabelRepr::Int(i64::from(value)))
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self(LabelRepr::Text(value.to_owned()))
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        Self(LabelRepr::Text(value))
    }
}

impl From<f64> for Label {
    fn from(value: f64) -> Self {
        Self(LabelRepr::Bits(value.to_bits()))
    }
}

impl<A: Into<Self>, B: Into<Self>> From<(A, B)> for Label {
    fn from((a, b): (A, B)) -> Self {
        Self::tuple([a.into(), b.into()])
    }
}

/// Name of a labeler, unique per event type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelerId(String);

impl LabelerId {
    /// Create a labeler id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabelerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LabelerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

pub(crate) type ErasedLabeler =
    Rc<dyn Fn(&DataView<'_>, &dyn Any) -> Result<Label, KernelError>>;

fn erase_labeler<F>(label: F) -> ErasedLabeler
where
    F: Fn(&DataView<'_>, &dyn Any) -> Result<Label, KernelError> + 'static,
{
    Rc::new(label)
}

/// Computes a [`Label`] for events of type `E`.
pub struct EventLabeler<E> {
    id: LabelerId,
    label: ErasedLabeler,
    _event: PhantomData<fn(&E)>,
}

impl<E: Event> EventLabeler<E> {
    /// A labeler that may consult current state through the view.
    pub fn new<F>(id: impl Into<LabelerId>, label: F) -> Self
    where
        F: Fn(&DataView<'_>, &E) -> Result<Label, KernelError> + 'static,
    {
        Self {
            id: id.into(),
            label: erase_labeler(move |view, event| {
                event
                    .downcast_ref::<E>()
                    .ok_or(KernelError::Internal("labeler applied to the wrong event type"))
                    .and_then(|event| label(view, event))
            }),
            _event: PhantomData,
        }
    }

    /// A labeler that looks only at the event.
    pub fn from_event<F>(id: impl Into<LabelerId>, label: F) -> Self
    where
        F: Fn(&E) -> Label + 'static,
    {
        Self::new(id, move |_view, event| Ok(label(event)))
    }

    /// The labeler's id.
    pub const fn id(&self) -> &LabelerId {
        &self.id
    }

    pub(crate) fn into_parts(self) -> (LabelerId, ErasedLabeler) {
        (self.id, self.label)
    }
}

impl<E> fmt::Debug for EventLabeler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLabeler").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Conditions a subscriber places on events of type `E`.
///
/// An empty filter matches every event of the type.
#[derive(Debug)]
pub struct EventFilter<E> {
    conditions: Vec<(LabelerId, Label)>,
    _event: PhantomData<fn(&E)>,
}

impl<E: Event> EventFilter<E> {
    /// Match every event of type `E`.
    pub const fn all() -> Self {
        Self {
            conditions: Vec::new(),
            _event: PhantomData,
        }
    }

    /// Additionally require `labeler` to yield `label`.
    #[must_use]
    pub fn with(mut self, labeler: impl Into<LabelerId>, label: impl Into<Label>) -> Self {
        self.conditions.push((labeler.into(), label.into()));
        self
    }

    pub(crate) fn into_conditions(self) -> Vec<(LabelerId, Label)> {
        self.conditions
    }
}

impl<E: Event> Default for EventFilter<E> {
    fn default() -> Self {
        Self::all()
    }
}

pub(crate) type KeyExtractor<K> = Rc<dyn Fn(&dyn Any) -> Option<K>>;

/// Declares which event types affect an observer and which key each one
/// touches.
///
/// `K` is usually an entity id, or a sum type over the kinds of change the
/// observer distinguishes so that its handler can match exhaustively.
pub struct Sensitivity<K> {
    pub(crate) extractors: Vec<(TypeId, &'static str, KeyExtractor<K>)>,
}

impl<K: 'static> Sensitivity<K> {
    /// A sensitivity to nothing.
    pub const fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// React to events of type `E`; events for which `extract` returns
    /// `None` are ignored.
    #[must_use]
    pub fn on<E: Event>(mut self, extract: impl Fn(&E) -> Option<K> + 'static) -> Self {
        let extract: KeyExtractor<K> =
            Rc::new(move |event: &dyn Any| event.downcast_ref::<E>().and_then(&extract));
        self.extractors
            .push((TypeId::of::<E>(), core::any::type_name::<E>(), extract));
        self
    }

    /// Number of event types declared.
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// Whether no event types are declared.
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl<K: 'static> Default for Sensitivity<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for Sensitivity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.extractors.iter().map(|(_, name, _)| name))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cohort_types::PersonId;

    use super::*;

    #[derive(Debug)]
    struct Moved {
        person: PersonId,
        region: &'static str,
    }

    impl Event for Moved {}

    #[test]
    fn labels_of_different_kinds_differ() {
        assert_ne!(Label::from(1_i64), Label::from("1"));
        assert_ne!(Label::from(true), Label::from(1_i64));
        assert_ne!(Label::from((1_i64, "a")), Label::from(("a", 1_i64)));
        assert_eq!(Label::from(4_u32), Label::from(4_i64));
    }

    #[test]
    fn float_labels_compare_by_bits() {
        assert_eq!(Label::from(0.5), Label::from(0.5));
        assert_ne!(Label::from(0.5), Label::from(0.25));
        assert_eq!(Label::from(f64::NAN), Label::from(f64::NAN));
        assert_ne!(Label::from(0.0), Label::from(-0.0));
    }

    #[test]
    fn sensitivity_extracts_only_declared_types() {
        let sensitivity = Sensitivity::new().on(|event: &Moved| {
            (event.region == "north").then_some(event.person)
        });
        assert_eq!(sensitivity.len(), 1);
        let (type_id, _, extract) = sensitivity.extractors.first().unwrap();
        assert_eq!(*type_id, TypeId::of::<Moved>());

        let north = Moved {
            person: PersonId::new(2),
            region: "north",
        };
        let south = Moved {
            person: PersonId::new(3),
            region: "south",
        };
        assert_eq!(extract(&north as &dyn Any), Some(PersonId::new(2)));
        assert_eq!(extract(&south as &dyn Any), None);
        assert_eq!(extract(&7_u8 as &dyn Any), None);
    }
}
