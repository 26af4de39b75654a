//! The data manager protocol.
//!
//! A [`DataManager`] owns one slice of simulation state. Nothing outside it
//! holds a mutable reference to that state: every change is a [`Command`]
//! submitted through [`Context::submit`](crate::Context::submit), which runs
//! in two phases.
//!
//! 1. [`Command::validate`] receives shared references only: the target
//!    manager and a [`DataView`] of every other manager. It cannot mutate,
//!    so a rejected command leaves all state as it was.
//! 2. [`Command::execute`] receives the target mutably plus an [`Effects`]
//!    handle through which it publishes events and schedules or cancels
//!    follow-up plans. Events are dispatched after execute returns.

use core::any::{Any, TypeId};
use std::collections::BTreeMap;

use cohort_types::PlanId;

use crate::plan::{PlanDelay, PlanQueue};
use crate::{Context, DataView, Event, KernelError, PlanCallback, PluginData};

/// Upcast to [`Any`] for trait objects.
pub trait AsAny: Any {
    /// Borrow as [`Any`].
    fn as_any(&self) -> &dyn Any;

    /// Borrow mutably as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owner of one coherent slice of simulation state.
///
/// One instance of each concrete type exists per run; managers are looked
/// up by type.
pub trait DataManager: AsAny {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    /// Called once, in plugin order, before any plan fires.
    ///
    /// Managers subscribe to events, register labelers and re-register plans
    /// carried over from a snapshot here. The manager being initialized is
    /// not reachable through `ctx`; it uses `self`. Managers added after it
    /// are reachable but not yet initialized.
    fn init(&mut self, _ctx: &mut Context<'_>) -> Result<(), KernelError> {
        Ok(())
    }

    /// Capture the manager's complete state, or `None` for managers whose
    /// state is derived entirely from other managers.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read back in full. A
    /// partial snapshot is never produced.
    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        Ok(None)
    }
}

/// A validated mutation of one data manager.
pub trait Command {
    /// The manager this command mutates.
    type Target: DataManager;

    /// What a successful execution returns to the caller.
    type Output;

    /// Check every precondition. Must reject all caller errors.
    fn validate(&self, target: &Self::Target, view: &DataView<'_>) -> Result<(), KernelError>;

    /// Apply the change. Only runs after [`validate`](Self::validate)
    /// succeeded against the same state; an error here indicates a defect in
    /// validation, not a caller mistake.
    fn execute(
        self,
        target: &mut Self::Target,
        effects: &mut Effects<'_>,
    ) -> Result<Self::Output, KernelError>;
}

/// An event waiting for dispatch.
pub(crate) struct PublishedEvent {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) payload: Box<dyn Any>,
}

/// Side effects available to a command's execute phase.
pub struct Effects<'k> {
    time: f64,
    plans: &'k mut PlanQueue<PlanCallback>,
    events: Vec<PublishedEvent>,
}

impl<'k> Effects<'k> {
    pub(crate) const fn new(time: f64, plans: &'k mut PlanQueue<PlanCallback>) -> Self {
        Self {
            time,
            plans,
            events: Vec::new(),
        }
    }

    /// Current simulation time.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Publish an event. Dispatch happens once execute returns, in publish
    /// order.
    pub fn publish<E: Event>(&mut self, event: E) {
        self.events.push(PublishedEvent {
            type_id: TypeId::of::<E>(),
            name: core::any::type_name::<E>(),
            payload: Box::new(event),
        });
    }

    /// Schedule a follow-up plan `delay` after now.
    pub fn schedule<F>(&mut self, delay: PlanDelay, callback: F) -> PlanId
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
    {
        self.plans.schedule_after(delay, Box::new(callback))
    }

    /// Cancel a pending plan. Returns `false` if it is not pending.
    pub fn cancel(&mut self, id: PlanId) -> bool {
        self.plans.cancel(id)
    }

    pub(crate) fn into_events(self) -> Vec<PublishedEvent> {
        self.events
    }
}

impl core::fmt::Debug for Effects<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Effects")
            .field("time", &self.time)
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

/// Data managers of one run, in initialization order.
#[derive(Default)]
pub(crate) struct ManagerRegistry {
    slots: Vec<Option<Box<dyn DataManager>>>,
    index: BTreeMap<TypeId, usize>,
}

impl ManagerRegistry {
    pub(crate) fn from_managers(
        managers: Vec<(TypeId, Box<dyn DataManager>)>,
    ) -> Result<Self, KernelError> {
        let mut registry = Self::default();
        for (position, (type_id, manager)) in managers.into_iter().enumerate() {
            if registry.index.insert(type_id, position).is_some() {
                return Err(KernelError::duplicate("data manager", &manager.name()));
            }
            registry.slots.push(Some(manager));
        }
        Ok(registry)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn slot<T: DataManager>(&self) -> Result<&dyn DataManager, KernelError> {
        let name = core::any::type_name::<T>();
        let position = self
            .index
            .get(&TypeId::of::<T>())
            .ok_or_else(|| KernelError::unknown("data manager", &name))?;
        self.slots
            .get(*position)
            .and_then(Option::as_deref)
            .ok_or_else(|| {
                KernelError::precondition(format!("data manager {name} is initializing"))
            })
    }

    pub(crate) fn get<T: DataManager>(&self) -> Result<&T, KernelError> {
        self.slot::<T>()?
            .as_any()
            .downcast_ref::<T>()
            .ok_or(KernelError::Internal("data manager registered under a foreign type"))
    }

    pub(crate) fn get_mut<T: DataManager>(&mut self) -> Result<&mut T, KernelError> {
        let name = core::any::type_name::<T>();
        let position = *self
            .index
            .get(&TypeId::of::<T>())
            .ok_or_else(|| KernelError::unknown("data manager", &name))?;
        self.slots
            .get_mut(position)
            .and_then(Option::as_deref_mut)
            .ok_or_else(|| {
                KernelError::precondition(format!("data manager {name} is initializing"))
            })?
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(KernelError::Internal("data manager registered under a foreign type"))
    }

    /// Remove the manager at `position` so it can be initialized against a
    /// context that borrows the registry.
    pub(crate) fn take(&mut self, position: usize) -> Option<Box<dyn DataManager>> {
        self.slots.get_mut(position).and_then(Option::take)
    }

    pub(crate) fn put_back(&mut self, position: usize, manager: Box<dyn DataManager>) {
        if let Some(slot) = self.slots.get_mut(position) {
            *slot = Some(manager);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &dyn DataManager> {
        self.slots.iter().filter_map(Option::as_deref)
    }
}

impl core::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter().map(DataManager::name)).finish()
    }
}
