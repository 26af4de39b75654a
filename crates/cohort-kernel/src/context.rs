//! Explicit context objects handed to plans, handlers, actors and managers.
//!
//! There is no global registry: everything a callback may read or do is
//! reached through the [`Context`] it receives. Read-only code (command
//! validation, labelers) receives a [`DataView`] instead, which exposes
//! shared references only.

use core::any::{Any, TypeId};
use core::fmt;
use std::rc::Rc;

use cohort_types::{PlanId, SubscriberId};
use tracing::{debug, trace};

use crate::data_manager::{ManagerRegistry, PublishedEvent};
use crate::dispatch::{Dispatcher, erase_handler};
use crate::output::OutputSink;
use crate::plan::{PlanKey, PlanQueue};
use crate::{
    Command, DataManager, Effects, Event, EventFilter, EventLabeler, KernelError, Sensitivity,
};

/// A one-shot callback fired by the plan queue.
pub type PlanCallback = Box<dyn FnOnce(&mut Context<'_>) -> Result<(), KernelError>>;

/// All mutable state of one running simulation.
#[derive(Debug, Default)]
pub(crate) struct Kernel {
    pub(crate) managers: ManagerRegistry,
    pub(crate) plans: PlanQueue<PlanCallback>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) outputs: OutputSink,
    pub(crate) halt_requested: bool,
}

/// Read-only access to every initialized data manager.
#[derive(Clone, Copy)]
pub struct DataView<'a> {
    managers: &'a ManagerRegistry,
    time: f64,
}

impl<'a> DataView<'a> {
    pub(crate) const fn new(managers: &'a ManagerRegistry, time: f64) -> Self {
        Self { managers, time }
    }

    /// Current simulation time.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Look up a data manager by type.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] if no manager of type `T`
    /// was added by any plugin.
    pub fn data_manager<T: DataManager>(&self) -> Result<&'a T, KernelError> {
        self.managers.get::<T>()
    }

    /// Look up a data manager that may legitimately be absent.
    pub fn try_data_manager<T: DataManager>(&self) -> Option<&'a T> {
        self.managers.get::<T>().ok()
    }
}

impl fmt::Debug for DataView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataView")
            .field("time", &self.time)
            .field("managers", &self.managers)
            .finish()
    }
}

/// Handle through which callbacks act on the simulation.
pub struct Context<'k> {
    kernel: &'k mut Kernel,
}

impl<'k> Context<'k> {
    pub(crate) const fn new(kernel: &'k mut Kernel) -> Self {
        Self { kernel }
    }

    /// Current simulation time.
    pub const fn time(&self) -> f64 {
        self.kernel.plans.time()
    }

    /// A read-only view of all data managers.
    pub const fn view(&self) -> DataView<'_> {
        DataView::new(&self.kernel.managers, self.kernel.plans.time())
    }

    /// Look up a data manager by type.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] if no manager of type `T`
    /// exists.
    pub fn data_manager<T: DataManager>(&self) -> Result<&T, KernelError> {
        self.kernel.managers.get::<T>()
    }

    /// Validate and execute a command, then dispatch the events it
    /// published.
    ///
    /// # Errors
    ///
    /// Returns the validation error unchanged, in which case no state was
    /// modified. Errors raised by event handlers propagate after the
    /// command's own change has been applied.
    pub fn submit<C: Command>(&mut self, command: C) -> Result<C::Output, KernelError> {
        let kernel = &mut *self.kernel;
        let time = kernel.plans.time();
        let view = DataView::new(&kernel.managers, time);
        let target = view.data_manager::<C::Target>()?;
        if let Err(err) = command.validate(target, &view) {
            debug!(command = core::any::type_name::<C>(), time, %err, "Command rejected");
            return Err(err);
        }

        let target = kernel.managers.get_mut::<C::Target>()?;
        let mut effects = Effects::new(time, &mut kernel.plans);
        let output = command.execute(target, &mut effects)?;
        for event in effects.into_events() {
            self.dispatch(&event)?;
        }
        Ok(output)
    }

    /// Schedule a plan at absolute time `time`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] if `time` is in the past or
    /// not finite.
    pub fn schedule<F>(&mut self, time: f64, callback: F) -> Result<PlanId, KernelError>
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
    {
        self.kernel.plans.schedule(time, None, Box::new(callback))
    }

    /// Schedule a plan under a key that can later cancel it.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] for past or non-finite
    /// times, or [`KernelError::DuplicateIdentifier`] if `key` is held by a
    /// pending plan.
    pub fn schedule_keyed<F>(
        &mut self,
        time: f64,
        key: PlanKey,
        callback: F,
    ) -> Result<PlanId, KernelError>
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
    {
        self.kernel.plans.schedule(time, Some(key), Box::new(callback))
    }

    /// Re-register a plan that was pending when a previous run halted,
    /// keeping its original id so same-time plans fire in their original
    /// order.
    ///
    /// # Errors
    ///
    /// See [`PlanQueue::restore`].
    pub fn resume_plan<F>(&mut self, id: PlanId, time: f64, callback: F) -> Result<(), KernelError>
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
    {
        self.kernel.plans.restore(id, time, None, Box::new(callback))
    }

    /// Cancel a pending plan. Returns `false` if it already fired or was
    /// cancelled.
    pub fn cancel(&mut self, id: PlanId) -> bool {
        self.kernel.plans.cancel(id)
    }

    /// Cancel the plan pending under `key`.
    pub fn cancel_key(&mut self, key: &PlanKey) -> bool {
        self.kernel.plans.cancel_key(key)
    }

    /// The plan pending under `key`.
    pub fn plan_for_key(&self, key: &PlanKey) -> Option<PlanId> {
        self.kernel.plans.plan_for_key(key)
    }

    /// Firing time of a pending plan.
    pub fn plan_time(&self, id: PlanId) -> Option<f64> {
        self.kernel.plans.time_of(id)
    }

    /// Register a labeler for events of type `E`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DuplicateLabeler`] if a labeler with the same
    /// id is already registered for `E`.
    pub fn add_labeler<E: Event>(&mut self, labeler: EventLabeler<E>) -> Result<(), KernelError> {
        let (id, labeler) = labeler.into_parts();
        trace!(event = core::any::type_name::<E>(), labeler = %id, "Labeler registered");
        self.kernel.dispatcher.add_labeler(
            TypeId::of::<E>(),
            core::any::type_name::<E>(),
            id,
            labeler,
        )
    }

    /// Subscribe to events of type `E` that pass `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] if the filter names a
    /// labeler not registered for `E`, or [`KernelError::DuplicateIdentifier`]
    /// if it names the same labeler twice.
    pub fn subscribe<E, F>(
        &mut self,
        filter: EventFilter<E>,
        handler: F,
    ) -> Result<SubscriberId, KernelError>
    where
        E: Event,
        F: Fn(&mut Context<'_>, &E) -> Result<(), KernelError> + 'static,
    {
        let erased = erase_handler(move |ctx, event| match event.downcast_ref::<E>() {
            Some(event) => handler(ctx, event),
            None => Err(KernelError::Internal("event delivered to the wrong channel")),
        });
        self.kernel
            .dispatcher
            .subscribe(TypeId::of::<E>(), filter.into_conditions(), erased)
    }

    /// Cancel a subscription. Returns `false` if it was not active.
    ///
    /// A subscriber removed while an event is being dispatched is not
    /// notified for the rest of that dispatch.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.kernel.dispatcher.unsubscribe(id)
    }

    /// Subscribe `handler` to every event type in `sensitivity`, passing it
    /// the key each event yields.
    ///
    /// # Errors
    ///
    /// Propagates subscription errors; none are expected for unfiltered
    /// subscriptions.
    pub fn observe<K, F>(
        &mut self,
        sensitivity: Sensitivity<K>,
        handler: F,
    ) -> Result<Vec<SubscriberId>, KernelError>
    where
        K: 'static,
        F: Fn(&mut Context<'_>, K) -> Result<(), KernelError> + 'static,
    {
        let handler = Rc::new(handler);
        let mut subscribers = Vec::with_capacity(sensitivity.len());
        for (type_id, event_name, extract) in sensitivity.extractors {
            let handler = Rc::clone(&handler);
            let erased = erase_handler(move |ctx, event| match extract(event) {
                Some(key) => handler(ctx, key),
                None => Ok(()),
            });
            subscribers.push(self.kernel.dispatcher.subscribe(type_id, Vec::new(), erased)?);
            trace!(event = event_name, "Observer subscribed");
        }
        Ok(subscribers)
    }

    /// Ask the simulation to stop once the current plan completes.
    pub const fn halt(&mut self) {
        self.kernel.halt_requested = true;
    }

    /// Whether a stop has been requested.
    pub const fn halt_requested(&self) -> bool {
        self.kernel.halt_requested
    }

    /// Hand an ad hoc output to the run's output sink.
    pub fn release_output<T>(&mut self, output: T)
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        self.kernel.outputs.push(output);
    }

    fn dispatch(&mut self, event: &PublishedEvent) -> Result<(), KernelError> {
        let view = self.view();
        let handlers =
            self.kernel
                .dispatcher
                .matching(event.type_id, &*event.payload, &view)?;
        trace!(event = event.name, subscribers = handlers.len(), "Dispatching event");
        for (subscriber, handler) in handlers {
            if self.kernel.dispatcher.is_active(subscriber) {
                handler(self, &*event.payload)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("time", &self.time())
            .field("pending_plans", &self.kernel.plans.len())
            .field("subscribers", &self.kernel.dispatcher.subscriber_count())
            .finish()
    }
}
