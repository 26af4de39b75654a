//! Discrete-event simulation kernel for entity-based population models.
//!
//! A simulation is a set of plugins. Plugins contribute data managers,
//! each the sole owner of one slice of state, and actors, which seed the
//! run with plans and subscriptions. The kernel fires plans in strict
//! `(time, id)` order; plans mutate state only by submitting commands to
//! data managers, and data managers announce their changes as events routed
//! by label to interested subscribers. When the run halts, every data
//! manager reduces itself to versioned plugin data from which an identical
//! continuation can be built.
//!
//! # Modules
//!
//! - [`plan`] -- [`PlanQueue`], the time-ordered plan queue.
//! - [`data_manager`] -- [`DataManager`], [`Command`] and [`Effects`]: the
//!   validate/execute mutation protocol.
//! - [`event`] -- [`Event`], [`Label`], [`EventLabeler`], [`EventFilter`]
//!   and [`Sensitivity`].
//! - [`context`] -- [`Context`] and [`DataView`], the handles callbacks act
//!   through.
//! - [`plugin`] -- [`Plugin`], [`PluginData`] and [`PluginContext`].
//! - [`state`] -- [`SimulationState`], the kernel's own plugin data.
//! - [`simulation`] -- [`Simulation`], the orchestrator.
//! - [`output`] -- [`SimulationOutput`] and the [`SnapshotArchive`].
//! - [`config`] -- YAML configuration.
//! - [`error`] -- [`KernelError`].

pub mod config;
pub mod context;
pub mod data_manager;
mod dispatch;
pub mod error;
pub mod event;
pub mod output;
pub mod plan;
pub mod plugin;
pub mod simulation;
pub mod state;

pub use context::{Context, DataView, PlanCallback};
pub use data_manager::{AsAny, Command, DataManager, Effects};
pub use error::KernelError;
pub use event::{Event, EventFilter, EventLabeler, Label, LabelerId, Sensitivity};
pub use output::{EndReason, SimulationOutput, SnapshotArchive, SnapshotDocument};
pub use plan::{PlanDelay, PlanKey, PlanQueue};
pub use plugin::{Actor, Plugin, PluginBuilder, PluginContext, PluginData, check_version};
pub use simulation::{Simulation, SimulationBuilder};
pub use state::{SimulationState, SimulationStateBuilder};
