//! The simulation orchestrator.
//!
//! [`Simulation::execute`] runs one segment of a simulation:
//!
//! 1. Order plugins so every plugin follows its dependencies, keeping the
//!    caller's order among independent plugins.
//! 2. Run each plugin initializer, collecting data managers and actors.
//! 3. Initialize data managers in collection order. Every other manager is
//!    reachable during `init`, but only earlier ones have registered their
//!    subscriptions and labelers, so a manager should read only the plugins
//!    it depends on.
//! 4. Run actors.
//! 5. Fire plans in `(time, id)` order until the queue empties, the next
//!    plan lies beyond the halt time, or a callback requests a stop.
//! 6. Optionally reduce every data manager to plugin data.
//!
//! Feeding the resulting [`SimulationState`] and plugin data into a new
//! simulation continues the run as if it had never paused.

use std::collections::BTreeSet;

use chrono::Utc;
use cohort_types::{PluginId, RunId};
use tracing::{debug, info, trace};

use crate::config::RunConfig;
use crate::context::Kernel;
use crate::data_manager::ManagerRegistry;
use crate::plan::{PlanQueue, check_plan_time};
use crate::{
    Context, EndReason, KernelError, Plugin, PluginContext, SimulationOutput, SimulationState,
};

/// A configured, ready-to-run simulation.
#[derive(Debug)]
pub struct Simulation {
    plugins: Vec<Plugin>,
    state: SimulationState,
    halt_time: Option<f64>,
    produce_snapshot_on_halt: bool,
}

impl Simulation {
    /// Start building a simulation.
    pub const fn builder() -> SimulationBuilder {
        SimulationBuilder {
            plugins: Vec::new(),
            state: None,
            halt_time: None,
            produce_snapshot_on_halt: false,
        }
    }

    /// Plugin ids in initialization order.
    pub fn plugin_order(&self) -> impl Iterator<Item = &PluginId> {
        self.plugins.iter().map(Plugin::id)
    }

    /// Run the simulation to its stop condition.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a plugin initializer, data manager
    /// initialization, actor or plan. The run is abandoned at that point.
    pub fn execute(self) -> Result<SimulationOutput, KernelError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(
            %run_id,
            start_time = self.state.time(),
            halt_time = ?self.halt_time,
            plugins = self.plugins.len(),
            "Simulation starting"
        );

        let mut managers = Vec::new();
        let mut actors = Vec::new();
        for plugin in self.plugins {
            let Plugin {
                id,
                plugin_data,
                initializer,
                ..
            } = plugin;
            initializer(&mut PluginContext::new(
                &id,
                &plugin_data,
                &mut managers,
                &mut actors,
            ))?;
            debug!(plugin = %id, "Plugin initialized");
        }

        let mut kernel = Kernel {
            managers: ManagerRegistry::from_managers(managers)?,
            plans: PlanQueue::resume(self.state.time(), self.state.next_plan_id()),
            ..Kernel::default()
        };

        for position in 0..kernel.managers.len() {
            let mut manager = kernel
                .managers
                .take(position)
                .ok_or(KernelError::Internal("data manager missing before init"))?;
            let result = manager.init(&mut Context::new(&mut kernel));
            let name = manager.name();
            kernel.managers.put_back(position, manager);
            result?;
            debug!(manager = name, "Data manager initialized");
        }

        for (plugin, actor) in actors {
            actor(&mut Context::new(&mut kernel))?;
            debug!(plugin = %plugin, "Actor initialized");
        }

        let end_reason = run_plans(&mut kernel, self.halt_time)?;
        if let (EndReason::HaltTimeReached, Some(halt_time)) = (end_reason, self.halt_time) {
            kernel.plans.advance_to(halt_time);
        }

        let mut plugin_datas = Vec::new();
        if self.produce_snapshot_on_halt {
            for manager in kernel.managers.iter() {
                if let Some(data) = manager.to_plugin_data()? {
                    plugin_datas.push(data);
                }
            }
        }
        let simulation_state = SimulationState::new(kernel.plans.time(), kernel.plans.next_id());
        let output = SimulationOutput {
            run_id,
            started_at,
            completed_at: Utc::now(),
            end_reason,
            pending_plans: kernel.plans.len(),
            simulation_state,
            plugin_datas,
            outputs: kernel.outputs,
        };

        info!(
            %run_id,
            ?end_reason,
            time = output.time(),
            pending_plans = output.pending_plans(),
            snapshots = output.plugin_datas().len(),
            "Simulation finished"
        );
        Ok(output)
    }
}

fn run_plans(kernel: &mut Kernel, halt_time: Option<f64>) -> Result<EndReason, KernelError> {
    let mut fired: u64 = 0;
    let reason = loop {
        if kernel.halt_requested {
            break EndReason::StopRequested;
        }
        let Some(plan) = kernel.plans.pop_due(halt_time) else {
            break if kernel.plans.is_empty() {
                EndReason::QueueEmpty
            } else {
                EndReason::HaltTimeReached
            };
        };
        trace!(plan = %plan.id, time = plan.time, "Plan firing");
        (plan.payload)(&mut Context::new(kernel))?;
        fired = fired.saturating_add(1);
    };
    debug!(fired, ?reason, "Plan loop stopped");
    Ok(reason)
}

/// Order plugins after their dependencies, preserving caller order among
/// plugins whose relative order is unconstrained.
fn order_plugins(plugins: Vec<Plugin>) -> Result<Vec<Plugin>, KernelError> {
    let mut known = BTreeSet::new();
    for plugin in &plugins {
        if !known.insert(plugin.id.clone()) {
            return Err(KernelError::duplicate("plugin", &plugin.id));
        }
    }
    if let Some(missing) = plugins
        .iter()
        .flat_map(|plugin| plugin.dependencies.iter())
        .find(|dependency| !known.contains(*dependency))
    {
        return Err(KernelError::unknown("plugin", missing));
    }

    let mut remaining = plugins;
    let mut placed = BTreeSet::new();
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let Some(position) = remaining.iter().position(|plugin| {
            plugin
                .dependencies
                .iter()
                .all(|dependency| placed.contains(dependency))
        }) else {
            return Err(KernelError::CircularPluginDependency {
                plugins: remaining.iter().map(|plugin| plugin.id.clone()).collect(),
            });
        };
        let plugin = remaining.remove(position);
        placed.insert(plugin.id.clone());
        ordered.push(plugin);
    }
    Ok(ordered)
}

/// Builder for [`Simulation`]. Consumed by [`build`](Self::build).
#[derive(Debug)]
pub struct SimulationBuilder {
    plugins: Vec<Plugin>,
    state: Option<SimulationState>,
    halt_time: Option<f64>,
    produce_snapshot_on_halt: bool,
}

impl SimulationBuilder {
    /// Add a plugin.
    #[must_use]
    pub fn add_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Resume from a halted run's state instead of time zero.
    #[must_use]
    pub fn set_simulation_state(mut self, state: SimulationState) -> Self {
        self.state = Some(state);
        self
    }

    /// Halt once the next plan lies beyond `time`.
    #[must_use]
    pub const fn set_halt_time(mut self, time: f64) -> Self {
        self.halt_time = Some(time);
        self
    }

    /// Collect every data manager's plugin data when the run stops.
    #[must_use]
    pub const fn set_produce_snapshot_on_halt(mut self, produce: bool) -> Self {
        self.produce_snapshot_on_halt = produce;
        self
    }

    /// Apply the `run` section of the configuration.
    #[must_use]
    pub const fn configure(mut self, config: &RunConfig) -> Self {
        self.halt_time = config.halt_time;
        self.produce_snapshot_on_halt = config.produce_snapshot_on_halt;
        self
    }

    /// Validate and produce the simulation.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] if the halt time precedes
    /// the start time, [`KernelError::DuplicateIdentifier`] or
    /// [`KernelError::UnknownIdentifier`] for bad plugin ids, or
    /// [`KernelError::CircularPluginDependency`].
    pub fn build(self) -> Result<Simulation, KernelError> {
        let state = self.state.unwrap_or_default();
        if let Some(halt_time) = self.halt_time {
            check_plan_time(halt_time, state.time())?;
        }
        Ok(Simulation {
            plugins: order_plugins(self.plugins)?,
            state,
            halt_time: self.halt_time,
            produce_snapshot_on_halt: self.produce_snapshot_on_halt,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn plugin(id: &str, dependencies: &[&str]) -> Plugin {
        dependencies
            .iter()
            .fold(Plugin::builder(id), |builder, dependency| {
                builder.add_dependency(*dependency)
            })
            .set_initializer(|_ctx| Ok(()))
            .build()
            .unwrap()
    }

    fn order(plugins: Vec<Plugin>) -> Result<Vec<String>, KernelError> {
        let mut builder = Simulation::builder();
        for plugin in plugins {
            builder = builder.add_plugin(plugin);
        }
        Ok(builder
            .build()?
            .plugin_order()
            .map(|id| id.as_str().to_owned())
            .collect())
    }

    #[test]
    fn dependencies_come_first_and_caller_order_is_kept() {
        let ordered = order(vec![
            plugin("partition", &["properties"]),
            plugin("stochastics", &[]),
            plugin("properties", &["people"]),
            plugin("people", &[]),
        ])
        .unwrap();
        assert_eq!(ordered, ["stochastics", "people", "properties", "partition"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let result = order(vec![plugin("a", &["b"]), plugin("b", &["a"]), plugin("c", &[])]);
        match result {
            Err(KernelError::CircularPluginDependency { plugins }) => {
                assert_eq!(plugins, [PluginId::from("a"), PluginId::from("b")]);
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_and_duplicate_plugins_are_rejected() {
        assert!(matches!(
            order(vec![plugin("a", &["ghost"])]),
            Err(KernelError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            order(vec![plugin("a", &[]), plugin("a", &[])]),
            Err(KernelError::DuplicateIdentifier { .. })
        ));
    }

    #[test]
    fn halt_time_cannot_precede_start() {
        let state = SimulationState::builder().set_time(5.0).build().unwrap();
        let result = Simulation::builder()
            .set_simulation_state(state)
            .set_halt_time(4.0)
            .build();
        assert!(matches!(result, Err(KernelError::InvalidPlanTime { .. })));
    }
}
