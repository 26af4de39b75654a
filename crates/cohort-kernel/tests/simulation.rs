//! End-to-end tests of the plan loop, the command protocol and event
//! dispatch.
//!
//! Every test builds a small ledger model: one data manager holding account
//! balances, commands that deposit into and close accounts, and events
//! announcing both. Callbacks report what they saw through
//! [`Context::release_output`], which the tests read back from the
//! [`SimulationOutput`](cohort_kernel::SimulationOutput).

#![allow(clippy::unwrap_used, clippy::float_cmp, clippy::panic)]

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cohort_kernel::{
    Command, Context, DataManager, DataView, Effects, EndReason, Event, EventFilter, EventLabeler,
    KernelError, Label, PlanDelay, Plugin, PluginData, Sensitivity, Simulation, SimulationOutput,
    SimulationState,
};
use cohort_types::{PlanId, PluginId, SemanticVersion};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ledger model
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Ledger {
    balances: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LedgerData {
    balances: BTreeMap<String, i64>,
}

impl PluginData for LedgerData {
    fn plugin_id(&self) -> PluginId {
        PluginId::from("ledger")
    }

    fn version(&self) -> SemanticVersion {
        SemanticVersion::new(1, 0, 0)
    }

    fn to_json(&self) -> Result<serde_json::Value, KernelError> {
        Ok(serde_json::to_value(self)?)
    }
}

impl DataManager for Ledger {
    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        Ok(Some(Box::new(LedgerData {
            balances: self.balances.clone(),
        })))
    }
}

#[derive(Debug)]
struct Deposited {
    account: String,
    amount: i64,
}

impl Event for Deposited {}

#[derive(Debug)]
struct Closed {
    account: String,
}

impl Event for Closed {}

struct Deposit {
    account: &'static str,
    amount: i64,
}

impl Command for Deposit {
    type Target = Ledger;
    type Output = i64;

    fn validate(&self, _target: &Ledger, _view: &DataView<'_>) -> Result<(), KernelError> {
        if self.amount <= 0 {
            return Err(KernelError::precondition("deposit must be positive"));
        }
        Ok(())
    }

    fn execute(self, target: &mut Ledger, effects: &mut Effects<'_>) -> Result<i64, KernelError> {
        let balance = target.balances.entry(self.account.to_owned()).or_default();
        *balance = balance.saturating_add(self.amount);
        let balance = *balance;
        effects.publish(Deposited {
            account: self.account.to_owned(),
            amount: self.amount,
        });
        Ok(balance)
    }
}

struct Close {
    account: &'static str,
}

impl Command for Close {
    type Target = Ledger;
    type Output = ();

    fn validate(&self, target: &Ledger, _view: &DataView<'_>) -> Result<(), KernelError> {
        if !target.balances.contains_key(self.account) {
            return Err(KernelError::unknown("account", &self.account));
        }
        Ok(())
    }

    fn execute(self, target: &mut Ledger, effects: &mut Effects<'_>) -> Result<(), KernelError> {
        target.balances.remove(self.account);
        effects.publish(Closed {
            account: self.account.to_owned(),
        });
        Ok(())
    }
}

/// Schedules a follow-up plan from inside execute.
struct Accrue {
    delay: PlanDelay,
}

impl Command for Accrue {
    type Target = Ledger;
    type Output = PlanId;

    fn validate(&self, _target: &Ledger, _view: &DataView<'_>) -> Result<(), KernelError> {
        Ok(())
    }

    fn execute(
        self,
        _target: &mut Ledger,
        effects: &mut Effects<'_>,
    ) -> Result<PlanId, KernelError> {
        Ok(effects.schedule(self.delay, |ctx| {
            ctx.release_output((ctx.time(), "accrued"));
            Ok(())
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn ledger_plugin<F>(actor: F) -> Plugin
where
    F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
{
    Plugin::builder("ledger")
        .set_initializer(move |ctx| {
            ctx.add_data_manager(Ledger::default())?;
            ctx.add_actor(actor);
            Ok(())
        })
        .build()
        .unwrap()
}

fn run<F>(actor: F) -> SimulationOutput
where
    F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
{
    Simulation::builder()
        .add_plugin(ledger_plugin(actor))
        .build()
        .unwrap()
        .execute()
        .unwrap()
}

fn released<T: Clone + 'static>(output: &SimulationOutput) -> Vec<T> {
    output.outputs::<T>().cloned().collect()
}

fn record(tag: &'static str) -> impl FnOnce(&mut Context<'_>) -> Result<(), KernelError> {
    move |ctx| {
        ctx.release_output((ctx.time(), tag));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Plan loop
// ---------------------------------------------------------------------------

#[test]
fn plans_fire_by_time_then_by_schedule_order() {
    let output = run(|ctx| {
        ctx.schedule(3.0, record("a"))?;
        ctx.schedule(1.0, record("b"))?;
        ctx.schedule(3.0, record("c"))?;
        ctx.schedule(2.0, record("d"))?;
        Ok(())
    });
    assert_eq!(
        released::<(f64, &str)>(&output),
        [(1.0, "b"), (2.0, "d"), (3.0, "a"), (3.0, "c")]
    );
    assert_eq!(output.end_reason(), EndReason::QueueEmpty);
    assert_eq!(output.time(), 3.0);
    assert_eq!(output.simulation_state().next_plan_id(), PlanId::new(4));
}

#[test]
fn halt_time_fires_plans_at_the_boundary_and_keeps_the_rest() {
    let output = Simulation::builder()
        .add_plugin(ledger_plugin(|ctx| {
            ctx.schedule(1.0, record("early"))?;
            ctx.schedule(5.0, record("boundary"))?;
            ctx.schedule(10.0, record("late"))?;
            Ok(())
        }))
        .set_halt_time(7.0)
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(
        released::<(f64, &str)>(&output),
        [(1.0, "early"), (5.0, "boundary")]
    );
    assert_eq!(output.end_reason(), EndReason::HaltTimeReached);
    assert_eq!(output.pending_plans(), 1);
    assert_eq!(output.time(), 7.0);
}

#[test]
fn stop_request_ends_the_run_after_the_current_plan() {
    let output = run(|ctx| {
        ctx.schedule(1.0, |ctx| {
            ctx.halt();
            ctx.release_output((ctx.time(), "stopping"));
            Ok(())
        })?;
        ctx.schedule(2.0, record("never"))?;
        Ok(())
    });
    assert_eq!(released::<(f64, &str)>(&output), [(1.0, "stopping")]);
    assert_eq!(output.end_reason(), EndReason::StopRequested);
    assert_eq!(output.pending_plans(), 1);
    assert_eq!(output.time(), 1.0);
}

#[test]
fn cancelled_and_keyed_plans() {
    let output = run(|ctx| {
        let doomed = ctx.schedule(2.0, record("cancelled"))?;
        ctx.schedule_keyed(3.0, "renewal".into(), record("keyed"))?;
        ctx.schedule_keyed(4.0, "expiry".into(), record("expiry"))?;
        assert!(ctx.cancel(doomed));
        assert!(!ctx.cancel(doomed));
        assert!(ctx.cancel_key(&"expiry".into()));
        let renewal = ctx.plan_for_key(&"renewal".into()).unwrap();
        assert_eq!(ctx.plan_time(renewal), Some(3.0));
        assert!(matches!(
            ctx.schedule_keyed(5.0, "renewal".into(), record("clash")),
            Err(KernelError::DuplicateIdentifier { .. })
        ));
        Ok(())
    });
    assert_eq!(released::<(f64, &str)>(&output), [(3.0, "keyed")]);
}

#[test]
fn plans_cannot_be_scheduled_in_the_past() {
    let output = run(|ctx| {
        ctx.schedule(2.0, |ctx| {
            let result = ctx.schedule(1.0, record("past"));
            assert!(matches!(result, Err(KernelError::InvalidPlanTime { .. })));
            ctx.schedule(2.0, record("now"))?;
            Ok(())
        })?;
        Ok(())
    });
    assert_eq!(released::<(f64, &str)>(&output), [(2.0, "now")]);
}

#[test]
fn resumed_plans_keep_their_original_position() {
    let state = SimulationState::builder()
        .set_time(2.0)
        .set_next_plan_id(PlanId::new(10))
        .build()
        .unwrap();
    let output = Simulation::builder()
        .set_simulation_state(state)
        .add_plugin(ledger_plugin(|ctx| {
            ctx.schedule(3.0, record("new"))?;
            ctx.resume_plan(PlanId::new(7), 3.0, record("carried"))?;
            assert!(matches!(
                ctx.resume_plan(PlanId::new(12), 3.0, record("unissued")),
                Err(KernelError::UnknownIdentifier { .. })
            ));
            Ok(())
        }))
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(
        released::<(f64, &str)>(&output),
        [(3.0, "carried"), (3.0, "new")]
    );
    assert_eq!(output.simulation_state().next_plan_id(), PlanId::new(11));
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn rejected_command_changes_nothing() {
    let output = run(|ctx| {
        let result = ctx.submit(Deposit {
            account: "alice",
            amount: -5,
        });
        assert!(matches!(result, Err(KernelError::Precondition { .. })));
        assert!(ctx.data_manager::<Ledger>()?.balances.is_empty());

        assert!(matches!(
            ctx.submit(Close { account: "alice" }),
            Err(KernelError::UnknownIdentifier { .. })
        ));
        Ok(())
    });
    assert_eq!(output.end_reason(), EndReason::QueueEmpty);
}

#[test]
fn commands_return_their_output_and_schedule_follow_ups() {
    let output = run(|ctx| {
        assert_eq!(ctx.submit(Deposit { account: "alice", amount: 5 })?, 5);
        assert_eq!(ctx.submit(Deposit { account: "alice", amount: 2 })?, 7);
        ctx.schedule(1.0, |ctx| {
            let plan = ctx.submit(Accrue {
                delay: PlanDelay::new(3.0)?,
            })?;
            assert_eq!(ctx.plan_time(plan), Some(4.0));
            Ok(())
        })?;
        Ok(())
    });
    assert_eq!(released::<(f64, &str)>(&output), [(4.0, "accrued")]);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

fn account_labeler() -> EventLabeler<Deposited> {
    EventLabeler::from_event("account", |event: &Deposited| {
        Label::from(event.account.as_str())
    })
}

#[test]
fn filtered_subscribers_see_only_matching_events() {
    let output = run(|ctx| {
        ctx.add_labeler(account_labeler())?;
        ctx.subscribe(
            EventFilter::<Deposited>::all().with("account", "alice"),
            |ctx, event| {
                ctx.release_output(("alice-only", event.amount));
                Ok(())
            },
        )?;
        ctx.subscribe(
            EventFilter::<Deposited>::all().with("account", "bob"),
            |ctx, event| {
                ctx.release_output(("bob-only", event.amount));
                Ok(())
            },
        )?;
        ctx.subscribe(EventFilter::<Deposited>::all(), |ctx, event| {
            ctx.release_output(("everything", event.amount));
            Ok(())
        })?;

        ctx.submit(Deposit { account: "alice", amount: 5 })?;
        ctx.submit(Deposit { account: "bob", amount: 7 })?;
        ctx.submit(Deposit { account: "carol", amount: 9 })?;
        Ok(())
    });
    assert_eq!(
        released::<(&str, i64)>(&output),
        [
            ("alice-only", 5),
            ("everything", 5),
            ("bob-only", 7),
            ("everything", 7),
            ("everything", 9),
        ]
    );
}

#[test]
fn state_aware_labelers_see_the_post_change_state() {
    let output = run(|ctx| {
        ctx.add_labeler(EventLabeler::new(
            "rich",
            |view: &DataView<'_>, event: &Deposited| {
                let ledger = view.data_manager::<Ledger>()?;
                let balance = ledger.balances.get(&event.account).copied().unwrap_or(0);
                Ok(Label::from(balance >= 10))
            },
        ))?;
        ctx.subscribe(
            EventFilter::<Deposited>::all().with("rich", true),
            |ctx, event| {
                ctx.release_output(event.account.clone());
                Ok(())
            },
        )?;
        ctx.submit(Deposit { account: "alice", amount: 6 })?;
        ctx.submit(Deposit { account: "alice", amount: 6 })?;
        ctx.submit(Deposit { account: "bob", amount: 3 })?;
        Ok(())
    });
    assert_eq!(released::<String>(&output), ["alice"]);
}

#[test]
fn labeler_registration_errors() {
    run(|ctx| {
        ctx.add_labeler(account_labeler())?;
        assert!(matches!(
            ctx.add_labeler(account_labeler()),
            Err(KernelError::DuplicateLabeler { .. })
        ));
        assert!(matches!(
            ctx.subscribe(
                EventFilter::<Deposited>::all().with("region", "north"),
                |_ctx, _event| Ok(())
            ),
            Err(KernelError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            ctx.subscribe(
                EventFilter::<Deposited>::all()
                    .with("account", "alice")
                    .with("account", "bob"),
                |_ctx, _event| Ok(())
            ),
            Err(KernelError::DuplicateIdentifier { .. })
        ));
        Ok(())
    });
}

#[test]
fn unsubscribing_mid_dispatch_skips_the_removed_subscriber() {
    let output = run(|ctx| {
        let victim = Rc::new(Cell::new(None));
        let target = Rc::clone(&victim);
        ctx.subscribe(EventFilter::<Deposited>::all(), move |ctx, _event| {
            if let Some(id) = target.take() {
                assert!(ctx.unsubscribe(id));
            }
            ctx.release_output("first");
            Ok(())
        })?;
        let second = ctx.subscribe(EventFilter::<Deposited>::all(), |ctx, _event| {
            ctx.release_output("second");
            Ok(())
        })?;
        victim.set(Some(second));

        ctx.submit(Deposit { account: "alice", amount: 1 })?;
        ctx.submit(Deposit { account: "alice", amount: 1 })?;
        Ok(())
    });
    assert_eq!(released::<&str>(&output), ["first", "first"]);
}

#[test]
fn dispatch_is_depth_first() {
    let output = run(|ctx| {
        ctx.subscribe(EventFilter::<Deposited>::all(), |ctx, event| {
            if event.account == "alice" {
                ctx.submit(Deposit { account: "bob", amount: 1 })?;
            }
            Ok(())
        })?;
        ctx.subscribe(EventFilter::<Deposited>::all(), |ctx, event| {
            ctx.release_output(event.account.clone());
            Ok(())
        })?;
        ctx.submit(Deposit { account: "alice", amount: 1 })?;
        Ok(())
    });
    assert_eq!(released::<String>(&output), ["bob", "alice"]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AccountChange {
    LargeDeposit(String),
    Closed(String),
}

#[test]
fn observers_receive_keys_from_every_declared_event_type() {
    let output = run(|ctx| {
        let sensitivity = Sensitivity::new()
            .on(|event: &Deposited| {
                (event.amount >= 100).then(|| AccountChange::LargeDeposit(event.account.clone()))
            })
            .on(|event: &Closed| Some(AccountChange::Closed(event.account.clone())));
        let subscribers = ctx.observe(sensitivity, |ctx, change: AccountChange| {
            let line = match change {
                AccountChange::LargeDeposit(account) => format!("large deposit to {account}"),
                AccountChange::Closed(account) => format!("{account} closed"),
            };
            ctx.release_output(line);
            Ok(())
        })?;
        assert_eq!(subscribers.len(), 2);

        ctx.submit(Deposit { account: "alice", amount: 5 })?;
        ctx.submit(Deposit { account: "bob", amount: 150 })?;
        ctx.submit(Close { account: "alice" })?;
        Ok(())
    });
    assert_eq!(
        released::<String>(&output),
        ["large deposit to bob", "alice closed"]
    );
}

// ---------------------------------------------------------------------------
// Data managers
// ---------------------------------------------------------------------------

/// Counts deposits by reacting to ledger events.
#[derive(Debug, Default)]
struct Auditor {
    deposits: u64,
}

struct RecordDeposit;

impl Command for RecordDeposit {
    type Target = Auditor;
    type Output = u64;

    fn validate(&self, _target: &Auditor, view: &DataView<'_>) -> Result<(), KernelError> {
        view.data_manager::<Ledger>().map(|_ledger| ())
    }

    fn execute(self, target: &mut Auditor, _effects: &mut Effects<'_>) -> Result<u64, KernelError> {
        target.deposits = target.deposits.saturating_add(1);
        Ok(target.deposits)
    }
}

impl DataManager for Auditor {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), KernelError> {
        assert!(ctx.data_manager::<Ledger>().is_ok());
        assert!(matches!(
            ctx.data_manager::<Self>(),
            Err(KernelError::Precondition { .. })
        ));
        ctx.subscribe(EventFilter::<Deposited>::all(), |ctx, _event| {
            let count = ctx.submit(RecordDeposit)?;
            ctx.release_output(count);
            Ok(())
        })?;
        Ok(())
    }
}

#[test]
fn managers_initialize_in_plugin_order_and_react_to_events() {
    let auditor = Plugin::builder("auditor")
        .add_dependency("ledger")
        .set_initializer(|ctx| ctx.add_data_manager(Auditor::default()))
        .build()
        .unwrap();
    let output = Simulation::builder()
        .add_plugin(auditor)
        .add_plugin(ledger_plugin(|ctx| {
            ctx.submit(Deposit { account: "alice", amount: 1 })?;
            ctx.submit(Deposit { account: "bob", amount: 1 })?;
            Ok(())
        }))
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(released::<u64>(&output), [1, 2]);
}

#[derive(Debug, Default)]
struct Early;

#[derive(Debug, Default)]
struct Late {
    initialized: bool,
}

impl DataManager for Early {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), KernelError> {
        let ready = ctx.data_manager::<Late>()?.initialized;
        ctx.release_output(ready);
        Ok(())
    }
}

impl DataManager for Late {
    fn init(&mut self, _ctx: &mut Context<'_>) -> Result<(), KernelError> {
        self.initialized = true;
        Ok(())
    }
}

#[test]
fn later_managers_are_reachable_before_their_own_init() {
    let plugin = Plugin::builder("pair")
        .set_initializer(|ctx| {
            ctx.add_data_manager(Early)?;
            ctx.add_data_manager(Late::default())
        })
        .build()
        .unwrap();
    let inspect = Plugin::builder("inspect")
        .add_dependency("pair")
        .set_initializer(|ctx| {
            ctx.add_actor(|ctx| {
                let ready = ctx.data_manager::<Late>()?.initialized;
                ctx.release_output(ready);
                Ok(())
            });
            Ok(())
        })
        .build()
        .unwrap();
    let output = Simulation::builder()
        .add_plugin(plugin)
        .add_plugin(inspect)
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(released::<bool>(&output), [false, true]);
}

#[test]
fn duplicate_data_managers_are_rejected() {
    let plugin = Plugin::builder("ledger")
        .set_initializer(|ctx| {
            ctx.add_data_manager(Ledger::default())?;
            ctx.add_data_manager(Ledger::default())
        })
        .build()
        .unwrap();
    let result = Simulation::builder().add_plugin(plugin).build().unwrap().execute();
    assert!(matches!(result, Err(KernelError::DuplicateIdentifier { .. })));
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[test]
fn snapshot_on_halt_captures_every_manager() {
    let output = Simulation::builder()
        .add_plugin(ledger_plugin(|ctx| {
            ctx.submit(Deposit { account: "alice", amount: 3 })?;
            ctx.schedule(8.0, |ctx| {
                ctx.submit(Deposit { account: "bob", amount: 4 })?;
                Ok(())
            })?;
            Ok(())
        }))
        .set_halt_time(5.0)
        .set_produce_snapshot_on_halt(true)
        .build()
        .unwrap()
        .execute()
        .unwrap();

    let ledger = output.plugin_data::<LedgerData>().unwrap();
    assert_eq!(ledger.balances, BTreeMap::from([("alice".to_owned(), 3)]));

    let archive = output.to_archive().unwrap();
    let plugins: Vec<&str> = archive
        .documents
        .iter()
        .map(|document| document.plugin_id.as_str())
        .collect();
    assert_eq!(plugins, [SimulationState::PLUGIN_ID, "ledger"]);

    let state = archive.simulation_state().unwrap().unwrap();
    assert_eq!(state.time(), 5.0);
    assert_eq!(state.next_plan_id(), PlanId::new(1));

    let decoded: LedgerData = archive
        .decode("ledger", SemanticVersion::new(1, 0, 0))
        .unwrap()
        .unwrap();
    assert_eq!(&decoded, ledger);
}

#[test]
fn snapshots_are_skipped_unless_requested() {
    let output = run(|ctx| {
        ctx.submit(Deposit { account: "alice", amount: 3 })?;
        Ok(())
    });
    assert!(output.plugin_datas().is_empty());
    assert!(output.plugin_data::<LedgerData>().is_none());
}
