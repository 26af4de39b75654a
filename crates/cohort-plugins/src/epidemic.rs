//! A small SIR epidemic with births and deaths.
//!
//! The model runs one plan per simulated day. Day 0 seeds the population;
//! every later day recovers, infects, removes and adds people, all through
//! the other plugins' commands. The pending daily plan is part of
//! [`EpidemicData`], so a run halted between two days resumes exactly where
//! it stopped.

use cohort_kernel::{
    Command, Context, DataManager, DataView, Effects, KernelError, PlanDelay, Plugin, PluginData,
};
use cohort_properties::{PropertyDefinition, PropertyType, PropertyValue, TimeTrackingPolicy};
use cohort_types::{PersonId, PlanId, PluginId, SemanticVersion};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::partition::{self, PartitionDataManager, PartitionId};
use crate::people::{self, AddPerson, PeopleDataManager, RemovePerson};
use crate::person_properties::{
    self, DefineProperty, PersonPropertiesDataManager, SetPersonProperty,
};
use crate::stochastics;

/// Plugin id of the epidemic plugin.
pub const PLUGIN_ID: &str = "epidemic";

/// Current version of [`EpidemicData`].
pub const VERSION: SemanticVersion = SemanticVersion::new(1, 0, 0);

/// Text property holding a person's disease state.
pub const HEALTH: &str = "health";

/// Immutable integer property holding a person's age in years at entry.
pub const AGE: &str = "age";

/// Partition of people by [`HEALTH`].
pub const HEALTH_PARTITION: &str = "health";

/// Not yet infected.
pub const SUSCEPTIBLE: &str = "susceptible";

/// Infected and able to infect others.
pub const INFECTIOUS: &str = "infectious";

/// Recovered and immune.
pub const RECOVERED: &str = "recovered";

const MAX_INITIAL_AGE: i64 = 90;

/// Model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EpidemicParameters {
    /// People added on day 0.
    pub initial_population: u32,
    /// People infected on day 0.
    pub initial_infections: u32,
    /// Contacts each infectious person makes per day.
    pub contacts_per_day: u32,
    /// Chance that a contact with a susceptible person infects them.
    pub transmission_probability: f64,
    /// Daily chance that an infectious person recovers.
    pub recovery_probability: f64,
    /// People born each day.
    pub daily_births: u32,
    /// Daily chance that a person dies.
    pub mortality_probability: f64,
    /// Number of days simulated.
    pub days: u32,
}

impl Default for EpidemicParameters {
    fn default() -> Self {
        Self {
            initial_population: 1000,
            initial_infections: 10,
            contacts_per_day: 8,
            transmission_probability: 0.05,
            recovery_probability: 0.1,
            daily_births: 2,
            mortality_probability: 0.0005,
            days: 100,
        }
    }
}

impl EpidemicParameters {
    /// Check that every probability lies in `[0, 1]` and that the initial
    /// infections fit the initial population.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Precondition`] naming the offending field.
    pub fn validate(&self) -> Result<(), KernelError> {
        for (name, value) in [
            ("transmission_probability", self.transmission_probability),
            ("recovery_probability", self.recovery_probability),
            ("mortality_probability", self.mortality_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(KernelError::precondition(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if self.initial_infections > self.initial_population {
            return Err(KernelError::precondition(
                "initial_infections exceeds initial_population",
            ));
        }
        Ok(())
    }
}

/// The daily plan waiting to fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledDay {
    /// Plan id, reused on resume.
    pub plan: PlanId,
    /// When it fires.
    pub time: f64,
}

/// Snapshot of the epidemic plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpidemicData {
    parameters: EpidemicParameters,
    day: u32,
    next_day: Option<ScheduledDay>,
}

impl EpidemicData {
    /// A model that has not started.
    pub const fn new(parameters: EpidemicParameters) -> Self {
        Self {
            parameters,
            day: 0,
            next_day: None,
        }
    }

    /// The parameters.
    pub const fn parameters(&self) -> &EpidemicParameters {
        &self.parameters
    }

    /// The next day to simulate.
    pub const fn day(&self) -> u32 {
        self.day
    }

    /// The pending daily plan, if any.
    pub const fn next_day(&self) -> Option<ScheduledDay> {
        self.next_day
    }
}

impl PluginData for EpidemicData {
    fn plugin_id(&self) -> PluginId {
        PluginId::from(PLUGIN_ID)
    }

    fn version(&self) -> SemanticVersion {
        VERSION
    }

    fn to_json(&self) -> Result<serde_json::Value, KernelError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// What happened on one day, released as an output at the end of the day.
///
/// State counts are read before that day's deaths complete; people whose
/// removal is pending are still counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCounts {
    /// The day.
    pub day: u32,
    /// Living people.
    pub population: usize,
    /// Susceptible people.
    pub susceptible: usize,
    /// Infectious people.
    pub infectious: usize,
    /// Recovered people.
    pub recovered: usize,
    /// Infections on this day.
    pub new_infections: usize,
    /// Recoveries on this day.
    pub recoveries: usize,
    /// Deaths started on this day.
    pub deaths: usize,
    /// People added on this day.
    pub births: usize,
}

/// Owner of the model's progress.
#[derive(Debug)]
pub struct EpidemicDataManager {
    parameters: EpidemicParameters,
    day: u32,
    next_day: Option<ScheduledDay>,
}

impl EpidemicDataManager {
    /// Rebuild from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Precondition`] for invalid parameters.
    pub fn from_plugin_data(data: &EpidemicData) -> Result<Self, KernelError> {
        data.parameters.validate()?;
        Ok(Self {
            parameters: data.parameters.clone(),
            day: data.day,
            next_day: data.next_day,
        })
    }

    /// The next day to simulate.
    pub const fn day(&self) -> u32 {
        self.day
    }

    /// The parameters.
    pub const fn parameters(&self) -> &EpidemicParameters {
        &self.parameters
    }
}

/// Define the health and age properties and the health partition unless a
/// previous segment already did.
fn define_model(ctx: &mut Context<'_>) -> Result<(), KernelError> {
    let properties = ctx.data_manager::<PersonPropertiesDataManager>()?;
    let health_defined = properties.is_defined(&HEALTH.into());
    let age_defined = properties.is_defined(&AGE.into());
    if !health_defined {
        let definition = PropertyDefinition::builder(PropertyType::Text)
            .default_value(SUSCEPTIBLE)
            .time_tracking(TimeTrackingPolicy::TrackTime)
            .build()?;
        ctx.submit(DefineProperty::new(HEALTH, definition))?;
    }
    if !age_defined {
        let definition = PropertyDefinition::builder(PropertyType::Integer)
            .mutable(false)
            .build()?;
        ctx.submit(DefineProperty::new(AGE, definition))?;
    }
    let partition_id = PartitionId::from(HEALTH_PARTITION);
    if !ctx.data_manager::<PartitionDataManager>()?.contains(&partition_id) {
        partition::add_partition(ctx, partition_id, HEALTH)?;
    }
    Ok(())
}

impl DataManager for EpidemicDataManager {
    fn name(&self) -> &'static str {
        "epidemic"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), KernelError> {
        define_model(ctx)?;
        match self.next_day {
            Some(ScheduledDay { plan, time }) => ctx.resume_plan(plan, time, run_day)?,
            None if self.day < self.parameters.days => {
                let time = f64::from(self.day);
                let plan = ctx.schedule(time, run_day)?;
                self.next_day = Some(ScheduledDay { plan, time });
            }
            None => {}
        }
        debug!(day = self.day, days = self.parameters.days, "Epidemic loaded");
        Ok(())
    }

    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        Ok(Some(Box::new(EpidemicData {
            parameters: self.parameters.clone(),
            day: self.day,
            next_day: self.next_day,
        })))
    }
}

/// Move to the next day and schedule it, or stop after the last one.
struct AdvanceDay;

impl Command for AdvanceDay {
    type Target = EpidemicDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &EpidemicDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        if target.day >= target.parameters.days {
            return Err(KernelError::precondition("epidemic already finished"));
        }
        Ok(())
    }

    fn execute(
        self,
        target: &mut EpidemicDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        target.day = target.day.saturating_add(1);
        target.next_day = if target.day < target.parameters.days {
            let delay = PlanDelay::new(1.0)?;
            let plan = effects.schedule(delay, run_day);
            Some(ScheduledDay {
                plan,
                time: effects.time() + delay.value(),
            })
        } else {
            None
        };
        Ok(())
    }
}

fn health(value: &str) -> PropertyValue {
    PropertyValue::from(value)
}

fn infect(ctx: &mut Context<'_>, person: PersonId) -> Result<(), KernelError> {
    ctx.submit(SetPersonProperty::new(person, HEALTH, INFECTIOUS))
}

fn seed_population(
    ctx: &mut Context<'_>,
    parameters: &EpidemicParameters,
    counts: &mut DailyCounts,
) -> Result<(), KernelError> {
    let size = parameters.initial_population;
    let ages: Vec<i64> = stochastics::draw(ctx, |rng| {
        (0..size)
            .map(|_| rng.random_range(0..=MAX_INITIAL_AGE))
            .collect()
    })?;
    for age in ages {
        ctx.submit(AddPerson::new().with_value(AGE, age))?;
        counts.births = counts.births.saturating_add(1);
    }

    let partition_id = PartitionId::from(HEALTH_PARTITION);
    for _ in 0..parameters.initial_infections {
        let Some(person) = partition::sample_person(ctx, &partition_id, &health(SUSCEPTIBLE))?
        else {
            break;
        };
        infect(ctx, person)?;
        counts.new_infections = counts.new_infections.saturating_add(1);
    }
    Ok(())
}

/// Infectious people infected before today recover with the daily
/// recovery probability.
fn recover(
    ctx: &mut Context<'_>,
    parameters: &EpidemicParameters,
    infectious: &[PersonId],
    counts: &mut DailyCounts,
) -> Result<(), KernelError> {
    let today = ctx.time();
    let probability = parameters.recovery_probability;
    for &person in infectious {
        let infected_at = ctx
            .data_manager::<PersonPropertiesDataManager>()?
            .assignment_time(person, &HEALTH.into())?;
        if infected_at >= today {
            continue;
        }
        if stochastics::draw(ctx, |rng| rng.random::<f64>() < probability)? {
            ctx.submit(SetPersonProperty::new(person, HEALTH, RECOVERED))?;
            counts.recoveries = counts.recoveries.saturating_add(1);
        }
    }
    Ok(())
}

/// Each infectious person meets random members of the population.
fn transmit(
    ctx: &mut Context<'_>,
    parameters: &EpidemicParameters,
    infectious: &[PersonId],
    counts: &mut DailyCounts,
) -> Result<(), KernelError> {
    let population: Vec<PersonId> = ctx.data_manager::<PeopleDataManager>()?.people().collect();
    if population.is_empty() {
        return Ok(());
    }
    let partition_id = PartitionId::from(HEALTH_PARTITION);
    let susceptible = health(SUSCEPTIBLE);
    let contacts = parameters.contacts_per_day;
    let probability = parameters.transmission_probability;
    let size = population.len();
    for &person in infectious {
        let meetings: Vec<(usize, bool)> = stochastics::draw(ctx, |rng| {
            (0..contacts)
                .map(|_| (rng.random_range(0..size), rng.random::<f64>() < probability))
                .collect()
        })?;
        for (position, transmits) in meetings {
            let Some(&contact) = population.get(position) else {
                continue;
            };
            if !transmits || contact == person {
                continue;
            }
            if ctx
                .data_manager::<PartitionDataManager>()?
                .contains_person(&partition_id, contact, &susceptible)?
            {
                infect(ctx, contact)?;
                counts.new_infections = counts.new_infections.saturating_add(1);
            }
        }
    }
    Ok(())
}

fn remove_deaths(
    ctx: &mut Context<'_>,
    parameters: &EpidemicParameters,
    counts: &mut DailyCounts,
) -> Result<(), KernelError> {
    let people = ctx.data_manager::<PeopleDataManager>()?;
    let candidates: Vec<PersonId> = people
        .people()
        .filter(|&person| !people.is_removal_pending(person))
        .collect();
    let probability = parameters.mortality_probability;
    let rolls: Vec<bool> = stochastics::draw(ctx, |rng| {
        candidates
            .iter()
            .map(|_| rng.random::<f64>() < probability)
            .collect()
    })?;
    for (person, dies) in candidates.into_iter().zip(rolls) {
        if dies {
            ctx.submit(RemovePerson { person })?;
            counts.deaths = counts.deaths.saturating_add(1);
        }
    }
    Ok(())
}

fn add_births(
    ctx: &mut Context<'_>,
    parameters: &EpidemicParameters,
    counts: &mut DailyCounts,
) -> Result<(), KernelError> {
    for _ in 0..parameters.daily_births {
        ctx.submit(AddPerson::new().with_value(AGE, 0_i64))?;
        counts.births = counts.births.saturating_add(1);
    }
    Ok(())
}

fn tally(ctx: &Context<'_>, counts: &mut DailyCounts) -> Result<(), KernelError> {
    let partitions = ctx.data_manager::<PartitionDataManager>()?;
    let partition_id = PartitionId::from(HEALTH_PARTITION);
    counts.population = ctx.data_manager::<PeopleDataManager>()?.population();
    counts.susceptible = partitions.count_with(&partition_id, &health(SUSCEPTIBLE))?;
    counts.infectious = partitions.count_with(&partition_id, &health(INFECTIOUS))?;
    counts.recovered = partitions.count_with(&partition_id, &health(RECOVERED))?;
    Ok(())
}

/// The daily plan.
fn run_day(ctx: &mut Context<'_>) -> Result<(), KernelError> {
    let model = ctx.data_manager::<EpidemicDataManager>()?;
    let day = model.day;
    let parameters = model.parameters.clone();
    let mut counts = DailyCounts {
        day,
        population: 0,
        susceptible: 0,
        infectious: 0,
        recovered: 0,
        new_infections: 0,
        recoveries: 0,
        deaths: 0,
        births: 0,
    };

    if day == 0 {
        seed_population(ctx, &parameters, &mut counts)?;
    } else {
        let infectious: Vec<PersonId> = ctx
            .data_manager::<PartitionDataManager>()?
            .people_with(&HEALTH_PARTITION.into(), &health(INFECTIOUS))?
            .collect();
        recover(ctx, &parameters, &infectious, &mut counts)?;
        transmit(ctx, &parameters, &infectious, &mut counts)?;
        remove_deaths(ctx, &parameters, &mut counts)?;
        add_births(ctx, &parameters, &mut counts)?;
    }

    tally(ctx, &mut counts)?;
    trace!(
        day,
        infectious = counts.infectious,
        new_infections = counts.new_infections,
        "Day simulated"
    );
    if day.saturating_add(1) == parameters.days {
        info!(
            days = parameters.days,
            population = counts.population,
            recovered = counts.recovered,
            "Epidemic finished"
        );
    }
    ctx.release_output(counts);
    ctx.submit(AdvanceDay)
}

/// Build the epidemic plugin.
///
/// # Errors
///
/// Propagates plugin construction errors.
pub fn plugin(data: EpidemicData) -> Result<Plugin, KernelError> {
    Plugin::builder(PLUGIN_ID)
        .add_dependency(people::PLUGIN_ID)
        .add_dependency(person_properties::PLUGIN_ID)
        .add_dependency(partition::PLUGIN_ID)
        .add_dependency(stochastics::PLUGIN_ID)
        .add_plugin_data(data)
        .set_initializer(|ctx| {
            let data = ctx.plugin_data::<EpidemicData>()?;
            ctx.add_data_manager(EpidemicDataManager::from_plugin_data(data)?)
        })
        .build()
}
