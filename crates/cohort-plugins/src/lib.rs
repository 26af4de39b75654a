//! Reference plugins for the Cohort kernel.
//!
//! Each module is one plugin: a plugin data type, a data manager rebuilt
//! from it, the commands that mutate the manager and the events it
//! publishes.
//!
//! # Modules
//!
//! - [`stochastics`] -- the simulation's random stream.
//! - [`people`] -- adding and removing people.
//! - [`person_properties`] -- per-person property columns and update events.
//! - [`partition`] -- people indexed by the value of one property.
//! - [`epidemic`] -- a daily SIR model built on the plugins above.
//! - [`model`] -- [`EpidemicModel`], the epidemic plugin set as a unit.
//! - [`labels`] -- routing labels for people, property ids and values.

pub mod epidemic;
pub mod labels;
pub mod model;
pub mod partition;
pub mod people;
pub mod person_properties;
pub mod stochastics;

pub use epidemic::{DailyCounts, EpidemicData, EpidemicParameters};
pub use labels::ToLabel;
pub use model::EpidemicModel;
pub use partition::{PartitionData, PartitionDataManager, PartitionId};
pub use people::{AddPerson, PeopleData, PeopleDataManager, RemovePerson};
pub use person_properties::{
    DefineProperty, PersonPropertiesData, PersonPropertiesDataManager, SetPersonProperty,
};
pub use stochastics::{StochasticsData, StochasticsDataManager};
