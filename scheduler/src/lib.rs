pub mod decision;
pub mod types;

pub use decision::{convert_power_unit, decide, normalize_unit};
pub use types::{
    Decision, DecisionKind, DispatchEntry, DueSchedulerEntry, MeasurementView, ProviderView,
};
