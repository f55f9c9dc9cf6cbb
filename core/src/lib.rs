pub mod enums;
pub mod models;

pub use enums::{
    DeviceEventName, DeviceMode, SchedulerCommandAction, SchedulerCommandStatus,
    SchedulerDayOfWeek,
};
pub use models::{
    Device, DeviceEvent, Microcontroller, Provider, ProviderMeasurement, Scheduler,
    SchedulerCommand, SchedulerSlot,
};
