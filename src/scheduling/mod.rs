mod dispatch_scheduler;

pub use dispatch_scheduler::{DEFAULT_DISPATCH_INTERVAL, DispatchScheduler, ScheduledTask};
