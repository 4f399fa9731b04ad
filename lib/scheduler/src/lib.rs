//! Time-based workflow triggering.
//!
//! Two sweeps feed the execution engine:
//!
//! - **Due-date sweep** (daily): finds open tasks approaching their due
//!   date and fires `due_date_approaching` workflows once per task.
//! - **Custom-schedule sweep** (per minute): evaluates user-supplied
//!   cron expressions and fires `custom_schedule` workflows that are
//!   due, suppressing duplicates within the same minute period.

pub mod error;
pub mod nats;
pub mod schedule;
pub mod sweep;

pub use error::ScheduleError;
pub use nats::NatsTaskQuery;
pub use schedule::{CronSchedule, fired_in_current_period, minute_start};
pub use sweep::{Scheduler, SweepReport, TaskQuery, TaskSnapshot};
