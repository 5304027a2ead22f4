//! Registration workflow and administrator services.

mod admin;
mod rate_limit;
mod registration;
mod scheduler;

pub use admin::{AdminError, AdminService};
pub use rate_limit::{PinAttemptLimiter, RateLimited, DEFAULT_PIN_ATTEMPTS_PER_MINUTE};
pub use registration::{RegistrationService, Reply, INCORRECT_PIN_MESSAGE, NOT_STARTED_MESSAGE};
pub use scheduler::{
    follow_up_with_retry, ConfirmationJob, ConfirmationScheduler, SchedulerClosed,
    SchedulerSettings, DEFAULT_FOLLOW_UP_BUDGET, DEFAULT_FOLLOW_UP_INTERVAL, DEFAULT_SEND_TIMEOUT,
    SHUTDOWN_FOLLOW_UP_BUDGET,
};
