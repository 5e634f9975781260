//! Task scheduler: find approved tasks whose window is open, claim them, dispatch runs.

pub mod dispatcher;
pub mod engine;

pub use self::dispatcher::Scheduler;
pub use self::engine::run_scheduler_loop;
