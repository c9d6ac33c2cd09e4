pub mod channel;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod messages;
pub mod models;
pub mod notifier;
pub mod phone;
pub mod replies;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod state;
pub mod store;
pub mod tenants;
pub mod workers;

pub use collector::{Collector, CollectorPass, PassSummary};
pub use routes::create_router;
pub use scheduler::Scheduler;
pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
