pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod record;
pub mod server;
pub mod store;
pub mod throttle_config;
pub mod throttler;
pub mod token;

pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use record::{IdentityKind, TrialRecord};
pub use server::create_app;
pub use store::TrialStore;
pub use throttle_config::ThrottleConfig;
pub use throttler::Throttler;
