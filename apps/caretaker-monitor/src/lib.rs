pub mod capture;
pub mod cli;
pub mod config;
pub mod pacer;
pub mod presenter;
pub mod router;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use config::MonitorConfig;
pub use session::{MonitoringSession, SessionHandle, SessionReport};
pub use state::MonitorSnapshot;
pub use transport::ConnectionState;
