//! WebSocket front end for staged sessions.
//!
//! The [`Supervisor`] admits connections under a fixed ceiling and runs one
//! [`Session`] worker per connection.

pub mod config;
pub mod error;
pub mod health;
pub mod server;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

pub use config::ServerConfig;
pub use error::{AdmissionError, SessionError, TransportError};
pub use health::HealthResponse;
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::{ReadEnd, Session, SessionReport};
pub use settings::{load_settings_from_path, SettingsError};
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{AdmissionPermit, LiveSession, Supervisor};
