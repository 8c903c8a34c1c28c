//! SensNet node: owns the sockets, the runtime side and the operator console
//! around the I/O-free `sensnet_core::Node`.

pub mod client;
pub mod config;
pub mod conn;
pub mod console;
pub mod dispatch;
pub mod forward;
pub mod negotiate;
pub mod supervisor;

pub use client::{Alert, Area, ClientError, SensorClient};
pub use config::Config;
pub use console::{Console, ConsoleHandle};
pub use dispatch::{Session, SessionEnd, SessionError};
pub use supervisor::{Exit, Supervisor, SupervisorError};
