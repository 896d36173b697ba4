//! Access-control models

pub mod ban;
pub mod request_log;
pub mod session;

pub use ban::Ban;
pub use request_log::{RequestLogEntry, WindowCount};
pub use session::{NewSession, Session, SessionRotation};
