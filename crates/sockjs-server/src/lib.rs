pub mod router;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;
pub mod transports;

pub use server::{start, ServerConfig, ServerHandle, ServiceMount};
pub use service::{Service, SessionHandle};
pub use session::{Session, SessionRegistry};
