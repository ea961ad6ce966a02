//! Remote CRM access.
//!
//! - [`gateway`] - policy layer every call goes through
//! - [`transport`] - the request/response seam and its HTTP implementation
//! - [`entity`] - allow-listed entities and actions
//! - [`params`] - call parameters

pub mod entity;
pub mod gateway;
pub mod params;
pub mod transport;

pub use entity::{Action, Entity};
pub use gateway::{Records, RemoteGateway};
pub use params::ApiParams;
pub use transport::{HttpTransport, RemoteTransport, TransportError, TransportRequest, TransportResponse};
