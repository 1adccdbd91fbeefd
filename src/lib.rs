// API Harness - Library root

pub mod assertions;
pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod mock_server;
pub mod transport;

pub use auth::{TokenManager, TokenStatus};
pub use config::{Environment, EnvironmentName};
pub use error::{Error, Result};
pub use http_client::{ApiClient, RequestOptions};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
