//! dbha-client — HTTP JSON clients for the external services.
//!
//! The inventory, status/ticket and name-resolution services share one
//! request shape (POST a JSON body, receive a `{code, msg, data}`
//! envelope) and one retry policy. Each client implements the matching
//! `dbha-core` service trait so the pipeline never sees HTTP.

pub mod error;
pub mod http;
pub mod inventory;
pub mod name;
pub mod status;

pub use error::ClientError;
pub use http::{RetryPolicy, ServiceClient};
pub use inventory::InventoryClient;
pub use name::NameServiceClient;
pub use status::StatusClient;
