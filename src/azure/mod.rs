//! Azure API interaction module
//!
//! This module provides the core functionality for talking to Azure: bearer
//! tokens for the Resource Manager (ARM), the HTTP wrapper, the ARM client
//! consumed by expansion handlers, and Shared Key signing for storage
//! data-plane calls.
//!
//! # Module Structure
//!
//! - [`auth`] - Bearer tokens from the environment or the Azure CLI
//! - [`client`] - ARM client and the [`client::ManagementClient`] contract
//! - [`http`] - HTTP utilities for REST API calls
//! - [`shared_key`] - Shared Key signing for storage data-plane requests
//!
//! # Example
//!
//! ```ignore
//! use tazure::azure::{auth::AzureCredentials, client::{ArmClient, ManagementClient}};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let credentials = AzureCredentials::from_environment();
//!     let client = ArmClient::new(credentials, "https://management.azure.com", None)?;
//!     let path = "/subscriptions?api-version=2020-01-01";
//!     let body = client.do_request(reqwest::Method::GET, path).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod shared_key;
