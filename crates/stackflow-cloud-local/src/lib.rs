//! Local provider for StackFlow
//!
//! This crate implements the CloudProvider trait on top of a JSON file,
//! so stacks can be planned and applied without a cloud account.
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud_local::LocalProvider;
//! use stackflow_cloud::CloudProvider;
//!
//! let provider = LocalProvider::for_project(".");
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Local cloud unavailable: {:?}", auth.error);
//! }
//! ```

pub mod error;
pub mod provider;

pub use error::{LocalError, Result};
pub use provider::{Inventory, LOCAL_CLOUD_DIR, LocalProvider, LocalResource};
