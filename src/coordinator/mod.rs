//! Vote coordination and the services built around it
//!
//! - [`VoteCoordinator`]: store-then-cache sequencing of upvotes and unvotes
//! - [`FeatureRegistry`]: feature CRUD with vote counts in its views
//! - [`Accounts`]: registration, login, token refresh
//! - HTTP router and server assembly

pub mod accounts;
pub mod extract;
pub mod http;
pub mod registry;
pub mod server;
pub mod votes;

pub use accounts::Accounts;
pub use registry::FeatureRegistry;
pub use server::Server;
pub use votes::VoteCoordinator;
