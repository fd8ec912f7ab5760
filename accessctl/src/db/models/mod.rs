//! Storage record models matching table schemas.
//!
//! Storage models are distinct from API models so the two representations can evolve
//! independently. Each entity has a create request, an update request (all fields optional)
//! and a response type returned by the stores.
//!
//! - [`users`]: principals, their status and password hash
//! - [`roles`]: named roles
//! - [`user_roles`]: role assignments (the ledger)

pub mod roles;
pub mod user_roles;
pub mod users;
