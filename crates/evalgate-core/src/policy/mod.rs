//! Gate policy definitions and loading.
//!
//! Policies are YAML/JSON documents validated against
//! `schema/gate_policy.schema.json` before deserialization.

mod parser;
mod schema;

pub use parser::{GatePolicy, PolicyError, SeverityCutoffs};
pub use schema::validate_policy_schema;
