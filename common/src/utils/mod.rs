pub mod authz;
pub mod config;
pub mod deadline;
pub mod embedding;
pub mod rate_limit;
