//! End-to-end tests over the `Engine` facade.

mod engine_properties;
mod fixtures;
