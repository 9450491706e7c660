//! EC2 Auto Scaling implementation of [`nodecycle_core::FleetApi`].
//!
//! Every call shells out to the `aws` command-line client with JSON
//! output, so credentials, region and profile resolution follow whatever
//! the operator has already configured for it.

mod client;
mod model;

pub use client::AwsFleet;
