// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod config;
pub mod error;
pub mod event;
pub mod harvester;
pub mod identity;
pub mod init;
pub mod outputs;
pub mod prospector;
pub mod publisher;
pub mod registry;
pub mod spooler;
pub mod telemetry;

pub use config::ShipperConfig;
pub use error::{Error, Result};
pub use event::Event;
pub use identity::FileIdentity;
