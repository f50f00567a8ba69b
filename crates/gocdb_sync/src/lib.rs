// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provisions AMS users, AUTHN bindings and topic ACLs for the service
//! endpoints a GOCDB registry lists, so that each endpoint can authenticate to
//! AMS with its host certificate.

pub mod ams;
pub mod authn;
pub mod cli;
pub mod config;
pub mod registry;
pub mod report;
pub mod site_cache;
pub mod sync;

pub use config::{Config, ConfigError, TopicMode};
pub use report::{ServiceTypeReport, SyncReport};
pub use sync::{RunOptions, SyncSettings, Syncer};
