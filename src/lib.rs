//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! NETCONF/YANG configuration engine core.
//!
//! The crate implements the brains of a network-management configuration
//! engine: a compiled YANG schema graph, arena-backed instance data trees
//! with XML and JSON (RFC 7951) encodings, an XPath 1.0 evaluator, named
//! datastores with locks and file backing, a validate/commit pipeline with
//! plugin transaction hooks, NACM access control (RFC 8341) and an event
//! notification bus. Transport front-ends (CLI, RESTCONF, NETCONF framing)
//! talk to the engine through [`rpc::Engine`].
//!
//! ## Design Goals
//! * Express the NETCONF/YANG object model in idiomatic Rust
//! * Lean on ownership for snapshot discipline: readers hold `Arc`
//!   snapshots, writers clone-on-shared, commits swap atomically
//! * No unsafe code
//!
//! ## Quick start
//!
//! ```no_run
//! use netconfd::config::Config;
//! use netconfd::rpc::Engine;
//!
//! let config = Config::from_xml_file("/etc/netconfd.xml")?;
//! let mut engine = Engine::new(&config)?;
//! engine.startup()?;
//! let session = engine.session_open("admin");
//! let reply = engine.handle_request(
//!     session,
//!     r#"<rpc message-id="1"><get-config><source><running/></source></get-config></rpc>"#,
//! );
//! # Ok::<(), netconfd::Error>(())
//! ```

mod error;

pub mod config;
pub mod context;
pub mod data;
pub mod datastore;
pub mod iter;
pub mod nacm;
pub mod notification;
pub mod rpc;
pub mod schema;
pub mod transaction;
pub mod xpath;
pub mod yang;

mod json;
mod utils;
mod xml;

pub use crate::error::{Error, ErrorSeverity, ErrorTag, ErrorType, Result};
