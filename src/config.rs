//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Startup configuration.
//!
//! The engine boots from an XML options file whose elements set named
//! options. Unknown option elements are rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::{Context, ContextFlags};
use crate::data::{DataFormat, DataParserFlags, DataTree, DataValidationFlags};
use crate::error::{Error, ErrorTag, Result};

/// Process exit code conventions for CLI-style callers.
pub const EXIT_OK: i32 = 0;
pub const EXIT_PROTOCOL_ERROR: i32 = 1;
pub const EXIT_DENIED: i32 = 255;

/// Where the NACM configuration lives.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NacmMode {
    /// No access control enforcement.
    #[default]
    Disabled,
    /// Rules live in `running` under the ietf-netconf-acm namespace.
    Internal,
    /// Rules are loaded from an external `<nacm>` file.
    External,
}

/// Engine startup options.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directories searched for YANG modules.
    pub yang_dirs: Vec<PathBuf>,
    /// Main YANG module loaded at startup.
    pub yang_main: Option<String>,
    /// Directory holding the `<db>_db` datastore files.
    pub datastore_dir: PathBuf,
    /// Front-end request socket path, owned by the transport layer.
    pub socket_path: Option<PathBuf>,
    pub nacm_mode: NacmMode,
    /// External NACM file, for `NacmMode::External`.
    pub nacm_file: Option<PathBuf>,
    /// User exempt from NACM enforcement.
    pub nacm_recovery_user: Option<String>,
    /// Serve datastore reads from the in-memory cache.
    pub cache_enabled: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            yang_dirs: Vec::new(),
            yang_main: None,
            datastore_dir: PathBuf::from("/usr/local/var/netconfd"),
            socket_path: None,
            nacm_mode: NacmMode::Disabled,
            nacm_file: None,
            nacm_recovery_user: None,
            cache_enabled: true,
        }
    }
}

// ===== impl Config =====

impl Config {
    /// Parse the startup configuration from an XML file.
    pub fn from_xml_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            Error::new(
                ErrorTag::OperationFailed,
                format!(
                    "cannot read configuration file {}: {}",
                    path.as_ref().display(),
                    err
                ),
            )
        })?;
        Config::from_xml(&text)
    }

    /// Parse the startup configuration from an XML document. The root
    /// element name is free; each child element sets one option.
    pub fn from_xml(text: &str) -> Result<Config> {
        let context = Arc::new(Context::new(ContextFlags::empty())?);
        let tree = DataTree::parse_string(
            &context,
            text,
            DataFormat::XML,
            DataParserFlags::SCHEMALESS,
            DataValidationFlags::empty(),
        )?;
        let root = tree.reference().ok_or_else(|| {
            Error::new(ErrorTag::MalformedMessage, "empty configuration file")
        })?;

        let mut config = Config::default();
        for option in root.children() {
            let body = option.value_str().unwrap_or("").trim().to_string();
            match option.name() {
                "yang-dir" => config.yang_dirs.push(PathBuf::from(body)),
                "yang-main" => config.yang_main = Some(body),
                "datastore-dir" => config.datastore_dir = PathBuf::from(body),
                "socket-path" => {
                    config.socket_path = Some(PathBuf::from(body))
                }
                "nacm-mode" => {
                    config.nacm_mode = match body.as_str() {
                        "disabled" => NacmMode::Disabled,
                        "internal" => NacmMode::Internal,
                        "external" => NacmMode::External,
                        other => {
                            return Err(Error::new(
                                ErrorTag::InvalidValue,
                                format!("unknown nacm-mode '{}'", other),
                            ));
                        }
                    }
                }
                "nacm-file" => config.nacm_file = Some(PathBuf::from(body)),
                "nacm-recovery-user" => {
                    config.nacm_recovery_user = Some(body)
                }
                "cache-enable" => config.cache_enabled = body == "true",
                unknown => {
                    return Err(Error::new(
                        ErrorTag::UnknownElement,
                        format!("unknown configuration option '{}'", unknown),
                    ));
                }
            }
        }
        Ok(config)
    }
}
