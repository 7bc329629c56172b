//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, ErrorTag, Result};

/// Write `data` to `path` atomically: the content goes to `<path>.tmp`,
/// is fsynced, and then renamed over the destination, so no partial file is
/// ever observable.
pub(crate) fn atomic_write(path: &Path, data: &str) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let io_err = |err: std::io::Error| {
        Error::new(
            ErrorTag::OperationFailed,
            format!("failed to write {}: {}", path.display(), err),
        )
    };
    let mut file = File::create(&tmp_path).map_err(io_err)?;
    file.write_all(data.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    std::fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

/// Split a `prefix:name` qualified name into its optional prefix and local
/// name.
pub(crate) fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, qname),
    }
}
