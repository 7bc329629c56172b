//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! YANG context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::error::{Error, ErrorTag, Result};
use crate::schema::{
    self, ModuleData, ModuleId, SchemaModule, SchemaNode, SnodeData,
};

/// Context of the YANG schemas.
///
/// The context holds every loaded module and the compiled schema node arena.
/// It is the single schema authority against which data trees are bound and
/// validated. Once module loading is finished the context is immutable and
/// freely shared.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) modules: Vec<ModuleData>,
    pub(crate) snodes: Vec<SnodeData>,
    options: ContextFlags,
    searchdirs: Vec<PathBuf>,
    embedded: HashMap<EmbeddedModuleKey, &'static str>,
    loading: Vec<String>,
}

bitflags! {
    /// Options to change context behavior.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ContextFlags: u16 {
        /// Do not search for schemas in the context's searchdirs.
        const DISABLE_SEARCHDIRS = 0x01;

        /// When searching for a schema, prefer searchdirs over embedded
        /// modules.
        const PREFER_SEARCHDIRS = 0x02;
    }
}

/// Embedded module key containing the module/submodule name and optional
/// revision.
#[derive(Debug, Eq, Hash, PartialEq)]
pub struct EmbeddedModuleKey {
    mod_name: &'static str,
    mod_rev: Option<&'static str>,
    submod_name: Option<&'static str>,
    submod_rev: Option<&'static str>,
}

/// A hashmap containing embedded YANG modules.
pub type EmbeddedModules = HashMap<EmbeddedModuleKey, &'static str>;

// ===== impl Context =====

impl Context {
    /// Create a new empty YANG context.
    pub fn new(options: ContextFlags) -> Result<Context> {
        Ok(Context {
            options,
            ..Default::default()
        })
    }

    /// Add the search path into the context.
    pub fn set_searchdir<P: AsRef<Path>>(
        &mut self,
        search_dir: P,
    ) -> Result<()> {
        let search_dir = search_dir.as_ref();
        if !search_dir.is_dir() {
            return Err(Error::new(
                ErrorTag::InvalidValue,
                format!("invalid search directory: {}", search_dir.display()),
            ));
        }
        let search_dir = search_dir.to_path_buf();
        if !self.searchdirs.contains(&search_dir) {
            self.searchdirs.push(search_dir);
        }
        Ok(())
    }

    /// Remove a specific search path from the context.
    pub fn unset_searchdir<P: AsRef<Path>>(
        &mut self,
        search_dir: P,
    ) -> Result<()> {
        self.searchdirs.retain(|dir| dir != search_dir.as_ref());
        Ok(())
    }

    /// Clean all search paths from the context.
    pub fn unset_searchdirs(&mut self) -> Result<()> {
        self.searchdirs.clear();
        Ok(())
    }

    /// Set the hash map containing embedded YANG modules, which are loaded
    /// on demand.
    pub fn set_embedded_modules(&mut self, modules: &EmbeddedModules) {
        self.embedded = modules
            .iter()
            .map(|(key, data)| {
                (
                    EmbeddedModuleKey {
                        mod_name: key.mod_name,
                        mod_rev: key.mod_rev,
                        submod_name: key.submod_name,
                        submod_rev: key.submod_rev,
                    },
                    *data,
                )
            })
            .collect();
    }

    /// Remove all embedded modules from the context.
    pub fn unset_embedded_modules(&mut self) {
        self.embedded.clear();
    }

    /// Get the currently set context's options.
    pub fn get_options(&self) -> ContextFlags {
        self.options
    }

    /// Get YANG module of the given name and revision.
    ///
    /// If the revision is not specified, any revision matches.
    pub fn get_module(
        &self,
        name: &str,
        revision: Option<&str>,
    ) -> Option<SchemaModule<'_>> {
        self.modules
            .iter()
            .position(|mdata| {
                mdata.name == name
                    && (revision.is_none()
                        || mdata.revision.as_deref() == revision)
            })
            .map(|id| SchemaModule::new(self, id))
    }

    /// Get the latest revision of the YANG module specified by its name.
    pub fn get_module_latest(&self, name: &str) -> Option<SchemaModule<'_>> {
        self.get_module(name, None)
    }

    /// Get the YANG module of the given namespace.
    pub fn get_module_ns(&self, ns: &str) -> Option<SchemaModule<'_>> {
        self.modules
            .iter()
            .position(|mdata| mdata.namespace == ns)
            .map(|id| SchemaModule::new(self, id))
    }

    /// Get the YANG module of the given prefix.
    pub fn get_module_prefix(&self, prefix: &str) -> Option<SchemaModule<'_>> {
        self.modules
            .iter()
            .position(|mdata| mdata.prefix == prefix)
            .map(|id| SchemaModule::new(self, id))
    }

    /// Get the list of loaded modules.
    pub fn modules(&self) -> impl Iterator<Item = SchemaModule<'_>> {
        (0..self.modules.len()).map(|id| SchemaModule::new(self, id))
    }

    /// Returns an iterator over all schema nodes from all modules in the
    /// YANG context (depth-first search algorithm).
    pub fn traverse(&self) -> impl Iterator<Item = SchemaNode<'_>> {
        self.modules().flat_map(|module| module.traverse())
    }

    /// Try to find the module in the embedded modules and searchpaths and
    /// load it, compiling it into the schema graph.
    ///
    /// The `features` parameter specifies the module features that should be
    /// enabled. If left empty, no features are enabled. The feature string
    /// `*` enables all module features.
    pub fn load_module(
        &mut self,
        name: &str,
        revision: Option<&str>,
        features: &[&str],
    ) -> Result<SchemaModule<'_>> {
        if let Some(id) = self.module_id_by_name(name) {
            if revision.is_some()
                && self.modules[id].revision.as_deref() != revision
            {
                return Err(Error::new(
                    ErrorTag::OperationFailed,
                    format!(
                        "module '{}' already loaded with another revision",
                        name
                    ),
                ));
            }
            return Ok(SchemaModule::new(self, id));
        }

        let id = self.load_and_compile(name, features)?;
        Ok(SchemaModule::new(self, id))
    }

    /// Parse and compile a module directly from a source string.
    pub fn parse_module_string(
        &mut self,
        data: &str,
        features: &[&str],
    ) -> Result<SchemaModule<'_>> {
        let stmt = crate::yang::parse_module(data)?;
        let name = stmt.arg()?.to_string();
        if let Some(id) = self.module_id_by_name(&name) {
            return Ok(SchemaModule::new(self, id));
        }
        self.loading.push(name);
        let result = schema::compile_module(self, stmt, features);
        self.loading.pop();
        let id = result?;
        Ok(SchemaModule::new(self, id))
    }

    /// Get a schema node based on the given data path (JSON format), where
    /// the first segment carries its module name as prefix.
    pub fn find_path(&self, path: &str) -> Result<SchemaNode<'_>> {
        let not_found = || {
            Error::new(
                ErrorTag::UnknownElement,
                format!("schema path '{}' not found", path),
            )
        };
        let mut current: Option<SchemaNode<'_>> = None;
        let mut module: Option<SchemaModule<'_>> = None;
        for segment in path.trim_start_matches('/').split('/') {
            // Strip any "[...]" predicates.
            let segment = match segment.find('[') {
                Some(pos) => &segment[..pos],
                None => segment,
            };
            let (mod_name, name) = match segment.split_once(':') {
                Some((mod_name, name)) => (Some(mod_name), name),
                None => (None, segment),
            };
            if let Some(mod_name) = mod_name {
                module =
                    Some(self.get_module(mod_name, None).ok_or_else(|| {
                        Error::new(
                            ErrorTag::UnknownNamespace,
                            format!("unknown module '{}'", mod_name),
                        )
                    })?);
            }
            let module = module.as_ref().ok_or_else(|| {
                Error::new(
                    ErrorTag::UnknownNamespace,
                    "top-level path segment has no module prefix",
                )
            })?;
            current = match current {
                None => module
                    .data()
                    .chain(module.rpcs())
                    .chain(module.notifications())
                    .find(|snode| snode.name() == name),
                Some(parent) => parent
                    .find_data_child(name, Some(module.namespace()))
                    .or_else(|| parent.find_data_child(name, None)),
            };
            if current.is_none() {
                return Err(not_found());
            }
        }
        current.ok_or_else(not_found)
    }

    pub(crate) fn module_id_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules.iter().position(|mdata| mdata.name == name)
    }

    // Load an imported module with no features enabled, detecting circular
    // imports as fatal.
    pub(crate) fn load_module_by_name(
        &mut self,
        name: &str,
    ) -> Result<ModuleId> {
        if let Some(id) = self.module_id_by_name(name) {
            return Ok(id);
        }
        self.load_and_compile(name, &[])
    }

    fn load_and_compile(
        &mut self,
        name: &str,
        features: &[&str],
    ) -> Result<ModuleId> {
        if self.loading.iter().any(|loading| loading == name) {
            return Err(Error::new(
                ErrorTag::OperationFailed,
                format!(
                    "circular import of module '{}' (chain: {})",
                    name,
                    self.loading.join(" -> ")
                ),
            ));
        }

        let text = self.find_module_source(name)?;
        let stmt = crate::yang::parse_module(&text)?;
        if stmt.arg()? != name {
            return Err(Error::new(
                ErrorTag::BadElement,
                format!(
                    "module source for '{}' declares name '{}'",
                    name,
                    stmt.arg()?
                ),
            ));
        }

        self.loading.push(name.to_string());
        let result = schema::compile_module(self, stmt, features);
        self.loading.pop();
        result
    }

    // Locate module source text by name: embedded modules and searchdir
    // files (`<name>.yang` or `<name>@<revision>.yang`).
    pub(crate) fn find_module_source(&self, name: &str) -> Result<String> {
        let from_embedded = || {
            self.embedded
                .iter()
                .find(|(key, _)| {
                    (key.mod_name == name && key.submod_name.is_none())
                        || key.submod_name == Some(name)
                })
                .map(|(_, data)| data.to_string())
        };
        let from_searchdirs = || self.find_module_file(name);

        let found = if self.options.contains(ContextFlags::PREFER_SEARCHDIRS) {
            from_searchdirs().or_else(from_embedded)
        } else {
            from_embedded().or_else(from_searchdirs)
        };
        found.ok_or_else(|| {
            Error::new(
                ErrorTag::OperationFailed,
                format!("module '{}' not found", name),
            )
        })
    }

    fn find_module_file(&self, name: &str) -> Option<String> {
        if self.options.contains(ContextFlags::DISABLE_SEARCHDIRS) {
            return None;
        }
        for dir in &self.searchdirs {
            let plain = dir.join(format!("{}.yang", name));
            if let Ok(text) = std::fs::read_to_string(&plain) {
                return Some(text);
            }
            // Revision-qualified file names.
            let entries = std::fs::read_dir(dir).ok()?;
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if file_name.starts_with(&format!("{}@", name))
                    && file_name.ends_with(".yang")
                {
                    if let Ok(text) = std::fs::read_to_string(entry.path()) {
                        return Some(text);
                    }
                }
            }
        }
        None
    }
}

// ===== impl EmbeddedModuleKey =====

impl EmbeddedModuleKey {
    pub fn new(
        mod_name: &'static str,
        mod_rev: Option<&'static str>,
        submod_name: Option<&'static str>,
        submod_rev: Option<&'static str>,
    ) -> EmbeddedModuleKey {
        EmbeddedModuleKey {
            mod_name,
            mod_rev,
            submod_name,
            submod_rev,
        }
    }
}
