//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Configuration datastores.
//!
//! Each named datastore owns an `Arc`-held data tree backed by a file named
//! `<dir>/<db>_db`. Readers clone the `Arc` (a snapshot); writers obtain a
//! unique tree through clone-on-shared, so a snapshot taken before a commit
//! observes the pre-commit tree for its entire lifetime. Files are replaced
//! through write-to-temp plus atomic rename.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use generational_arena::Index;
use log::{debug, warn};

use crate::context::Context;
use crate::data::{
    Data, DataFormat, DataParserFlags, DataPrinterFlags, DataTree,
    DataValidationFlags,
};
use crate::error::{Error, ErrorTag, Result};
use crate::utils::atomic_write;

/// A NETCONF session identifier. Session 0 means "unlocked".
pub type SessionId = u32;

/// The named configuration datastores.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
    /// Private scratch space; commit and validate against it are rejected.
    Tmp,
}

/// RFC 6241 §7.2 edit-config operations.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DefaultOperation {
    #[default]
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    /// `default-operation=none`: only nodes carrying an explicit operation
    /// attribute are touched.
    None,
}

/// RFC 6241 edit-config test options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TestOption {
    #[default]
    TestThenSet,
    Set,
    TestOnly,
}

/// RFC 6241 edit-config error options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorOption {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

/// State of the edit cycle of one datastore.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EditState {
    #[default]
    Idle,
    Applying,
    Dirty,
    Validated,
}

#[derive(Debug, Default)]
struct StoreEntry {
    tree: Option<Arc<DataTree>>,
    dirty: bool,
    locked_by: Option<SessionId>,
    mtime: Option<DateTime<Utc>>,
    state: EditState,
}

/// The set of named datastores with their lock table and file backing.
#[derive(Debug)]
pub struct Datastores {
    context: Arc<Context>,
    dir: PathBuf,
    cache_enabled: bool,
    stores: HashMap<Datastore, StoreEntry>,
}

// ===== impl Datastore =====

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
            Datastore::Tmp => "tmp",
        }
    }

    fn file_name(&self) -> String {
        format!("{}_db", self.as_str())
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Datastore {
    type Err = Error;

    fn from_str(s: &str) -> Result<Datastore> {
        match s {
            "running" => Ok(Datastore::Running),
            "candidate" => Ok(Datastore::Candidate),
            "startup" => Ok(Datastore::Startup),
            "tmp" => Ok(Datastore::Tmp),
            _ => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("unknown datastore '{}'", s),
            )),
        }
    }
}

// ===== impl Datastores =====

impl Datastores {
    /// Connect to the datastore directory, loading nothing eagerly. A
    /// corrupt datastore file surfaces on first access.
    pub fn connect<P: AsRef<Path>>(
        context: Arc<Context>,
        dir: P,
        cache_enabled: bool,
    ) -> Result<Datastores> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|err| {
            Error::new(
                ErrorTag::ResourceDenied,
                format!(
                    "cannot create datastore directory {}: {}",
                    dir.display(),
                    err
                ),
            )
        })?;
        Ok(Datastores {
            context,
            dir,
            cache_enabled,
            stores: HashMap::new(),
        })
    }

    /// Release all in-memory state. Locks die with the engine.
    pub fn disconnect(&mut self) {
        self.stores.clear();
    }

    /// The schema context the datastores are bound to.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn file_path(&self, db: Datastore) -> PathBuf {
        self.dir.join(db.file_name())
    }

    fn entry(&mut self, db: Datastore) -> &mut StoreEntry {
        self.stores.entry(db).or_default()
    }

    /// Whether the datastore exists on disk or in memory.
    pub fn exists(&self, db: Datastore) -> bool {
        self.stores
            .get(&db)
            .map(|entry| entry.tree.is_some())
            .unwrap_or(false)
            || self.file_path(db).exists()
    }

    /// Get a read snapshot of the datastore tree. The returned handle keeps
    /// observing the same tree across later commits until dropped.
    pub fn snapshot(&mut self, db: Datastore) -> Result<Arc<DataTree>> {
        self.load(db)
    }

    fn load(&mut self, db: Datastore) -> Result<Arc<DataTree>> {
        if let Some(tree) = self
            .stores
            .get(&db)
            .and_then(|entry| entry.tree.clone())
        {
            return Ok(tree);
        }
        let path = self.file_path(db);
        let tree = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|err| {
                Error::new(
                    ErrorTag::OperationFailed,
                    format!("cannot read {}: {}", path.display(), err),
                )
            })?;
            parse_db_file(&self.context, &text).map_err(|err| {
                Error::new(
                    ErrorTag::OperationFailed,
                    format!(
                        "corrupt datastore file {}: {}",
                        path.display(),
                        err
                    ),
                )
            })?
        } else {
            DataTree::new(self.context.clone())
        };
        let tree = Arc::new(tree);
        if self.cache_enabled {
            self.entry(db).tree = Some(tree.clone());
        }
        Ok(tree)
    }

    /// Replace the datastore content and persist it.
    pub fn set_tree(&mut self, db: Datastore, tree: Arc<DataTree>) -> Result<()> {
        self.save_file(db, &tree)?;
        let entry = self.entry(db);
        entry.tree = Some(tree);
        entry.mtime = Some(Utc::now());
        entry.dirty = false;
        entry.state = EditState::Idle;
        Ok(())
    }

    fn save_file(&self, db: Datastore, tree: &DataTree) -> Result<()> {
        let body = tree.print_string(
            DataFormat::XML,
            DataPrinterFlags::WITH_SIBLINGS | DataPrinterFlags::KEEP_EMPTY_CONT,
        )?;
        let mut text = String::from("<config>\n");
        for line in body.lines() {
            text.push_str("  ");
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("</config>\n");
        atomic_write(&self.file_path(db), &text)
    }

    /// Copy one datastore over another, invalidating the target cache.
    pub fn copy(&mut self, from: Datastore, to: Datastore) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let tree = self.load(from)?;
        debug!("copy-config: {} -> {}", from, to);
        self.set_tree(to, tree)
    }

    /// Delete a datastore: drop the cached tree and remove the backing file.
    pub fn delete(&mut self, db: Datastore) -> Result<()> {
        self.stores.remove(&db);
        let path = self.file_path(db);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|err| {
                Error::new(
                    ErrorTag::OperationFailed,
                    format!("cannot remove {}: {}", path.display(), err),
                )
            })?;
        }
        Ok(())
    }

    /// Lock a datastore on behalf of a session. Fails with `lock-denied`
    /// carrying the holder's session id when already locked.
    pub fn lock(&mut self, db: Datastore, holder: SessionId) -> Result<()> {
        let entry = self.entry(db);
        match entry.locked_by {
            Some(current) if current != holder => {
                Err(Error::protocol(ErrorTag::LockDenied, "lock is already held")
                    .with_info(current.to_string()))
            }
            _ => {
                entry.locked_by = Some(holder);
                debug!("session {} locked {}", holder, db);
                Ok(())
            }
        }
    }

    /// Unlock a datastore. Unlocking an unlocked datastore is a no-op.
    pub fn unlock(&mut self, db: Datastore) {
        self.entry(db).locked_by = None;
    }

    /// The session holding the datastore lock, if any.
    pub fn islocked(&self, db: Datastore) -> Option<SessionId> {
        self.stores.get(&db).and_then(|entry| entry.locked_by)
    }

    /// Release every lock held by a dead or closing session.
    pub fn unlock_session(&mut self, holder: SessionId) {
        for (db, entry) in self.stores.iter_mut() {
            if entry.locked_by == Some(holder) {
                warn!("releasing {} lock held by session {}", db, holder);
                entry.locked_by = None;
            }
        }
    }

    /// Check that a session may write the datastore: the lock must be free
    /// or held by the session itself.
    pub fn check_writable(
        &self,
        db: Datastore,
        session: SessionId,
    ) -> Result<()> {
        match self.islocked(db) {
            Some(holder) if holder != session => {
                Err(Error::protocol(ErrorTag::InUse, "datastore is locked")
                    .with_info(holder.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// The edit-cycle state of a datastore.
    pub fn state(&self, db: Datastore) -> EditState {
        self.stores
            .get(&db)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Whether the datastore has uncommitted modifications.
    pub fn is_dirty(&self, db: Datastore) -> bool {
        self.stores
            .get(&db)
            .map(|entry| entry.dirty)
            .unwrap_or(false)
    }

    pub(crate) fn set_state(&mut self, db: Datastore, state: EditState) {
        self.entry(db).state = state;
    }

    /// Extract the (sub)tree addressed by an XPath filter. With no filter
    /// the whole tree is returned. Matching nodes keep their ancestor chain.
    pub fn get_config(
        &mut self,
        db: Datastore,
        xpath: Option<&str>,
        nsmap: &HashMap<String, String>,
    ) -> Result<DataTree> {
        let tree = self.load(db)?;
        extract_filtered(&tree, xpath, nsmap)
    }

    /// Apply an edit-config payload to the datastore.
    pub fn edit_config(
        &mut self,
        db: Datastore,
        config: &DataTree,
        default_op: DefaultOperation,
        test_option: TestOption,
        error_option: ErrorOption,
    ) -> Result<()> {
        let base = self.load(db)?;
        let mut working = (*base).clone();
        self.set_state(db, EditState::Applying);

        let mut errors: Vec<Error> = Vec::new();
        for root in config.roots.clone() {
            let result = apply_edit(
                &mut working,
                None,
                config,
                root,
                default_op,
                error_option,
                &mut errors,
            );
            if let Err(err) = result {
                errors.push(err);
                if error_option != ErrorOption::ContinueOnError {
                    break;
                }
            }
        }

        if let Some(first) = errors.first().cloned() {
            match error_option {
                ErrorOption::RollbackOnError => {
                    // The original tree stays in place untouched.
                    self.set_state(db, EditState::Idle);
                    return Err(first);
                }
                _ => {
                    // Partial mutations are the user's working copy.
                    self.set_tree(db, Arc::new(working))?;
                    let entry = self.entry(db);
                    entry.dirty = true;
                    entry.state = EditState::Dirty;
                    return Err(first);
                }
            }
        }

        if matches!(
            test_option,
            TestOption::TestThenSet | TestOption::TestOnly
        ) {
            if let Err(err) = crate::transaction::validate_content(
                &working,
                DataValidationFlags::empty(),
            ) {
                self.set_state(db, EditState::Idle);
                return Err(err);
            }
        }
        if test_option == TestOption::TestOnly {
            self.set_state(db, EditState::Idle);
            return Ok(());
        }

        self.set_tree(db, Arc::new(working))?;
        let entry = self.entry(db);
        entry.dirty = true;
        entry.state = EditState::Dirty;
        Ok(())
    }
}

// ===== edit-config application =====

fn edit_operation(
    config: &DataTree,
    node: Index,
    inherited: DefaultOperation,
) -> Result<DefaultOperation> {
    match config.arena[node]
        .attrs
        .iter()
        .find(|attr| attr.name == "operation")
    {
        Some(attr) => match attr.value.as_str() {
            "merge" => Ok(DefaultOperation::Merge),
            "replace" => Ok(DefaultOperation::Replace),
            "create" => Ok(DefaultOperation::Create),
            "delete" => Ok(DefaultOperation::Delete),
            "remove" => Ok(DefaultOperation::Remove),
            other => Err(Error::protocol(
                ErrorTag::BadAttribute,
                format!("unknown operation '{}'", other),
            )),
        },
        None => Ok(inherited),
    }
}

fn apply_edit(
    working: &mut DataTree,
    parent: Option<Index>,
    config: &DataTree,
    src: Index,
    inherited: DefaultOperation,
    error_option: ErrorOption,
    errors: &mut Vec<Error>,
) -> Result<()> {
    let op = edit_operation(config, src, inherited)?;
    let matched = working
        .children_of(parent)
        .into_iter()
        .find(|child| crate::data::nodes_match(working, *child, config, src));
    let src_path = || config.path_of(src);

    match op {
        DefaultOperation::Merge => {
            let index = match matched {
                Some(index) => {
                    let src_node = &config.arena[src];
                    if src_node.children.is_empty()
                        && src_node.value.is_some()
                    {
                        working.set_value(index, src_node.value.clone());
                    }
                    index
                }
                None => {
                    // Create the node shallowly and keep descending, so
                    // operation overrides on descendants still apply.
                    let src_node = &config.arena[src];
                    let index = working.create_child(
                        parent,
                        &src_node.name,
                        src_node.namespace.clone(),
                    )?;
                    working.set_value(index, src_node.value.clone());
                    index
                }
            };
            descend_edit(
                working,
                index,
                config,
                src,
                DefaultOperation::Merge,
                error_option,
                errors,
            )
        }
        DefaultOperation::Replace => {
            if let Some(index) = matched {
                working.unlink(index);
            }
            working.import_bound(parent, config, src)?;
            Ok(())
        }
        DefaultOperation::Create => match matched {
            Some(_) => Err(Error::protocol(
                ErrorTag::DataExists,
                "data already exists",
            )
            .with_path(src_path())),
            None => {
                working.import_bound(parent, config, src)?;
                Ok(())
            }
        },
        DefaultOperation::Delete => match matched {
            Some(index) => {
                working.unlink(index);
                Ok(())
            }
            None => Err(Error::protocol(
                ErrorTag::DataMissing,
                "data is missing",
            )
            .with_path(src_path())),
        },
        DefaultOperation::Remove => {
            if let Some(index) = matched {
                working.unlink(index);
            }
            Ok(())
        }
        DefaultOperation::None => {
            // Descend looking for nodes with explicit operations.
            let index = match matched {
                Some(index) => index,
                None => return Ok(()),
            };
            descend_edit(
                working,
                index,
                config,
                src,
                DefaultOperation::None,
                error_option,
                errors,
            )
        }
    }
}

fn descend_edit(
    working: &mut DataTree,
    index: Index,
    config: &DataTree,
    src: Index,
    inherited: DefaultOperation,
    error_option: ErrorOption,
    errors: &mut Vec<Error>,
) -> Result<()> {
    for child in config.arena[src].children.clone() {
        let result = apply_edit(
            working,
            Some(index),
            config,
            child,
            inherited,
            error_option,
            errors,
        );
        if let Err(err) = result {
            if error_option == ErrorOption::ContinueOnError {
                errors.push(err);
            } else {
                return Err(err);
            }
        }
    }
    Ok(())
}

// ===== helpers =====

// Datastore files hold a single top-level <config> element.
fn parse_db_file(context: &Arc<Context>, text: &str) -> Result<DataTree> {
    let outer = DataTree::parse_string(
        context,
        text,
        DataFormat::XML,
        DataParserFlags::SCHEMALESS,
        DataValidationFlags::empty(),
    )?;
    let mut tree = DataTree::new(context.clone());
    let Some(config) = outer
        .top_nodes()
        .find(|dnode| dnode.name() == "config")
    else {
        return Err(Error::new(
            ErrorTag::MalformedMessage,
            "datastore file has no <config> root",
        ));
    };
    for child in config.node().children.clone() {
        tree.import_bound(None, &outer, child)?;
    }
    Ok(tree)
}

// Copy the nodes selected by the filter, keeping their ancestor chains and,
// for list entries on the path, their key leaves.
pub(crate) fn extract_filtered(
    tree: &DataTree,
    xpath: Option<&str>,
    nsmap: &HashMap<String, String>,
) -> Result<DataTree> {
    let Some(xpath) = xpath else {
        return Ok(tree.clone());
    };
    let matches: Vec<Index> =
        tree.find_xpath(xpath)?.map(|dnode| dnode.index).collect();
    let mut out = DataTree::new(tree.context.clone());
    let mut mapping: HashMap<Index, Index> = HashMap::new();
    for matched in matches {
        // Build the ancestor chain top-down.
        let mut chain = vec![matched];
        let mut cursor = tree.arena[matched].parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = tree.arena[parent].parent;
        }
        chain.reverse();
        let mut out_parent: Option<Index> = None;
        for (depth, link) in chain.iter().enumerate() {
            let last = depth == chain.len() - 1;
            let copied = match mapping.get(link) {
                Some(copied) => *copied,
                None => {
                    let copied = if last {
                        out.copy_subtree(out_parent, tree, *link)
                    } else {
                        let node = &tree.arena[*link];
                        let shallow = out.push_node(
                            out_parent,
                            node.name.clone(),
                            node.namespace.clone(),
                            node.snode,
                        );
                        out.arena[shallow].value = node.value.clone();
                        // Keep list keys so the entry stays addressable.
                        if let Some(snode_id) = node.snode {
                            let keys = crate::schema::SchemaNode::new(
                                &tree.context,
                                snode_id,
                            )
                            .list_keys()
                            .to_vec();
                            for child in &node.children {
                                let child_node = &tree.arena[*child];
                                if keys.contains(&child_node.name) {
                                    out.copy_subtree(
                                        Some(shallow),
                                        tree,
                                        *child,
                                    );
                                }
                            }
                        }
                        shallow
                    };
                    mapping.insert(*link, copied);
                    copied
                }
            };
            out_parent = Some(copied);
        }
    }
    Ok(out)
}
