//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! YANG instance data.
//!
//! Data trees are stored in an arena: children own their nodes by index and
//! the parent link is a weak index resolved through the arena. Trees are
//! cheaply cloneable, which is what the datastore layer relies on for its
//! copy-on-write snapshot discipline.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use generational_arena::{Arena, Index};

use crate::context::Context;
use crate::error::{Error, ErrorTag, Result};
use crate::iter::{Ancestors, NodeIterable, Set, Siblings, Traverse};
use crate::schema::{DataValue, SchemaNode, SchemaNodeKind, SnodeId};
use crate::xpath::{self, XPathValue};
use crate::{json, xml};

/// YANG data tree.
#[derive(Clone, Debug)]
pub struct DataTree {
    pub(crate) context: Arc<Context>,
    pub(crate) arena: Arena<Node>,
    pub(crate) roots: Vec<Index>,
}

/// YANG data node reference.
#[derive(Clone, Debug)]
pub struct DataNodeRef<'a> {
    pub(crate) tree: &'a DataTree,
    pub(crate) index: Index,
}

/// A data node attribute (XML attribute or JSON metadata member), such as
/// the edit-config `operation` override.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attr {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) namespace: Option<String>,
    pub(crate) snode: Option<SnodeId>,
    pub(crate) parent: Option<Index>,
    pub(crate) children: Vec<Index>,
    pub(crate) value: Option<String>,
    pub(crate) attrs: Vec<Attr>,
    pub(crate) from_default: bool,
}

/// YANG data tree diff.
#[derive(Debug, Default)]
pub struct DataDiff {
    pub(crate) changes: Vec<DataDiffChange>,
}

/// A single data tree change.
#[derive(Clone, Debug)]
pub struct DataDiffChange {
    pub op: DataDiffOp,
    /// Instance path of the affected node.
    pub path: String,
    /// New value for replaced or created leaves.
    pub value: Option<String>,
}

/// YANG data diff operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataDiffOp {
    Create,
    Delete,
    Replace,
}

/// Data input/output formats.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataFormat {
    /// XML instance data format.
    XML,
    /// JSON instance data format (RFC 7951).
    JSON,
}

bitflags! {
    /// Data parser options.
    ///
    /// Default parser behavior:
    /// - data is bound to the schema as it is parsed, and elements without a
    ///   matching schema node definition are silently ignored.
    /// - after parsing, structural and type validation runs over the tree.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DataParserFlags: u32 {
        /// Data will be only parsed and no validation will be performed.
        const NO_VALIDATION = 0x01;
        /// Instead of silently ignoring data without schema definition,
        /// raise an error.
        const STRICT = 0x02;
        /// Produce a schemaless tree: no schema binding is attempted and
        /// binding is deferred to the caller.
        const SCHEMALESS = 0x04;
    }
}

bitflags! {
    /// Data validation options.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DataValidationFlags: u32 {
        /// Consider state data not allowed and raise an error if found.
        const NO_STATE = 0x01;
        /// Validate only modules whose data actually exist.
        const PRESENT = 0x02;
    }
}

bitflags! {
    /// Data printer flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DataPrinterFlags: u32 {
        /// Flag for printing also the (following) sibling nodes of the
        /// starting node.
        const WITH_SIBLINGS = 0x01;
        /// Flag for output without indentation and formatting new lines.
        const SHRINK = 0x02;
        /// Preserve empty non-presence containers.
        const KEEP_EMPTY_CONT = 0x04;
        /// Avoid printing nodes whose value equals their default.
        const WD_TRIM = 0x08;
        /// Include implicit default nodes.
        const WD_ALL = 0x10;
    }
}

bitflags! {
    /// Implicit node creation options.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DataImplicitFlags: u32 {
        /// Do not add any default nodes (leaves), only non-presence
        /// containers.
        const NO_DEFAULTS = 0x01;
    }
}

bitflags! {
    /// Transient per-node diff/validate markers. Kept in a side table for
    /// the duration of one diff or commit cycle, never on the tree itself.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MarkerFlags: u8 {
        const ADDED = 0x01;
        const DELETED = 0x02;
        const CHANGED = 0x04;
        const DEFAULT = 0x08;
        const MARK = 0x10;
    }
}

/// Transient side table of diff markers, keyed by arena index.
pub type MarkerTable = HashMap<Index, MarkerFlags>;

/// Methods common to data trees and data node references.
pub trait Data {
    #[doc(hidden)]
    fn tree(&self) -> &DataTree;

    #[doc(hidden)]
    fn cnode(&self) -> Option<Index>;

    /// Search in the given data for instances of nodes matching the provided
    /// XPath.
    ///
    /// The expected format of the expression is JSON, meaning the first node
    /// in every path must have its module name as prefix.
    fn find_xpath<'a>(
        &'a self,
        xpath: &str,
    ) -> Result<Set<'a, DataNodeRef<'a>>> {
        let tree = self.tree();
        let value =
            xpath::eval(tree, self.cnode(), xpath, &Default::default())?;
        match value {
            XPathValue::NodeSet(set) => Ok(Set::new(
                set.into_iter()
                    .map(|index| DataNodeRef { tree, index })
                    .collect(),
            )),
            _ => Ok(Set::new(Vec::new())),
        }
    }

    /// Search in the given data for a single node matching the provided
    /// path.
    fn find_path<'a>(&'a self, path: &str) -> Result<DataNodeRef<'a>> {
        let mut set = self.find_xpath(path)?;
        set.next().ok_or_else(|| {
            Error::new(
                ErrorTag::DataMissing,
                format!("no data at path '{}'", path),
            )
        })
    }

    /// Print data in the specified format to a `String`.
    fn print_string(
        &self,
        format: DataFormat,
        options: DataPrinterFlags,
    ) -> Result<String> {
        match format {
            DataFormat::XML => xml::print(self.tree(), self.cnode(), options),
            DataFormat::JSON => {
                json::print(self.tree(), self.cnode(), options)
            }
        }
    }
}

// ===== impl DataTree =====

impl DataTree {
    /// Create new empty data tree.
    pub fn new(context: Arc<Context>) -> DataTree {
        DataTree {
            context,
            arena: Arena::new(),
            roots: Vec::new(),
        }
    }

    /// The schema context the tree is bound to.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Parse input data as a YANG data tree.
    pub fn parse_string(
        context: &Arc<Context>,
        data: impl AsRef<str>,
        format: DataFormat,
        parser_options: DataParserFlags,
        validation_options: DataValidationFlags,
    ) -> Result<DataTree> {
        let tree = match format {
            DataFormat::XML => {
                xml::parse(context.clone(), data.as_ref(), parser_options)?
            }
            DataFormat::JSON => {
                json::parse(context.clone(), data.as_ref(), parser_options)?
            }
        };
        if !parser_options.contains(DataParserFlags::NO_VALIDATION)
            && !parser_options.contains(DataParserFlags::SCHEMALESS)
        {
            crate::transaction::validate_content(&tree, validation_options)?;
        }
        Ok(tree)
    }

    /// Search for instances of nodes matching the provided XPath with an
    /// explicit prefix-to-module namespace map.
    pub fn find_xpath_with_nsmap(
        &self,
        xpath: &str,
        nsmap: &HashMap<String, String>,
    ) -> Result<Set<'_, DataNodeRef<'_>>> {
        match xpath::eval(self, None, xpath, nsmap)? {
            XPathValue::NodeSet(set) => Ok(Set::new(
                set.into_iter()
                    .map(|index| DataNodeRef { tree: self, index })
                    .collect(),
            )),
            _ => Ok(Set::new(Vec::new())),
        }
    }

    /// Returns a reference to the first top-level data node, unless the data
    /// tree is empty.
    pub fn reference(&self) -> Option<DataNodeRef<'_>> {
        self.roots.first().map(|index| DataNodeRef {
            tree: self,
            index: *index,
        })
    }

    /// Returns an iterator over the top-level nodes of the tree.
    pub fn top_nodes(&self) -> impl Iterator<Item = DataNodeRef<'_>> {
        self.roots.iter().map(|index| DataNodeRef {
            tree: self,
            index: *index,
        })
    }

    /// Returns an iterator over all nodes of the tree (depth-first).
    pub fn traverse(&self) -> impl Iterator<Item = DataNodeRef<'_>> {
        self.top_nodes().flat_map(|dnode| dnode.traverse())
    }

    /// Whether the tree holds no data at all.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Create a new node or modify an existing one in the data tree based on
    /// a path.
    ///
    /// If the path points to a list instance, the key values from the
    /// predicates are used to create the key leaves. Returns the last
    /// created or modified node (if any).
    pub fn new_path(
        &mut self,
        path: &str,
        value: Option<&str>,
    ) -> Result<Option<DataNodeRef<'_>>> {
        let index = self.new_path_index(path, value)?;
        Ok(index.map(|index| DataNodeRef { tree: self, index }))
    }

    fn new_path_index(
        &mut self,
        path: &str,
        value: Option<&str>,
    ) -> Result<Option<Index>> {
        let mut parent: Option<Index> = None;
        let mut last = None;
        for segment in path.trim_start_matches('/').split('/') {
            let (name_part, predicates) = split_predicates(segment)?;
            let (mod_name, name) = match name_part.split_once(':') {
                Some((mod_name, name)) => (Some(mod_name), name),
                None => (None, name_part),
            };
            let ns = match mod_name {
                Some(mod_name) => Some(
                    self.context
                        .get_module(mod_name, None)
                        .ok_or_else(|| {
                            Error::new(
                                ErrorTag::UnknownNamespace,
                                format!("unknown module '{}'", mod_name),
                            )
                        })?
                        .namespace()
                        .to_string(),
                ),
                None => None,
            };

            // Find an existing child matching the segment.
            let keys: Vec<(String, String)> = predicates;
            let existing = self
                .children_of(parent)
                .into_iter()
                .find(|child| {
                    let node = &self.arena[*child];
                    if node.name != name {
                        return false;
                    }
                    if let Some(ns) = &ns {
                        if node.namespace.as_deref() != Some(ns.as_str()) {
                            return false;
                        }
                    }
                    keys.iter().all(|(key, kvalue)| {
                        self.children_of(Some(*child)).iter().any(|leaf| {
                            let leaf = &self.arena[*leaf];
                            leaf.name == *key
                                && leaf.value.as_deref() == Some(kvalue)
                        })
                    })
                });

            let index = match existing {
                Some(index) => index,
                None => {
                    let index = self.create_child(parent, name, ns.clone())?;
                    for (key, kvalue) in &keys {
                        let kindex = self
                            .create_child(Some(index), key, ns.clone())?;
                        self.set_value(kindex, Some(kvalue.clone()));
                    }
                    index
                }
            };
            parent = Some(index);
            last = Some(index);
        }
        if let Some(last) = last {
            if let Some(value) = value {
                self.set_value(last, Some(value.to_string()));
            }
        }
        Ok(last)
    }

    /// Remove a data node, releasing its whole subtree.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let index = self.find_path(path)?.index;
        self.unlink(index);
        Ok(())
    }

    /// Fully validate the data tree against its schema and constraints.
    pub fn validate(&self, options: DataValidationFlags) -> Result<()> {
        crate::transaction::validate_content(self, options)
    }

    /// Create a copy of the data tree.
    pub fn duplicate(&self) -> Result<DataTree> {
        Ok(self.clone())
    }

    /// Merge the source data tree into the target data tree.
    pub fn merge(&mut self, source: &DataTree) -> Result<()> {
        for root in source.roots.clone() {
            self.merge_node(None, source, root)?;
        }
        Ok(())
    }

    /// Add any missing implicit nodes: non-presence containers and, unless
    /// suppressed, leaves carrying their default value.
    pub fn add_implicit(&mut self, options: DataImplicitFlags) -> Result<()> {
        let mut pending: Vec<(Option<Index>, SnodeId)> = Vec::new();
        for module in 0..self.context.modules.len() {
            for snode_id in self.context.modules[module].data.clone() {
                pending.push((None, snode_id));
            }
        }
        while let Some((parent, snode_id)) = pending.pop() {
            let context = self.context.clone();
            let snode = SchemaNode::new(&context, snode_id);
            if snode.is_schema_only() {
                // Choice/case: descend without instantiating.
                for child in snode.children() {
                    pending.push((parent, child.id));
                }
                continue;
            }
            let existing = self.children_of(parent).into_iter().find(|index| {
                self.arena[*index].snode == Some(snode_id)
            });
            match snode.kind() {
                SchemaNodeKind::Container => {
                    let index = match existing {
                        Some(index) => index,
                        None if snode.is_np_container() && snode.is_config() => {
                            let ns = snode.module().namespace().to_string();
                            let index = self.create_bound(
                                parent,
                                snode.name().to_string(),
                                Some(ns),
                                snode_id,
                            )?;
                            self.arena[index].from_default = true;
                            index
                        }
                        None => continue,
                    };
                    for child in snode.children() {
                        pending.push((Some(index), child.id));
                    }
                }
                SchemaNodeKind::Leaf => {
                    if existing.is_none()
                        && !options.contains(DataImplicitFlags::NO_DEFAULTS)
                        && snode.is_config()
                        && !snode.is_list_key()
                    {
                        if let Some(default) = snode.default_value_canonical()
                        {
                            let ns =
                                snode.module().namespace().to_string();
                            let index = self.create_bound(
                                parent,
                                snode.name().to_string(),
                                Some(ns),
                                snode_id,
                            )?;
                            self.set_value(index, Some(default.to_string()));
                            self.arena[index].from_default = true;
                        }
                    }
                }
                SchemaNodeKind::List => {
                    if existing.is_some() {
                        // Recurse into every entry of the list.
                        for entry in self.children_of(parent) {
                            if self.arena[entry].snode == Some(snode_id) {
                                for child in snode.children() {
                                    pending.push((Some(entry), child.id));
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compare with another tree and return the changes that would transform
    /// `self` into `target`.
    pub fn diff(&self, target: &DataTree) -> Result<DataDiff> {
        let mut diff = DataDiff::default();
        let mut markers = MarkerTable::new();
        diff_children(
            self,
            &self.roots,
            target,
            &target.roots,
            &mut diff,
            &mut markers,
        );
        // The marker table dies with the cycle, honoring the invariant that
        // markers are zero outside of it.
        drop(markers);
        Ok(diff)
    }

    // ===== node-level operations (crate internal) =====

    pub(crate) fn children_of(&self, parent: Option<Index>) -> Vec<Index> {
        match parent {
            Some(parent) => self.arena[parent].children.clone(),
            None => self.roots.clone(),
        }
    }

    /// Children in canonical output order: stored order, except that entries
    /// of lists declared `ordered-by system` are sorted by key tuple and
    /// system-ordered leaf-lists by value.
    pub(crate) fn canonical_children(
        &self,
        parent: Option<Index>,
    ) -> Vec<Index> {
        let mut children = self.children_of(parent);
        children.sort_by(|a, b| {
            let a_node = &self.arena[*a];
            let b_node = &self.arena[*b];
            if a_node.snode.is_none() || a_node.snode != b_node.snode {
                return std::cmp::Ordering::Equal;
            }
            let snode_id = a_node.snode.expect("checked above");
            let snode = SchemaNode::new(&self.context, snode_id);
            if !snode.is_system_ordered() {
                return std::cmp::Ordering::Equal;
            }
            match snode.kind() {
                SchemaNodeKind::List => {
                    let a_ref = DataNodeRef { tree: self, index: *a };
                    let b_ref = DataNodeRef { tree: self, index: *b };
                    a_ref.list_key_values().cmp(&b_ref.list_key_values())
                }
                SchemaNodeKind::LeafList => a_node.value.cmp(&b_node.value),
                _ => std::cmp::Ordering::Equal,
            }
        });
        children
    }

    /// Import a subtree from another (possibly schemaless) tree, binding
    /// every node to this tree's schema. Used to defer binding of trees
    /// parsed in schemaless mode.
    pub(crate) fn import_bound(
        &mut self,
        parent: Option<Index>,
        source: &DataTree,
        src: Index,
    ) -> Result<Index> {
        let src_node = &source.arena[src];
        let index = self.create_child(
            parent,
            &src_node.name,
            src_node.namespace.clone(),
        )?;
        if self.arena[index].snode.is_none() {
            let path = self.path_of(index);
            self.unlink(index);
            return Err(Error::new(
                ErrorTag::UnknownElement,
                format!("unknown element '{}'", src_node.name),
            )
            .with_path(path));
        }
        self.arena[index].value = src_node.value.clone();
        self.arena[index].attrs = src_node.attrs.clone();
        for child in source.arena[src].children.clone() {
            self.import_bound(Some(index), source, child)?;
        }
        Ok(index)
    }

    /// Create a child node, binding it to the schema of the parent scope.
    /// Fails per RFC 6241 when the schema forbids the element.
    pub(crate) fn create_child(
        &mut self,
        parent: Option<Index>,
        name: &str,
        namespace: Option<String>,
    ) -> Result<Index> {
        let snode_id = self.bind_schema(parent, name, namespace.as_deref())?;
        let namespace = match (&namespace, snode_id) {
            (Some(ns), _) => Some(ns.clone()),
            (None, Some(snode_id)) => {
                let module = self.context.snodes[snode_id].module;
                Some(self.context.modules[module].namespace.clone())
            }
            (None, None) => None,
        };
        match snode_id {
            Some(snode_id) => {
                self.create_bound(parent, name.to_string(), namespace, snode_id)
            }
            None => {
                Ok(self.push_node(parent, name.to_string(), namespace, None))
            }
        }
    }

    fn bind_schema(
        &self,
        parent: Option<Index>,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Option<SnodeId>> {
        match parent {
            Some(parent) => match self.arena[parent].snode {
                Some(parent_snode) => {
                    let snode =
                        SchemaNode::new(&self.context, parent_snode)
                            .find_data_child(name, namespace)
                            .ok_or_else(|| {
                                Error::new(
                                    ErrorTag::UnknownElement,
                                    format!("unknown element '{}'", name),
                                )
                                .with_path(self.path_of(parent))
                            })?;
                    Ok(Some(snode.id))
                }
                // Schemaless parent: stay schemaless.
                None => Ok(None),
            },
            None => {
                let Some(namespace) = namespace else {
                    return Ok(None);
                };
                match self.context.get_module_ns(namespace) {
                    Some(module) => {
                        let found = module
                            .data()
                            .chain(module.rpcs())
                            .chain(module.notifications())
                            .find(|snode| snode.name() == name);
                        match found {
                            Some(snode) => Ok(Some(snode.id)),
                            None => Err(Error::new(
                                ErrorTag::UnknownElement,
                                format!("unknown element '{}'", name),
                            )),
                        }
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Create a child already bound to the given schema node, inserted at
    /// its canonical position.
    pub(crate) fn create_bound(
        &mut self,
        parent: Option<Index>,
        name: String,
        namespace: Option<String>,
        snode_id: SnodeId,
    ) -> Result<Index> {
        let snode = SchemaNode::new(&self.context, snode_id);

        // Reject a second instance of a single-instance node.
        if matches!(
            snode.kind(),
            SchemaNodeKind::Container | SchemaNodeKind::Leaf
        ) {
            let duplicate = self
                .children_of(parent)
                .into_iter()
                .any(|child| self.arena[child].snode == Some(snode_id));
            if duplicate {
                return Err(Error::new(
                    ErrorTag::OperationFailed,
                    format!("too many instances of '{}'", name),
                )
                .with_apptag("too-many-elements")
                .with_path(match parent {
                    Some(parent) => self.path_of(parent),
                    None => "/".to_string(),
                }));
            }
        }

        let index = self.push_node(parent, name, namespace, Some(snode_id));
        self.place_canonical(parent, index);
        Ok(index)
    }

    pub(crate) fn push_node(
        &mut self,
        parent: Option<Index>,
        name: String,
        namespace: Option<String>,
        snode: Option<SnodeId>,
    ) -> Index {
        let index = self.arena.insert(Node {
            name,
            namespace,
            snode,
            parent,
            children: Vec::new(),
            value: None,
            attrs: Vec::new(),
            from_default: false,
        });
        match parent {
            Some(parent) => self.arena[parent].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    // Move the freshly appended child to its canonical position: schema
    // declaration order, keys first, list entries in insertion order.
    fn place_canonical(&mut self, parent: Option<Index>, index: Index) {
        let rank = match self.schema_rank(index) {
            Some(rank) => rank,
            None => return,
        };
        let siblings = match parent {
            Some(parent) => &self.arena[parent].children,
            None => &self.roots,
        };
        let mut insert_at = siblings.len() - 1;
        for (pos, sibling) in siblings.iter().enumerate() {
            if *sibling == index {
                continue;
            }
            match self.schema_rank(*sibling) {
                Some(sibling_rank) if sibling_rank > rank => {
                    insert_at = pos;
                    break;
                }
                _ => {}
            }
        }
        let siblings = match parent {
            Some(parent) => &mut self.arena[parent].children,
            None => &mut self.roots,
        };
        let current = siblings
            .iter()
            .position(|sibling| *sibling == index)
            .expect("node was just appended");
        if current != insert_at {
            siblings.remove(current);
            siblings.insert(insert_at, index);
        }
    }

    fn schema_rank(&self, index: Index) -> Option<usize> {
        let snode_id = self.arena[index].snode?;
        let snode = SchemaNode::new(&self.context, snode_id);
        let rank = match snode.parent_data_node() {
            Some(parent) => parent
                .data_children()
                .position(|child| child.id == snode_id),
            None => {
                let module = snode.module();
                module
                    .data()
                    .position(|top| top.id == snode_id)
            }
        };
        rank
    }

    pub(crate) fn set_value(&mut self, index: Index, value: Option<String>) {
        self.arena[index].value = value;
        self.arena[index].from_default = false;
    }

    pub(crate) fn set_attr(&mut self, index: Index, attr: Attr) {
        let attrs = &mut self.arena[index].attrs;
        attrs.retain(|existing| existing.name != attr.name);
        attrs.push(attr);
    }

    /// Detach a node from its parent and free its subtree. Stale indices
    /// are ignored.
    pub(crate) fn unlink(&mut self, index: Index) {
        if !self.arena.contains(index) {
            return;
        }
        match self.arena[index].parent {
            Some(parent) => {
                self.arena[parent].children.retain(|child| *child != index)
            }
            None => self.roots.retain(|root| *root != index),
        }
        let mut stack = vec![index];
        while let Some(index) = stack.pop() {
            if let Some(node) = self.arena.remove(index) {
                stack.extend(node.children);
            }
        }
    }

    /// Deep-copy the subtree rooted at `src` in `source` under `parent`.
    pub(crate) fn copy_subtree(
        &mut self,
        parent: Option<Index>,
        source: &DataTree,
        src: Index,
    ) -> Index {
        let src_node = &source.arena[src];
        let index = self.push_node(
            parent,
            src_node.name.clone(),
            src_node.namespace.clone(),
            src_node.snode,
        );
        self.arena[index].value = src_node.value.clone();
        self.arena[index].attrs = src_node.attrs.clone();
        self.arena[index].from_default = src_node.from_default;
        self.place_canonical(parent, index);
        for child in source.arena[src].children.clone() {
            self.copy_subtree(Some(index), source, child);
        }
        index
    }

    fn merge_node(
        &mut self,
        parent: Option<Index>,
        source: &DataTree,
        src: Index,
    ) -> Result<()> {
        let matched = self.children_of(parent).into_iter().find(|child| {
            nodes_match(self, *child, source, src)
        });
        match matched {
            Some(index) => {
                let src_node = &source.arena[src];
                if src_node.value.is_some() {
                    self.arena[index].value = src_node.value.clone();
                    self.arena[index].from_default = src_node.from_default;
                }
                for child in source.arena[src].children.clone() {
                    self.merge_node(Some(index), source, child)?;
                }
                Ok(())
            }
            None => {
                self.copy_subtree(parent, source, src);
                Ok(())
            }
        }
    }

    pub(crate) fn path_of(&self, index: Index) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(index);
        while let Some(index) = cursor {
            let node = &self.arena[index];
            let mut segment = match node.snode {
                Some(snode_id) => {
                    let snode = SchemaNode::new(&self.context, snode_id);
                    let qualify = match node.parent {
                        None => true,
                        Some(parent) => {
                            let parent_mod = self.arena[parent]
                                .snode
                                .map(|id| self.context.snodes[id].module);
                            parent_mod
                                != Some(self.context.snodes[snode_id].module)
                        }
                    };
                    if qualify {
                        format!("{}:{}", snode.module().name(), node.name)
                    } else {
                        node.name.clone()
                    }
                }
                None => node.name.clone(),
            };
            // List entries are identified by their key predicates.
            if let Some(snode_id) = node.snode {
                let snode = SchemaNode::new(&self.context, snode_id);
                if snode.kind() == SchemaNodeKind::List {
                    for key in snode.list_keys() {
                        if let Some(kvalue) = node
                            .children
                            .iter()
                            .map(|child| &self.arena[*child])
                            .find(|child| child.name == *key)
                            .and_then(|child| child.value.as_deref())
                        {
                            segment.push_str(&format!(
                                "[{}='{}']",
                                key, kvalue
                            ));
                        }
                    }
                }
            }
            segments.push(segment);
            cursor = node.parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }
}

impl Data for DataTree {
    fn tree(&self) -> &DataTree {
        self
    }

    fn cnode(&self) -> Option<Index> {
        None
    }
}

// ===== impl DataNodeRef =====

impl<'a> DataNodeRef<'a> {
    pub(crate) fn node(&self) -> &'a Node {
        &self.tree.arena[self.index]
    }

    /// The arena index of the node, stable for the lifetime of the tree.
    pub fn index(&self) -> Index {
        self.index
    }

    /// The schema node this data node is bound to.
    pub fn schema(&self) -> Option<SchemaNode<'a>> {
        self.node()
            .snode
            .map(|id| SchemaNode::new(&self.tree.context, id))
    }

    /// Local name of the node.
    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    /// Namespace URI of the node.
    pub fn namespace(&self) -> Option<&'a str> {
        self.node().namespace.as_deref()
    }

    /// Returns the body text of the node, if any.
    pub fn value_str(&self) -> Option<&'a str> {
        self.node().value.as_deref()
    }

    /// Returns the typed value of the node, parsed through its schema.
    pub fn value(&self) -> Option<DataValue> {
        let body = self.value_str()?;
        match self.schema().and_then(|snode| snode.leaf_type()) {
            Some(ltype) => ltype.validate_value(body).ok(),
            None => Some(DataValue::Other(body.to_string())),
        }
    }

    /// Node attributes.
    pub fn attrs(&self) -> &'a [Attr] {
        &self.node().attrs
    }

    /// Value of the attribute with the given local name.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.node()
            .attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Whether the node carries its schema default value implicitly.
    pub fn is_default(&self) -> bool {
        self.node().from_default
    }

    /// Generate the instance path of the node, with list key predicates.
    pub fn path(&self) -> String {
        self.tree.path_of(self.index)
    }

    /// Returns an iterator over the ancestor data nodes.
    pub fn ancestors(&self) -> Ancestors<'a, DataNodeRef<'a>> {
        Ancestors::new(self.parent())
    }

    /// Returns an iterator over this node and its ancestors.
    pub fn inclusive_ancestors(&self) -> Ancestors<'a, DataNodeRef<'a>> {
        Ancestors::new(Some(self.clone()))
    }

    /// Returns an iterator over the sibling data nodes.
    pub fn siblings(&self) -> Siblings<'a, DataNodeRef<'a>> {
        Siblings::new(self.next_sibling())
    }

    /// Returns an iterator over the child data nodes.
    pub fn children(&self) -> Siblings<'a, DataNodeRef<'a>> {
        Siblings::new(self.first_child())
    }

    /// Returns an iterator over all elements in the data subtree
    /// (depth-first search algorithm).
    pub fn traverse(&self) -> Traverse<'a, DataNodeRef<'a>> {
        Traverse::new(self.clone())
    }

    /// Find the first direct child with the given name (and namespace, when
    /// specified).
    pub fn find_child(
        &self,
        name: &str,
        ns: Option<&str>,
    ) -> Option<DataNodeRef<'a>> {
        self.children().find(|child| {
            child.name() == name
                && ns.map_or(true, |ns| child.namespace() == Some(ns))
        })
    }

    /// The key tuple of a list entry, in key declaration order.
    pub fn list_key_values(&self) -> Vec<String> {
        let Some(snode) = self.schema() else {
            return Vec::new();
        };
        snode
            .list_keys()
            .iter()
            .filter_map(|key| {
                self.find_child(key, None)
                    .and_then(|leaf| leaf.value_str())
                    .map(str::to_string)
            })
            .collect()
    }
}

impl Data for DataNodeRef<'_> {
    fn tree(&self) -> &DataTree {
        self.tree
    }

    fn cnode(&self) -> Option<Index> {
        Some(self.index)
    }
}

impl<'a> NodeIterable<'a> for DataNodeRef<'a> {
    fn parent(&self) -> Option<DataNodeRef<'a>> {
        self.node().parent.map(|index| DataNodeRef {
            tree: self.tree,
            index,
        })
    }

    fn next_sibling(&self) -> Option<DataNodeRef<'a>> {
        let siblings = match self.node().parent {
            Some(parent) => &self.tree.arena[parent].children,
            None => &self.tree.roots,
        };
        let pos = siblings.iter().position(|index| *index == self.index)?;
        siblings.get(pos + 1).map(|index| DataNodeRef {
            tree: self.tree,
            index: *index,
        })
    }

    fn first_child(&self) -> Option<DataNodeRef<'a>> {
        self.node().children.first().map(|index| DataNodeRef {
            tree: self.tree,
            index: *index,
        })
    }
}

impl PartialEq for DataNodeRef<'_> {
    fn eq(&self, other: &DataNodeRef<'_>) -> bool {
        self.index == other.index
    }
}

// ===== impl DataDiff =====

impl DataDiff {
    /// Returns an iterator over the data changes.
    pub fn iter(&self) -> impl Iterator<Item = &DataDiffChange> {
        self.changes.iter()
    }

    /// Whether the diff holds no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// ===== diff internals =====

/// Whether two nodes denote the same instance: same namespace and name,
/// same key tuple for list entries, same body for leaf-list entries.
pub(crate) fn nodes_match(
    a_tree: &DataTree,
    a: Index,
    b_tree: &DataTree,
    b: Index,
) -> bool {
    let a_node = &a_tree.arena[a];
    let b_node = &b_tree.arena[b];
    if a_node.name != b_node.name || a_node.namespace != b_node.namespace {
        return false;
    }
    if let Some(snode_id) = a_node.snode {
        let snode = SchemaNode::new(&a_tree.context, snode_id);
        match snode.kind() {
            SchemaNodeKind::List => {
                let a_ref = DataNodeRef { tree: a_tree, index: a };
                let b_ref = DataNodeRef { tree: b_tree, index: b };
                return a_ref.list_key_values() == b_ref.list_key_values();
            }
            SchemaNodeKind::LeafList => {
                return a_node.value == b_node.value;
            }
            _ => {}
        }
    }
    true
}

fn diff_children(
    a_tree: &DataTree,
    a_children: &[Index],
    b_tree: &DataTree,
    b_children: &[Index],
    diff: &mut DataDiff,
    markers: &mut MarkerTable,
) {
    // Deletions and changes.
    for a_child in a_children {
        match b_children
            .iter()
            .find(|b_child| nodes_match(a_tree, *a_child, b_tree, **b_child))
        {
            None => {
                markers
                    .entry(*a_child)
                    .or_default()
                    .insert(MarkerFlags::DELETED);
                diff.changes.push(DataDiffChange {
                    op: DataDiffOp::Delete,
                    path: a_tree.path_of(*a_child),
                    value: None,
                });
            }
            Some(b_child) => {
                let a_node = &a_tree.arena[*a_child];
                let b_node = &b_tree.arena[*b_child];
                if a_node.children.is_empty()
                    && b_node.children.is_empty()
                    && a_node.value != b_node.value
                {
                    markers
                        .entry(*a_child)
                        .or_default()
                        .insert(MarkerFlags::CHANGED);
                    diff.changes.push(DataDiffChange {
                        op: DataDiffOp::Replace,
                        path: b_tree.path_of(*b_child),
                        value: b_node.value.clone(),
                    });
                } else {
                    diff_children(
                        a_tree,
                        &a_node.children,
                        b_tree,
                        &b_node.children,
                        diff,
                        markers,
                    );
                }
            }
        }
    }
    // Creations.
    for b_child in b_children {
        if !a_children
            .iter()
            .any(|a_child| nodes_match(a_tree, *a_child, b_tree, *b_child))
        {
            markers
                .entry(*b_child)
                .or_default()
                .insert(MarkerFlags::ADDED);
            diff.changes.push(DataDiffChange {
                op: DataDiffOp::Create,
                path: b_tree.path_of(*b_child),
                value: b_tree.arena[*b_child].value.clone(),
            });
        }
    }
}

// Split "name[k1='v1'][k2='v2']" into the name and its predicate pairs.
fn split_predicates(segment: &str) -> Result<(&str, Vec<(String, String)>)> {
    let Some(open) = segment.find('[') else {
        return Ok((segment, Vec::new()));
    };
    let name = &segment[..open];
    let mut predicates = Vec::new();
    let mut rest = &segment[open..];
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(Error::new(
                ErrorTag::MalformedMessage,
                format!("malformed predicate in '{}'", segment),
            ));
        }
        let close = rest.find(']').ok_or_else(|| {
            Error::new(
                ErrorTag::MalformedMessage,
                format!("unterminated predicate in '{}'", segment),
            )
        })?;
        let body = &rest[1..close];
        let (key, value) = body.split_once('=').ok_or_else(|| {
            Error::new(
                ErrorTag::MalformedMessage,
                format!("malformed predicate '{}'", body),
            )
        })?;
        let value = value.trim_matches(|c| c == '\'' || c == '"');
        let key = key.rsplit(':').next().unwrap_or(key);
        predicates.push((key.to_string(), value.to_string()));
        rest = &rest[close + 1..];
    }
    Ok((name, predicates))
}
