//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Validate/commit pipeline.
//!
//! A commit runs six stages in order: structural checks, type checks,
//! reference checks (leafref, instance-identifier, identityref), when/must
//! constraints, the plugin transaction, and finally the atomic swap of the
//! target datastore. Each failing stage names the offending instance path.
//! Plugin failures trigger the abort phase on every previously-notified
//! plugin in reverse registration order.

use std::collections::HashMap;
use std::sync::Arc;

use generational_arena::Index;
use log::{debug, info};

use crate::context::Context;
use crate::data::{
    DataDiff, DataNodeRef, DataTree, DataValidationFlags,
};
use crate::datastore::{Datastore, Datastores, EditState};
use crate::error::{Error, ErrorTag, Result};
use crate::schema::{
    self, DataValueType, ModuleId, SchemaNode, SchemaNodeKind,
};
use crate::xpath;

/// The data handed to plugin transaction callbacks.
#[derive(Debug)]
pub struct TransactionEvent<'a> {
    /// The tree being committed.
    pub source: &'a DataTree,
    /// The tree being replaced.
    pub target: &'a DataTree,
    /// Changes from target to source.
    pub diff: &'a DataDiff,
}

/// Plugin lifecycle callback.
pub type LifecycleCallback = fn() -> std::result::Result<(), String>;

/// Plugin transaction-phase callback.
pub type TransactionCallback =
    for<'a> fn(&TransactionEvent<'a>) -> std::result::Result<(), String>;

/// Plugin state-data provider: returns a tree of config-false data merged
/// into `get` replies.
pub type StateDataCallback =
    fn(&Arc<Context>) -> std::result::Result<DataTree, String>;

/// Plugin RPC handler: receives the RPC input tree, returns the output tree
/// or `None` when the RPC is not handled by this plugin.
pub type RpcCallback = for<'a> fn(
    &DataNodeRef<'a>,
) -> std::result::Result<Option<DataTree>, String>;

/// Capability record of one plugin, registered at startup. Dispatch is a
/// plain iteration over the registry in registration order.
#[derive(Clone, Default)]
pub struct PluginHooks {
    pub name: String,
    pub on_start: Option<LifecycleCallback>,
    pub on_exit: Option<LifecycleCallback>,
    pub on_begin: Option<TransactionCallback>,
    pub on_validate: Option<TransactionCallback>,
    pub on_complete: Option<TransactionCallback>,
    pub on_commit: Option<TransactionCallback>,
    pub on_abort: Option<TransactionCallback>,
    pub on_end: Option<TransactionCallback>,
    pub on_statedata: Option<StateDataCallback>,
    pub on_rpc: Option<RpcCallback>,
}

impl std::fmt::Debug for PluginHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHooks").field("name", &self.name).finish()
    }
}

impl PluginHooks {
    pub fn new(name: impl Into<String>) -> PluginHooks {
        PluginHooks {
            name: name.into(),
            ..Default::default()
        }
    }
}

// ===== commit pipeline =====

/// Validate a datastore without committing it.
pub fn validate(stores: &mut Datastores, db: Datastore) -> Result<()> {
    if db == Datastore::Tmp {
        return Err(Error::protocol(
            ErrorTag::OperationNotSupported,
            "validate against the tmp datastore is not supported",
        ));
    }
    let tree = stores.snapshot(db)?;
    match validate_content(&tree, DataValidationFlags::NO_STATE) {
        Ok(()) => {
            stores.set_state(db, EditState::Validated);
            Ok(())
        }
        Err(err) => {
            stores.set_state(db, EditState::Dirty);
            Err(err)
        }
    }
}

/// Commit `source` into `target`: run the validation stages, drive the
/// plugin transaction and atomically swap the target tree. On success the
/// resulting diff is returned for notification purposes.
pub fn commit(
    stores: &mut Datastores,
    plugins: &[PluginHooks],
    source: Datastore,
    target: Datastore,
) -> Result<DataDiff> {
    if source == Datastore::Tmp || target == Datastore::Tmp {
        return Err(Error::protocol(
            ErrorTag::OperationNotSupported,
            "commit involving the tmp datastore is not supported",
        ));
    }

    let candidate = stores.snapshot(source)?;
    let running = stores.snapshot(target)?;

    // Stages 1-4.
    if let Err(err) =
        validate_content(&candidate, DataValidationFlags::NO_STATE)
    {
        stores.set_state(source, EditState::Dirty);
        return Err(err);
    }
    stores.set_state(source, EditState::Validated);

    // Stage 5: plugin transaction.
    let diff = running.diff(&candidate)?;
    let event = TransactionEvent {
        source: &candidate,
        target: &running,
        diff: &diff,
    };
    if let Err(err) = run_transaction(plugins, &event) {
        stores.set_state(source, EditState::Dirty);
        return Err(err);
    }

    // Stage 6: atomic swap. Readers holding the old running tree keep
    // observing it through their own snapshot handles.
    stores.set_tree(target, candidate.clone())?;
    stores.set_tree(source, candidate.clone())?;
    stores.set_state(source, EditState::Idle);
    info!("commit: {} -> {} ({} changes)", source, target, diff.iter().count());

    // Post-commit end phase; failures here are not actionable.
    for plugin in plugins {
        if let Some(on_end) = plugin.on_end {
            if let Err(msg) = on_end(&event) {
                debug!("plugin '{}' end phase: {}", plugin.name, msg);
            }
        }
    }
    Ok(diff)
}

/// Copy `running` back over `candidate`, dropping uncommitted edits.
pub fn discard_changes(stores: &mut Datastores) -> Result<()> {
    stores.copy(Datastore::Running, Datastore::Candidate)?;
    stores.set_state(Datastore::Candidate, EditState::Idle);
    Ok(())
}

fn run_transaction(
    plugins: &[PluginHooks],
    event: &TransactionEvent<'_>,
) -> Result<()> {
    let phases: [(&str, fn(&PluginHooks) -> Option<TransactionCallback>); 4] = [
        ("begin", |p| p.on_begin),
        ("validate", |p| p.on_validate),
        ("complete", |p| p.on_complete),
        ("commit", |p| p.on_commit),
    ];

    // Number of plugins that have been notified via the begin phase; on
    // failure the abort phase runs over exactly those, in reverse order.
    let mut notified = 0usize;
    for (phase_pos, (phase_name, select)) in phases.iter().enumerate() {
        for (pos, plugin) in plugins.iter().enumerate() {
            if phase_pos == 0 {
                notified = pos + 1;
            }
            let Some(callback) = select(plugin) else { continue };
            if let Err(msg) = callback(event) {
                debug!(
                    "plugin '{}' failed in {} phase: {}",
                    plugin.name, phase_name, msg
                );
                abort_transaction(&plugins[..notified], event);
                return Err(Error::new(
                    ErrorTag::OperationFailed,
                    format!(
                        "transaction aborted by plugin '{}': {}",
                        plugin.name, msg
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn abort_transaction(notified: &[PluginHooks], event: &TransactionEvent<'_>) {
    for plugin in notified.iter().rev() {
        if let Some(on_abort) = plugin.on_abort {
            if let Err(msg) = on_abort(event) {
                debug!("plugin '{}' abort phase: {}", plugin.name, msg);
            }
        }
    }
}

// ===== validation stages 1-4 =====

/// Run the content validation stages (structural, type, reference,
/// when/must) over a tree.
pub(crate) fn validate_content(
    tree: &DataTree,
    flags: DataValidationFlags,
) -> Result<()> {
    validate_structural(tree, flags)?;
    validate_types(tree)?;
    validate_references(tree)?;
    validate_constraints(tree)?;
    Ok(())
}

// Stage 1: every node bound, cardinality and key uniqueness hold, mandatory
// nodes present.
fn validate_structural(
    tree: &DataTree,
    flags: DataValidationFlags,
) -> Result<()> {
    for dnode in tree.traverse() {
        let Some(snode) = dnode.schema() else {
            return Err(Error::new(
                ErrorTag::UnknownElement,
                format!("node '{}' has no schema definition", dnode.name()),
            )
            .with_path(dnode.path()));
        };
        if flags.contains(DataValidationFlags::NO_STATE) && !snode.is_config()
        {
            return Err(Error::new(
                ErrorTag::UnknownElement,
                format!("state data '{}' not allowed here", dnode.name()),
            )
            .with_path(dnode.path()));
        }
        if snode.kind() == SchemaNodeKind::List {
            // Key leaves must be present in every entry.
            for key in snode.list_keys() {
                if dnode.find_child(key, None).is_none() {
                    return Err(Error::new(
                        ErrorTag::MissingElement,
                        format!("list key '{}' is missing", key),
                    )
                    .with_path(dnode.path()));
                }
            }
        }
    }

    validate_siblings(tree, None)?;
    for dnode in tree.traverse() {
        validate_siblings(tree, Some(dnode.index))?;
    }
    Ok(())
}

// Cardinality, key uniqueness and mandatory checks over one sibling set.
fn validate_siblings(tree: &DataTree, parent: Option<Index>) -> Result<()> {
    let children = tree.children_of(parent);

    // Key-tuple uniqueness and min/max-elements, per list schema node.
    let mut list_snodes = Vec::new();
    for child in &children {
        if let Some(snode_id) = tree.arena[*child].snode {
            if !list_snodes.contains(&snode_id) {
                list_snodes.push(snode_id);
            }
        }
    }
    for snode_id in list_snodes {
        let snode = SchemaNode::new(&tree.context, snode_id);
        let entries: Vec<Index> = children
            .iter()
            .copied()
            .filter(|child| tree.arena[*child].snode == Some(snode_id))
            .collect();
        match snode.kind() {
            SchemaNodeKind::List => {
                let mut seen: Vec<Vec<String>> = Vec::new();
                for entry in &entries {
                    let key_values = DataNodeRef {
                        tree,
                        index: *entry,
                    }
                    .list_key_values();
                    if seen.contains(&key_values) {
                        return Err(Error::new(
                            ErrorTag::DataExists,
                            format!(
                                "duplicate entry of list '{}'",
                                snode.name()
                            ),
                        )
                        .with_path(tree.path_of(*entry)));
                    }
                    seen.push(key_values);
                }
            }
            SchemaNodeKind::LeafList => {
                let mut seen: Vec<Option<&str>> = Vec::new();
                for entry in &entries {
                    let value = tree.arena[*entry].value.as_deref();
                    if seen.contains(&value) {
                        return Err(Error::new(
                            ErrorTag::DataExists,
                            format!(
                                "duplicate entry of leaf-list '{}'",
                                snode.name()
                            ),
                        )
                        .with_path(tree.path_of(*entry)));
                    }
                    seen.push(value);
                }
            }
            _ => {}
        }
        if matches!(
            snode.kind(),
            SchemaNodeKind::List | SchemaNodeKind::LeafList
        ) {
            if let Some(min) = snode.min_elements() {
                if (entries.len() as u32) < min {
                    return Err(Error::new(
                        ErrorTag::OperationFailed,
                        format!("too few instances of '{}'", snode.name()),
                    )
                    .with_apptag("too-few-elements")
                    .with_path(snode.path().to_string()));
                }
            }
            if let Some(max) = snode.max_elements() {
                if (entries.len() as u32) > max {
                    return Err(Error::new(
                        ErrorTag::OperationFailed,
                        format!("too many instances of '{}'", snode.name()),
                    )
                    .with_apptag("too-many-elements")
                    .with_path(snode.path().to_string()));
                }
            }
        }
    }

    // Mandatory children of an instantiated (or root) scope.
    let schema_children: Vec<SchemaNode<'_>> = match parent {
        Some(parent) => match tree.arena[parent].snode {
            Some(snode_id) => {
                let snode = SchemaNode::new(&tree.context, snode_id);
                if matches!(
                    snode.kind(),
                    SchemaNodeKind::Rpc | SchemaNodeKind::Notification
                ) {
                    Vec::new()
                } else {
                    snode.data_children().collect()
                }
            }
            None => Vec::new(),
        },
        None => tree
            .context
            .modules()
            .flat_map(|module| module.data())
            .collect(),
    };
    for schema_child in schema_children {
        // An absent list still violates a non-zero min-elements bound.
        if matches!(
            schema_child.kind(),
            SchemaNodeKind::List | SchemaNodeKind::LeafList
        ) && schema_child.is_config()
            && schema_child.min_elements().is_some()
        {
            let count = children
                .iter()
                .filter(|child| {
                    tree.arena[**child].snode == Some(schema_child.id)
                })
                .count();
            if count == 0 {
                return Err(Error::new(
                    ErrorTag::OperationFailed,
                    format!(
                        "too few instances of '{}'",
                        schema_child.name()
                    ),
                )
                .with_apptag("too-few-elements")
                .with_path(schema_child.path().to_string()));
            }
        }
        if !schema_child.is_mandatory()
            || !schema_child.is_config()
            || schema_child.kind() != SchemaNodeKind::Leaf
            || schema_child.is_list_key()
        {
            continue;
        }
        // Keys were already checked per entry.
        let present = children.iter().any(|child| {
            tree.arena[*child].snode == Some(schema_child.id)
        });
        if !present {
            // A mandatory leaf guarded by a false when is legitimately
            // absent.
            if let Some(when) = schema_child.when() {
                let nsmap =
                    module_nsmap(&tree.context, schema_child.data().module);
                if !xpath::eval_boolean(tree, parent, when, &nsmap)
                    .unwrap_or(false)
                {
                    continue;
                }
            }
            return Err(Error::new(
                ErrorTag::MissingElement,
                format!("mandatory leaf '{}' is missing", schema_child.name()),
            )
            .with_path(schema_child.path().to_string()));
        }
    }
    Ok(())
}

// Stage 2: every leaf body parses into its primitive and satisfies the
// type facets; unions use first-match semantics.
fn validate_types(tree: &DataTree) -> Result<()> {
    for dnode in tree.traverse() {
        let Some(snode) = dnode.schema() else { continue };
        if let Some(ltype) = snode.leaf_type() {
            let body = dnode.value_str().unwrap_or("");
            ltype.validate_value(body).map_err(|err| {
                let mut err = err;
                err.path = Some(dnode.path());
                err
            })?;
        }
    }
    Ok(())
}

// Stage 3: leafrefs resolve to existing instances, identityrefs derive from
// their base, instance-identifiers resolve.
fn validate_references(tree: &DataTree) -> Result<()> {
    let context = &tree.context;
    for dnode in tree.traverse() {
        let Some(snode) = dnode.schema() else { continue };
        let Some(spec) =
            snode.data().leaf_type.as_ref()
        else {
            continue;
        };
        let Some(body) = dnode.value_str() else { continue };
        match spec.base {
            Some(DataValueType::LeafRef) => {
                if !spec.require_instance {
                    continue;
                }
                let Some(target) = spec.leafref_target else { continue };
                let found = tree.arena.iter().any(|(_, node)| {
                    node.snode == Some(target)
                        && node.value.as_deref() == Some(body)
                });
                if !found {
                    return Err(Error::new(
                        ErrorTag::DataMissing,
                        format!(
                            "required leafref value '{}' does not exist",
                            body
                        ),
                    )
                    .with_apptag("instance-required")
                    .with_path(dnode.path()));
                }
            }
            Some(DataValueType::IdentityRef) => {
                let Some(base) = &spec.identity_base else { continue };
                let mid = snode.data().module;
                let identity =
                    schema::resolve_identity_ref(context, mid, body)
                        .map_err(|err| {
                            let mut err = err;
                            err.path = Some(dnode.path());
                            err
                        })?;
                if identity == *base
                    || !schema::identity_derives(context, &identity, base)
                {
                    return Err(Error::new(
                        ErrorTag::InvalidValue,
                        format!(
                            "identity '{}' is not derived from its base",
                            body
                        ),
                    )
                    .with_path(dnode.path()));
                }
            }
            Some(DataValueType::InstanceId) => {
                if !spec.require_instance {
                    continue;
                }
                let nsmap = module_nsmap(context, snode.data().module);
                let found = tree
                    .find_xpath_with_nsmap(body, &nsmap)
                    .map(|set| !set.is_empty())
                    .unwrap_or(false);
                if !found {
                    return Err(Error::new(
                        ErrorTag::DataMissing,
                        format!("instance '{}' does not exist", body),
                    )
                    .with_apptag("instance-required")
                    .with_path(dnode.path()));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// Stage 4: when/must constraints, evaluated bottom-up.
fn validate_constraints(tree: &DataTree) -> Result<()> {
    let mut order: Vec<Index> =
        tree.traverse().map(|dnode| dnode.index).collect();
    order.reverse();
    for index in order {
        let dnode = DataNodeRef { tree, index };
        let Some(snode) = dnode.schema() else { continue };
        let nsmap = module_nsmap(&tree.context, snode.data().module);
        if let Some(when) = snode.when() {
            let satisfied =
                xpath::eval_boolean(tree, Some(index), when, &nsmap)?;
            if !satisfied {
                return Err(Error::new(
                    ErrorTag::OperationFailed,
                    format!("when condition '{}' is not satisfied", when),
                )
                .with_apptag("when-violation")
                .with_path(dnode.path()));
            }
        }
        for must in snode.musts() {
            let satisfied =
                xpath::eval_boolean(tree, Some(index), &must.expr, &nsmap)?;
            if !satisfied {
                let msg = must.error_message.clone().unwrap_or_else(|| {
                    format!("must condition '{}' is not satisfied", must.expr)
                });
                let mut err = Error::new(ErrorTag::OperationFailed, msg)
                    .with_apptag("must-violation")
                    .with_path(dnode.path());
                if let Some(apptag) = &must.error_app_tag {
                    err.apptag = Some(apptag.clone());
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Prefix map of a module: its own prefix plus every import prefix, mapped
/// to module names.
pub(crate) fn module_nsmap(
    context: &Context,
    mid: ModuleId,
) -> HashMap<String, String> {
    let mdata = &context.modules[mid];
    let mut map = HashMap::new();
    map.insert(mdata.prefix.clone(), mdata.name.clone());
    for (prefix, import_mid) in &mdata.imports {
        map.insert(
            prefix.clone(),
            context.modules[*import_mid].name.clone(),
        );
    }
    map
}
