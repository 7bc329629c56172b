//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! YANG schema data.
//!
//! Modules are compiled from raw statement trees into an immutable,
//! cross-resolved graph owned by the [`Context`]: groupings are expanded,
//! augments applied, typedef chains folded into a primitive type plus facets,
//! identity derivation and leafref targets resolved, and feature-disabled
//! subtrees pruned.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use num_derive::FromPrimitive;

use crate::context::Context;
use crate::error::{Error, ErrorTag, Result};
use crate::iter::{Ancestors, NodeIterable, Siblings, Traverse};
use crate::yang::Statement;

pub(crate) type ModuleId = usize;
pub(crate) type SnodeId = usize;

/// Compiled YANG module.
#[derive(Clone, Debug)]
pub struct SchemaModule<'a> {
    context: &'a Context,
    pub(crate) id: ModuleId,
}

/// Generic YANG schema node.
#[derive(Clone, Debug)]
pub struct SchemaNode<'a> {
    context: &'a Context,
    pub(crate) id: SnodeId,
}

/// YANG schema node kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchemaNodeKind {
    Container,
    Case,
    Choice,
    Leaf,
    LeafList,
    List,
    AnyData,
    Rpc,
    Notification,
}

/// YANG must substatement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaStmtMust {
    pub expr: String,
    pub error_message: Option<String>,
    pub error_app_tag: Option<String>,
}

/// YANG data value type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum DataValueType {
    Unknown = 0,
    Binary = 1,
    Uint8 = 2,
    Uint16 = 3,
    Uint32 = 4,
    Uint64 = 5,
    String = 6,
    Bits = 7,
    Bool = 8,
    Dec64 = 9,
    Empty = 10,
    Enum = 11,
    IdentityRef = 12,
    InstanceId = 13,
    LeafRef = 14,
    Union = 15,
    Int8 = 16,
    Int16 = 17,
    Int32 = 18,
    Int64 = 19,
}

/// YANG data value.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Bool(bool),
    Empty,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Other(String),
}

/// YANG leaf(-list) type, resolved to its primitive plus merged facets.
#[derive(Clone, Debug)]
pub struct SchemaLeafType<'a> {
    context: &'a Context,
    pub(crate) spec: &'a TypeSpec,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct SnodeFlags: u16 {
        const CONFIG = 0x0001;
        const MANDATORY = 0x0002;
        const PRESENCE = 0x0004;
        const KEY = 0x0008;
        const USER_ORDERED = 0x0010;
        const SYSTEM_ORDERED = 0x0400;
        const INPUT = 0x0020;
        const OUTPUT = 0x0040;
        const IN_NOTIF = 0x0080;
        const STATUS_DEPRC = 0x0100;
        const STATUS_OBSLT = 0x0200;
    }
}

/// Compiled type: primitive plus facets, typedef chains already folded.
#[derive(Clone, Debug, Default)]
pub(crate) struct TypeSpec {
    pub(crate) base: Option<DataValueType>,
    pub(crate) ranges: Vec<(i128, i128)>,
    pub(crate) lengths: Vec<(u64, u64)>,
    pub(crate) patterns: Vec<(String, bool)>,
    pub(crate) enums: Vec<(String, i32)>,
    pub(crate) bits: Vec<(String, u32)>,
    pub(crate) fraction_digits: u8,
    pub(crate) leafref_path: Option<String>,
    pub(crate) leafref_target: Option<SnodeId>,
    pub(crate) require_instance: bool,
    pub(crate) identity_base: Option<(ModuleId, String)>,
    pub(crate) union_types: Vec<TypeSpec>,
}

impl TypeSpec {
    fn base(&self) -> DataValueType {
        self.base.unwrap_or(DataValueType::Unknown)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SnodeData {
    pub(crate) kind: SchemaNodeKind,
    pub(crate) module: ModuleId,
    pub(crate) name: String,
    pub(crate) parent: Option<SnodeId>,
    pub(crate) children: Vec<SnodeId>,
    pub(crate) path: String,
    pub(crate) flags: SnodeFlags,
    pub(crate) description: Option<String>,
    pub(crate) reference: Option<String>,
    pub(crate) units: Option<String>,
    pub(crate) when: Option<String>,
    pub(crate) musts: Vec<SchemaStmtMust>,
    pub(crate) default: Option<String>,
    pub(crate) leaf_type: Option<TypeSpec>,
    pub(crate) keys: Vec<String>,
    pub(crate) min_elements: Option<u32>,
    pub(crate) max_elements: Option<u32>,
}

#[derive(Clone, Debug)]
pub(crate) struct IdentityData {
    pub(crate) bases: Vec<(ModuleId, String)>,
}

#[derive(Clone, Debug)]
pub(crate) struct ModuleData {
    pub(crate) name: String,
    pub(crate) revision: Option<String>,
    pub(crate) namespace: String,
    pub(crate) prefix: String,
    pub(crate) organization: Option<String>,
    pub(crate) contact: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) imports: Vec<(String, ModuleId)>,
    pub(crate) features: HashMap<String, bool>,
    pub(crate) identities: HashMap<String, IdentityData>,
    pub(crate) typedefs: HashMap<String, Statement>,
    pub(crate) groupings: HashMap<String, Statement>,
    pub(crate) data: Vec<SnodeId>,
    pub(crate) rpcs: Vec<SnodeId>,
    pub(crate) notifications: Vec<SnodeId>,
    pub(crate) implemented: bool,
}

// ===== impl SchemaModule =====

impl<'a> SchemaModule<'a> {
    pub(crate) fn new(context: &'a Context, id: ModuleId) -> SchemaModule<'a> {
        SchemaModule { context, id }
    }

    fn mdata(&self) -> &'a ModuleData {
        &self.context.modules[self.id]
    }

    /// Name of the module.
    pub fn name(&self) -> &'a str {
        &self.mdata().name
    }

    /// Revision of the module.
    pub fn revision(&self) -> Option<&'a str> {
        self.mdata().revision.as_deref()
    }

    /// Namespace of the module.
    pub fn namespace(&self) -> &'a str {
        &self.mdata().namespace
    }

    /// Prefix of the module.
    pub fn prefix(&self) -> &'a str {
        &self.mdata().prefix
    }

    /// Party/company responsible for the module.
    pub fn organization(&self) -> Option<&'a str> {
        self.mdata().organization.as_deref()
    }

    /// Contact information for the module.
    pub fn contact(&self) -> Option<&'a str> {
        self.mdata().contact.as_deref()
    }

    /// Description of the module.
    pub fn description(&self) -> Option<&'a str> {
        self.mdata().description.as_deref()
    }

    /// Return true if the module is implemented, not just imported.
    pub fn is_implemented(&self) -> bool {
        self.mdata().implemented
    }

    /// Get the current real status of the specified feature in the module.
    pub fn feature_value(&self, feature: &str) -> Result<bool> {
        self.mdata().features.get(feature).copied().ok_or_else(|| {
            Error::new(
                ErrorTag::InvalidValue,
                format!(
                    "unknown feature '{}' in module '{}'",
                    feature,
                    self.name()
                ),
            )
        })
    }

    /// Returns an iterator over the top-level data nodes.
    pub fn data(&self) -> Siblings<'a, SchemaNode<'a>> {
        let first = self
            .mdata()
            .data
            .first()
            .map(|id| SchemaNode::new(self.context, *id));
        Siblings::new(first)
    }

    /// Returns an iterator over the list of RPCs.
    pub fn rpcs(&self) -> Siblings<'a, SchemaNode<'a>> {
        let first = self
            .mdata()
            .rpcs
            .first()
            .map(|id| SchemaNode::new(self.context, *id));
        Siblings::new(first)
    }

    /// Returns an iterator over the list of notifications.
    pub fn notifications(&self) -> Siblings<'a, SchemaNode<'a>> {
        let first = self
            .mdata()
            .notifications
            .first()
            .map(|id| SchemaNode::new(self.context, *id));
        Siblings::new(first)
    }

    /// Returns an iterator over all nodes in the schema module
    /// (depth-first search algorithm), augmented nodes included.
    pub fn traverse(&self) -> impl Iterator<Item = SchemaNode<'a>> {
        let data = self.data().flat_map(|snode| snode.traverse());
        let rpcs = self.rpcs().flat_map(|snode| snode.traverse());
        let notifications =
            self.notifications().flat_map(|snode| snode.traverse());
        data.chain(rpcs).chain(notifications)
    }

    /// Whether `identity` (declared in this module) is derived from `base`,
    /// written as `[prefix:]name` relative to this module.
    pub fn identity_derived_from(
        &self,
        identity: &str,
        base: &str,
    ) -> Result<bool> {
        let id = resolve_identity_ref(self.context, self.id, identity)?;
        let base = resolve_identity_ref(self.context, self.id, base)?;
        Ok(identity_derives(self.context, &id, &base))
    }
}

impl PartialEq for SchemaModule<'_> {
    fn eq(&self, other: &SchemaModule<'_>) -> bool {
        self.id == other.id
    }
}

// ===== impl SchemaNode =====

impl<'a> SchemaNode<'a> {
    pub(crate) fn new(context: &'a Context, id: SnodeId) -> SchemaNode<'a> {
        SchemaNode { context, id }
    }

    pub(crate) fn data(&self) -> &'a SnodeData {
        &self.context.snodes[self.id]
    }

    fn check_flag(&self, flag: SnodeFlags) -> bool {
        self.data().flags.contains(flag)
    }

    /// Schema node module.
    pub fn module(&self) -> SchemaModule<'a> {
        SchemaModule::new(self.context, self.data().module)
    }

    /// Returns the kind of the schema node.
    pub fn kind(&self) -> SchemaNodeKind {
        self.data().kind
    }

    /// Schema node name.
    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    /// Description statement.
    pub fn description(&self) -> Option<&'a str> {
        self.data().description.as_deref()
    }

    /// Reference statement.
    pub fn reference(&self) -> Option<&'a str> {
        self.data().reference.as_deref()
    }

    /// Stable data path of the node, `/module:name/…` form. Schema-only
    /// nodes (choice, case) share the path of their data-tree parent.
    pub fn path(&self) -> &'a str {
        &self.data().path
    }

    /// Returns whether the node is a configuration node.
    pub fn is_config(&self) -> bool {
        self.check_flag(SnodeFlags::CONFIG)
    }

    /// Returns whether the node is a state node.
    pub fn is_state(&self) -> bool {
        !self.check_flag(SnodeFlags::CONFIG)
            && !matches!(self.kind(), SchemaNodeKind::Rpc)
    }

    /// Returns whether the node's status is "deprecated".
    pub fn is_status_deprecated(&self) -> bool {
        self.check_flag(SnodeFlags::STATUS_DEPRC)
    }

    /// Returns whether the node's status is "obsolete".
    pub fn is_status_obsolete(&self) -> bool {
        self.check_flag(SnodeFlags::STATUS_OBSLT)
    }

    /// Returns whether the node is mandatory.
    pub fn is_mandatory(&self) -> bool {
        self.check_flag(SnodeFlags::MANDATORY)
    }

    /// Returns whether the node is a non-presence container.
    pub fn is_np_container(&self) -> bool {
        self.kind() == SchemaNodeKind::Container
            && !self.check_flag(SnodeFlags::PRESENCE)
    }

    /// Returns whether the node is a list's key.
    pub fn is_list_key(&self) -> bool {
        self.check_flag(SnodeFlags::KEY)
    }

    /// Returns whether the node is a keyless list.
    pub fn is_keyless_list(&self) -> bool {
        self.kind() == SchemaNodeKind::List && self.data().keys.is_empty()
    }

    /// Returns whether the node is a user-ordered list or leaf-list.
    pub fn is_user_ordered(&self) -> bool {
        self.check_flag(SnodeFlags::USER_ORDERED)
    }

    /// Returns whether the node explicitly declares `ordered-by system`.
    pub fn is_system_ordered(&self) -> bool {
        self.check_flag(SnodeFlags::SYSTEM_ORDERED)
    }

    /// The nearest ancestor that is a data-tree node (skipping choice and
    /// case nodes), if any.
    pub fn parent_data_node(&self) -> Option<SchemaNode<'a>> {
        self.ancestors().find(|snode| !snode.is_schema_only())
    }

    /// Iterator over the direct data-tree children, descending through
    /// choice and case nodes transparently.
    pub fn data_children(&self) -> impl Iterator<Item = SchemaNode<'a>> {
        let mut out = Vec::new();
        collect_data_children(self.context, &self.data().children, &mut out);
        out.into_iter()
    }

    /// Returns whether the node appears only in the schema tree and not in
    /// the data tree.
    pub fn is_schema_only(&self) -> bool {
        matches!(self.kind(), SchemaNodeKind::Choice | SchemaNodeKind::Case)
    }

    /// Returns whether the node is in the subtree of an rpc input statement.
    pub fn is_within_input(&self) -> bool {
        self.check_flag(SnodeFlags::INPUT)
    }

    /// Returns whether the node is in the subtree of an rpc output statement.
    pub fn is_within_output(&self) -> bool {
        self.check_flag(SnodeFlags::OUTPUT)
    }

    /// Returns whether the node is in the subtree of a notification.
    pub fn is_within_notification(&self) -> bool {
        self.check_flag(SnodeFlags::IN_NOTIF)
    }

    /// Returns whether a default value is set.
    pub fn has_default(&self) -> bool {
        self.data().default.is_some()
    }

    /// The default value of the leaf (canonical string representation).
    pub fn default_value_canonical(&self) -> Option<&'a str> {
        match self.kind() {
            SchemaNodeKind::Leaf => self.data().default.as_deref(),
            _ => None,
        }
    }

    /// Type of the leaf(-list) node.
    pub fn leaf_type(&self) -> Option<SchemaLeafType<'a>> {
        self.data().leaf_type.as_ref().map(|spec| SchemaLeafType {
            context: self.context,
            spec,
        })
    }

    /// Units of the leaf(-list)'s type.
    pub fn units(&self) -> Option<&'a str> {
        self.data().units.as_deref()
    }

    /// The min-elements constraint.
    pub fn min_elements(&self) -> Option<u32> {
        self.data().min_elements
    }

    /// The max-elements constraint.
    pub fn max_elements(&self) -> Option<u32> {
        self.data().max_elements
    }

    /// List of must restrictions.
    pub fn musts(&self) -> &'a [SchemaStmtMust] {
        &self.data().musts
    }

    /// The when statement carried by the node, if any.
    pub fn when(&self) -> Option<&'a str> {
        self.data().when.as_deref()
    }

    /// Names of the list keys, in declaration order.
    pub fn list_keys(&self) -> &'a [String] {
        &self.data().keys
    }

    /// RPC input child nodes.
    pub fn input(&self) -> impl Iterator<Item = SchemaNode<'a>> + 'a {
        let context = self.context;
        self.data()
            .children
            .iter()
            .map(move |id| SchemaNode::new(context, *id))
            .filter(|snode| snode.is_within_input())
    }

    /// RPC output child nodes.
    pub fn output(&self) -> impl Iterator<Item = SchemaNode<'a>> + 'a {
        let context = self.context;
        self.data()
            .children
            .iter()
            .map(move |id| SchemaNode::new(context, *id))
            .filter(|snode| snode.is_within_output())
    }

    /// Returns an iterator over the ancestor schema nodes.
    pub fn ancestors(&self) -> Ancestors<'a, SchemaNode<'a>> {
        Ancestors::new(self.parent())
    }

    /// Returns an iterator over this schema node and its ancestors.
    pub fn inclusive_ancestors(&self) -> Ancestors<'a, SchemaNode<'a>> {
        Ancestors::new(Some(self.clone()))
    }

    /// Returns an iterator over the sibling schema nodes.
    pub fn siblings(&self) -> Siblings<'a, SchemaNode<'a>> {
        Siblings::new(self.next_sibling())
    }

    /// Returns an iterator over the child schema nodes.
    pub fn children(&self) -> Siblings<'a, SchemaNode<'a>> {
        Siblings::new(self.first_child())
    }

    /// Returns an iterator over all elements in the schema subtree
    /// (depth-first search algorithm).
    pub fn traverse(&self) -> Traverse<'a, SchemaNode<'a>> {
        Traverse::new(self.clone())
    }

    /// Find the direct child schema node with the given name, descending
    /// through choice and case nodes transparently. When `ns` is given, the
    /// child's module namespace must match.
    pub fn find_data_child(
        &self,
        name: &str,
        ns: Option<&str>,
    ) -> Option<SchemaNode<'a>> {
        find_data_child_in(self.context, &self.data().children, name, ns)
    }
}

fn collect_data_children<'a>(
    context: &'a Context,
    children: &[SnodeId],
    out: &mut Vec<SchemaNode<'a>>,
) {
    for id in children {
        let snode = SchemaNode::new(context, *id);
        if snode.is_schema_only() {
            collect_data_children(context, &snode.data().children, out);
        } else {
            out.push(snode);
        }
    }
}

pub(crate) fn find_data_child_in<'a>(
    context: &'a Context,
    children: &[SnodeId],
    name: &str,
    ns: Option<&str>,
) -> Option<SchemaNode<'a>> {
    for id in children {
        let snode = SchemaNode::new(context, *id);
        if snode.is_schema_only() {
            if let Some(found) =
                find_data_child_in(context, &snode.data().children, name, ns)
            {
                return Some(found);
            }
            continue;
        }
        if snode.name() == name
            && ns.map_or(true, |ns| snode.module().namespace() == ns)
        {
            return Some(snode);
        }
    }
    None
}

impl<'a> NodeIterable<'a> for SchemaNode<'a> {
    fn parent(&self) -> Option<SchemaNode<'a>> {
        self.data().parent.map(|id| SchemaNode::new(self.context, id))
    }

    fn next_sibling(&self) -> Option<SchemaNode<'a>> {
        let siblings: &[SnodeId] = match self.data().parent {
            Some(parent) => &self.context.snodes[parent].children,
            None => {
                let mdata = &self.context.modules[self.data().module];
                if mdata.data.contains(&self.id) {
                    &mdata.data
                } else if mdata.rpcs.contains(&self.id) {
                    &mdata.rpcs
                } else {
                    &mdata.notifications
                }
            }
        };
        let pos = siblings.iter().position(|id| *id == self.id)?;
        siblings
            .get(pos + 1)
            .map(|id| SchemaNode::new(self.context, *id))
    }

    fn first_child(&self) -> Option<SchemaNode<'a>> {
        self.data()
            .children
            .first()
            .map(|id| SchemaNode::new(self.context, *id))
    }
}

impl PartialEq for SchemaNode<'_> {
    fn eq(&self, other: &SchemaNode<'_>) -> bool {
        self.id == other.id
    }
}

// ===== impl SchemaLeafType =====

impl<'a> SchemaLeafType<'a> {
    /// The resolved base type.
    pub fn base_type(&self) -> DataValueType {
        self.spec.base()
    }

    /// The leafref path, if the type is a leafref.
    pub fn leafref_path(&self) -> Option<&'a str> {
        self.spec.leafref_path.as_deref()
    }

    /// The target schema node of a leafref type.
    pub fn leafref_target(&self) -> Option<SchemaNode<'a>> {
        self.spec
            .leafref_target
            .map(|id| SchemaNode::new(self.context, id))
    }

    /// Parse and validate a body string against the type, returning the
    /// typed value. Union types use first-match semantics in declaration
    /// order.
    pub fn validate_value(&self, body: &str) -> Result<DataValue> {
        validate_value(self.context, self.spec, body)
    }

    /// The numeric value assigned to an enum name, if the type is an
    /// enumeration containing it.
    pub fn enum_value(&self, name: &str) -> Option<i32> {
        self.spec
            .enums
            .iter()
            .find(|(ename, _)| ename == name)
            .map(|(_, value)| *value)
    }
}

// ===== value parsing and validation =====

fn out_of_range(body: &str) -> Error {
    Error::new(ErrorTag::InvalidValue, format!("value '{}' out of range", body))
}

fn check_ranges(spec: &TypeSpec, value: i128, body: &str) -> Result<()> {
    if spec.ranges.is_empty()
        || spec.ranges.iter().any(|(lo, hi)| value >= *lo && value <= *hi)
    {
        Ok(())
    } else {
        Err(out_of_range(body))
    }
}

fn check_lengths(spec: &TypeSpec, len: u64, body: &str) -> Result<()> {
    if spec.lengths.is_empty()
        || spec.lengths.iter().any(|(lo, hi)| len >= *lo && len <= *hi)
    {
        Ok(())
    } else {
        Err(Error::new(
            ErrorTag::InvalidValue,
            format!("value '{}' violates length constraint", body),
        ))
    }
}

fn check_patterns(spec: &TypeSpec, body: &str) -> Result<()> {
    for (pattern, invert) in &spec.patterns {
        // YANG patterns are implicitly anchored (RFC 7950 §9.4.5).
        let anchored = format!("^(?:{})$", pattern);
        let re = regex::Regex::new(&anchored).map_err(|err| {
            Error::new(
                ErrorTag::OperationFailed,
                format!("invalid pattern '{}': {}", pattern, err),
            )
        })?;
        if re.is_match(body) == *invert {
            return Err(Error::new(
                ErrorTag::InvalidValue,
                format!("value '{}' violates pattern '{}'", body, pattern),
            ));
        }
    }
    Ok(())
}

macro_rules! parse_int {
    ($body:expr, $spec:expr, $ty:ty, $variant:ident) => {{
        let value: $ty =
            $body.trim().parse().map_err(|_| out_of_range($body))?;
        check_ranges($spec, value as i128, $body)?;
        Ok(DataValue::$variant(value))
    }};
}

pub(crate) fn validate_value(
    context: &Context,
    spec: &TypeSpec,
    body: &str,
) -> Result<DataValue> {
    match spec.base() {
        DataValueType::Uint8 => parse_int!(body, spec, u8, Uint8),
        DataValueType::Uint16 => parse_int!(body, spec, u16, Uint16),
        DataValueType::Uint32 => parse_int!(body, spec, u32, Uint32),
        DataValueType::Uint64 => parse_int!(body, spec, u64, Uint64),
        DataValueType::Int8 => parse_int!(body, spec, i8, Int8),
        DataValueType::Int16 => parse_int!(body, spec, i16, Int16),
        DataValueType::Int32 => parse_int!(body, spec, i32, Int32),
        DataValueType::Int64 => parse_int!(body, spec, i64, Int64),
        DataValueType::Bool => match body.trim() {
            "true" => Ok(DataValue::Bool(true)),
            "false" => Ok(DataValue::Bool(false)),
            _ => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("invalid boolean value '{}'", body),
            )),
        },
        DataValueType::Empty => {
            if body.is_empty() {
                Ok(DataValue::Empty)
            } else {
                Err(Error::new(
                    ErrorTag::InvalidValue,
                    "empty type does not take a value",
                ))
            }
        }
        DataValueType::String => {
            check_lengths(spec, body.chars().count() as u64, body)?;
            check_patterns(spec, body)?;
            Ok(DataValue::Other(body.to_string()))
        }
        DataValueType::Binary => {
            check_lengths(spec, body.len() as u64 * 3 / 4, body)?;
            Ok(DataValue::Other(body.to_string()))
        }
        DataValueType::Dec64 => {
            let scaled = parse_decimal64(body, spec.fraction_digits)
                .ok_or_else(|| out_of_range(body))?;
            check_ranges(spec, scaled as i128, body)?;
            Ok(DataValue::Other(body.trim().to_string()))
        }
        DataValueType::Enum => {
            let name = body.trim();
            if spec.enums.iter().any(|(ename, _)| ename == name) {
                Ok(DataValue::Other(name.to_string()))
            } else {
                Err(Error::new(
                    ErrorTag::InvalidValue,
                    format!("invalid enumeration value '{}'", body),
                ))
            }
        }
        DataValueType::Bits => {
            for bit in body.split_whitespace() {
                if !spec.bits.iter().any(|(bname, _)| bname == bit) {
                    return Err(Error::new(
                        ErrorTag::InvalidValue,
                        format!("unknown bit '{}'", bit),
                    ));
                }
            }
            Ok(DataValue::Other(body.trim().to_string()))
        }
        DataValueType::IdentityRef => {
            // Structural check only; derivation from the base is verified
            // by the reference-validation stage with the tree at hand.
            let name = body.trim();
            if name.is_empty() {
                return Err(Error::new(
                    ErrorTag::InvalidValue,
                    "empty identityref value",
                ));
            }
            Ok(DataValue::Other(name.to_string()))
        }
        DataValueType::LeafRef => {
            // Validate against the target leaf's type; instance existence
            // is checked by the reference-validation stage.
            match spec.leafref_target {
                Some(target) => {
                    let tspec = context.snodes[target]
                        .leaf_type
                        .as_ref()
                        .ok_or_else(|| {
                            Error::new(
                                ErrorTag::OperationFailed,
                                "leafref target is not a leaf",
                            )
                        })?;
                    validate_value(context, tspec, body)
                }
                None => Ok(DataValue::Other(body.to_string())),
            }
        }
        DataValueType::InstanceId => Ok(DataValue::Other(body.to_string())),
        DataValueType::Union => {
            for member in &spec.union_types {
                if let Ok(value) = validate_value(context, member, body) {
                    return Ok(value);
                }
            }
            Err(Error::new(
                ErrorTag::InvalidValue,
                format!("value '{}' matches no member of the union", body),
            ))
        }
        DataValueType::Unknown => Ok(DataValue::Other(body.to_string())),
    }
}

/// Parse a decimal64 string into its value scaled by 10^fraction_digits.
pub(crate) fn parse_decimal64(body: &str, fraction_digits: u8) -> Option<i64> {
    let body = body.trim();
    let (int_part, frac_part) = match body.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (body, ""),
    };
    if frac_part.len() > fraction_digits as usize {
        return None;
    }
    let negative = int_part.starts_with('-');
    let int_value: i64 = if int_part == "-" {
        0
    } else {
        int_part.parse().ok()?
    };
    let mut frac_value: i64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().ok()?
    };
    for _ in frac_part.len()..fraction_digits as usize {
        frac_value = frac_value.checked_mul(10)?;
    }
    let scale = 10i64.checked_pow(fraction_digits as u32)?;
    let scaled = int_value.checked_mul(scale)?;
    if negative {
        scaled.checked_sub(frac_value)
    } else {
        scaled.checked_add(frac_value)
    }
}

// ===== identities =====

pub(crate) fn resolve_identity_ref(
    context: &Context,
    mid: ModuleId,
    value: &str,
) -> Result<(ModuleId, String)> {
    let (target_mid, name) = match value.split_once(':') {
        Some((prefix, name)) => {
            let target = resolve_prefix(context, mid, prefix)
                .or_else(|| context.module_id_by_name(prefix))
                .ok_or_else(|| {
                    Error::new(
                        ErrorTag::UnknownNamespace,
                        format!("unknown prefix or module '{}'", prefix),
                    )
                })?;
            (target, name)
        }
        None => (mid, value),
    };
    if !context.modules[target_mid].identities.contains_key(name) {
        return Err(Error::new(
            ErrorTag::InvalidValue,
            format!(
                "unknown identity '{}' in module '{}'",
                name, context.modules[target_mid].name
            ),
        ));
    }
    Ok((target_mid, name.to_string()))
}

pub(crate) fn identity_derives(
    context: &Context,
    identity: &(ModuleId, String),
    base: &(ModuleId, String),
) -> bool {
    if identity == base {
        return true;
    }
    let Some(idata) = context.modules[identity.0].identities.get(&identity.1)
    else {
        return false;
    };
    idata
        .bases
        .iter()
        .any(|parent| identity_derives(context, parent, base))
}

pub(crate) fn resolve_prefix(
    context: &Context,
    mid: ModuleId,
    prefix: &str,
) -> Option<ModuleId> {
    let mdata = &context.modules[mid];
    if mdata.prefix == prefix {
        return Some(mid);
    }
    mdata
        .imports
        .iter()
        .find(|(import_prefix, _)| import_prefix == prefix)
        .map(|(_, import_mid)| *import_mid)
}

// ===== module compilation =====

struct Compiler<'a> {
    context: &'a mut Context,
    mid: ModuleId,
    augments: Vec<Statement>,
}

/// Compile a parsed module statement into the context. `features` lists the
/// features to enable; `"*"` enables all.
pub(crate) fn compile_module(
    context: &mut Context,
    stmt: Statement,
    features: &[&str],
) -> Result<ModuleId> {
    let name = stmt.arg()?.to_string();
    let namespace = stmt
        .find_arg("namespace")
        .ok_or_else(|| {
            Error::new(
                ErrorTag::MissingElement,
                format!("module '{}' has no namespace", name),
            )
        })?
        .to_string();
    let prefix = stmt
        .find_arg("prefix")
        .ok_or_else(|| {
            Error::new(
                ErrorTag::MissingElement,
                format!("module '{}' has no prefix", name),
            )
        })?
        .to_string();

    // Latest revision statement comes first by convention; pick the
    // lexicographically greatest to be safe.
    let revision = stmt
        .find_all("revision")
        .filter_map(|rev| rev.argument.clone())
        .max();

    let mut mdata = ModuleData {
        name: name.clone(),
        revision,
        namespace,
        prefix,
        organization: stmt.find_arg("organization").map(str::to_string),
        contact: stmt.find_arg("contact").map(str::to_string),
        description: stmt.find_arg("description").map(str::to_string),
        imports: Vec::new(),
        features: HashMap::new(),
        identities: HashMap::new(),
        typedefs: HashMap::new(),
        groupings: HashMap::new(),
        data: Vec::new(),
        rpcs: Vec::new(),
        notifications: Vec::new(),
        implemented: true,
    };

    // Step 2: resolve imports, detecting circular imports as fatal.
    for import in stmt.find_all("import") {
        let import_name = import.arg()?.to_string();
        let import_prefix = import
            .find_arg("prefix")
            .ok_or_else(|| {
                Error::new(
                    ErrorTag::MissingElement,
                    format!("import '{}' has no prefix", import_name),
                )
            })?
            .to_string();
        let import_mid = context.load_module_by_name(&import_name)?;
        mdata.imports.push((import_prefix, import_mid));
    }

    // Merge submodule bodies (include).
    let mut body: Vec<Statement> = stmt.substmts.clone();
    for include in stmt.find_all("include") {
        let submod_name = include.arg()?;
        let text = context.find_module_source(submod_name)?;
        let submod = crate::yang::parse_module(&text)?;
        if submod.keyword != "submodule" {
            return Err(Error::new(
                ErrorTag::BadElement,
                format!("'{}' is not a submodule", submod_name),
            ));
        }
        body.extend(submod.substmts.into_iter().filter(|sub| {
            !matches!(
                sub.keyword.as_str(),
                "belongs-to" | "yang-version" | "revision" | "import"
            )
        }));
    }

    // Step 5 groundwork: features, enabled per the requested list.
    let enable_all = features.contains(&"*");
    for feature in body.iter().filter(|sub| sub.keyword == "feature") {
        let fname = feature.arg()?.to_string();
        let enabled = enable_all || features.contains(&fname.as_str());
        mdata.features.insert(fname, enabled);
    }

    // Typedefs and groupings are kept raw; they are folded on use.
    for sub in &body {
        match sub.keyword.as_str() {
            "typedef" => {
                mdata.typedefs.insert(sub.arg()?.to_string(), sub.clone());
            }
            "grouping" => {
                mdata.groupings.insert(sub.arg()?.to_string(), sub.clone());
            }
            _ => {}
        }
    }

    let mid = context.modules.len();
    context.modules.push(mdata);

    // Step 6: identity derivation graph.
    for sub in body.iter().filter(|sub| sub.keyword == "identity") {
        let iname = sub.arg()?.to_string();
        context.modules[mid]
            .identities
            .insert(iname, IdentityData { bases: Vec::new() });
    }
    for sub in body.iter().filter(|sub| sub.keyword == "identity") {
        let iname = sub.arg()?.to_string();
        let mut bases = Vec::new();
        for base in sub.find_all("base") {
            bases.push(resolve_identity_ref(context, mid, base.arg()?)?);
        }
        context.modules[mid]
            .identities
            .get_mut(&iname)
            .expect("identity registered above")
            .bases = bases;
    }

    // Step 3: compile the body, expanding uses/grouping inline.
    let mut compiler = Compiler {
        context: &mut *context,
        mid,
        augments: Vec::new(),
    };
    for sub in &body {
        match sub.keyword.as_str() {
            "container" | "list" | "leaf" | "leaf-list" | "choice"
            | "anydata" | "anyxml" => {
                if let Some(id) =
                    compiler.compile_node(sub, None, SnodeFlags::CONFIG)?
                {
                    compiler.context.modules[mid].data.push(id);
                }
            }
            "uses" => {
                let ids = compiler.expand_uses(sub, None, SnodeFlags::CONFIG)?;
                compiler.context.modules[mid].data.extend(ids);
            }
            "rpc" => {
                if let Some(id) =
                    compiler.compile_node(sub, None, SnodeFlags::empty())?
                {
                    compiler.context.modules[mid].rpcs.push(id);
                }
            }
            "notification" => {
                if let Some(id) =
                    compiler.compile_node(sub, None, SnodeFlags::IN_NOTIF)?
                {
                    compiler.context.modules[mid].notifications.push(id);
                }
            }
            "augment" => compiler.augments.push(sub.clone()),
            _ => {}
        }
    }

    // Step 4: apply augments; unreachable targets are non-fatal only when
    // guarded by a disabled feature.
    let augments = std::mem::take(&mut compiler.augments);
    for augment in &augments {
        compiler.apply_augment(augment)?;
    }

    // Step 7: resolve leafrefs, cyclic chains are fatal.
    resolve_leafrefs(context, mid)?;

    Ok(mid)
}

impl Compiler<'_> {
    fn feature_enabled(&self, stmt: &Statement) -> Result<bool> {
        for feature in stmt.find_all("if-feature") {
            let expr = feature.arg()?;
            // Only simple feature names (optionally prefixed) are supported.
            let name = expr.rsplit(':').next().unwrap_or(expr);
            let enabled = self.context.modules[self.mid]
                .features
                .get(name)
                .copied()
                .unwrap_or(false);
            if !enabled {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compile_node(
        &mut self,
        stmt: &Statement,
        parent: Option<SnodeId>,
        inherited: SnodeFlags,
    ) -> Result<Option<SnodeId>> {
        if !self.feature_enabled(stmt)? {
            return Ok(None);
        }

        let kind = match stmt.keyword.as_str() {
            "container" => SchemaNodeKind::Container,
            "list" => SchemaNodeKind::List,
            "leaf" => SchemaNodeKind::Leaf,
            "leaf-list" => SchemaNodeKind::LeafList,
            "choice" => SchemaNodeKind::Choice,
            "case" => SchemaNodeKind::Case,
            "anydata" | "anyxml" => SchemaNodeKind::AnyData,
            "rpc" | "action" => SchemaNodeKind::Rpc,
            "notification" => SchemaNodeKind::Notification,
            keyword => {
                return Err(Error::new(
                    ErrorTag::UnknownElement,
                    format!("unsupported schema statement '{}'", keyword),
                ));
            }
        };

        let name = stmt.arg()?.to_string();
        let mut flags = inherited
            & (SnodeFlags::CONFIG
                | SnodeFlags::INPUT
                | SnodeFlags::OUTPUT
                | SnodeFlags::IN_NOTIF);
        match stmt.find_arg("config") {
            Some("false") => flags.remove(SnodeFlags::CONFIG),
            Some("true") => flags.insert(SnodeFlags::CONFIG),
            _ => {}
        }
        if matches!(kind, SchemaNodeKind::Rpc | SchemaNodeKind::Notification) {
            flags.remove(SnodeFlags::CONFIG);
        }
        if stmt.find_arg("mandatory") == Some("true") {
            flags.insert(SnodeFlags::MANDATORY);
        }
        if stmt.find("presence").is_some() {
            flags.insert(SnodeFlags::PRESENCE);
        }
        match stmt.find_arg("ordered-by") {
            Some("user") => flags.insert(SnodeFlags::USER_ORDERED),
            Some("system") => flags.insert(SnodeFlags::SYSTEM_ORDERED),
            _ => {}
        }
        match stmt.find_arg("status") {
            Some("deprecated") => flags.insert(SnodeFlags::STATUS_DEPRC),
            Some("obsolete") => flags.insert(SnodeFlags::STATUS_OBSLT),
            _ => {}
        }

        let path = {
            let parent_path = parent
                .map(|id| self.context.snodes[id].path.clone())
                .unwrap_or_default();
            if matches!(kind, SchemaNodeKind::Choice | SchemaNodeKind::Case) {
                parent_path
            } else {
                let qualify = match parent {
                    None => true,
                    Some(parent_id) => {
                        self.context.snodes[parent_id].module != self.mid
                    }
                };
                if qualify {
                    format!(
                        "{}/{}:{}",
                        parent_path, self.context.modules[self.mid].name, name
                    )
                } else {
                    format!("{}/{}", parent_path, name)
                }
            }
        };

        let leaf_type = match kind {
            SchemaNodeKind::Leaf | SchemaNodeKind::LeafList => {
                let type_stmt = stmt.find("type").ok_or_else(|| {
                    Error::new(
                        ErrorTag::MissingElement,
                        format!("leaf '{}' has no type", name),
                    )
                })?;
                Some(self.compile_type(self.mid, type_stmt)?)
            }
            _ => None,
        };

        let musts = stmt
            .find_all("must")
            .map(|must| {
                Ok(SchemaStmtMust {
                    expr: must.arg()?.to_string(),
                    error_message: must
                        .find_arg("error-message")
                        .map(str::to_string),
                    error_app_tag: must
                        .find_arg("error-app-tag")
                        .map(str::to_string),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let keys: Vec<String> = stmt
            .find_arg("key")
            .map(|arg| arg.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let min_elements =
            stmt.find_arg("min-elements").and_then(|arg| arg.parse().ok());
        let max_elements = stmt
            .find_arg("max-elements")
            .filter(|arg| *arg != "unbounded")
            .and_then(|arg| arg.parse().ok());

        let id = self.context.snodes.len();
        self.context.snodes.push(SnodeData {
            kind,
            module: self.mid,
            name,
            parent,
            children: Vec::new(),
            path,
            flags,
            description: stmt.find_arg("description").map(str::to_string),
            reference: stmt.find_arg("reference").map(str::to_string),
            units: stmt.find_arg("units").map(str::to_string),
            when: stmt.find_arg("when").map(str::to_string),
            musts,
            default: stmt.find_arg("default").map(str::to_string),
            leaf_type,
            keys,
            min_elements,
            max_elements,
        });

        // Children.
        self.compile_children(stmt, id, flags)?;

        // Keys of a list come first, in key declaration order.
        if kind == SchemaNodeKind::List {
            self.order_list_keys(id)?;
        }

        Ok(Some(id))
    }

    fn compile_children(
        &mut self,
        stmt: &Statement,
        parent: SnodeId,
        flags: SnodeFlags,
    ) -> Result<()> {
        let parent_kind = self.context.snodes[parent].kind;
        for sub in &stmt.substmts {
            match sub.keyword.as_str() {
                "container" | "list" | "leaf" | "leaf-list" | "choice"
                | "anydata" | "anyxml" => {
                    // Shorthand case: data nodes directly under a choice.
                    let sub_flags = flags;
                    if let Some(id) =
                        self.compile_node(sub, Some(parent), sub_flags)?
                    {
                        self.context.snodes[parent].children.push(id);
                    }
                }
                "case" => {
                    if parent_kind != SchemaNodeKind::Choice {
                        return Err(Error::new(
                            ErrorTag::BadElement,
                            "case outside of choice",
                        ));
                    }
                    if let Some(id) =
                        self.compile_node(sub, Some(parent), flags)?
                    {
                        self.context.snodes[parent].children.push(id);
                    }
                }
                "action" => {
                    if let Some(id) = self.compile_node(
                        sub,
                        Some(parent),
                        SnodeFlags::empty(),
                    )? {
                        self.context.snodes[parent].children.push(id);
                    }
                }
                "notification" => {
                    if let Some(id) = self.compile_node(
                        sub,
                        Some(parent),
                        SnodeFlags::IN_NOTIF,
                    )? {
                        self.context.snodes[parent].children.push(id);
                    }
                }
                "input" | "output" => {
                    let extra = if sub.keyword == "input" {
                        SnodeFlags::INPUT
                    } else {
                        SnodeFlags::OUTPUT
                    };
                    self.compile_children(sub, parent, flags | extra)?;
                }
                "uses" => {
                    let ids = self.expand_uses(sub, Some(parent), flags)?;
                    self.context.snodes[parent].children.extend(ids);
                }
                _ => {}
            }
        }
        Ok(())
    }

    // Step 3 of the resolution pipeline: fold the grouping expansion into
    // the using scope, with refine applied after expansion.
    fn expand_uses(
        &mut self,
        stmt: &Statement,
        parent: Option<SnodeId>,
        flags: SnodeFlags,
    ) -> Result<Vec<SnodeId>> {
        if !self.feature_enabled(stmt)? {
            return Ok(Vec::new());
        }
        let target = stmt.arg()?;
        let (gmid, gname) = match target.split_once(':') {
            Some((prefix, gname)) => {
                let gmid = resolve_prefix(self.context, self.mid, prefix)
                    .ok_or_else(|| {
                        Error::new(
                            ErrorTag::UnknownNamespace,
                            format!("unknown prefix '{}'", prefix),
                        )
                    })?;
                (gmid, gname)
            }
            None => (self.mid, target),
        };
        let mut grouping = self.context.modules[gmid]
            .groupings
            .get(gname)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorTag::UnknownElement,
                    format!("unknown grouping '{}'", target),
                )
            })?;

        // Apply refinements before compiling the expansion.
        for refine in stmt.find_all("refine") {
            apply_refine(&mut grouping, refine)?;
        }

        let mut ids = Vec::new();
        for sub in &grouping.substmts {
            match sub.keyword.as_str() {
                "container" | "list" | "leaf" | "leaf-list" | "choice"
                | "anydata" | "anyxml" => {
                    if let Some(id) = self.compile_node(sub, parent, flags)? {
                        ids.push(id);
                    }
                }
                "uses" => {
                    ids.extend(self.expand_uses(sub, parent, flags)?);
                }
                _ => {}
            }
        }

        // Augments within the uses apply to the expanded subtree.
        for augment in stmt.find_all("augment") {
            let rel_path = augment.arg()?;
            let target_id = ids
                .iter()
                .copied()
                .find_map(|id| {
                    self.find_descendant(id, rel_path.trim_start_matches('/'))
                })
                .ok_or_else(|| {
                    Error::new(
                        ErrorTag::UnknownElement,
                        format!("uses augment target '{}' not found", rel_path),
                    )
                })?;
            let target_flags = self.context.snodes[target_id].flags
                & (SnodeFlags::CONFIG
                    | SnodeFlags::INPUT
                    | SnodeFlags::OUTPUT
                    | SnodeFlags::IN_NOTIF);
            self.compile_children(augment, target_id, target_flags)?;
        }

        Ok(ids)
    }

    fn find_descendant(&self, from: SnodeId, path: &str) -> Option<SnodeId> {
        let mut current = from;
        let mut segments = path.split('/');
        let first = segments.next()?;
        if strip_prefix(first) != self.context.snodes[from].name {
            return None;
        }
        for segment in segments {
            let name = strip_prefix(segment);
            let snode = SchemaNode::new(self.context, current);
            current = snode.find_data_child(name, None)?.id;
        }
        Some(current)
    }

    // Step 4: resolve the augment target by schema path and compile the
    // augmenting children into it.
    fn apply_augment(&mut self, stmt: &Statement) -> Result<()> {
        if !self.feature_enabled(stmt)? {
            return Ok(());
        }
        let path = stmt.arg()?;
        match self.resolve_schema_path(path)? {
            Some(target) => {
                let flags = self.context.snodes[target].flags
                    & (SnodeFlags::CONFIG
                        | SnodeFlags::INPUT
                        | SnodeFlags::OUTPUT
                        | SnodeFlags::IN_NOTIF);
                self.compile_children(stmt, target, flags)
            }
            None => Err(Error::new(
                ErrorTag::UnknownElement,
                format!("augment target '{}' not found", path),
            )),
        }
    }

    fn resolve_schema_path(&self, path: &str) -> Result<Option<SnodeId>> {
        let mut current: Option<SnodeId> = None;
        for segment in path.trim_start_matches('/').split('/') {
            let (prefix, name) = match segment.split_once(':') {
                Some((prefix, name)) => (Some(prefix), name),
                None => (None, segment),
            };
            let ns = match prefix {
                Some(prefix) => {
                    let target_mid =
                        resolve_prefix(self.context, self.mid, prefix)
                            .ok_or_else(|| {
                                Error::new(
                                    ErrorTag::UnknownNamespace,
                                    format!("unknown prefix '{}'", prefix),
                                )
                            })?;
                    Some(self.context.modules[target_mid].namespace.clone())
                }
                None => None,
            };
            let next = match current {
                None => {
                    let mid = match prefix {
                        Some(prefix) => {
                            resolve_prefix(self.context, self.mid, prefix)
                                .expect("prefix resolved above")
                        }
                        None => self.mid,
                    };
                    let mdata = &self.context.modules[mid];
                    mdata
                        .data
                        .iter()
                        .chain(mdata.rpcs.iter())
                        .chain(mdata.notifications.iter())
                        .copied()
                        .find(|id| self.context.snodes[*id].name == name)
                }
                Some(parent) => SchemaNode::new(self.context, parent)
                    .find_data_child(name, ns.as_deref())
                    .map(|snode| snode.id),
            };
            match next {
                Some(next) => current = Some(next),
                None => return Ok(None),
            }
        }
        Ok(current)
    }

    fn order_list_keys(&mut self, list: SnodeId) -> Result<()> {
        let keys = self.context.snodes[list].keys.clone();
        let mut children = self.context.snodes[list].children.clone();
        let mut ordered = Vec::with_capacity(children.len());
        for key in &keys {
            let pos = children
                .iter()
                .position(|id| self.context.snodes[*id].name == *key)
                .ok_or_else(|| {
                    Error::new(
                        ErrorTag::MissingElement,
                        format!(
                            "list '{}' key '{}' not found",
                            self.context.snodes[list].name, key
                        ),
                    )
                })?;
            let id = children.remove(pos);
            self.context.snodes[id].flags.insert(SnodeFlags::KEY);
            // Keys are implicitly mandatory.
            self.context.snodes[id].flags.insert(SnodeFlags::MANDATORY);
            ordered.push(id);
        }
        ordered.extend(children);
        self.context.snodes[list].children = ordered;
        Ok(())
    }

    // Step 5: fold typedef chains into the final primitive plus facets.
    fn compile_type(
        &mut self,
        mid: ModuleId,
        stmt: &Statement,
    ) -> Result<TypeSpec> {
        let type_name = stmt.arg()?;
        let mut spec = match builtin_type(type_name) {
            Some(base) => TypeSpec {
                base: Some(base),
                require_instance: true,
                ..Default::default()
            },
            None => {
                let (tmid, tname) = match type_name.split_once(':') {
                    Some((prefix, tname)) => {
                        let tmid = resolve_prefix(self.context, mid, prefix)
                            .ok_or_else(|| {
                                Error::new(
                                    ErrorTag::UnknownNamespace,
                                    format!("unknown prefix '{}'", prefix),
                                )
                            })?;
                        (tmid, tname)
                    }
                    None => (mid, type_name),
                };
                let typedef = self.context.modules[tmid]
                    .typedefs
                    .get(tname)
                    .cloned()
                    .ok_or_else(|| {
                        Error::new(
                            ErrorTag::UnknownElement,
                            format!("unknown type '{}'", type_name),
                        )
                    })?;
                let inner = typedef.find("type").ok_or_else(|| {
                    Error::new(
                        ErrorTag::MissingElement,
                        format!("typedef '{}' has no type", tname),
                    )
                })?;
                self.compile_type(tmid, inner)?
            }
        };

        // Restrictions declared on this statement refine the base.
        // Fraction digits come first: decimal64 range bounds scale by them.
        if let Some(fd) = stmt.find_arg("fraction-digits") {
            spec.fraction_digits = fd.parse().map_err(|_| {
                Error::new(ErrorTag::InvalidValue, "invalid fraction-digits")
            })?;
        }
        if let Some(range) = stmt.find_arg("range") {
            spec.ranges =
                parse_ranges(range, spec.base(), spec.fraction_digits)?;
        }
        if let Some(length) = stmt.find_arg("length") {
            spec.lengths = parse_lengths(length)?;
        }
        for pattern in stmt.find_all("pattern") {
            let invert =
                pattern.find_arg("modifier") == Some("invert-match");
            spec.patterns.push((pattern.arg()?.to_string(), invert));
        }
        if let Some(require) = stmt.find_arg("require-instance") {
            spec.require_instance = require == "true";
        }

        match spec.base() {
            DataValueType::Enum => {
                if stmt.find("enum").is_some() {
                    spec.enums.clear();
                    let mut next_value = 0i32;
                    for enum_stmt in stmt.find_all("enum") {
                        let value = match enum_stmt.find_arg("value") {
                            Some(value) => value.parse().map_err(|_| {
                                Error::new(
                                    ErrorTag::InvalidValue,
                                    "invalid enum value",
                                )
                            })?,
                            None => next_value,
                        };
                        next_value = value.saturating_add(1);
                        spec.enums
                            .push((enum_stmt.arg()?.to_string(), value));
                    }
                }
            }
            DataValueType::Bits => {
                if stmt.find("bit").is_some() {
                    spec.bits.clear();
                    let mut next_pos = 0u32;
                    for bit_stmt in stmt.find_all("bit") {
                        let pos = match bit_stmt.find_arg("position") {
                            Some(pos) => pos.parse().map_err(|_| {
                                Error::new(
                                    ErrorTag::InvalidValue,
                                    "invalid bit position",
                                )
                            })?,
                            None => next_pos,
                        };
                        next_pos = pos.saturating_add(1);
                        spec.bits.push((bit_stmt.arg()?.to_string(), pos));
                    }
                }
            }
            DataValueType::LeafRef => {
                if let Some(path) = stmt.find_arg("path") {
                    spec.leafref_path = Some(path.to_string());
                }
                if spec.leafref_path.is_none() {
                    return Err(Error::new(
                        ErrorTag::MissingElement,
                        "leafref type has no path",
                    ));
                }
            }
            DataValueType::IdentityRef => {
                if let Some(base) = stmt.find_arg("base") {
                    spec.identity_base =
                        Some(resolve_identity_ref(self.context, mid, base)?);
                }
                if spec.identity_base.is_none() {
                    return Err(Error::new(
                        ErrorTag::MissingElement,
                        "identityref type has no base",
                    ));
                }
            }
            DataValueType::Union => {
                if stmt.find("type").is_some() {
                    spec.union_types = stmt
                        .find_all("type")
                        .map(|member| self.compile_type(mid, member))
                        .collect::<Result<Vec<_>>>()?;
                }
                if spec.union_types.is_empty() {
                    return Err(Error::new(
                        ErrorTag::MissingElement,
                        "union type has no members",
                    ));
                }
            }
            _ => {}
        }

        Ok(spec)
    }
}

fn strip_prefix(segment: &str) -> &str {
    segment.rsplit(':').next().unwrap_or(segment)
}

fn apply_refine(grouping: &mut Statement, refine: &Statement) -> Result<()> {
    let path = refine.arg()?;
    let mut current = &mut *grouping;
    for segment in path.split('/') {
        let name = strip_prefix(segment);
        let pos = current
            .substmts
            .iter()
            .position(|sub| {
                sub.argument.as_deref() == Some(name)
                    && matches!(
                        sub.keyword.as_str(),
                        "container"
                            | "list"
                            | "leaf"
                            | "leaf-list"
                            | "choice"
                            | "case"
                            | "anydata"
                            | "anyxml"
                    )
            })
            .ok_or_else(|| {
                Error::new(
                    ErrorTag::UnknownElement,
                    format!("refine target '{}' not found", path),
                )
            })?;
        current = &mut current.substmts[pos];
    }
    // Refinable substatements replace those of the target.
    for sub in &refine.substmts {
        match sub.keyword.as_str() {
            "default" | "description" | "reference" | "config"
            | "mandatory" | "presence" | "min-elements" | "max-elements" => {
                current
                    .substmts
                    .retain(|existing| existing.keyword != sub.keyword);
                current.substmts.push(sub.clone());
            }
            "must" => current.substmts.push(sub.clone()),
            _ => {}
        }
    }
    Ok(())
}

fn builtin_type(name: &str) -> Option<DataValueType> {
    match name {
        "binary" => Some(DataValueType::Binary),
        "bits" => Some(DataValueType::Bits),
        "boolean" => Some(DataValueType::Bool),
        "decimal64" => Some(DataValueType::Dec64),
        "empty" => Some(DataValueType::Empty),
        "enumeration" => Some(DataValueType::Enum),
        "identityref" => Some(DataValueType::IdentityRef),
        "instance-identifier" => Some(DataValueType::InstanceId),
        "int8" => Some(DataValueType::Int8),
        "int16" => Some(DataValueType::Int16),
        "int32" => Some(DataValueType::Int32),
        "int64" => Some(DataValueType::Int64),
        "leafref" => Some(DataValueType::LeafRef),
        "string" => Some(DataValueType::String),
        "uint8" => Some(DataValueType::Uint8),
        "uint16" => Some(DataValueType::Uint16),
        "uint32" => Some(DataValueType::Uint32),
        "uint64" => Some(DataValueType::Uint64),
        "union" => Some(DataValueType::Union),
        _ => None,
    }
}

fn type_bounds(base: DataValueType) -> (i128, i128) {
    match base {
        DataValueType::Int8 => (i8::MIN as i128, i8::MAX as i128),
        DataValueType::Int16 => (i16::MIN as i128, i16::MAX as i128),
        DataValueType::Int32 => (i32::MIN as i128, i32::MAX as i128),
        DataValueType::Int64 => (i64::MIN as i128, i64::MAX as i128),
        DataValueType::Uint8 => (0, u8::MAX as i128),
        DataValueType::Uint16 => (0, u16::MAX as i128),
        DataValueType::Uint32 => (0, u32::MAX as i128),
        DataValueType::Uint64 => (0, u64::MAX as i128),
        DataValueType::Dec64 => (i64::MIN as i128, i64::MAX as i128),
        _ => (i128::MIN, i128::MAX),
    }
}

fn parse_range_bound(
    text: &str,
    base: DataValueType,
    fraction_digits: u8,
    low: bool,
) -> Result<i128> {
    let (min, max) = type_bounds(base);
    match text.trim() {
        "min" => Ok(min),
        "max" => Ok(max),
        text if base == DataValueType::Dec64 => {
            parse_decimal64(text, fraction_digits)
                .map(|scaled| scaled as i128)
                .ok_or_else(|| {
                    Error::new(
                        ErrorTag::InvalidValue,
                        format!("invalid range bound '{}'", text),
                    )
                })
        }
        text => text.parse().map_err(|_| {
            Error::new(
                ErrorTag::InvalidValue,
                format!(
                    "invalid {} range bound '{}'",
                    if low { "lower" } else { "upper" },
                    text
                ),
            )
        }),
    }
}

fn parse_ranges(
    text: &str,
    base: DataValueType,
    fraction_digits: u8,
) -> Result<Vec<(i128, i128)>> {
    text.split('|')
        .map(|part| match part.split_once("..") {
            Some((lo, hi)) => Ok((
                parse_range_bound(lo, base, fraction_digits, true)?,
                parse_range_bound(hi, base, fraction_digits, false)?,
            )),
            None => {
                let value =
                    parse_range_bound(part, base, fraction_digits, true)?;
                Ok((value, value))
            }
        })
        .collect()
}

fn parse_lengths(text: &str) -> Result<Vec<(u64, u64)>> {
    let parse_bound = |text: &str, low: bool| -> Result<u64> {
        match text.trim() {
            "min" => Ok(0),
            "max" => Ok(u64::MAX),
            text => text.parse().map_err(|_| {
                Error::new(
                    ErrorTag::InvalidValue,
                    format!(
                        "invalid {} length bound '{}'",
                        if low { "lower" } else { "upper" },
                        text
                    ),
                )
            }),
        }
    };
    text.split('|')
        .map(|part| match part.split_once("..") {
            Some((lo, hi)) => Ok((parse_bound(lo, true)?, parse_bound(hi, false)?)),
            None => {
                let value = parse_bound(part, true)?;
                Ok((value, value))
            }
        })
        .collect()
}

// ===== leafref resolution =====

// Step 7 of the resolution pipeline. Paths are resolved relative to the
// referring leaf ("../a/b") or from the root ("/pfx:a/b").
fn resolve_leafrefs(context: &mut Context, mid: ModuleId) -> Result<()> {
    let leafrefs: Vec<SnodeId> = (0..context.snodes.len())
        .filter(|id| {
            context.snodes[*id].module == mid
                && matches!(
                    context.snodes[*id].leaf_type,
                    Some(ref spec) if spec.base() == DataValueType::LeafRef
                )
        })
        .collect();

    for id in leafrefs {
        let target = resolve_leafref_target(context, id)?;

        // Detect cyclic leafref chains.
        let mut seen = HashSet::new();
        seen.insert(id);
        let mut cursor = target;
        loop {
            if !seen.insert(cursor) {
                return Err(Error::new(
                    ErrorTag::OperationFailed,
                    format!(
                        "cyclic leafref at '{}'",
                        context.snodes[id].path
                    ),
                ));
            }
            match &context.snodes[cursor].leaf_type {
                Some(spec) if spec.base() == DataValueType::LeafRef => {
                    match spec.leafref_target {
                        Some(next) => cursor = next,
                        None => break,
                    }
                }
                _ => break,
            }
        }

        let spec = context.snodes[id]
            .leaf_type
            .as_mut()
            .expect("leafref filtered above");
        spec.leafref_target = Some(target);
    }
    Ok(())
}

fn resolve_leafref_target(
    context: &Context,
    leaf: SnodeId,
) -> Result<SnodeId> {
    let mid = context.snodes[leaf].module;
    let path = context.snodes[leaf]
        .leaf_type
        .as_ref()
        .and_then(|spec| spec.leafref_path.clone())
        .ok_or_else(|| {
            Error::new(ErrorTag::MissingElement, "leafref type has no path")
        })?;
    let not_found = || {
        Error::new(
            ErrorTag::OperationFailed,
            format!(
                "leafref path '{}' at '{}' does not resolve",
                path, context.snodes[leaf].path
            ),
        )
    };

    // Relative paths start at the referring leaf itself; the leading ".."
    // segments then climb from there (RFC 7950 §9.9.2).
    let mut current: Option<SnodeId> = if path.starts_with('/') {
        None
    } else {
        Some(leaf)
    };
    for segment in path.trim_start_matches('/').split('/') {
        let segment = segment.trim();
        // Strip any "[...]" predicate; only the node path matters here.
        let segment = match segment.find('[') {
            Some(pos) => &segment[..pos],
            None => segment,
        };
        if segment == ".." {
            current = match current {
                Some(id) => context.snodes[id].parent,
                None => return Err(not_found()),
            };
            continue;
        }
        let (prefix, name) = match segment.split_once(':') {
            Some((prefix, name)) => (Some(prefix), name),
            None => (None, segment),
        };
        let target_mid = match prefix {
            Some(prefix) => {
                resolve_prefix(context, mid, prefix).ok_or_else(|| {
                    Error::new(
                        ErrorTag::UnknownNamespace,
                        format!("unknown prefix '{}'", prefix),
                    )
                })?
            }
            None => mid,
        };
        let next = match current {
            None => {
                let mdata = &context.modules[target_mid];
                mdata
                    .data
                    .iter()
                    .copied()
                    .find(|id| context.snodes[*id].name == name)
            }
            Some(parent) => SchemaNode::new(context, parent)
                .find_data_child(
                    name,
                    Some(&context.modules[target_mid].namespace),
                )
                .map(|snode| snode.id)
                .or_else(|| {
                    SchemaNode::new(context, parent)
                        .find_data_child(name, None)
                        .map(|snode| snode.id)
                }),
        };
        current = Some(next.ok_or_else(not_found)?);
    }
    current.ok_or_else(not_found)
}
