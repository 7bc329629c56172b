//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! NACM access control (RFC 8341).
//!
//! The evaluator walks rule-lists whose group set intersects the requesting
//! user's groups, in configured order, and within each rule-list the rules
//! in order; the first matching rule wins. With no match the per-kind
//! default applies. Read denials silently prune the result tree; write and
//! exec denials surface as `access-denied` errors.

use std::collections::HashMap;
use std::str::FromStr;

use bitflags::bitflags;
use generational_arena::Index;
use log::debug;

use crate::data::{DataFormat, DataParserFlags, DataTree, DataValidationFlags};
use crate::error::{Error, ErrorTag, ErrorType, Result};
use crate::xpath;

/// Namespace of the ietf-netconf-acm module.
pub const NACM_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-acm";

bitflags! {
    /// The access-operations bit set of a rule.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct AccessOperations: u8 {
        const CREATE = 0x01;
        const READ = 0x02;
        const UPDATE = 0x04;
        const DELETE = 0x08;
        const EXEC = 0x10;
    }
}

/// A single requested access operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AccessOperation {
    Create,
    Read,
    Update,
    Delete,
    Exec,
}

/// Rule action: permit or deny.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuleAction {
    Permit,
    Deny,
}

/// One NACM rule, ordered within its rule-list.
#[derive(Clone, Debug)]
pub struct NacmRule {
    pub name: String,
    /// Module name the rule applies to; `None` or `"*"` matches any.
    pub module_name: Option<String>,
    /// RPC name restriction, for exec requests.
    pub rpc_name: Option<String>,
    /// Notification name restriction, for read requests on streams.
    pub notification_name: Option<String>,
    /// Data-node XPath; the rule matches nodes within its result set.
    pub path: Option<String>,
    pub access_operations: AccessOperations,
    pub action: RuleAction,
}

/// A named, ordered collection of rules applying to a set of groups.
#[derive(Clone, Debug)]
pub struct NacmRuleList {
    pub name: String,
    pub groups: Vec<String>,
    pub rules: Vec<NacmRule>,
}

/// A named group of users.
#[derive(Clone, Debug)]
pub struct NacmGroup {
    pub name: String,
    pub users: Vec<String>,
}

/// Full NACM configuration, re-read whenever the NACM subtree changes.
#[derive(Clone, Debug)]
pub struct NacmConfig {
    pub enable_nacm: bool,
    pub read_default: RuleAction,
    pub write_default: RuleAction,
    pub exec_default: RuleAction,
    pub groups: Vec<NacmGroup>,
    pub rule_lists: Vec<NacmRuleList>,
    /// User exempt from all enforcement.
    pub recovery_user: Option<String>,
}

/// An access request under evaluation.
#[derive(Clone, Debug)]
pub struct AccessRequest<'a> {
    pub user: &'a str,
    pub operation: AccessOperation,
    /// Module owning the accessed node, RPC or notification.
    pub module_name: Option<&'a str>,
    pub rpc_name: Option<&'a str>,
    pub notification_name: Option<&'a str>,
    /// The accessed data node, for path-rule matching.
    pub node: Option<Index>,
}

// ===== impl AccessOperation =====

impl AccessOperation {
    fn as_flag(&self) -> AccessOperations {
        match self {
            AccessOperation::Create => AccessOperations::CREATE,
            AccessOperation::Read => AccessOperations::READ,
            AccessOperation::Update => AccessOperations::UPDATE,
            AccessOperation::Delete => AccessOperations::DELETE,
            AccessOperation::Exec => AccessOperations::EXEC,
        }
    }

    fn is_write(&self) -> bool {
        matches!(
            self,
            AccessOperation::Create
                | AccessOperation::Update
                | AccessOperation::Delete
        )
    }
}

impl FromStr for AccessOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<AccessOperation> {
        match s.trim() {
            "create" => Ok(AccessOperation::Create),
            "read" => Ok(AccessOperation::Read),
            "update" => Ok(AccessOperation::Update),
            "delete" => Ok(AccessOperation::Delete),
            "exec" => Ok(AccessOperation::Exec),
            other => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("unknown access operation '{}'", other),
            )),
        }
    }
}

impl FromStr for RuleAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<RuleAction> {
        match s.trim() {
            "permit" => Ok(RuleAction::Permit),
            "deny" => Ok(RuleAction::Deny),
            other => Err(Error::new(
                ErrorTag::InvalidValue,
                format!("unknown rule action '{}'", other),
            )),
        }
    }
}

fn parse_access_operations(text: &str) -> Result<AccessOperations> {
    if text.trim() == "*" {
        return Ok(AccessOperations::all());
    }
    let mut ops = AccessOperations::empty();
    for word in text.split_whitespace() {
        ops |= AccessOperation::from_str(word)?.as_flag();
    }
    Ok(ops)
}

// ===== impl NacmConfig =====

impl Default for NacmConfig {
    fn default() -> NacmConfig {
        NacmConfig {
            enable_nacm: false,
            read_default: RuleAction::Permit,
            write_default: RuleAction::Deny,
            exec_default: RuleAction::Permit,
            groups: Vec::new(),
            rule_lists: Vec::new(),
            recovery_user: None,
        }
    }
}

impl NacmConfig {
    /// Load the configuration from an XML document whose root (possibly
    /// below a `<config>` wrapper) is the `<nacm>` container.
    pub fn from_xml(
        context: &std::sync::Arc<crate::context::Context>,
        text: &str,
    ) -> Result<NacmConfig> {
        let tree = DataTree::parse_string(
            context,
            text,
            DataFormat::XML,
            DataParserFlags::SCHEMALESS,
            DataValidationFlags::empty(),
        )?;
        Self::from_tree(&tree)
    }

    /// Load the configuration from the `nacm` container of a data tree.
    /// Returns the defaults when the subtree is absent.
    pub fn from_tree(tree: &DataTree) -> Result<NacmConfig> {
        let mut config = NacmConfig::default();
        let Some(nacm) = find_nacm_root(tree) else {
            return Ok(config);
        };

        let nacm_node = &tree.arena[nacm];
        for child in nacm_node.children.clone() {
            let node = &tree.arena[child];
            let body = node.value.as_deref().unwrap_or("");
            match node.name.as_str() {
                "enable-nacm" => config.enable_nacm = body == "true",
                "read-default" => config.read_default = body.parse()?,
                "write-default" => config.write_default = body.parse()?,
                "exec-default" => config.exec_default = body.parse()?,
                "groups" => {
                    for group in tree.arena[child].children.clone() {
                        config.groups.push(parse_group(tree, group)?);
                    }
                }
                "rule-list" => {
                    config.rule_lists.push(parse_rule_list(tree, child)?);
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Groups the user belongs to.
    pub fn user_groups(&self, user: &str) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|group| group.users.iter().any(|member| member == user))
            .map(|group| group.name.as_str())
            .collect()
    }

    /// Evaluate an access request against a data tree, per the RFC 8341
    /// §3.4.4 order.
    pub fn validate(
        &self,
        request: &AccessRequest<'_>,
        tree: &DataTree,
    ) -> RuleAction {
        // Enforcement disabled.
        if !self.enable_nacm {
            return RuleAction::Permit;
        }
        // Recovery user.
        if let Some(recovery) = &self.recovery_user {
            if recovery == request.user {
                return RuleAction::Permit;
            }
        }
        // Emergency bypass for safety-net operations.
        if request.operation == AccessOperation::Exec
            && request.rpc_name == Some("close-session")
        {
            return RuleAction::Permit;
        }

        let user_groups = self.user_groups(request.user);
        for rule_list in &self.rule_lists {
            let applies = rule_list.groups.iter().any(|group| {
                group == "*" || user_groups.contains(&group.as_str())
            });
            if !applies {
                continue;
            }
            for rule in &rule_list.rules {
                if self.rule_matches(rule, request, tree) {
                    debug!(
                        "nacm: rule '{}' of '{}' matched for user '{}': {:?}",
                        rule.name, rule_list.name, request.user, rule.action
                    );
                    return rule.action;
                }
            }
        }

        // No rule matched; fall through to the per-kind default.
        if request.operation == AccessOperation::Exec {
            self.exec_default
        } else if request.operation.is_write() {
            self.write_default
        } else {
            self.read_default
        }
    }

    fn rule_matches(
        &self,
        rule: &NacmRule,
        request: &AccessRequest<'_>,
        tree: &DataTree,
    ) -> bool {
        // Module name glob.
        if let Some(module) = &rule.module_name {
            if module != "*" && Some(module.as_str()) != request.module_name {
                return false;
            }
        }
        // Operation kind bit set.
        if !rule
            .access_operations
            .contains(request.operation.as_flag())
        {
            return false;
        }
        // RPC name, for exec requests.
        if let Some(rpc) = &rule.rpc_name {
            if request.operation != AccessOperation::Exec {
                return false;
            }
            if rpc != "*" && Some(rpc.as_str()) != request.rpc_name {
                return false;
            }
        }
        // Notification name.
        if let Some(notification) = &rule.notification_name {
            if notification != "*"
                && Some(notification.as_str()) != request.notification_name
            {
                return false;
            }
        }
        // Data-node path: the node must sit within the rule's result set.
        if let Some(path) = &rule.path {
            let Some(node) = request.node else {
                return false;
            };
            let matched = match xpath::eval(
                tree,
                None,
                path,
                &HashMap::new(),
            ) {
                Ok(xpath::XPathValue::NodeSet(set)) => {
                    set.contains(&node)
                        || ancestor_in_set(tree, node, &set)
                }
                _ => false,
            };
            if !matched {
                return false;
            }
        }
        true
    }

    /// Build the `access-denied` error for a write or exec denial.
    pub fn denied_error(operation: AccessOperation) -> Error {
        let etype = if operation == AccessOperation::Exec {
            ErrorType::Protocol
        } else {
            ErrorType::Application
        };
        Error {
            etype,
            ..Error::new(ErrorTag::AccessDenied, "access denied")
        }
    }

    /// Prune every subtree of `tree` the user may not read. Denied nodes
    /// are silently removed together with their descendants.
    pub fn filter_read(&self, user: &str, tree: &mut DataTree) {
        if !self.enable_nacm {
            return;
        }
        let mut denied: Vec<Index> = Vec::new();
        let mut pending: Vec<Index> = tree.roots.clone();
        while let Some(index) = pending.pop() {
            let module_name = tree.arena[index].snode.map(|id| {
                tree.context.modules[tree.context.snodes[id].module]
                    .name
                    .clone()
            });
            let request = AccessRequest {
                user,
                operation: AccessOperation::Read,
                module_name: module_name.as_deref(),
                rpc_name: None,
                notification_name: None,
                node: Some(index),
            };
            match self.validate(&request, tree) {
                RuleAction::Deny => denied.push(index),
                RuleAction::Permit => {
                    pending.extend(tree.arena[index].children.iter().copied());
                }
            }
        }
        for index in denied {
            tree.unlink(index);
        }
    }
}

fn ancestor_in_set(tree: &DataTree, node: Index, set: &[Index]) -> bool {
    let mut cursor = tree.arena[node].parent;
    while let Some(parent) = cursor {
        if set.contains(&parent) {
            return true;
        }
        cursor = tree.arena[parent].parent;
    }
    false
}

// ===== configuration parsing =====

fn find_nacm_root(tree: &DataTree) -> Option<Index> {
    let mut pending: Vec<Index> = tree.roots.clone();
    while let Some(index) = pending.pop() {
        let node = &tree.arena[index];
        if node.name == "nacm"
            && node
                .namespace
                .as_deref()
                .map_or(true, |ns| ns == NACM_NS)
        {
            return Some(index);
        }
        // Descend through wrapper elements such as <config>.
        pending.extend(node.children.iter().copied());
    }
    None
}

fn parse_group(tree: &DataTree, index: Index) -> Result<NacmGroup> {
    let mut name = None;
    let mut users = Vec::new();
    for child in &tree.arena[index].children {
        let node = &tree.arena[*child];
        match node.name.as_str() {
            "name" => name = node.value.clone(),
            "user-name" => {
                if let Some(user) = node.value.clone() {
                    users.push(user);
                }
            }
            _ => {}
        }
    }
    Ok(NacmGroup {
        name: name.ok_or_else(|| {
            Error::new(ErrorTag::MissingElement, "group has no name")
        })?,
        users,
    })
}

fn parse_rule_list(tree: &DataTree, index: Index) -> Result<NacmRuleList> {
    let mut name = None;
    let mut groups = Vec::new();
    let mut rules = Vec::new();
    for child in &tree.arena[index].children {
        let node = &tree.arena[*child];
        match node.name.as_str() {
            "name" => name = node.value.clone(),
            "group" => {
                if let Some(group) = node.value.clone() {
                    groups.push(group);
                }
            }
            "rule" => rules.push(parse_rule(tree, *child)?),
            _ => {}
        }
    }
    Ok(NacmRuleList {
        name: name.ok_or_else(|| {
            Error::new(ErrorTag::MissingElement, "rule-list has no name")
        })?,
        groups,
        rules,
    })
}

fn parse_rule(tree: &DataTree, index: Index) -> Result<NacmRule> {
    let mut rule = NacmRule {
        name: String::new(),
        module_name: None,
        rpc_name: None,
        notification_name: None,
        path: None,
        access_operations: AccessOperations::all(),
        action: RuleAction::Deny,
    };
    for child in &tree.arena[index].children {
        let node = &tree.arena[*child];
        let body = node.value.clone().unwrap_or_default();
        match node.name.as_str() {
            "name" => rule.name = body,
            "module-name" => rule.module_name = Some(body),
            "rpc-name" => rule.rpc_name = Some(body),
            "notification-name" => rule.notification_name = Some(body),
            "path" => rule.path = Some(body),
            "access-operations" => {
                rule.access_operations = parse_access_operations(&body)?;
            }
            "action" => rule.action = body.parse()?,
            _ => {}
        }
    }
    if rule.name.is_empty() {
        return Err(Error::new(ErrorTag::MissingElement, "rule has no name"));
    }
    Ok(rule)
}
