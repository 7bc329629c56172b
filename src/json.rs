//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! JSON encoding of data trees (RFC 7951).
//!
//! Member names carry the module name as prefix at the top level and at
//! every module boundary. Values wider than the JSON safe integer range
//! (int64/uint64) and decimal64 values are emitted as quoted strings.

use std::sync::Arc;

use generational_arena::Index;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::data::{DataParserFlags, DataPrinterFlags, DataTree};
use crate::error::{Error, ErrorTag, Result};
use crate::schema::{DataValueType, SchemaNode, SchemaNodeKind};
use crate::utils::split_qname;

// ===== printer =====

pub(crate) fn print(
    tree: &DataTree,
    start: Option<Index>,
    options: DataPrinterFlags,
) -> Result<String> {
    let children = match start {
        Some(index) => {
            if options.contains(DataPrinterFlags::WITH_SIBLINGS) {
                tree.canonical_children(tree.arena[index].parent)
            } else {
                vec![index]
            }
        }
        None => tree.canonical_children(None),
    };
    let object = members_of(tree, &children, None, options)?;
    let value = Value::Object(object);
    let rendered = if options.contains(DataPrinterFlags::SHRINK) {
        serde_json::to_string(&value)
    } else {
        serde_json::to_string_pretty(&value)
    };
    rendered.map_err(|err| {
        Error::new(ErrorTag::OperationFailed, format!("JSON write: {}", err))
    })
}

// Build the members of one JSON object from a sibling set, grouping list
// and leaf-list entries into arrays.
fn members_of(
    tree: &DataTree,
    children: &[Index],
    parent_module: Option<&str>,
    options: DataPrinterFlags,
) -> Result<Map<String, Value>> {
    let mut object = Map::new();
    let mut grouped: Vec<(String, Vec<Index>)> = Vec::new();
    for child in children {
        if print_skipped(tree, *child, options) {
            continue;
        }
        let name = member_name(tree, *child, parent_module);
        match grouped.iter_mut().find(|(gname, _)| *gname == name) {
            Some((_, indices)) => indices.push(*child),
            None => grouped.push((name, vec![*child])),
        }
    }
    for (name, indices) in grouped {
        let first = indices[0];
        let snode = tree.arena[first]
            .snode
            .map(|id| SchemaNode::new(&tree.context, id));
        let value = match snode.as_ref().map(|snode| snode.kind()) {
            Some(SchemaNodeKind::List) => Value::Array(
                indices
                    .iter()
                    .map(|index| {
                        let module = module_name_of(tree, *index);
                        members_of(
                            tree,
                            &tree.canonical_children(Some(*index)),
                            module,
                            options,
                        )
                        .map(Value::Object)
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(SchemaNodeKind::LeafList) => Value::Array(
                indices
                    .iter()
                    .map(|index| leaf_value(tree, *index))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(SchemaNodeKind::Leaf) => leaf_value(tree, first)?,
            _ => {
                // Containers and schemaless nodes.
                let node = &tree.arena[first];
                if node.children.is_empty() && node.value.is_some() {
                    leaf_value(tree, first)?
                } else {
                    let module = module_name_of(tree, first);
                    Value::Object(members_of(
                        tree,
                        &tree.canonical_children(Some(first)),
                        module,
                        options,
                    )?)
                }
            }
        };
        object.insert(name, value);
    }
    Ok(object)
}

fn print_skipped(
    tree: &DataTree,
    index: Index,
    options: DataPrinterFlags,
) -> bool {
    let node = &tree.arena[index];
    if node.from_default && !options.contains(DataPrinterFlags::WD_ALL) {
        return true;
    }
    if options.contains(DataPrinterFlags::WD_TRIM) {
        if let Some(snode) =
            node.snode.map(|id| SchemaNode::new(&tree.context, id))
        {
            if snode.kind() == SchemaNodeKind::Leaf
                && node.value.as_deref() == snode.default_value_canonical()
            {
                return true;
            }
        }
    }
    if node.children.is_empty()
        && node.value.is_none()
        && !options.contains(DataPrinterFlags::KEEP_EMPTY_CONT)
    {
        if let Some(snode) =
            node.snode.map(|id| SchemaNode::new(&tree.context, id))
        {
            if snode.is_np_container() {
                return true;
            }
        }
    }
    false
}

fn module_name_of(tree: &DataTree, index: Index) -> Option<&str> {
    tree.arena[index]
        .snode
        .map(|id| tree.context.modules[tree.context.snodes[id].module].name.as_str())
}

fn member_name(
    tree: &DataTree,
    index: Index,
    parent_module: Option<&str>,
) -> String {
    let node = &tree.arena[index];
    match module_name_of(tree, index) {
        Some(module) if parent_module != Some(module) => {
            format!("{}:{}", module, node.name)
        }
        _ => node.name.clone(),
    }
}

fn leaf_value(tree: &DataTree, index: Index) -> Result<Value> {
    let node = &tree.arena[index];
    let body = node.value.as_deref().unwrap_or("");
    let base = node
        .snode
        .and_then(|id| tree.context.snodes[id].leaf_type.as_ref())
        .and_then(|spec| spec.base);
    Ok(match base {
        Some(DataValueType::Int8)
        | Some(DataValueType::Int16)
        | Some(DataValueType::Int32) => match body.trim().parse::<i64>() {
            Ok(number) => Value::Number(number.into()),
            Err(_) => Value::String(body.to_string()),
        },
        Some(DataValueType::Uint8)
        | Some(DataValueType::Uint16)
        | Some(DataValueType::Uint32) => match body.trim().parse::<u64>() {
            Ok(number) => Value::Number(number.into()),
            Err(_) => Value::String(body.to_string()),
        },
        // int64, uint64 and decimal64 exceed the JSON safe integer range
        // and are emitted as quoted strings (RFC 7951 §6.1).
        Some(DataValueType::Int64)
        | Some(DataValueType::Uint64)
        | Some(DataValueType::Dec64) => Value::String(body.to_string()),
        Some(DataValueType::Bool) => match body.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(body.to_string()),
        },
        // The empty type is encoded as [null] (RFC 7951 §6.9).
        Some(DataValueType::Empty) => Value::Array(vec![Value::Null]),
        _ => Value::String(body.to_string()),
    })
}

// ===== reader =====

pub(crate) fn parse(
    context: Arc<Context>,
    text: &str,
    options: DataParserFlags,
) -> Result<DataTree> {
    let root: Value = serde_json::from_str(text).map_err(|err| {
        Error::new(
            ErrorTag::MalformedMessage,
            format!("malformed JSON: {}", err),
        )
    })?;
    let Value::Object(members) = root else {
        return Err(Error::new(
            ErrorTag::MalformedMessage,
            "top-level JSON value is not an object",
        ));
    };
    let mut tree = DataTree::new(context);
    parse_members(&mut tree, None, &members, options)?;
    Ok(tree)
}

fn parse_members(
    tree: &mut DataTree,
    parent: Option<Index>,
    members: &Map<String, Value>,
    options: DataParserFlags,
) -> Result<()> {
    for (name, value) in members {
        // Metadata members ("@name") are not instance data.
        if name.starts_with('@') {
            continue;
        }
        let (module, local) = split_qname(name);
        let namespace = match module {
            Some(module) => Some(
                tree.context
                    .get_module(module, None)
                    .ok_or_else(|| {
                        Error::new(
                            ErrorTag::UnknownNamespace,
                            format!("unknown module '{}'", module),
                        )
                    })?
                    .namespace()
                    .to_string(),
            ),
            None => None,
        };
        match value {
            Value::Array(entries) => {
                for entry in entries {
                    let index =
                        open_member(tree, parent, local, &namespace, options)?;
                    let Some(index) = index else { continue };
                    match entry {
                        Value::Object(entry_members) => parse_members(
                            tree,
                            Some(index),
                            entry_members,
                            options,
                        )?,
                        Value::Null => {}
                        scalar => {
                            tree.set_value(index, Some(scalar_body(scalar)));
                        }
                    }
                }
            }
            Value::Object(child_members) => {
                let index =
                    open_member(tree, parent, local, &namespace, options)?;
                if let Some(index) = index {
                    parse_members(tree, Some(index), child_members, options)?;
                }
            }
            scalar => {
                let index =
                    open_member(tree, parent, local, &namespace, options)?;
                if let Some(index) = index {
                    tree.set_value(index, Some(scalar_body(scalar)));
                }
            }
        }
    }
    Ok(())
}

fn open_member(
    tree: &mut DataTree,
    parent: Option<Index>,
    name: &str,
    namespace: &Option<String>,
    options: DataParserFlags,
) -> Result<Option<Index>> {
    if options.contains(DataParserFlags::SCHEMALESS) {
        return Ok(Some(tree.push_node(
            parent,
            name.to_string(),
            namespace.clone(),
            None,
        )));
    }
    let index = match tree.create_child(parent, name, namespace.clone()) {
        Ok(index) => index,
        // No schema definition for this member.
        Err(err) if err.tag == ErrorTag::UnknownElement => {
            if options.contains(DataParserFlags::STRICT) {
                return Err(err);
            }
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    if tree.arena[index].snode.is_none() {
        let path = tree.path_of(index);
        tree.unlink(index);
        if options.contains(DataParserFlags::STRICT) {
            return Err(Error::new(
                ErrorTag::UnknownElement,
                format!("unknown element '{}'", name),
            )
            .with_path(path));
        }
        return Ok(None);
    }
    Ok(Some(index))
}

fn scalar_body(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}
