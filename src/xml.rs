//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! XML encoding of data trees (RFC 6241 canonical form).
//!
//! `xmlns` declarations are emitted exactly where a node's namespace differs
//! from its parent's default namespace. List entries keep their stored order;
//! canonical reordering of system-ordered lists happens through
//! [`DataTree::canonical_children`].

use std::io::Cursor;
use std::sync::Arc;

use generational_arena::Index;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;

use crate::context::Context;
use crate::data::{DataParserFlags, DataPrinterFlags, DataTree};
use crate::error::{Error, ErrorTag, Result};
use crate::schema::{SchemaNode, SchemaNodeKind};

// ===== printer =====

pub(crate) fn print(
    tree: &DataTree,
    start: Option<Index>,
    options: DataPrinterFlags,
) -> Result<String> {
    let mut buf = Cursor::new(Vec::new());
    let result = if options.contains(DataPrinterFlags::SHRINK) {
        let mut writer = Writer::new(&mut buf);
        print_nodes(&mut writer, tree, start, options)
    } else {
        let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);
        print_nodes(&mut writer, tree, start, options)
    };
    result?;
    String::from_utf8(buf.into_inner()).map_err(|_| {
        Error::new(ErrorTag::OperationFailed, "non UTF-8 XML output")
    })
}

fn print_nodes<W: std::io::Write>(
    writer: &mut Writer<W>,
    tree: &DataTree,
    start: Option<Index>,
    options: DataPrinterFlags,
) -> Result<()> {
    match start {
        Some(index) => {
            let parent = tree.arena[index].parent;
            let parent_ns = parent
                .and_then(|parent| tree.arena[parent].namespace.clone());
            if options.contains(DataPrinterFlags::WITH_SIBLINGS) {
                for sibling in tree.canonical_children(parent) {
                    print_node(
                        writer,
                        tree,
                        sibling,
                        parent_ns.as_deref(),
                        options,
                    )?;
                }
            } else {
                print_node(writer, tree, index, parent_ns.as_deref(), options)?;
            }
        }
        None => {
            for root in tree.canonical_children(None) {
                print_node(writer, tree, root, None, options)?;
            }
        }
    }
    Ok(())
}

fn skip_node(
    tree: &DataTree,
    index: Index,
    options: DataPrinterFlags,
) -> bool {
    let node = &tree.arena[index];
    if node.from_default && !options.contains(DataPrinterFlags::WD_ALL) {
        return true;
    }
    if options.contains(DataPrinterFlags::WD_TRIM) {
        if let Some(snode) = node
            .snode
            .map(|id| SchemaNode::new(&tree.context, id))
        {
            if snode.kind() == SchemaNodeKind::Leaf
                && node.value.as_deref() == snode.default_value_canonical()
            {
                return true;
            }
        }
    }
    // Empty non-presence containers are dropped unless kept explicitly.
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

fn print_node<W: std::io::Write>(
    writer: &mut Writer<W>,
    tree: &DataTree,
    index: Index,
    parent_ns: Option<&str>,
    options: DataPrinterFlags,
) -> Result<()> {
    if skip_node(tree, index, options) {
        return Ok(());
    }
    let node = &tree.arena[index];
    let mut elem = BytesStart::new(node.name.as_str());
    if let Some(ns) = node.namespace.as_deref() {
        if parent_ns != Some(ns) {
            elem.push_attribute(("xmlns", ns));
        }
    }
    for attr in &node.attrs {
        elem.push_attribute((attr.name.as_str(), attr.value.as_str()));
    }

    let children = tree.canonical_children(Some(index));
    if children.is_empty() && node.value.is_none() {
        writer.write_event(Event::Empty(elem)).map_err(write_err)?;
        return Ok(());
    }

    writer.write_event(Event::Start(elem)).map_err(write_err)?;
    if let Some(value) = node.value.as_deref() {
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(write_err)?;
    }
    for child in children {
        print_node(writer, tree, child, node.namespace.as_deref(), options)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name.as_str())))
        .map_err(write_err)?;
    Ok(())
}

fn write_err(err: impl std::fmt::Display) -> Error {
    Error::new(ErrorTag::OperationFailed, format!("XML write: {}", err))
}

// ===== reader =====

pub(crate) fn parse(
    context: Arc<Context>,
    text: &str,
    options: DataParserFlags,
) -> Result<DataTree> {
    let mut tree = DataTree::new(context);
    let mut reader = NsReader::from_str(text);
    reader.config_mut().trim_text(true);

    // Stack of open elements; `None` entries mark subtrees being skipped
    // because they have no schema definition.
    let mut stack: Vec<Option<Index>> = Vec::new();

    loop {
        let (resolve, event) = reader.read_resolved_event().map_err(|err| {
            Error::new(
                ErrorTag::MalformedMessage,
                format!("malformed XML: {}", err),
            )
        })?;
        match event {
            Event::Start(elem) => {
                let index =
                    open_element(&mut tree, &stack, &resolve, &elem, options)?;
                stack.push(index);
            }
            Event::Empty(elem) => {
                open_element(&mut tree, &stack, &resolve, &elem, options)?;
            }
            Event::Text(text) => {
                if let Some(Some(index)) = stack.last() {
                    let value = text.unescape().map_err(|err| {
                        Error::new(
                            ErrorTag::MalformedMessage,
                            format!("malformed XML text: {}", err),
                        )
                    })?;
                    tree.set_value(*index, Some(value.into_owned()));
                }
            }
            Event::End(_) => {
                if stack.pop().is_none() {
                    return Err(Error::new(
                        ErrorTag::MalformedMessage,
                        "unbalanced XML end tag",
                    ));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(Error::new(
            ErrorTag::MalformedMessage,
            "XML input ended with open elements",
        ));
    }
    Ok(tree)
}

fn open_element(
    tree: &mut DataTree,
    stack: &[Option<Index>],
    resolve: &ResolveResult<'_>,
    elem: &BytesStart<'_>,
    options: DataParserFlags,
) -> Result<Option<Index>> {
    // Inside a skipped subtree everything is skipped.
    let parent = match stack.last() {
        Some(Some(parent)) => Some(*parent),
        Some(None) => return Ok(None),
        None => None,
    };

    let name = String::from_utf8_lossy(elem.local_name().as_ref()).into_owned();
    let namespace = match resolve {
        ResolveResult::Bound(ns) => {
            Some(String::from_utf8_lossy(ns.as_ref()).into_owned())
        }
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            return Err(Error::new(
                ErrorTag::UnknownNamespace,
                format!(
                    "undeclared XML prefix '{}'",
                    String::from_utf8_lossy(prefix.as_ref())
                ),
            ));
        }
    };

    let index = if options.contains(DataParserFlags::SCHEMALESS) {
        Some(tree.push_node(parent, name.clone(), namespace, None))
    } else {
        let index = match tree.create_child(parent, &name, namespace) {
            Ok(index) => index,
            // No schema definition for this element.
            Err(err) if err.tag == ErrorTag::UnknownElement => {
                if options.contains(DataParserFlags::STRICT) {
                    return Err(err);
                }
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if tree.arena[index].snode.is_none() {
            // Unknown namespace: no module to bind against.
            let path = tree.path_of(index);
            tree.unlink(index);
            if options.contains(DataParserFlags::STRICT) {
                return Err(Error::new(
                    ErrorTag::UnknownNamespace,
                    format!("unknown element '{}'", name),
                )
                .with_path(path));
            }
            return Ok(None);
        }
        Some(index)
    };

    if let Some(index) = index {
        for attr in elem.attributes().flatten() {
            let key =
                String::from_utf8_lossy(attr.key.local_name().as_ref())
                    .into_owned();
            // Namespace declarations are structural, not node attributes.
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let value =
                String::from_utf8_lossy(attr.value.as_ref()).into_owned();
            tree.set_attr(
                index,
                crate::data::Attr {
                    name: key,
                    namespace: None,
                    value,
                },
            );
        }
    }
    Ok(index)
}
