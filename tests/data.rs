use std::sync::Arc;

use netconfd::context::{Context, ContextFlags};
use netconfd::data::{
    Data, DataDiffOp, DataFormat, DataParserFlags, DataPrinterFlags,
    DataTree, DataValidationFlags,
};
use netconfd::ErrorTag;

static MODULE: &str = r###"
module example {
  namespace "urn:example:example";
  prefix ex;

  container top {
    leaf x { type uint32; }
    list if {
      key name;
      leaf name { type string; }
      leaf mtu { type uint16; }
      leaf enabled { type boolean; default true; }
    }
    leaf-list dns { type string; }
    leaf big { type uint64; }
  }
}
"###;

static XML_TREE1: &str = r###"
<top xmlns="urn:example:example">
  <x>11</x>
  <if>
    <name>eth0</name>
    <mtu>1500</mtu>
  </if>
  <if>
    <name>eth1</name>
    <mtu>9000</mtu>
  </if>
</top>
"###;

static XML_TREE2: &str = r###"
<top xmlns="urn:example:example">
  <x>11</x>
  <if>
    <name>eth0</name>
    <mtu>1400</mtu>
  </if>
  <if>
    <name>eth2</name>
    <mtu>1500</mtu>
  </if>
</top>
"###;

fn create_context() -> Arc<Context> {
    let mut ctx =
        Context::new(ContextFlags::empty()).expect("Failed to create context");
    ctx.parse_module_string(MODULE, &[])
        .expect("Failed to load module");
    Arc::new(ctx)
}

fn parse_xml(ctx: &Arc<Context>, data: &str) -> DataTree {
    DataTree::parse_string(
        ctx,
        data,
        DataFormat::XML,
        DataParserFlags::STRICT,
        DataValidationFlags::empty(),
    )
    .expect("Failed to parse data")
}

macro_rules! assert_data_eq {
    ($dnode1:expr, $dnode2:expr) => {
        let json1 = $dnode1
            .print_string(DataFormat::JSON, DataPrinterFlags::WITH_SIBLINGS)
            .expect("Failed to print data");
        let json2 = $dnode2
            .print_string(DataFormat::JSON, DataPrinterFlags::WITH_SIBLINGS)
            .expect("Failed to print data");

        assert_eq!(json1, json2);
    };
}

#[test]
fn data_build_with_new_path() {
    let ctx = create_context();
    let mut tree = DataTree::new(ctx);

    tree.new_path("/example:top/x", Some("42")).unwrap();
    tree.new_path("/example:top/if[name='eth0']/mtu", Some("1500"))
        .unwrap();

    let x = tree.find_path("/example:top/x").unwrap();
    assert_eq!(x.value_str(), Some("42"));

    let mtu = tree
        .find_path("/example:top/if[name='eth0']/mtu")
        .unwrap();
    assert_eq!(mtu.value_str(), Some("1500"));
}

#[test]
fn data_xml_round_trip() {
    let ctx = create_context();
    let tree = parse_xml(&ctx, XML_TREE1);

    let printed = tree
        .print_string(DataFormat::XML, DataPrinterFlags::WITH_SIBLINGS)
        .expect("Failed to print data");
    let reparsed = parse_xml(&ctx, &printed);
    assert_data_eq!(&tree, &reparsed);
}

#[test]
fn data_json_round_trip() {
    let ctx = create_context();
    let tree = parse_xml(&ctx, XML_TREE1);

    let json = tree
        .print_string(DataFormat::JSON, DataPrinterFlags::WITH_SIBLINGS)
        .expect("Failed to print data");
    let reparsed = DataTree::parse_string(
        &ctx,
        &json,
        DataFormat::JSON,
        DataParserFlags::STRICT,
        DataValidationFlags::empty(),
    )
    .expect("Failed to parse JSON");
    assert_data_eq!(&tree, &reparsed);
}

#[test]
fn data_json_big_numbers_quoted() {
    let ctx = create_context();
    let mut tree = DataTree::new(ctx);
    tree.new_path("/example:top/big", Some("18446744073709551615"))
        .unwrap();

    let json = tree
        .print_string(
            DataFormat::JSON,
            DataPrinterFlags::WITH_SIBLINGS | DataPrinterFlags::SHRINK,
        )
        .unwrap();
    // uint64 exceeds the JSON safe integer range and is quoted.
    assert!(json.contains(r#""big":"18446744073709551615""#));
}

#[test]
fn data_xmlns_on_boundary_only() {
    let ctx = create_context();
    let tree = parse_xml(&ctx, XML_TREE1);

    let xml = tree
        .print_string(
            DataFormat::XML,
            DataPrinterFlags::WITH_SIBLINGS | DataPrinterFlags::SHRINK,
        )
        .unwrap();
    // One xmlns declaration at the namespace boundary, none on children.
    assert_eq!(xml.matches("xmlns=").count(), 1);
}

#[test]
fn data_diff() {
    let ctx = create_context();
    let tree1 = parse_xml(&ctx, XML_TREE1);
    let tree2 = parse_xml(&ctx, XML_TREE2);

    let diff = tree1.diff(&tree2).expect("Failed to diff");
    let changes: Vec<(DataDiffOp, String)> = diff
        .iter()
        .map(|change| (change.op, change.path.clone()))
        .collect();

    assert!(changes.contains(&(
        DataDiffOp::Replace,
        "/example:top/if[name='eth0']/mtu".to_string()
    )));
    assert!(changes.contains(&(
        DataDiffOp::Delete,
        "/example:top/if[name='eth1']".to_string()
    )));
    assert!(changes.contains(&(
        DataDiffOp::Create,
        "/example:top/if[name='eth2']".to_string()
    )));
    assert_eq!(changes.len(), 3);
}

#[test]
fn data_merge() {
    let ctx = create_context();
    let mut tree1 = parse_xml(&ctx, XML_TREE1);
    let tree2 = parse_xml(&ctx, XML_TREE2);

    tree1.merge(&tree2).expect("Failed to merge");

    // eth0 updated, eth1 kept, eth2 added.
    assert_eq!(
        tree1
            .find_path("/example:top/if[name='eth0']/mtu")
            .unwrap()
            .value_str(),
        Some("1400")
    );
    assert!(tree1.find_path("/example:top/if[name='eth1']").is_ok());
    assert!(tree1.find_path("/example:top/if[name='eth2']").is_ok());
}

#[test]
fn data_duplicate_snapshot_independence() {
    let ctx = create_context();
    let tree = parse_xml(&ctx, XML_TREE1);
    let copy = tree.duplicate().expect("Failed to duplicate");

    assert_data_eq!(&tree, &copy);
}

#[test]
fn data_find_xpath() {
    let ctx = create_context();
    let tree = parse_xml(&ctx, XML_TREE1);

    let names: Vec<String> = tree
        .find_xpath("/example:top/if/name")
        .expect("Failed to evaluate xpath")
        .map(|dnode| dnode.value_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["eth0", "eth1"]);

    let filtered: Vec<String> = tree
        .find_xpath("/example:top/if[mtu > 2000]/name")
        .expect("Failed to evaluate xpath")
        .map(|dnode| dnode.value_str().unwrap().to_string())
        .collect();
    assert_eq!(filtered, vec!["eth1"]);
}

#[test]
fn data_unknown_element_strict() {
    let ctx = create_context();
    let err = DataTree::parse_string(
        &ctx,
        r#"<top xmlns="urn:example:example"><bogus>1</bogus></top>"#,
        DataFormat::XML,
        DataParserFlags::STRICT,
        DataValidationFlags::empty(),
    )
    .unwrap_err();
    assert_eq!(err.tag, ErrorTag::UnknownElement);

    // Without STRICT the element is silently ignored.
    let tree = DataTree::parse_string(
        &ctx,
        r#"<top xmlns="urn:example:example"><bogus>1</bogus><x>1</x></top>"#,
        DataFormat::XML,
        DataParserFlags::empty(),
        DataValidationFlags::empty(),
    )
    .expect("lenient parse failed");
    assert!(tree.find_path("/example:top/x").is_ok());
}

#[test]
fn data_type_validation() {
    let ctx = create_context();
    let err = DataTree::parse_string(
        &ctx,
        r#"<top xmlns="urn:example:example"><x>not-a-number</x></top>"#,
        DataFormat::XML,
        DataParserFlags::STRICT,
        DataValidationFlags::empty(),
    )
    .unwrap_err();
    assert_eq!(err.tag, ErrorTag::InvalidValue);
}

#[test]
fn data_duplicate_list_entry_rejected() {
    let ctx = create_context();
    let err = DataTree::parse_string(
        &ctx,
        r#"<top xmlns="urn:example:example">
             <if><name>eth0</name></if>
             <if><name>eth0</name></if>
           </top>"#,
        DataFormat::XML,
        DataParserFlags::STRICT,
        DataValidationFlags::empty(),
    )
    .unwrap_err();
    assert_eq!(err.tag, ErrorTag::DataExists);
}

#[test]
fn data_leaf_list() {
    let ctx = create_context();
    let tree = parse_xml(
        &ctx,
        r#"<top xmlns="urn:example:example">
             <dns>10.0.0.1</dns>
             <dns>10.0.0.2</dns>
           </top>"#,
    );
    let json = tree
        .print_string(
            DataFormat::JSON,
            DataPrinterFlags::WITH_SIBLINGS | DataPrinterFlags::SHRINK,
        )
        .unwrap();
    assert!(json.contains(r#""dns":["10.0.0.1","10.0.0.2"]"#));
}

#[test]
fn data_node_navigation() {
    let ctx = create_context();
    let tree = parse_xml(&ctx, XML_TREE1);

    let top = tree.reference().expect("empty tree");
    assert_eq!(top.name(), "top");
    assert_eq!(top.namespace(), Some("urn:example:example"));

    let eth0 = top.find_child("if", None).expect("list entry missing");
    assert_eq!(eth0.list_key_values(), vec!["eth0"]);
    assert_eq!(eth0.path(), "/example:top/if[name='eth0']");

    let ancestors: Vec<String> =
        eth0.ancestors().map(|dnode| dnode.name().to_string()).collect();
    assert_eq!(ancestors, vec!["top"]);
}
