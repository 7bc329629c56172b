use netconfd::context::{Context, ContextFlags};
use netconfd::schema::{DataValueType, SchemaNodeKind};
use netconfd::ErrorTag;

static BASE_MODULE: &str = r###"
module example {
  namespace "urn:example:example";
  prefix ex;

  feature extended;

  identity address-family;
  identity ipv4 { base address-family; }
  identity ipv6 { base address-family; }
  identity ipv4-unicast { base ipv4; }

  typedef percent {
    type uint8 { range "0..100"; }
  }

  grouping endpoint {
    leaf host { type string; }
    leaf port { type uint16 { range "1..65535"; } }
  }

  container top {
    leaf x { type uint32; default 7; }
    leaf pct { type percent; }
    leaf family {
      type identityref { base address-family; }
    }
    list if {
      key name;
      leaf enabled { type boolean; default true; }
      leaf name { type string { length "1..64"; } }
    }
    leaf ref {
      type leafref { path "../if/name"; }
    }
    container peer {
      uses endpoint;
    }
    leaf mode {
      type enumeration {
        enum static;
        enum dynamic { value 5; }
      }
    }
    leaf guarded {
      if-feature extended;
      type string;
    }
  }

  rpc restart {
    input { leaf delay { type uint32; } }
    output { leaf done { type boolean; } }
  }

  notification link-down {
    leaf if-name { type string; }
  }
}
"###;

static AUGMENT_MODULE: &str = r###"
module example-ext {
  namespace "urn:example:example-ext";
  prefix exe;

  import example { prefix ex; }

  augment "/ex:top/ex:if" {
    leaf mtu { type uint16; }
  }
}
"###;

fn create_context() -> Context {
    let mut ctx =
        Context::new(ContextFlags::empty()).expect("Failed to create context");
    ctx.parse_module_string(BASE_MODULE, &["*"])
        .expect("Failed to load module");
    ctx
}

#[test]
fn schema_module_queries() {
    let ctx = create_context();

    let module = ctx.get_module("example", None).expect("module not found");
    assert_eq!(module.namespace(), "urn:example:example");
    assert_eq!(module.prefix(), "ex");
    assert!(ctx.get_module_ns("urn:example:example").is_some());
    assert!(ctx.get_module_prefix("ex").is_some());
    assert!(ctx.get_module("no-such-module", None).is_none());
}

#[test]
fn schema_find_path() {
    let ctx = create_context();

    let snode = ctx
        .find_path("/example:top/if/name")
        .expect("Failed to lookup schema node");
    assert_eq!(snode.kind(), SchemaNodeKind::Leaf);
    assert!(snode.is_list_key());
    assert_eq!(snode.path(), "/example:top/if/name");

    let list = ctx.find_path("/example:top/if").expect("list not found");
    assert_eq!(list.kind(), SchemaNodeKind::List);
    assert_eq!(list.list_keys(), ["name".to_string()].as_slice());

    // Keys come first in canonical child order.
    let children: Vec<&str> =
        list.children().map(|snode| snode.name()).collect();
    assert_eq!(children[0], "name");
}

#[test]
fn schema_grouping_expansion() {
    let ctx = create_context();

    // Grouping content is folded into the using scope.
    let host = ctx
        .find_path("/example:top/peer/host")
        .expect("expanded grouping leaf not found");
    assert_eq!(host.kind(), SchemaNodeKind::Leaf);
    let port = ctx.find_path("/example:top/peer/port").unwrap();
    assert_eq!(
        port.leaf_type().unwrap().base_type(),
        DataValueType::Uint16
    );
}

#[test]
fn schema_typedef_chain() {
    let ctx = create_context();

    let pct = ctx.find_path("/example:top/pct").unwrap();
    let ltype = pct.leaf_type().unwrap();
    assert_eq!(ltype.base_type(), DataValueType::Uint8);
    assert!(ltype.validate_value("100").is_ok());
    let err = ltype.validate_value("101").unwrap_err();
    assert_eq!(err.tag, ErrorTag::InvalidValue);
}

#[test]
fn schema_enum_values() {
    let ctx = create_context();

    let mode = ctx.find_path("/example:top/mode").unwrap();
    let ltype = mode.leaf_type().unwrap();
    assert_eq!(ltype.enum_value("static"), Some(0));
    assert_eq!(ltype.enum_value("dynamic"), Some(5));
    assert!(ltype.validate_value("static").is_ok());
    assert!(ltype.validate_value("bogus").is_err());
}

#[test]
fn schema_identity_derivation() {
    let ctx = create_context();
    let module = ctx.get_module("example", None).unwrap();

    assert!(module
        .identity_derived_from("ipv4-unicast", "address-family")
        .unwrap());
    assert!(module.identity_derived_from("ipv4", "address-family").unwrap());
    assert!(!module.identity_derived_from("ipv6", "ipv4").unwrap());
}

#[test]
fn schema_leafref_resolution() {
    let ctx = create_context();

    let leaf = ctx.find_path("/example:top/ref").unwrap();
    let ltype = leaf.leaf_type().unwrap();
    assert_eq!(ltype.base_type(), DataValueType::LeafRef);
    assert_eq!(ltype.leafref_path(), Some("../if/name"));
    let target = ltype.leafref_target().expect("leafref target unresolved");
    assert_eq!(target.path(), "/example:top/if/name");
}

#[test]
fn schema_features() {
    // Feature-guarded nodes are pruned when the feature is disabled.
    let mut ctx = Context::new(ContextFlags::empty()).unwrap();
    ctx.parse_module_string(BASE_MODULE, &[]).unwrap();
    assert!(ctx.find_path("/example:top/guarded").is_err());
    let module = ctx.get_module("example", None).unwrap();
    assert_eq!(module.feature_value("extended").unwrap(), false);

    // With the feature enabled the node exists.
    let ctx = create_context();
    assert!(ctx.find_path("/example:top/guarded").is_ok());
}

#[test]
fn schema_augment() {
    let mut ctx = create_context();
    ctx.parse_module_string(AUGMENT_MODULE, &[])
        .expect("Failed to load augmenting module");

    let mtu = ctx
        .find_path("/example:top/if/mtu")
        .expect("augmented leaf not found");
    assert_eq!(mtu.module().name(), "example-ext");
    // Augmented nodes are qualified by their own module in the path.
    assert_eq!(mtu.path(), "/example:top/if/example-ext:mtu");
}

#[test]
fn schema_rpc_and_notification() {
    let ctx = create_context();
    let module = ctx.get_module("example", None).unwrap();

    let rpc = module.rpcs().next().expect("rpc not found");
    assert_eq!(rpc.kind(), SchemaNodeKind::Rpc);
    assert_eq!(rpc.name(), "restart");
    let input: Vec<&str> = rpc.input().map(|snode| snode.name()).collect();
    assert_eq!(input, ["delay"]);
    let output: Vec<&str> = rpc.output().map(|snode| snode.name()).collect();
    assert_eq!(output, ["done"]);

    let notification =
        module.notifications().next().expect("notification not found");
    assert_eq!(notification.kind(), SchemaNodeKind::Notification);
    assert!(notification
        .children()
        .next()
        .unwrap()
        .is_within_notification());
}

#[test]
fn schema_traverse() {
    let ctx = create_context();
    let module = ctx.get_module("example", None).unwrap();

    let names: Vec<&str> =
        module.traverse().map(|snode| snode.name()).collect();
    assert!(names.contains(&"top"));
    assert!(names.contains(&"if"));
    assert!(names.contains(&"restart"));
    assert!(names.contains(&"link-down"));
}

#[test]
fn schema_default_and_config() {
    let ctx = create_context();

    let x = ctx.find_path("/example:top/x").unwrap();
    assert!(x.is_config());
    assert!(x.has_default());
    assert_eq!(x.default_value_canonical(), Some("7"));

    let name = ctx.find_path("/example:top/if/name").unwrap();
    assert!(name.is_mandatory());
}
