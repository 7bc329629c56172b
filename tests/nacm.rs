use std::sync::Arc;

use netconfd::context::{Context, ContextFlags};
use netconfd::data::{
    Data, DataFormat, DataParserFlags, DataTree, DataValidationFlags,
};
use netconfd::nacm::{
    AccessOperation, AccessRequest, NacmConfig, RuleAction,
};
use netconfd::{ErrorTag, ErrorType};

static MODULE: &str = r###"
module nacm-example {
  namespace "urn:example:nacm-example";
  prefix nx;

  container x {
    leaf value { type uint32; }
  }
  container secrets {
    leaf password { type string; }
  }
}
"###;

static NACM_XML: &str = r###"
<nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">
  <enable-nacm>true</enable-nacm>
  <read-default>permit</read-default>
  <write-default>deny</write-default>
  <exec-default>permit</exec-default>
  <groups>
    <group>
      <name>admin</name>
      <user-name>alice</user-name>
    </group>
    <group>
      <name>guest</name>
      <user-name>bob</user-name>
    </group>
    <group>
      <name>limited</name>
      <user-name>carol</user-name>
    </group>
  </groups>
  <rule-list>
    <name>admin-acl</name>
    <group>admin</group>
    <rule>
      <name>permit-all</name>
      <module-name>*</module-name>
      <access-operations>*</access-operations>
      <action>permit</action>
    </rule>
  </rule-list>
  <rule-list>
    <name>guest-acl</name>
    <group>guest</group>
    <rule>
      <name>deny-all</name>
      <module-name>*</module-name>
      <access-operations>*</access-operations>
      <action>deny</action>
    </rule>
  </rule-list>
  <rule-list>
    <name>limited-acl</name>
    <group>limited</group>
    <rule>
      <name>hide-secrets</name>
      <module-name>nacm-example</module-name>
      <path>/nacm-example:secrets</path>
      <access-operations>read</access-operations>
      <action>deny</action>
    </rule>
  </rule-list>
</nacm>
"###;

fn create_context() -> Arc<Context> {
    let mut ctx =
        Context::new(ContextFlags::empty()).expect("Failed to create context");
    ctx.parse_module_string(MODULE, &[])
        .expect("Failed to load module");
    Arc::new(ctx)
}

fn create_tree(ctx: &Arc<Context>) -> DataTree {
    DataTree::parse_string(
        ctx,
        r#"<x xmlns="urn:example:nacm-example"><value>1</value></x>
           <secrets xmlns="urn:example:nacm-example">
             <password>hunter2</password>
           </secrets>"#,
        DataFormat::XML,
        DataParserFlags::STRICT,
        DataValidationFlags::empty(),
    )
    .expect("Failed to parse data")
}

fn load_nacm(ctx: &Arc<Context>) -> NacmConfig {
    NacmConfig::from_xml(ctx, NACM_XML).expect("Failed to load NACM config")
}

#[test]
fn nacm_parse() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);

    assert!(nacm.enable_nacm);
    assert_eq!(nacm.read_default, RuleAction::Permit);
    assert_eq!(nacm.write_default, RuleAction::Deny);
    assert_eq!(nacm.groups.len(), 3);
    assert_eq!(nacm.rule_lists.len(), 3);
    assert_eq!(nacm.user_groups("alice"), vec!["admin"]);
}

#[test]
fn nacm_disabled_permits_everything() {
    let ctx = create_context();
    let mut nacm = load_nacm(&ctx);
    nacm.enable_nacm = false;
    let tree = create_tree(&ctx);

    let request = AccessRequest {
        user: "nobody",
        operation: AccessOperation::Update,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: None,
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Permit);
}

#[test]
fn nacm_recovery_user_bypass() {
    let ctx = create_context();
    let mut nacm = load_nacm(&ctx);
    nacm.recovery_user = Some("root".to_string());
    let tree = create_tree(&ctx);

    let request = AccessRequest {
        user: "root",
        operation: AccessOperation::Delete,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: None,
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Permit);
}

#[test]
fn nacm_close_session_always_permitted() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);
    let tree = create_tree(&ctx);

    let request = AccessRequest {
        user: "bob",
        operation: AccessOperation::Exec,
        module_name: Some("ietf-netconf"),
        rpc_name: Some("close-session"),
        notification_name: None,
        node: None,
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Permit);
}

#[test]
fn nacm_write_denied_for_guest() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);
    let tree = create_tree(&ctx);

    let node = tree.find_path("/nacm-example:x").unwrap().index();
    let request = AccessRequest {
        user: "bob",
        operation: AccessOperation::Update,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: Some(node),
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Deny);

    // The reported error is application-level "access denied".
    let err = NacmConfig::denied_error(AccessOperation::Update);
    assert_eq!(err.tag, ErrorTag::AccessDenied);
    assert_eq!(err.etype, ErrorType::Application);
    assert_eq!(err.to_string(), "access denied");

    let err = NacmConfig::denied_error(AccessOperation::Exec);
    assert_eq!(err.etype, ErrorType::Protocol);
}

#[test]
fn nacm_admin_permitted() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);
    let tree = create_tree(&ctx);

    let node = tree.find_path("/nacm-example:x").unwrap().index();
    let request = AccessRequest {
        user: "alice",
        operation: AccessOperation::Update,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: Some(node),
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Permit);
}

#[test]
fn nacm_default_applies_without_match() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);
    let tree = create_tree(&ctx);

    // carol's rule-list only covers reads of /secrets; a write falls
    // through to write-default deny, a read of /x to read-default permit.
    let x = tree.find_path("/nacm-example:x").unwrap().index();
    let write = AccessRequest {
        user: "carol",
        operation: AccessOperation::Update,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: Some(x),
    };
    assert_eq!(nacm.validate(&write, &tree), RuleAction::Deny);

    let read = AccessRequest {
        user: "carol",
        operation: AccessOperation::Read,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: Some(x),
    };
    assert_eq!(nacm.validate(&read, &tree), RuleAction::Permit);
}

#[test]
fn nacm_path_rule_covers_descendants() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);
    let tree = create_tree(&ctx);

    let password = tree
        .find_path("/nacm-example:secrets/password")
        .unwrap()
        .index();
    let request = AccessRequest {
        user: "carol",
        operation: AccessOperation::Read,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: Some(password),
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Deny);
}

#[test]
fn nacm_read_filtering_prunes_silently() {
    let ctx = create_context();
    let nacm = load_nacm(&ctx);
    let mut tree = create_tree(&ctx);

    nacm.filter_read("carol", &mut tree);

    // The denied subtree is gone, the rest is intact, no error surfaced.
    assert!(tree.find_path("/nacm-example:x/value").is_ok());
    assert!(tree.find_path("/nacm-example:secrets").is_err());
}

#[test]
fn nacm_first_match_wins() {
    let ctx = create_context();
    let mut nacm = load_nacm(&ctx);
    let tree = create_tree(&ctx);

    // Prepend a permit rule to the guest list; it now wins over deny-all.
    let guest_list = nacm
        .rule_lists
        .iter_mut()
        .find(|list| list.name == "guest-acl")
        .unwrap();
    let mut permit = guest_list.rules[0].clone();
    permit.name = "permit-first".to_string();
    permit.action = RuleAction::Permit;
    guest_list.rules.insert(0, permit);

    let node = tree.find_path("/nacm-example:x").unwrap().index();
    let request = AccessRequest {
        user: "bob",
        operation: AccessOperation::Update,
        module_name: Some("nacm-example"),
        rpc_name: None,
        notification_name: None,
        node: Some(node),
    };
    assert_eq!(nacm.validate(&request, &tree), RuleAction::Permit);
}
