use netconfd::config::Config;
use netconfd::nacm::NacmConfig;
use netconfd::rpc::Engine;

static MODULE: &str = r###"
module example {
  namespace "urn:example:example";
  prefix ex;

  container top {
    leaf x { type uint32; }
    list if {
      key name;
      leaf name { type string; }
    }
    leaf ref {
      type leafref { path "../if/name"; }
    }
  }

  rpc restart;
}
"###;

static NACM_DENY_WRITES: &str = r###"
<nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">
  <enable-nacm>true</enable-nacm>
  <read-default>permit</read-default>
  <write-default>deny</write-default>
  <exec-default>permit</exec-default>
  <groups>
    <group>
      <name>guest</name>
      <user-name>bob</user-name>
    </group>
  </groups>
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
</nacm>
"###;

static NACM_DENY_RESTART: &str = r###"
<nacm xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-acm">
  <enable-nacm>true</enable-nacm>
  <read-default>permit</read-default>
  <write-default>permit</write-default>
  <exec-default>permit</exec-default>
  <groups>
    <group>
      <name>guest</name>
      <user-name>bob</user-name>
    </group>
  </groups>
  <rule-list>
    <name>guest-acl</name>
    <group>guest</group>
    <rule>
      <name>deny-restart</name>
      <module-name>example</module-name>
      <rpc-name>restart</rpc-name>
      <access-operations>exec</access-operations>
      <action>deny</action>
    </rule>
  </rule-list>
</nacm>
"###;

// Capture engine log output in test failures (run with RUST_LOG=debug).
fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn create_engine(dir: &std::path::Path) -> Engine {
    init_logging();
    let yang_dir = dir.join("yang");
    std::fs::create_dir_all(&yang_dir).unwrap();
    std::fs::write(yang_dir.join("example.yang"), MODULE).unwrap();

    let config = Config {
        yang_dirs: vec![yang_dir],
        yang_main: Some("example".to_string()),
        datastore_dir: dir.join("db"),
        ..Default::default()
    };
    let mut engine = Engine::new(&config).expect("Failed to create engine");
    engine.startup().expect("Failed to start engine");
    engine
}

#[test]
fn rpc_edit_and_commit() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session = engine.session_open("admin");

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="101">
             <edit-config>
               <target><candidate/></target>
               <config>
                 <top xmlns="urn:example:example"><x>0</x></top>
               </config>
             </edit-config>
           </rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="102"><commit/></rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="103">
             <get-config>
               <source><running/></source>
               <filter type="xpath" select="/example:top/x"/>
             </get-config>
           </rpc>"#,
    );
    assert!(reply.contains("<x>0</x>"), "unexpected reply: {}", reply);
    assert!(reply.contains("message-id=\"103\""));
}

#[test]
fn rpc_commit_leafref_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session = engine.session_open("admin");

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="1">
             <edit-config>
               <target><candidate/></target>
               <test-option>set</test-option>
               <config>
                 <top xmlns="urn:example:example"><ref>eth0</ref></top>
               </config>
             </edit-config>
           </rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);

    let reply = engine
        .handle_request(session, r#"<rpc message-id="2"><commit/></rpc>"#);
    assert!(
        reply.contains("<error-tag>data-missing</error-tag>"),
        "unexpected reply: {}",
        reply
    );

    // running is unchanged.
    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="3">
             <get-config><source><running/></source></get-config>
           </rpc>"#,
    );
    assert!(!reply.contains("eth0"), "unexpected reply: {}", reply);
}

#[test]
fn rpc_nacm_write_denied() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let nacm =
        NacmConfig::from_xml(engine.context(), NACM_DENY_WRITES).unwrap();
    engine.set_nacm(nacm);

    let session = engine.session_open("bob");
    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="1">
             <edit-config>
               <target><candidate/></target>
               <config>
                 <top xmlns="urn:example:example"><x>1</x></top>
               </config>
             </edit-config>
           </rpc>"#,
    );
    assert!(reply.contains("<error-tag>access-denied</error-tag>"));
    assert!(reply.contains("<error-type>application</error-type>"));
    assert!(reply.contains("<error-severity>error</error-severity>"));
    assert!(reply.contains("<error-message>access denied</error-message>"));
}

#[test]
fn rpc_lock_contention() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session_a = engine.session_open("alice");
    let session_b = engine.session_open("bob");

    let reply = engine.handle_request(
        session_a,
        r#"<rpc message-id="1"><lock><target><running/></target></lock></rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);

    let reply = engine.handle_request(
        session_b,
        r#"<rpc message-id="2"><lock><target><running/></target></lock></rpc>"#,
    );
    assert!(reply.contains("<error-tag>lock-denied</error-tag>"));
    assert!(
        reply.contains(&format!("<session-id>{}</session-id>", session_a)),
        "unexpected reply: {}",
        reply
    );

    // Closing session A releases the lock.
    engine.handle_request(
        session_a,
        r#"<rpc message-id="3"><close-session/></rpc>"#,
    );
    let reply = engine.handle_request(
        session_b,
        r#"<rpc message-id="4"><lock><target><running/></target></lock></rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);
}

#[test]
fn rpc_discard_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session = engine.session_open("admin");

    engine.handle_request(
        session,
        r#"<rpc message-id="1">
             <edit-config>
               <target><candidate/></target>
               <config>
                 <top xmlns="urn:example:example"><x>5</x></top>
               </config>
             </edit-config>
           </rpc>"#,
    );
    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="2"><discard-changes/></rpc>"#,
    );
    assert!(reply.contains("<ok/>"));

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="3">
             <get-config><source><candidate/></source></get-config>
           </rpc>"#,
    );
    assert!(reply.contains("<data/>"), "unexpected reply: {}", reply);
}

#[test]
fn rpc_validate_and_tmp_guard() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session = engine.session_open("admin");

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="1">
             <validate><source><candidate/></source></validate>
           </rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="2">
             <validate><source><tmp/></source></validate>
           </rpc>"#,
    );
    assert!(reply.contains("<error-tag>operation-not-supported</error-tag>"));
}

#[test]
fn rpc_kill_session_releases_locks() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session_a = engine.session_open("alice");
    let session_b = engine.session_open("bob");

    engine.handle_request(
        session_a,
        r#"<rpc message-id="1"><lock><target><candidate/></target></lock></rpc>"#,
    );
    let request = format!(
        r#"<rpc message-id="2"><kill-session><session-id>{}</session-id></kill-session></rpc>"#,
        session_a
    );
    let reply = engine.handle_request(session_b, &request);
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);

    let reply = engine.handle_request(
        session_b,
        r#"<rpc message-id="3"><lock><target><candidate/></target></lock></rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);
}

#[test]
fn rpc_unknown_operation() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session = engine.session_open("admin");

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="1"><frobnicate/></rpc>"#,
    );
    assert!(reply.contains("<error-tag>operation-not-supported</error-tag>"));
}

#[test]
fn rpc_nacm_exec_rule_matches_owning_module() {
    fn restart_handler(
        op: &netconfd::data::DataNodeRef<'_>,
    ) -> Result<Option<netconfd::data::DataTree>, String> {
        use netconfd::data::Data;
        if op.name() != "restart" {
            return Ok(None);
        }
        Ok(Some(netconfd::data::DataTree::new(
            op.tree().context().clone(),
        )))
    }

    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let nacm =
        NacmConfig::from_xml(engine.context(), NACM_DENY_RESTART).unwrap();
    engine.set_nacm(nacm);
    let mut plugin = netconfd::transaction::PluginHooks::new("restarter");
    plugin.on_rpc = Some(restart_handler);
    engine.register_plugin(plugin).unwrap();

    // The rule names the RPC's owning module ("example", resolved from the
    // request element's namespace), so bob is denied at the exec level.
    let bob = engine.session_open("bob");
    let reply = engine.handle_request(
        bob,
        r#"<rpc message-id="1"><restart xmlns="urn:example:example"/></rpc>"#,
    );
    assert!(
        reply.contains("<error-tag>access-denied</error-tag>"),
        "unexpected reply: {}",
        reply
    );
    assert!(reply.contains("<error-type>protocol</error-type>"));

    // A user outside the group falls through to exec-default permit and
    // reaches the plugin.
    let alice = engine.session_open("alice");
    let reply = engine.handle_request(
        alice,
        r#"<rpc message-id="2"><restart xmlns="urn:example:example"/></rpc>"#,
    );
    assert!(reply.contains("<data/>"), "unexpected reply: {}", reply);
}

#[test]
fn rpc_subscription_receives_commit_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = create_engine(dir.path());
    let session = engine.session_open("admin");

    let reply = engine.handle_request(
        session,
        r#"<rpc message-id="1">
             <create-subscription
                 xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"/>
           </rpc>"#,
    );
    assert!(reply.contains("<ok/>"), "unexpected reply: {}", reply);
    let mut receivers = engine.take_event_receivers(session);
    assert_eq!(receivers.len(), 1);
    let mut receiver = receivers.pop().unwrap();

    engine.handle_request(
        session,
        r#"<rpc message-id="2">
             <edit-config>
               <target><candidate/></target>
               <config>
                 <top xmlns="urn:example:example"><x>1</x></top>
               </config>
             </edit-config>
           </rpc>"#,
    );
    engine.handle_request(session, r#"<rpc message-id="3"><commit/></rpc>"#);

    let event = receiver.try_recv().expect("no event after commit");
    let rendered = netconfd::rpc::render_notification(&event).unwrap();
    assert!(rendered.contains("<notification"));
    assert!(rendered.contains("netconf-config-change"));
    assert!(rendered.contains("<operation>create</operation>"));
}
