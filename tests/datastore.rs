use std::sync::Arc;

use netconfd::context::{Context, ContextFlags};
use netconfd::data::{
    Data, DataFormat, DataParserFlags, DataTree, DataValidationFlags,
};
use netconfd::datastore::{
    Datastore, Datastores, DefaultOperation, EditState, ErrorOption,
    TestOption,
};
use netconfd::transaction::{self, PluginHooks};
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
    }
    leaf ref {
      type leafref { path "../if/name"; }
    }
  }
}
"###;

// Capture engine log output in test failures (run with RUST_LOG=debug).
fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn create_context() -> Arc<Context> {
    let mut ctx =
        Context::new(ContextFlags::empty()).expect("Failed to create context");
    ctx.parse_module_string(MODULE, &[])
        .expect("Failed to load module");
    Arc::new(ctx)
}

fn create_stores(dir: &std::path::Path) -> Datastores {
    init_logging();
    Datastores::connect(create_context(), dir, true)
        .expect("Failed to connect datastores")
}

fn parse_config(stores: &Datastores, xml: &str) -> DataTree {
    DataTree::parse_string(
        stores.context(),
        xml,
        DataFormat::XML,
        DataParserFlags::STRICT | DataParserFlags::NO_VALIDATION,
        DataValidationFlags::empty(),
    )
    .expect("Failed to parse config")
}

#[test]
fn datastore_edit_merge_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    let config = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example"><x>5</x></top>"#,
    );
    stores
        .edit_config(
            Datastore::Candidate,
            &config,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .expect("edit failed");
    assert!(stores.is_dirty(Datastore::Candidate));
    assert_eq!(stores.state(Datastore::Candidate), EditState::Dirty);

    // The candidate file was written atomically alongside the cache.
    assert!(dir.path().join("candidate_db").exists());
    assert!(!dir.path().join("candidate_db.tmp").exists());

    // A fresh datastore set sees the persisted content.
    let mut reloaded = create_stores(dir.path());
    let tree = reloaded.snapshot(Datastore::Candidate).unwrap();
    assert_eq!(
        tree.find_path("/example:top/x").unwrap().value_str(),
        Some("5")
    );
}

#[test]
fn datastore_edit_create_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    let create = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example">
             <x xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0"
                nc:operation="create">5</x>
           </top>"#,
    );
    stores
        .edit_config(
            Datastore::Candidate,
            &create,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .expect("create failed");

    // Creating the same node again is data-exists.
    let err = stores
        .edit_config(
            Datastore::Candidate,
            &create,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .unwrap_err();
    assert_eq!(err.tag, ErrorTag::DataExists);

    // Deleting a missing node is data-missing.
    let delete_missing = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example">
             <if xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0"
                 nc:operation="delete"><name>eth9</name></if>
           </top>"#,
    );
    let err = stores
        .edit_config(
            Datastore::Candidate,
            &delete_missing,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::RollbackOnError,
        )
        .unwrap_err();
    assert_eq!(err.tag, ErrorTag::DataMissing);

    // Rollback left the created leaf in place.
    let tree = stores.snapshot(Datastore::Candidate).unwrap();
    assert!(tree.find_path("/example:top/x").is_ok());
}

#[test]
fn datastore_locks() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    stores.lock(Datastore::Running, 1).expect("lock failed");
    assert_eq!(stores.islocked(Datastore::Running), Some(1));

    // Session B is denied and learns the holder.
    let err = stores.lock(Datastore::Running, 2).unwrap_err();
    assert_eq!(err.tag, ErrorTag::LockDenied);
    assert_eq!(err.info.as_deref(), Some("1"));

    // Unlock is idempotent; holder death releases everything.
    stores.unlock(Datastore::Running);
    stores.unlock(Datastore::Running);
    stores.lock(Datastore::Running, 2).expect("relock failed");
    stores.unlock_session(2);
    assert_eq!(stores.islocked(Datastore::Running), None);
}

#[test]
fn datastore_copy_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    let config = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example"><x>9</x></top>"#,
    );
    stores
        .edit_config(
            Datastore::Running,
            &config,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .unwrap();

    stores.copy(Datastore::Running, Datastore::Startup).unwrap();
    assert!(stores.exists(Datastore::Startup));
    let tree = stores.snapshot(Datastore::Startup).unwrap();
    assert!(tree.find_path("/example:top/x").is_ok());

    stores.delete(Datastore::Startup).unwrap();
    assert!(!dir.path().join("startup_db").exists());
}

#[test]
fn commit_swaps_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    let config = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example"><x>5</x></top>"#,
    );
    stores
        .edit_config(
            Datastore::Candidate,
            &config,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .unwrap();

    let diff = transaction::commit(
        &mut stores,
        &[],
        Datastore::Candidate,
        Datastore::Running,
    )
    .expect("commit failed");
    assert!(!diff.is_empty());
    assert_eq!(stores.state(Datastore::Candidate), EditState::Idle);

    let running = stores.snapshot(Datastore::Running).unwrap();
    assert_eq!(
        running.find_path("/example:top/x").unwrap().value_str(),
        Some("5")
    );
}

#[test]
fn commit_leafref_failure_leaves_running_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    // ref points at a non-existent interface name.
    let config = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example"><ref>eth0</ref></top>"#,
    );
    stores
        .edit_config(
            Datastore::Candidate,
            &config,
            DefaultOperation::Merge,
            TestOption::Set,
            ErrorOption::StopOnError,
        )
        .unwrap();

    let err = transaction::commit(
        &mut stores,
        &[],
        Datastore::Candidate,
        Datastore::Running,
    )
    .unwrap_err();
    assert_eq!(err.tag, ErrorTag::DataMissing);
    assert_eq!(stores.state(Datastore::Candidate), EditState::Dirty);

    let running = stores.snapshot(Datastore::Running).unwrap();
    assert!(running.find_path("/example:top/ref").is_err());
}

#[test]
fn commit_snapshot_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    // Two readers take snapshots before the commit.
    let r1 = stores.snapshot(Datastore::Running).unwrap();
    let r2 = stores.snapshot(Datastore::Running).unwrap();
    assert!(r1.is_empty());

    let config = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example"><x>5</x></top>"#,
    );
    stores
        .edit_config(
            Datastore::Candidate,
            &config,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .unwrap();
    transaction::commit(
        &mut stores,
        &[],
        Datastore::Candidate,
        Datastore::Running,
    )
    .unwrap();

    // Pre-commit snapshots still observe the old tree.
    assert!(r1.is_empty());
    assert!(r2.is_empty());

    // A new reader observes the committed tree.
    let r3 = stores.snapshot(Datastore::Running).unwrap();
    assert!(r3.find_path("/example:top/x").is_ok());
}

#[test]
fn commit_against_tmp_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());

    let err = transaction::commit(
        &mut stores,
        &[],
        Datastore::Tmp,
        Datastore::Running,
    )
    .unwrap_err();
    assert_eq!(err.tag, ErrorTag::OperationNotSupported);

    let err = transaction::validate(&mut stores, Datastore::Tmp).unwrap_err();
    assert_eq!(err.tag, ErrorTag::OperationNotSupported);
}

#[test]
fn plugin_transaction_abort_discipline() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COMMITS: AtomicUsize = AtomicUsize::new(0);
    static ABORTS: AtomicUsize = AtomicUsize::new(0);

    fn ok_phase(
        _: &transaction::TransactionEvent<'_>,
    ) -> Result<(), String> {
        Ok(())
    }
    fn count_commit(
        _: &transaction::TransactionEvent<'_>,
    ) -> Result<(), String> {
        COMMITS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn fail_validate(
        _: &transaction::TransactionEvent<'_>,
    ) -> Result<(), String> {
        Err("refused by test plugin".to_string())
    }
    fn count_abort(
        _: &transaction::TransactionEvent<'_>,
    ) -> Result<(), String> {
        ABORTS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    let dir = tempfile::tempdir().unwrap();
    let mut stores = create_stores(dir.path());
    let config = parse_config(
        &stores,
        r#"<top xmlns="urn:example:example"><x>5</x></top>"#,
    );
    stores
        .edit_config(
            Datastore::Candidate,
            &config,
            DefaultOperation::Merge,
            TestOption::TestThenSet,
            ErrorOption::StopOnError,
        )
        .unwrap();

    let mut good = PluginHooks::new("good");
    good.on_begin = Some(ok_phase);
    good.on_commit = Some(count_commit);
    good.on_abort = Some(count_abort);
    let mut bad = PluginHooks::new("bad");
    bad.on_begin = Some(ok_phase);
    bad.on_validate = Some(fail_validate);
    bad.on_abort = Some(count_abort);

    let err = transaction::commit(
        &mut stores,
        &[good, bad],
        Datastore::Candidate,
        Datastore::Running,
    )
    .unwrap_err();
    assert_eq!(err.tag, ErrorTag::OperationFailed);
    assert!(err.to_string().contains("refused by test plugin"));

    // No commit phase ran; both notified plugins saw the abort.
    assert_eq!(COMMITS.load(Ordering::SeqCst), 0);
    assert_eq!(ABORTS.load(Ordering::SeqCst), 2);

    // Running is untouched.
    let running = stores.snapshot(Datastore::Running).unwrap();
    assert!(running.is_empty());
}
