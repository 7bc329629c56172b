//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! NETCONF operation dispatch.
//!
//! The [`Engine`] is the explicit environment value threaded through every
//! top-level operation: schema context, datastores, NACM state, plugin
//! registry and the notification bus. The transport layer hands it parsed
//! XML `<rpc>` requests and receives `<rpc-reply>` documents; session
//! framing, hello exchange and socket plumbing live outside the engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::{Config, NacmMode};
use crate::context::{Context, ContextFlags};
use crate::data::{
    Data, DataFormat, DataNodeRef, DataParserFlags, DataPrinterFlags,
    DataTree, DataValidationFlags,
};
use crate::datastore::{
    Datastore, Datastores, DefaultOperation, ErrorOption, SessionId,
    TestOption,
};
use crate::error::{Error, ErrorTag, Result};
use crate::nacm::{AccessOperation, AccessRequest, NacmConfig, RuleAction};
use crate::notification::{Event, NotificationBus, SubscriptionId};
use crate::transaction::{self, PluginHooks};

/// NETCONF base namespace.
pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// NETCONF notification namespace.
pub const NOTIFICATION_NS: &str =
    "urn:ietf:params:xml:ns:netconf:notification:1.0";

const CONFIG_CHANGE_NS: &str =
    "urn:ietf:params:xml:ns:yang:ietf-netconf-notifications";

/// A front-end session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub user: String,
    subscriptions: Vec<SubscriptionId>,
}

/// The engine: schema, datastores, access control, plugins and the
/// notification bus behind a single handle.
pub struct Engine {
    context: Arc<Context>,
    stores: Datastores,
    plugins: Vec<PluginHooks>,
    nacm: NacmConfig,
    nacm_mode: NacmMode,
    bus: NotificationBus,
    sessions: HashMap<SessionId, Session>,
    next_session: SessionId,
    receivers: HashMap<SessionId, Vec<mpsc::Receiver<Arc<Event>>>>,
}

// ===== impl Engine =====

impl Engine {
    /// Build an engine from the startup configuration: load the YANG
    /// modules, connect the datastores and read the NACM setup.
    pub fn new(config: &Config) -> Result<Engine> {
        let mut context = Context::new(ContextFlags::empty())?;
        for dir in &config.yang_dirs {
            context.set_searchdir(dir)?;
        }
        if let Some(main) = &config.yang_main {
            context.load_module(main, None, &["*"])?;
        }
        let context = Arc::new(context);

        let stores = Datastores::connect(
            context.clone(),
            &config.datastore_dir,
            config.cache_enabled,
        )?;

        let mut nacm = match config.nacm_mode {
            NacmMode::Disabled => NacmConfig::default(),
            NacmMode::External => {
                let path = config.nacm_file.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorTag::MissingElement,
                        "nacm-mode is external but no nacm-file is set",
                    )
                })?;
                let text =
                    std::fs::read_to_string(path).map_err(|err| {
                        Error::new(
                            ErrorTag::OperationFailed,
                            format!(
                                "cannot read NACM file {}: {}",
                                path.display(),
                                err
                            ),
                        )
                    })?;
                NacmConfig::from_xml(&context, &text)?
            }
            // Internal rules are read from running during startup().
            NacmMode::Internal => NacmConfig::default(),
        };
        nacm.recovery_user = config.nacm_recovery_user.clone();

        Ok(Engine {
            context,
            stores,
            plugins: Vec::new(),
            nacm,
            nacm_mode: config.nacm_mode,
            bus: NotificationBus::new(),
            sessions: HashMap::new(),
            next_session: 1,
            receivers: HashMap::new(),
        })
    }

    /// Finish booting: promote `startup` into `running` when present, seed
    /// `candidate` from `running` and read internal NACM rules.
    pub fn startup(&mut self) -> Result<()> {
        if self.stores.exists(Datastore::Startup) {
            self.stores.copy(Datastore::Startup, Datastore::Running)?;
            info!("startup datastore promoted to running");
        } else {
            // Force a load so a corrupt running file fails the boot.
            self.stores.snapshot(Datastore::Running)?;
        }
        self.stores.copy(Datastore::Running, Datastore::Candidate)?;
        self.reload_nacm()?;
        Ok(())
    }

    /// Register a plugin capability record and run its start hook.
    pub fn register_plugin(&mut self, hooks: PluginHooks) -> Result<()> {
        if let Some(on_start) = hooks.on_start {
            on_start().map_err(|msg| {
                Error::new(
                    ErrorTag::OperationFailed,
                    format!("plugin '{}' failed to start: {}", hooks.name, msg),
                )
            })?;
        }
        debug!("registered plugin '{}'", hooks.name);
        self.plugins.push(hooks);
        Ok(())
    }

    /// Run plugin exit hooks, in reverse registration order.
    pub fn shutdown(&mut self) {
        for plugin in self.plugins.iter().rev() {
            if let Some(on_exit) = plugin.on_exit {
                if let Err(msg) = on_exit() {
                    warn!("plugin '{}' exit hook: {}", plugin.name, msg);
                }
            }
        }
        self.stores.disconnect();
    }

    /// The schema context.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The datastore set.
    pub fn datastores(&mut self) -> &mut Datastores {
        &mut self.stores
    }

    /// The notification bus.
    pub fn bus(&mut self) -> &mut NotificationBus {
        &mut self.bus
    }

    /// Replace the NACM configuration (used by the external-file mode and
    /// by tests).
    pub fn set_nacm(&mut self, nacm: NacmConfig) {
        self.nacm = nacm;
    }

    // Internal NACM rules live in running; re-read them after each commit.
    fn reload_nacm(&mut self) -> Result<()> {
        if self.nacm_mode != NacmMode::Internal {
            return Ok(());
        }
        let running = self.stores.snapshot(Datastore::Running)?;
        let recovery_user = self.nacm.recovery_user.take();
        self.nacm = NacmConfig::from_tree(&running)?;
        self.nacm.recovery_user = recovery_user;
        Ok(())
    }

    // ===== session management =====

    /// Open a new session for the given user.
    pub fn session_open(&mut self, user: &str) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(
            id,
            Session {
                id,
                user: user.to_string(),
                subscriptions: Vec::new(),
            },
        );
        info!("session {} opened for user '{}'", id, user);
        id
    }

    /// Close a session: release its locks and subscriptions. Also used on
    /// front-end disconnect.
    pub fn session_close(&mut self, session: SessionId) {
        if let Some(entry) = self.sessions.remove(&session) {
            for subscription in entry.subscriptions {
                self.bus.unsubscribe(subscription);
            }
        }
        self.stores.unlock_session(session);
        self.receivers.remove(&session);
        info!("session {} closed", session);
    }

    /// Event receivers created by `create-subscription` on this session,
    /// handed over to the transport for draining.
    pub fn take_event_receivers(
        &mut self,
        session: SessionId,
    ) -> Vec<mpsc::Receiver<Arc<Event>>> {
        self.receivers.remove(&session).unwrap_or_default()
    }

    fn session_user(&self, session: SessionId) -> String {
        self.sessions
            .get(&session)
            .map(|entry| entry.user.clone())
            .unwrap_or_default()
    }

    // ===== request entry point =====

    /// Handle one `<rpc>` request and produce the `<rpc-reply>` document.
    pub fn handle_request(
        &mut self,
        session: SessionId,
        request: &str,
    ) -> String {
        let parsed = DataTree::parse_string(
            &self.context,
            request,
            DataFormat::XML,
            DataParserFlags::SCHEMALESS,
            DataValidationFlags::empty(),
        );
        let tree = match parsed {
            Ok(tree) => tree,
            Err(err) => return render_error_reply(None, &err),
        };
        let Some(rpc) = tree.top_nodes().find(|dnode| dnode.name() == "rpc")
        else {
            let err = Error::rpc(
                ErrorTag::MalformedMessage,
                "request has no rpc element",
            );
            return render_error_reply(None, &err);
        };
        let message_id = rpc.attr("message-id").map(str::to_string);
        let Some(op) = rpc.children().next() else {
            let err = Error::rpc(
                ErrorTag::MissingElement,
                "rpc element carries no operation",
            );
            return render_error_reply(message_id.as_deref(), &err);
        };

        match self.dispatch(session, &op) {
            Ok(ReplyBody::Ok) => render_ok_reply(message_id.as_deref()),
            Ok(ReplyBody::Data(inner)) => {
                render_data_reply(message_id.as_deref(), &inner)
            }
            Err(err) => render_error_reply(message_id.as_deref(), &err),
        }
    }

    fn dispatch(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let op_name = op.name().to_string();
        self.check_exec(session, op)?;
        match op_name.as_str() {
            "get" => self.op_get(session, op),
            "get-config" => self.op_get_config(session, op),
            "edit-config" => self.op_edit_config(session, op),
            "copy-config" => self.op_copy_config(session, op),
            "delete-config" => self.op_delete_config(session, op),
            "lock" => self.op_lock(session, op),
            "unlock" => self.op_unlock(session, op),
            "commit" => self.op_commit(session),
            "discard-changes" => {
                transaction::discard_changes(&mut self.stores)?;
                Ok(ReplyBody::Ok)
            }
            "validate" => self.op_validate(op),
            "close-session" => {
                self.session_close(session);
                Ok(ReplyBody::Ok)
            }
            "kill-session" => self.op_kill_session(session, op),
            "create-subscription" => self.op_create_subscription(session, op),
            _ => self.op_plugin_rpc(op),
        }
    }

    // ===== NACM gates =====

    fn check_exec(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<()> {
        let rpc_name = op.name().to_string();
        // The base protocol operations are governed by the data-level read
        // and write checks; exec rules gate plugin-supplied RPCs.
        if matches!(
            rpc_name.as_str(),
            "get" | "get-config"
                | "edit-config"
                | "copy-config"
                | "delete-config"
                | "lock"
                | "unlock"
                | "commit"
                | "discard-changes"
                | "validate"
                | "close-session"
                | "kill-session"
                | "create-subscription"
        ) {
            return Ok(());
        }
        let module_name = self.rpc_owner_module(op, &rpc_name);
        let user = self.session_user(session);
        let running = self.stores.snapshot(Datastore::Running)?;
        let request = AccessRequest {
            user: &user,
            operation: AccessOperation::Exec,
            module_name: module_name.as_deref(),
            rpc_name: Some(&rpc_name),
            notification_name: None,
            node: None,
        };
        match self.nacm.validate(&request, &running) {
            RuleAction::Permit => Ok(()),
            RuleAction::Deny => {
                Err(NacmConfig::denied_error(AccessOperation::Exec))
            }
        }
    }

    // The module owning an RPC, so module-scoped exec rules match. The
    // request element's namespace decides; an RPC sent without one is
    // looked up by name across the loaded modules.
    fn rpc_owner_module(
        &self,
        op: &DataNodeRef<'_>,
        rpc_name: &str,
    ) -> Option<String> {
        if let Some(module) =
            op.namespace().and_then(|ns| self.context.get_module_ns(ns))
        {
            return Some(module.name().to_string());
        }
        self.context
            .modules()
            .find(|module| module.rpcs().any(|rpc| rpc.name() == rpc_name))
            .map(|module| module.name().to_string())
    }

    // Every node of an edit-config payload is write-checked before the edit
    // is applied.
    fn check_write(
        &mut self,
        session: SessionId,
        config: &DataTree,
        default_op: DefaultOperation,
    ) -> Result<()> {
        let user = self.session_user(session);
        for dnode in config.traverse() {
            let op = match dnode.attr("operation") {
                Some("create") => AccessOperation::Create,
                Some("delete") | Some("remove") => AccessOperation::Delete,
                Some(_) => AccessOperation::Update,
                None => match default_op {
                    DefaultOperation::Create => AccessOperation::Create,
                    DefaultOperation::Delete | DefaultOperation::Remove => {
                        AccessOperation::Delete
                    }
                    _ => AccessOperation::Update,
                },
            };
            let module_name = dnode
                .schema()
                .map(|snode| snode.module().name().to_string());
            let request = AccessRequest {
                user: &user,
                operation: op,
                module_name: module_name.as_deref(),
                rpc_name: None,
                notification_name: None,
                node: Some(dnode.index),
            };
            if self.nacm.validate(&request, config) == RuleAction::Deny {
                return Err(NacmConfig::denied_error(op)
                    .with_path(dnode.path()));
            }
        }
        Ok(())
    }

    // ===== operations =====

    fn op_get(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let filter = op_filter(op)?;
        let running = self.stores.snapshot(Datastore::Running)?;
        let mut result = (*running).clone();

        // Merge plugin-provided state data.
        for plugin in &self.plugins {
            if let Some(on_statedata) = plugin.on_statedata {
                let state = on_statedata(&self.context).map_err(|msg| {
                    Error::new(
                        ErrorTag::OperationFailed,
                        format!(
                            "plugin '{}' state data: {}",
                            plugin.name, msg
                        ),
                    )
                })?;
                result.merge(&state)?;
            }
        }

        let mut result = crate::datastore::extract_filtered(
            &result,
            filter.as_deref(),
            &HashMap::new(),
        )?;
        let user = self.session_user(session);
        self.nacm.filter_read(&user, &mut result);
        Ok(ReplyBody::Data(render_data(&result)?))
    }

    fn op_get_config(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let source = op_datastore(op, "source")?;
        let filter = op_filter(op)?;
        let mut result = self.stores.get_config(
            source,
            filter.as_deref(),
            &HashMap::new(),
        )?;
        let user = self.session_user(session);
        self.nacm.filter_read(&user, &mut result);
        Ok(ReplyBody::Data(render_data(&result)?))
    }

    fn op_edit_config(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let target = op_datastore(op, "target")?;
        self.stores.check_writable(target, session)?;

        let default_op = match op
            .find_child("default-operation", None)
            .and_then(|dnode| dnode.value_str())
        {
            None | Some("merge") => DefaultOperation::Merge,
            Some("replace") => DefaultOperation::Replace,
            Some("none") => DefaultOperation::None,
            Some(other) => {
                return Err(Error::protocol(
                    ErrorTag::InvalidValue,
                    format!("unknown default-operation '{}'", other),
                ));
            }
        };
        let test_option = match op
            .find_child("test-option", None)
            .and_then(|dnode| dnode.value_str())
        {
            None | Some("test-then-set") => TestOption::TestThenSet,
            Some("set") => TestOption::Set,
            Some("test-only") => TestOption::TestOnly,
            Some(other) => {
                return Err(Error::protocol(
                    ErrorTag::InvalidValue,
                    format!("unknown test-option '{}'", other),
                ));
            }
        };
        let error_option = match op
            .find_child("error-option", None)
            .and_then(|dnode| dnode.value_str())
        {
            None | Some("stop-on-error") => ErrorOption::StopOnError,
            Some("continue-on-error") => ErrorOption::ContinueOnError,
            Some("rollback-on-error") => ErrorOption::RollbackOnError,
            Some(other) => {
                return Err(Error::protocol(
                    ErrorTag::InvalidValue,
                    format!("unknown error-option '{}'", other),
                ));
            }
        };

        let config_node = op.find_child("config", None).ok_or_else(|| {
            Error::protocol(
                ErrorTag::MissingElement,
                "edit-config has no config element",
            )
        })?;

        // Bind the payload against the schema (deferred BIND of the
        // schemaless request tree).
        let mut config = DataTree::new(self.context.clone());
        for child in config_node.node().children.clone() {
            config.import_bound(None, op.tree(), child)?;
        }

        self.check_write(session, &config, default_op)?;
        self.stores.edit_config(
            target,
            &config,
            default_op,
            test_option,
            error_option,
        )?;
        Ok(ReplyBody::Ok)
    }

    fn op_copy_config(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let source = op_datastore(op, "source")?;
        let target = op_datastore(op, "target")?;
        self.stores.check_writable(target, session)?;
        self.stores.copy(source, target)?;
        Ok(ReplyBody::Ok)
    }

    fn op_delete_config(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let target = op_datastore(op, "target")?;
        if target == Datastore::Running {
            return Err(Error::protocol(
                ErrorTag::OperationNotSupported,
                "delete-config of running is not allowed",
            ));
        }
        self.stores.check_writable(target, session)?;
        self.stores.delete(target)?;
        Ok(ReplyBody::Ok)
    }

    fn op_lock(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let target = op_datastore(op, "target")?;
        self.stores.lock(target, session)?;
        Ok(ReplyBody::Ok)
    }

    fn op_unlock(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let target = op_datastore(op, "target")?;
        if let Some(holder) = self.stores.islocked(target) {
            if holder != session {
                return Err(Error::protocol(
                    ErrorTag::LockDenied,
                    "lock is held by another session",
                )
                .with_info(holder.to_string()));
            }
        }
        self.stores.unlock(target);
        Ok(ReplyBody::Ok)
    }

    fn op_commit(&mut self, session: SessionId) -> Result<ReplyBody> {
        self.stores.check_writable(Datastore::Running, session)?;
        let diff = transaction::commit(
            &mut self.stores,
            &self.plugins,
            Datastore::Candidate,
            Datastore::Running,
        )?;
        self.reload_nacm()?;
        self.publish_config_change(&diff)?;
        Ok(ReplyBody::Ok)
    }

    fn op_validate(&mut self, op: &DataNodeRef<'_>) -> Result<ReplyBody> {
        let source = op_datastore(op, "source")?;
        transaction::validate(&mut self.stores, source)?;
        Ok(ReplyBody::Ok)
    }

    fn op_kill_session(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let target: SessionId = op
            .find_child("session-id", None)
            .and_then(|dnode| dnode.value_str())
            .and_then(|body| body.trim().parse().ok())
            .ok_or_else(|| {
                Error::protocol(
                    ErrorTag::MissingElement,
                    "kill-session has no session-id",
                )
            })?;
        if target == session {
            return Err(Error::protocol(
                ErrorTag::InvalidValue,
                "cannot kill the current session",
            ));
        }
        self.session_close(target);
        Ok(ReplyBody::Ok)
    }

    fn op_create_subscription(
        &mut self,
        session: SessionId,
        op: &DataNodeRef<'_>,
    ) -> Result<ReplyBody> {
        let stream = op
            .find_child("stream", None)
            .and_then(|dnode| dnode.value_str())
            .unwrap_or("NETCONF")
            .to_string();
        let start_time = op
            .find_child("startTime", None)
            .and_then(|dnode| dnode.value_str())
            .map(parse_datetime)
            .transpose()?;
        let stop_time = op
            .find_child("stopTime", None)
            .and_then(|dnode| dnode.value_str())
            .map(parse_datetime)
            .transpose()?;
        let filter = op
            .find_child("filter", None)
            .and_then(|dnode| dnode.attr("select"))
            .map(str::to_string);

        let (id, receiver) =
            self.bus.subscribe(&stream, start_time, stop_time, filter)?;
        if let Some(id) = id {
            if let Some(entry) = self.sessions.get_mut(&session) {
                entry.subscriptions.push(id);
            }
        }
        self.receivers.entry(session).or_default().push(receiver);
        Ok(ReplyBody::Ok)
    }

    fn op_plugin_rpc(&mut self, op: &DataNodeRef<'_>) -> Result<ReplyBody> {
        for plugin in &self.plugins {
            if let Some(on_rpc) = plugin.on_rpc {
                match on_rpc(op) {
                    Ok(Some(output)) => {
                        return Ok(ReplyBody::Data(render_data(&output)?));
                    }
                    Ok(None) => continue,
                    Err(msg) => {
                        return Err(Error::new(
                            ErrorTag::OperationFailed,
                            format!("plugin '{}': {}", plugin.name, msg),
                        ));
                    }
                }
            }
        }
        Err(Error::protocol(
            ErrorTag::OperationNotSupported,
            format!("unknown operation '{}'", op.name()),
        ))
    }

    // Emit a config-change event onto the NETCONF stream after a commit.
    fn publish_config_change(
        &mut self,
        diff: &crate::data::DataDiff,
    ) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        let mut payload = DataTree::new(self.context.clone());
        let root = payload.push_node(
            None,
            "netconf-config-change".to_string(),
            Some(CONFIG_CHANGE_NS.to_string()),
            None,
        );
        for change in diff.iter() {
            let edit = payload.push_node(
                Some(root),
                "edit".to_string(),
                Some(CONFIG_CHANGE_NS.to_string()),
                None,
            );
            let target = payload.push_node(
                Some(edit),
                "target".to_string(),
                Some(CONFIG_CHANGE_NS.to_string()),
                None,
            );
            payload.set_value(target, Some(change.path.clone()));
            let operation = payload.push_node(
                Some(edit),
                "operation".to_string(),
                Some(CONFIG_CHANGE_NS.to_string()),
                None,
            );
            let op_name = match change.op {
                crate::data::DataDiffOp::Create => "create",
                crate::data::DataDiffOp::Delete => "delete",
                crate::data::DataDiffOp::Replace => "replace",
            };
            payload.set_value(operation, Some(op_name.to_string()));
        }
        self.bus.publish("NETCONF", payload)
    }
}

enum ReplyBody {
    Ok,
    Data(String),
}

// ===== request helpers =====

fn op_datastore(op: &DataNodeRef<'_>, which: &str) -> Result<Datastore> {
    let holder = op.find_child(which, None).ok_or_else(|| {
        Error::protocol(
            ErrorTag::MissingElement,
            format!("operation has no {} element", which),
        )
    })?;
    let db = holder.children().next().ok_or_else(|| {
        Error::protocol(
            ErrorTag::MissingElement,
            format!("{} names no datastore", which),
        )
    })?;
    db.name().parse()
}

fn op_filter(op: &DataNodeRef<'_>) -> Result<Option<String>> {
    match op.find_child("filter", None) {
        None => Ok(None),
        Some(filter) => match filter.attr("select") {
            Some(select) => Ok(Some(select.to_string())),
            None => match filter.attr("type") {
                // Subtree filtering is handled by the front-ends; the
                // engine-level filter language is XPath.
                Some("subtree") => Err(Error::protocol(
                    ErrorTag::OperationNotSupported,
                    "subtree filtering is not supported, use xpath",
                )),
                _ => Ok(None),
            },
        },
    }
}

fn parse_datetime(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|time| time.with_timezone(&Utc))
        .map_err(|_| {
            Error::protocol(
                ErrorTag::InvalidValue,
                format!("invalid date-and-time value '{}'", text),
            )
        })
}

// ===== reply rendering =====

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn reply_open(message_id: Option<&str>) -> String {
    match message_id {
        Some(id) => format!(
            "<rpc-reply xmlns=\"{}\" message-id=\"{}\">",
            NETCONF_NS,
            xml_escape(id)
        ),
        None => format!("<rpc-reply xmlns=\"{}\">", NETCONF_NS),
    }
}

fn render_ok_reply(message_id: Option<&str>) -> String {
    format!("{}<ok/></rpc-reply>", reply_open(message_id))
}

fn render_data_reply(message_id: Option<&str>, inner: &str) -> String {
    if inner.is_empty() {
        format!("{}<data/></rpc-reply>", reply_open(message_id))
    } else {
        format!(
            "{}<data>{}</data></rpc-reply>",
            reply_open(message_id),
            inner
        )
    }
}

fn render_error_reply(message_id: Option<&str>, err: &Error) -> String {
    let mut out = reply_open(message_id);
    out.push_str("<rpc-error>");
    out.push_str(&format!("<error-type>{}</error-type>", err.etype));
    out.push_str(&format!("<error-tag>{}</error-tag>", err.tag));
    out.push_str(&format!(
        "<error-severity>{}</error-severity>",
        err.severity
    ));
    if let Some(apptag) = &err.apptag {
        out.push_str(&format!(
            "<error-app-tag>{}</error-app-tag>",
            xml_escape(apptag)
        ));
    }
    if let Some(path) = &err.path {
        out.push_str(&format!(
            "<error-path>{}</error-path>",
            xml_escape(path)
        ));
    }
    if let Some(msg) = &err.msg {
        out.push_str(&format!(
            "<error-message>{}</error-message>",
            xml_escape(msg)
        ));
    }
    if let Some(info) = &err.info {
        // The only structured error-info the engine produces is the lock
        // holder's session id.
        if matches!(err.tag, ErrorTag::LockDenied | ErrorTag::InUse) {
            out.push_str(&format!(
                "<error-info><session-id>{}</session-id></error-info>",
                xml_escape(info)
            ));
        } else {
            out.push_str(&format!(
                "<error-info>{}</error-info>",
                xml_escape(info)
            ));
        }
    }
    out.push_str("</rpc-error></rpc-reply>");
    out
}

fn render_data(tree: &DataTree) -> Result<String> {
    if tree.is_empty() {
        return Ok(String::new());
    }
    tree.print_string(
        DataFormat::XML,
        DataPrinterFlags::WITH_SIBLINGS | DataPrinterFlags::SHRINK,
    )
}

/// Render a bus event as a NETCONF `<notification>` document.
pub fn render_notification(event: &Event) -> Result<String> {
    let payload = event.payload.print_string(
        DataFormat::XML,
        DataPrinterFlags::WITH_SIBLINGS | DataPrinterFlags::SHRINK,
    )?;
    Ok(format!(
        "<notification xmlns=\"{}\"><eventTime>{}</eventTime>{}</notification>",
        NOTIFICATION_NS,
        event.time.to_rfc3339(),
        payload
    ))
}
