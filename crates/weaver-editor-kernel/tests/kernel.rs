// End-to-end tests driving an EditorKernel with headless adapters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::Notify;
use weaver_editor_kernel::adapter::headless::{HeadlessFactory, HeadlessRecorder};
use weaver_editor_kernel::config::PluginsConfig;
use weaver_editor_kernel::kernel::KernelComponent;
use weaver_editor_kernel::{
    Action, AdapterDescriptor, AdapterError, AdapterKind, AstNode, CancellationReason,
    CancellationSource, Capability, Command, CommandError, CommandOutcome, DocumentAction,
    EditorKernel, ExternalError, InitOptions, InputEvent, InputOutcome, KernelBuilder,
    KernelConfig, KernelError, KernelStatus, Key, KeyCombo, MemoryStore, MountPoint, NodeId,
    NodePatch, Payload, Plugin, PluginContext, PluginError, PluginManifest, PluginState,
    Selection, SerializedNode, Topic, ViewState, Viewport,
};

const A: AdapterKind = AdapterKind::RICH_TEXT;
const B: AdapterKind = AdapterKind::GRAPH;

fn builder(recorders: &[(AdapterKind, &HeadlessRecorder)]) -> KernelBuilder {
    let mut builder = EditorKernel::builder().config(KernelConfig {
        plugins: PluginsConfig::none(),
        ..KernelConfig::default()
    });
    for (kind, recorder) in recorders {
        builder = builder.adapter(AdapterDescriptor::new(
            kind.clone(),
            HeadlessFactory::new((*recorder).clone()),
        ));
    }
    builder
}

fn paragraphs() -> SerializedNode {
    SerializedNode::new("root", "doc")
        .with_child(SerializedNode::new("p1", "paragraph").with_text("first"))
        .with_child(SerializedNode::new("p2", "paragraph").with_text("second"))
}

async fn ready(builder: KernelBuilder, options: InitOptions) -> EditorKernel {
    let mut kernel = builder.build();
    kernel
        .init(MountPoint::new("editor"), Some(A), options)
        .await
        .unwrap();
    kernel
}

/// Exposes a `save` command backed by the persistence service.
struct SavePlugin;

impl Plugin for SavePlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("p1", "1.0.0")
            .with_capability(Capability::Commands)
            .with_capability(Capability::Persistence)
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let persistence = ctx.persistence()?;
        ctx.register_command(Command::new("save", move |scope, _| {
            let store = persistence
                .clone()
                .ok_or(ExternalError::Unavailable("persistence"))?;
            let snapshot = scope.snapshot();
            Ok(CommandOutcome::pending(async move {
                store.save(snapshot).await?;
                Ok(Value::Null)
            }))
        }))?;
        Ok(())
    }
}

/// Counts `state.changed` deliveries and records its own teardown.
struct Counter {
    id: &'static str,
    hits: Arc<AtomicUsize>,
    destroyed: Arc<Mutex<Vec<&'static str>>>,
    fail_destroy: bool,
}

impl Counter {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            hits: Arc::default(),
            destroyed: Arc::default(),
            fail_destroy: false,
        }
    }
}

impl Plugin for Counter {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(self.id, "1.0.0").with_capability(Capability::events(["state.changed"]))
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let hits = Arc::clone(&self.hits);
        ctx.subscribe(Topic::STATE_CHANGED, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), PluginError> {
        self.destroyed.lock().unwrap().push(self.id);
        if self.fail_destroy {
            return Err(PluginError::Destroy {
                id: self.id.into(),
                reason: "socket already closed".into(),
            });
        }
        Ok(())
    }
}

/// Subscribes through a bus handle instead of the context.
struct BusListener {
    id: &'static str,
    topic: Topic,
    hits: Arc<AtomicUsize>,
}

impl Plugin for BusListener {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(self.id, "1.0.0").with_capability(Capability::events(["state.changed"]))
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let hits = Arc::clone(&self.hits);
        ctx.bus()?.subscribe(self.topic.clone(), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_save_then_switch_keeps_content() {
    let (recorder_a, recorder_b) = (HeadlessRecorder::new(), HeadlessRecorder::new());
    let store = MemoryStore::new();
    let mut kernel = ready(
        builder(&[(A, &recorder_a), (B, &recorder_b)]).persistence(Arc::new(store.clone())),
        InitOptions::default(),
    )
    .await;

    kernel.register_plugin(SavePlugin).unwrap();
    kernel.dispatch(DocumentAction::set_content("hello")).unwrap();
    kernel.execute("save", Value::Null).await.unwrap();

    assert_eq!(store.save_count(), 1);
    assert_eq!(store.saves()[0].text(), "hello");

    kernel.switch_adapter(B, Value::Null).await.unwrap();
    assert_eq!(recorder_b.renders(), ["hello"]);
    assert_eq!(kernel.view_state(), ViewState::Mounted(B));
    assert_eq!(recorder_a.destroyed(), 1);
}

#[tokio::test]
async fn test_switching_preserves_document_and_selection() {
    let (recorder_a, recorder_b) = (HeadlessRecorder::new(), HeadlessRecorder::new());
    let mut kernel = ready(
        builder(&[(A, &recorder_a), (B, &recorder_b)]),
        InitOptions::default().with_document(paragraphs()),
    )
    .await;
    let caret = Selection::caret("p2", 3);
    kernel
        .dispatch(Action::SetSelection {
            selection: Some(caret.clone()),
        })
        .unwrap();
    kernel
        .dispatch(Action::SetViewport {
            viewport: Viewport::default().with_zoom(2.0),
        })
        .unwrap();
    let tree = kernel.document().unwrap().serialize();

    kernel.switch_adapter(B, Value::Null).await.unwrap();
    assert_eq!(kernel.document().unwrap().serialize(), tree);
    assert_eq!(kernel.state().unwrap().selection, Some(caret.clone()));
    assert_eq!(recorder_b.selection(), Some(caret.clone()));
    // Viewport is adapter-local.
    assert_eq!(kernel.state().unwrap().viewport, Viewport::default());
    assert_eq!(kernel.state().unwrap().mode, B);

    kernel.switch_adapter(A, Value::Null).await.unwrap();
    assert_eq!(kernel.document().unwrap().serialize(), tree);
    assert_eq!(recorder_a.selection(), Some(caret));
    assert_eq!(recorder_a.mounted(), [A, A]);
    assert_eq!(recorder_b.destroyed(), 1);
}

#[tokio::test]
async fn test_adapter_reported_selection_flows_back() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(
        builder(&[(A, &recorder)]),
        InitOptions::default().with_document(paragraphs()),
    )
    .await;
    let sink = recorder.sink().unwrap();
    sink.dispatch(Action::SetSelection {
        selection: Some(Selection::caret("p1", 99)),
    });
    kernel.settle().await.unwrap();
    // Clamped to the node's text.
    assert_eq!(
        kernel.state().unwrap().selection,
        Some(Selection::caret("p1", 5))
    );
}

#[tokio::test]
async fn test_duplicate_registration_keeps_one_instance() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;

    let first = Counter::new("counter");
    let first_hits = Arc::clone(&first.hits);
    let second = Counter::new("counter");
    let second_hits = Arc::clone(&second.hits);
    kernel.register_plugin(first).unwrap();
    kernel.register_plugin(second).unwrap();
    assert_eq!(kernel.plugin_state(&"counter".into()), PluginState::Active);
    assert_eq!(kernel.plugins().len(), 1);

    kernel.dispatch(DocumentAction::set_content("x")).unwrap();
    assert_eq!(first_hits.load(Ordering::SeqCst), 1);
    assert_eq!(second_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_priority_and_tie_resolution() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;

    kernel
        .register_command(Command::new("cmd", |_, _| Ok(CommandOutcome::value("five"))).with_priority(5))
        .unwrap();
    kernel
        .register_command(Command::new("cmd", |_, _| Ok(CommandOutcome::value("ten"))).with_priority(10))
        .unwrap();
    kernel
        .register_command(
            Command::new("cmd", |_, _| Ok(CommandOutcome::value("graph only")))
                .with_priority(50)
                .in_mode(B),
        )
        .unwrap();
    for _ in 0..3 {
        assert_eq!(kernel.execute("cmd", Value::Null).await.unwrap(), json!("ten"));
    }

    kernel
        .register_command(Command::new("tie", |_, _| Ok(CommandOutcome::value("first"))))
        .unwrap();
    kernel
        .register_command(Command::new("tie", |_, _| Ok(CommandOutcome::value("second"))))
        .unwrap();
    assert_eq!(kernel.execute("tie", Value::Null).await.unwrap(), json!("first"));

    kernel
        .register_command(Command::new("graph.layout", |_, _| Ok(CommandOutcome::done())).in_mode(B))
        .unwrap();
    assert!(matches!(
        kernel.execute("graph.layout", Value::Null).await,
        Err(KernelError::Command(CommandError::NotApplicable(_)))
    ));
    assert_eq!(kernel.status(), &KernelStatus::Ready);
}

#[tokio::test]
async fn test_destroy_survives_failing_plugin() {
    let recorder = HeadlessRecorder::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut builder = builder(&[(A, &recorder)]);
    for (id, fail) in [("a", false), ("b", true), ("c", false)] {
        let mut plugin = Counter::new(id);
        plugin.destroyed = Arc::clone(&order);
        plugin.fail_destroy = fail;
        builder = builder.plugin(plugin);
    }
    let mut kernel = ready(builder, InitOptions::default()).await;

    kernel.destroy().unwrap();
    assert_eq!(*order.lock().unwrap(), ["c", "b", "a"]);
    for id in ["a", "b", "c"] {
        assert_eq!(kernel.plugin_state(&id.into()), PluginState::Destroyed);
    }
    assert_eq!(kernel.status(), &KernelStatus::Destroyed);
    assert_eq!(kernel.view_state(), ViewState::Unmounted);
    assert_eq!(recorder.destroyed(), 1);
    // Registries stay readable for inspection.
    assert!(kernel.adapters().get(&A).is_some());
    assert_eq!(kernel.plugins().len(), 3);
}

#[tokio::test]
async fn test_everything_fails_after_destroy() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;
    let sender = kernel.sender().unwrap();
    kernel.destroy().unwrap();

    assert!(matches!(
        kernel.dispatch(DocumentAction::set_content("x")),
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(
        kernel.execute("save", Value::Null).await,
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(
        kernel.switch_adapter(A, Value::Null).await,
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(
        kernel
            .handle_input(InputEvent::Key(KeyCombo::ctrl(Key::character("s"))))
            .await,
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(kernel.state(), Err(KernelError::Destroyed)));
    assert!(matches!(
        kernel.subscribe(Topic::STATE_CHANGED, |_| Ok(())),
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(
        kernel.register_plugin(SavePlugin),
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(
        kernel
            .init(MountPoint::new("editor"), Some(A), InitOptions::default())
            .await,
        Err(KernelError::Destroyed)
    ));
    assert!(matches!(kernel.destroy(), Err(KernelError::Destroyed)));
    assert!(!sender.dispatch(DocumentAction::set_content("late")));
}

#[tokio::test]
async fn test_failed_mount_leaves_view_unmounted() {
    let recorder = HeadlessRecorder::new();
    let broken = AdapterKind::new("broken");
    let mut kernel = ready(
        builder(&[(A, &recorder)]).adapter(AdapterDescriptor::new(
            broken.clone(),
            HeadlessFactory::new(HeadlessRecorder::new()).failing("no gpu"),
        )),
        InitOptions::default().with_document(paragraphs()),
    )
    .await;

    let unmounted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&unmounted);
    kernel
        .subscribe(Topic::ADAPTER_UNMOUNTED, move |event| {
            if let Payload::Adapter { kind, reason } = &event.payload {
                sink.lock().unwrap().push((kind.clone(), reason.is_some()));
            }
            Ok(())
        })
        .unwrap();

    let err = kernel.switch_adapter(broken.clone(), Value::Null).await.unwrap_err();
    assert!(matches!(err, KernelError::Adapter(AdapterError::Mount { .. })));
    assert!(err.is_recoverable());
    assert_eq!(kernel.view_state(), ViewState::Unmounted);
    assert_eq!(kernel.status(), &KernelStatus::Ready);
    assert_eq!(*unmounted.lock().unwrap(), [(A, false), (broken, true)]);

    // The document is intact and still editable; a good switch recovers.
    kernel
        .dispatch(DocumentAction::update("p1", NodePatch::new().text("edited")))
        .unwrap();
    kernel.switch_adapter(A, Value::Null).await.unwrap();
    assert_eq!(kernel.view_state(), ViewState::Mounted(A));
    assert_eq!(recorder.last_render().as_deref(), Some("edited\nsecond"));
}

#[tokio::test]
async fn test_unknown_adapter_keeps_current_view() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;
    assert!(matches!(
        kernel.switch_adapter("hologram", Value::Null).await,
        Err(KernelError::Adapter(AdapterError::UnknownAdapter(_)))
    ));
    assert_eq!(kernel.view_state(), ViewState::Mounted(A));
    assert_eq!(recorder.destroyed(), 0);
}

#[tokio::test]
async fn test_cancelled_switch_destroys_new_adapter() {
    let (recorder_a, recorder_slow) = (HeadlessRecorder::new(), HeadlessRecorder::new());
    let slow = AdapterKind::new("slow");
    let gate = Arc::new(Notify::new());
    let mut kernel = ready(
        builder(&[(A, &recorder_a)]).adapter(AdapterDescriptor::new(
            slow.clone(),
            HeadlessFactory::new(recorder_slow.clone()).gated(Arc::clone(&gate)),
        )),
        InitOptions::default(),
    )
    .await;

    let source = CancellationSource::new();
    let (result, ()) = tokio::join!(
        kernel.switch_adapter_with_cancel(slow.clone(), Value::Null, source.token()),
        async {
            source.cancel(CancellationReason::Superseded);
            gate.notify_one();
        }
    );

    assert!(matches!(
        result,
        Err(KernelError::Adapter(AdapterError::Cancelled(ref kind))) if *kind == slow
    ));
    assert_eq!(recorder_slow.created(), 1);
    assert_eq!(recorder_slow.destroyed(), 1);
    assert_eq!(kernel.view_state(), ViewState::Unmounted);
    assert_eq!(kernel.status(), &KernelStatus::Ready);
}

#[tokio::test]
async fn test_updates_redraw_only_touched_nodes() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(
        builder(&[(A, &recorder)]),
        InitOptions::default().with_document(paragraphs()),
    )
    .await;
    assert_eq!(recorder.renders().len(), 1);

    kernel
        .dispatch(DocumentAction::update("p2", NodePatch::new().text("changed")))
        .unwrap();
    assert_eq!(recorder.updates().last().unwrap(), &[NodeId::from("p2")]);

    kernel
        .dispatch(DocumentAction::insert(
            AstNode::paragraph("p3", "third"),
            "root",
            2,
        ))
        .unwrap();
    assert_eq!(
        recorder.updates().last().unwrap(),
        &[NodeId::from("p3"), NodeId::from("root")]
    );

    // Whole-document replacement falls back to a full render.
    kernel.dispatch(DocumentAction::set_content("fresh")).unwrap();
    assert_eq!(recorder.renders().len(), 2);
    assert_eq!(recorder.last_render().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_events_follow_commit_order() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;
    let log = Arc::new(Mutex::new(Vec::new()));
    for topic in [Topic::DOCUMENT_CHANGED, Topic::STATE_CHANGED] {
        let log = Arc::clone(&log);
        kernel
            .subscribe(topic, move |event| {
                log.lock().unwrap().push(event.topic.to_string());
                Ok(())
            })
            .unwrap();
    }
    kernel.dispatch(DocumentAction::set_content("hi")).unwrap();
    assert_eq!(*log.lock().unwrap(), ["document.changed", "state.changed"]);

    // A structural error changes nothing and announces nothing.
    log.lock().unwrap().clear();
    let err = kernel
        .dispatch(DocumentAction::remove("ghost"))
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unrecognised_action_is_a_no_op() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;
    let before = kernel.state().unwrap();
    assert!(
        !kernel
            .dispatch(Action::other("telemetry.ping", json!({"n": 1})))
            .unwrap()
    );
    assert!(Arc::ptr_eq(&before, &kernel.state().unwrap()));
}

#[tokio::test]
async fn test_undo_and_redo_through_history() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(
        builder(&[(A, &recorder)]),
        InitOptions::default().with_document(paragraphs()),
    )
    .await;
    kernel.dispatch(DocumentAction::remove("p1")).unwrap();
    assert_eq!(kernel.document().unwrap().text(), "second");

    assert!(kernel.dispatch(DocumentAction::Undo).unwrap());
    assert_eq!(kernel.document().unwrap().text(), "first\nsecond");
    assert!(kernel.dispatch(DocumentAction::Redo).unwrap());
    assert_eq!(kernel.document().unwrap().text(), "second");
    assert!(!kernel.dispatch(DocumentAction::Redo).unwrap());
}

#[tokio::test]
async fn test_default_shortcuts_run_commands() {
    let recorder = HeadlessRecorder::new();
    let store = MemoryStore::new();
    let mut kernel = EditorKernel::builder()
        .adapter(AdapterDescriptor::new(A, HeadlessFactory::new(recorder.clone())))
        .persistence(Arc::new(store.clone()))
        .build();
    kernel
        .init(MountPoint::new("editor"), None, InitOptions::default())
        .await
        .unwrap();
    assert_eq!(kernel.plugins().len(), 4);

    kernel.dispatch(DocumentAction::set_content("draft")).unwrap();
    let save = KeyCombo::primary(Key::character("s"), cfg!(target_os = "macos"));
    let outcome = kernel.handle_input(InputEvent::Key(save)).await.unwrap();
    assert!(matches!(outcome, InputOutcome::Handled { ref command, .. } if command.as_str() == "save"));
    assert_eq!(store.save_count(), 1);
    assert!(!kernel.state().unwrap().dirty);

    // Unbound keys are only published.
    assert_eq!(
        kernel
            .handle_input(InputEvent::Key(KeyCombo::new(Key::F(7))))
            .await
            .unwrap(),
        InputOutcome::NotHandled
    );
}

#[tokio::test]
async fn test_init_failure_then_retry() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = builder(&[(A, &recorder)]).build();
    let err = kernel
        .init(MountPoint::new("editor"), Some(B), InitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::InitFailed {
            component: KernelComponent::Adapter,
            ..
        }
    ));
    assert!(matches!(kernel.status(), KernelStatus::Error { .. }));
    assert!(matches!(
        kernel.dispatch(DocumentAction::set_content("x")),
        Err(KernelError::NotReady(_))
    ));

    kernel
        .init(MountPoint::new("editor"), Some(A), InitOptions::default())
        .await
        .unwrap();
    assert_eq!(kernel.status(), &KernelStatus::Ready);
}

#[tokio::test]
async fn test_init_and_load_from_persistence() {
    let recorder = HeadlessRecorder::new();
    let store = MemoryStore::new();
    store.insert("doc-1".into(), paragraphs());
    store.insert(
        "doc-2".into(),
        SerializedNode::new("root", "doc").with_child(SerializedNode::new("x", "paragraph").with_text("other")),
    );
    let mut kernel = ready(
        builder(&[(A, &recorder)]).persistence(Arc::new(store.clone())),
        InitOptions::default().with_content_ref("doc-1"),
    )
    .await;
    assert_eq!(kernel.document().unwrap().text(), "first\nsecond");
    assert_eq!(
        kernel.state().unwrap().content_ref.as_ref().map(|r| r.as_str()),
        Some("doc-1")
    );

    kernel.dispatch(DocumentAction::set_content("scratch")).unwrap();
    kernel.load("doc-2".into()).await.unwrap();
    let state = kernel.state().unwrap();
    assert_eq!(kernel.document().unwrap().text(), "other");
    assert!(!state.dirty);
    assert_eq!(recorder.last_render().as_deref(), Some("other"));
    // Loading forgets history.
    assert!(!kernel.dispatch(DocumentAction::Undo).unwrap());

    assert!(matches!(
        kernel.load("missing".into()).await,
        Err(KernelError::External(ExternalError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_ready_is_observable_before_init() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = builder(&[(A, &recorder)]).build();
    let seen = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&seen);
    let _sub = kernel
        .subscribe(Topic::KERNEL_READY, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    kernel
        .init(MountPoint::new("editor"), None, InitOptions::default())
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.mounted(), [A]);
}

#[tokio::test]
async fn test_independent_kernels_do_not_share_state() {
    let (recorder_1, recorder_2) = (HeadlessRecorder::new(), HeadlessRecorder::new());
    let mut one = ready(builder(&[(A, &recorder_1)]), InitOptions::default()).await;
    let two = ready(builder(&[(A, &recorder_2)]), InitOptions::default()).await;
    one.dispatch(DocumentAction::set_content("only here")).unwrap();
    assert_eq!(two.document().unwrap().text(), "");
    assert_eq!(two.state().unwrap().revision, 0);
}

#[tokio::test]
async fn test_bus_subscriptions_end_with_the_plugin() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let id = kernel
        .register_plugin(BusListener {
            id: "listener",
            topic: Topic::STATE_CHANGED,
            hits: Arc::clone(&hits),
        })
        .unwrap();

    kernel.dispatch(DocumentAction::set_content("one")).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    kernel.unregister_plugin(&id).unwrap();
    kernel.dispatch(DocumentAction::set_content("two")).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bus_rejects_undeclared_topic() {
    let recorder = HeadlessRecorder::new();
    let mut kernel = ready(builder(&[(A, &recorder)]), InitOptions::default()).await;
    let err = kernel
        .register_plugin(BusListener {
            id: "nosy",
            topic: Topic::DOCUMENT_CHANGED,
            hits: Arc::default(),
        })
        .unwrap_err();
    let KernelError::Plugin(PluginError::Init { reason, .. }) = err else {
        panic!("expected init failure, got {err}");
    };
    assert_eq!(reason, "plugin nosy did not declare capability events:document.changed");
    assert_eq!(kernel.plugin_state(&"nosy".into()), PluginState::Destroyed);
}
