//! End to end runs of the pipeline against an in-memory world

use bundler_asset::AssetType;
use bundler_core::{
    ConfirmPrompt, PackagerConfig, PipelineController, PipelineError, PipelineEvent,
    PipelineState,
};
use bundler_scene::{
    AttributeHandle, AttributeName, AttributeValue, ChangeScope, ComponentId, EntityFlags,
    EntityId, SceneChange,
};
use bundler_test_utils::{
    fake_tool, files_under, FakeArchiver, FakeRunner, Fixture, RecordingStorage, ScriptedHost, BASE_URL, MIB,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Harness {
    fx: Fixture,
    storage: Arc<RecordingStorage>,
    host: Arc<ScriptedHost>,
    runner: Arc<FakeRunner>,
    archiver: Arc<FakeArchiver>,
}

impl Harness {
    fn new() -> Self {
        Self {
            fx: Fixture::new(),
            storage: RecordingStorage::new(),
            host: ScriptedHost::new(),
            runner: FakeRunner::new(),
            archiver: FakeArchiver::new(),
        }
    }

    fn controller(&self, config: PackagerConfig) -> PipelineController {
        PipelineController::new(
            self.fx.world.clone(),
            self.fx.world.clone(),
            self.storage.clone(),
            self.host.clone(),
            config,
        )
        .with_runner(self.runner.clone())
        .with_archiver(self.archiver.clone())
    }

    /// Config with CRN conversion through the fake runner
    fn crn_config(&self) -> PackagerConfig {
        let mut config = self.fx.config();
        config.texture.process = true;
        config.texture.format = "crn".to_string();
        config.texture.tool = fake_tool(self.fx.dir.path(), "crunch");
        config
    }

    fn attribute(&self, entity: u64, name: AttributeName) -> AttributeValue {
        self.fx.world.attribute(&handle(entity, name)).unwrap()
    }

    fn archive_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.archiver.jobs().iter().map(|j| j.file_name()).collect();
        names.sort();
        names
    }

    fn replicated_writes(&self) -> Vec<AttributeHandle> {
        self.fx
            .world
            .changes()
            .into_iter()
            .filter_map(|change| match change {
                SceneChange::Write {
                    handle,
                    scope: ChangeScope::Replicate,
                    ..
                } => Some(handle),
                _ => None,
            })
            .collect()
    }
}

fn handle(entity: u64, name: AttributeName) -> AttributeHandle {
    AttributeHandle::new(EntityId(entity), ComponentId(entity * 10), name)
}

fn asset_ref(value: &str) -> AttributeValue {
    AttributeValue::AssetRef(value.to_string())
}

fn ref_list(values: &[&str]) -> AttributeValue {
    AttributeValue::AssetRefList(values.iter().map(ToString::to_string).collect())
}

/// Three meshes sharing `rock.material`, which uses two 6 MiB textures
fn shared_material_scene(h: &Harness) {
    h.fx.texture("rock_diffuse.png", 6 * MIB, 1024, 1024);
    h.fx.texture("rock_normal.png", 6 * MIB, 1024, 1024);
    h.fx.material("rock.material", &["rock_diffuse.png", "rock_normal.png"]);
    for (id, mesh) in [(1, "house.mesh"), (2, "barn.mesh"), (3, "shed.mesh")] {
        h.fx.file_asset(mesh, AssetType::Mesh, 2048);
        h.fx.mesh_entity(id, mesh, &["rock.material"]);
    }
}

#[tokio::test]
async fn shared_material_scene_is_bundled_and_replicated() {
    let h = Harness::new();
    shared_material_scene(&h);
    let controller = h.controller(h.fx.config());

    let summary = controller.start().await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.counters.converted_refs, 6);
    assert_eq!(summary.counters.entities_processed, 3);
    assert_eq!(
        h.archive_names(),
        vec!["town-materials-1.zip", "town-models-1.zip", "town-textures-1.zip"]
    );
    let textures = summary
        .classes
        .iter()
        .find(|c| c.class == bundler_asset::AssetClass::Texture)
        .unwrap();
    assert_eq!(textures.files, 2);

    assert_eq!(
        h.attribute(1, AttributeName::MeshRef),
        asset_ref("town-models-1.zip#house.mesh")
    );
    for entity in 1..=3 {
        assert_eq!(
            h.attribute(entity, AttributeName::MaterialRefs),
            ref_list(&["town-materials-1.zip#rock.material"])
        );
    }
    assert_eq!(h.replicated_writes().len(), 6);

    let material = std::fs::read_to_string(
        h.fx.working_dir().join("materials-1").join("rock.material"),
    )
    .unwrap();
    assert!(material.contains(&format!("{BASE_URL}town-textures-1.zip#rock_diffuse.png")));
    assert!(material.contains(&format!("{BASE_URL}town-textures-1.zip#rock_normal.png")));

    let objects = h.storage.objects();
    for archive in h.archive_names() {
        assert!(objects.contains(&archive), "{archive} uploaded");
    }
    assert_eq!(h.storage.backups().len(), 1);
    let forgotten = h.fx.world.forgotten();
    for reference in ["house.mesh", "rock.material", "rock_diffuse.png"] {
        assert!(forgotten.iter().any(|f| f == reference), "{reference} forgotten");
    }
    assert_eq!(controller.state(), PipelineState::Idle);
    assert_eq!(controller.last_summary(), Some(summary));
}

#[tokio::test]
async fn shared_texture_is_transcoded_once() {
    let h = Harness::new();
    h.fx.texture("stone.png", 4096, 512, 512);
    h.fx.material("wall.material", &["stone.png"]);
    h.fx.material("floor.material", &["stone.png"]);
    h.fx.file_asset("wall.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "wall.mesh", &["wall.material", "floor.material"]);
    h.fx.mesh_entity(2, "wall.mesh", &["floor.material"]);
    let controller = h.controller(h.crn_config());

    let summary = controller.start().await.unwrap();

    assert_eq!(h.runner.count(), 1);
    assert_eq!(summary.textures.converted, 1);
    let texture_ref = format!("{BASE_URL}town-textures-1.zip#stone.crn");
    for name in ["wall.material", "floor.material"] {
        let copy = std::fs::read_to_string(h.fx.working_dir().join("materials-1").join(name))
            .unwrap();
        assert!(copy.contains(&texture_ref), "{name}: {copy}");
    }
    assert_eq!(
        h.attribute(1, AttributeName::MeshRef),
        h.attribute(2, AttributeName::MeshRef)
    );
    let meshes = summary
        .classes
        .iter()
        .find(|c| c.class == bundler_asset::AssetClass::Mesh)
        .unwrap();
    assert_eq!(meshes.files, 1);
}

#[tokio::test]
async fn texture_tool_timeout_leaves_slot_unchanged() {
    let h = Harness::new();
    for name in ["alpha.png", "beta.png", "gamma.png"] {
        h.fx.texture(name, 1024, 256, 256);
    }
    h.fx.material("rock.material", &["alpha.png", "beta.png", "gamma.png"]);
    h.fx.file_asset("rock.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "rock.mesh", &["rock.material"]);
    h.runner.time_out_on("beta.png");
    let controller = h.controller(h.crn_config());

    let summary = controller.start().await.unwrap();

    assert!(summary.success);
    assert_eq!(h.runner.count(), 3);
    let copy = std::fs::read_to_string(h.fx.working_dir().join("materials-1/rock.material"))
        .unwrap();
    assert!(copy.contains(&format!("{BASE_URL}town-textures-1.zip#alpha.crn")));
    assert!(copy.contains(&format!("{BASE_URL}town-textures-1.zip#gamma.crn")));
    assert!(copy.contains("texture beta.png"));
    assert!(!h.fx.world.forgotten().iter().any(|f| f == "beta.png"));

    let mut shard: Vec<String> = files_under(&h.fx.working_dir().join("textures-1"))
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    shard.sort();
    assert_eq!(shard, vec!["alpha.crn", "gamma.crn"]);
    let textures = summary
        .classes
        .iter()
        .find(|c| c.class == bundler_asset::AssetClass::Texture)
        .unwrap();
    assert_eq!(textures.files, 2);
}

#[tokio::test]
async fn texture_tool_failure_leaves_no_archive_behind() {
    let h = Harness::new();
    h.fx.texture("beta.png", 1024, 256, 256);
    h.fx.material("rock.material", &["beta.png"]);
    h.fx.file_asset("rock.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "rock.mesh", &["rock.material"]);
    h.runner.time_out_on("beta.png");
    let controller = h.controller(h.crn_config());

    controller.start().await.unwrap();

    assert_eq!(
        h.archive_names(),
        vec!["town-materials-1.zip", "town-models-1.zip"]
    );
}

/// `wall.png` converts to crn next to a texture that already is `wall.crn`
async fn run_converted_name_clash(materials: [&str; 2]) -> (Harness, String, String) {
    let h = Harness::new();
    h.fx.texture("wall.png", 4000, 256, 256);
    h.fx.texture("wall.crn", 3000, 256, 256);
    h.fx.material("png.material", &["wall.png"]);
    h.fx.material("crn.material", &["wall.crn"]);
    h.fx.file_asset("wall.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "wall.mesh", &materials);
    let controller = h.controller(h.crn_config());

    let summary = controller.start().await.unwrap();
    assert!(summary.success);

    let read = |name: &str| {
        std::fs::read_to_string(h.fx.working_dir().join("materials-1").join(name)).unwrap()
    };
    let (png, crn) = (read("png.material"), read("crn.material"));
    (h, png, crn)
}

#[tokio::test]
async fn converted_texture_does_not_replace_a_copied_one() {
    let (h, png, crn) = run_converted_name_clash(["crn.material", "png.material"]).await;

    let shard = h.fx.working_dir().join("textures-1");
    assert!(crn.contains(&format!("{BASE_URL}town-textures-1.zip#wall.crn")), "{crn}");
    assert!(png.contains(&format!("{BASE_URL}town-textures-1.zip#wall_1.crn")), "{png}");
    assert_eq!(std::fs::metadata(shard.join("wall.crn")).unwrap().len(), 3000);
    assert_eq!(std::fs::metadata(shard.join("wall_1.crn")).unwrap().len(), 2000);
    assert_eq!(files_under(&shard).len(), 2);
}

#[tokio::test]
async fn copied_texture_does_not_replace_a_converted_one() {
    let (h, png, crn) = run_converted_name_clash(["png.material", "crn.material"]).await;

    let shard = h.fx.working_dir().join("textures-1");
    assert!(png.contains(&format!("{BASE_URL}town-textures-1.zip#wall.crn")), "{png}");
    assert!(crn.contains(&format!("{BASE_URL}town-textures-1.zip#wall_1.crn")), "{crn}");
    assert_eq!(std::fs::metadata(shard.join("wall.crn")).unwrap().len(), 2000);
    assert_eq!(std::fs::metadata(shard.join("wall_1.crn")).unwrap().len(), 3000);
    assert_eq!(files_under(&shard).len(), 2);
}

#[tokio::test]
async fn rollover_affects_the_next_asset() {
    let h = Harness::new();
    for (id, name) in [(1, "a.mesh"), (2, "b.mesh"), (3, "c.mesh")] {
        h.fx.file_asset(name, AssetType::Mesh, 6 * MIB);
        h.fx.mesh_entity(id, name, &[]);
    }
    let controller = h.controller(h.fx.config());

    controller.start().await.unwrap();

    assert_eq!(
        h.attribute(1, AttributeName::MeshRef),
        asset_ref("town-models-1.zip#a.mesh")
    );
    assert_eq!(
        h.attribute(2, AttributeName::MeshRef),
        asset_ref("town-models-1.zip#b.mesh")
    );
    assert_eq!(
        h.attribute(3, AttributeName::MeshRef),
        asset_ref("town-models-2.zip#c.mesh")
    );
    assert_eq!(h.archive_names(), vec!["town-models-1.zip", "town-models-2.zip"]);
}

#[tokio::test]
async fn cancel_during_processing_restores_every_attribute() {
    let h = Harness::new();
    shared_material_scene(&h);
    let controller = h.controller(h.fx.config());
    let stop = controller.stop_handle();
    h.host.on_pump(move || {
        if stop.state() == PipelineState::Processing {
            stop.request_stop();
        }
    });

    let err = controller.start().await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(h.attribute(1, AttributeName::MeshRef), asset_ref("house.mesh"));
    for entity in 1..=3 {
        assert_eq!(
            h.attribute(entity, AttributeName::MaterialRefs),
            ref_list(&["rock.material"])
        );
    }
    assert!(h.replicated_writes().is_empty());
    assert!(h.archiver.jobs().is_empty());
    let summary = controller.last_summary().unwrap();
    assert!(summary.cancelled);
    assert!(summary.rolled_back > 0);
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(!controller.stop_handle().is_stopping());
}

#[tokio::test]
async fn declined_upload_rolls_back() {
    let h = Harness::new();
    shared_material_scene(&h);
    h.host.decline_upload();
    let controller = h.controller(h.fx.config());

    let err = controller.start().await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(h.attribute(2, AttributeName::MeshRef), asset_ref("barn.mesh"));
    let prompt = h
        .host
        .prompts()
        .into_iter()
        .find(|p| matches!(p, ConfirmPrompt::UploadBundles { .. }))
        .unwrap();
    let ConfirmPrompt::UploadBundles { archives, existing } = prompt else {
        unreachable!()
    };
    assert_eq!(archives.len(), 3);
    assert!(existing.is_empty());
    assert!(!h.storage.objects().iter().any(|o| o.ends_with(".zip")));
}

#[tokio::test]
async fn upload_prompt_lists_archives_already_in_storage() {
    let h = Harness::new();
    h.fx.file_asset("house.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "house.mesh", &[]);
    h.storage.put("town-models-1.zip", 10);
    let controller = h.controller(h.fx.config());

    controller.start().await.unwrap();

    assert!(h.host.prompts().contains(&ConfirmPrompt::UploadBundles {
        archives: vec!["town-models-1.zip".to_string()],
        existing: vec!["town-models-1.zip".to_string()],
    }));
}

#[tokio::test]
async fn stop_is_refused_once_uploads_start() {
    let h = Harness::new();
    shared_material_scene(&h);
    let controller = h.controller(h.fx.config());
    assert!(!controller.request_stop(), "nothing to stop while idle");

    let stop = controller.stop_handle();
    let answers = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&answers);
    h.storage.on_upload(move || sink.lock().push(stop.request_stop()));

    let summary = controller.start().await.unwrap();

    assert!(summary.success);
    let answers = answers.lock().clone();
    assert_eq!(answers, vec![false, false, false]);
}

#[tokio::test]
async fn failed_upload_reports_orphans_and_rolls_back() {
    let h = Harness::new();
    shared_material_scene(&h);
    h.storage.fail_upload_of("materials");
    let controller = h.controller(h.fx.config());

    let err = controller.start().await.unwrap_err();

    let PipelineError::Upload { failed, orphaned } = &err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(failed, &vec!["town-materials-1.zip".to_string()]);
    let mut orphaned = orphaned.clone();
    orphaned.sort();
    assert_eq!(orphaned, vec!["town-models-1.zip", "town-textures-1.zip"]);
    assert_eq!(h.attribute(1, AttributeName::MeshRef), asset_ref("house.mesh"));
    assert!(h.replicated_writes().is_empty());
    let summary = controller.last_summary().unwrap();
    assert_eq!(summary.orphaned.len(), 2);
    assert!(summary
        .report_lines()
        .iter()
        .any(|(header, line)| *header && line == "ORPHANED UPLOADS"));
}

#[tokio::test]
async fn archive_failure_is_fatal() {
    let h = Harness::new();
    shared_material_scene(&h);
    h.archiver.fail_on("textures");
    let controller = h.controller(h.fx.config());

    let err = controller.start().await.unwrap_err();

    assert!(matches!(
        &err,
        PipelineError::Archive { failed } if failed == &vec!["town-textures-1.zip".to_string()]
    ));
    assert_eq!(h.attribute(3, AttributeName::MeshRef), asset_ref("shed.mesh"));
    assert!(!h
        .host
        .prompts()
        .iter()
        .any(|p| matches!(p, ConfirmPrompt::UploadBundles { .. })));
}

#[tokio::test]
async fn nothing_to_convert_finishes_without_archives() {
    let h = Harness::new();
    h.fx.mesh_entity(1, "", &[]);
    let controller = h.controller(h.fx.config());

    let summary = controller.start().await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.counters.converted_refs, 0);
    assert!(h.archiver.jobs().is_empty());
    assert!(h.host.prompts().is_empty());
    assert!(h.replicated_writes().is_empty());
}

#[tokio::test]
async fn generated_materials_are_renamed_and_their_textures_bundled() {
    let h = Harness::new();
    h.fx.texture("moss.png", 2048, 128, 128);
    h.fx.texture("base.png", 2048, 128, 128);
    h.fx.material("base.material", &["base.png"]);
    h.fx.generated_material_entity(
        1,
        "Mossy Rock",
        "base.material",
        &["texture = moss.png", "color = 1 0 0"],
    );
    h.fx.file_asset("rock.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(2, "rock.mesh", &["Mossy Rock"]);
    let controller = h.controller(h.fx.config());

    let summary = controller.start().await.unwrap();

    assert_eq!(
        h.attribute(1, AttributeName::OutputMat),
        AttributeValue::String("generated://Mossy_Rock.material".to_string())
    );
    assert_eq!(
        h.attribute(1, AttributeName::InputMat),
        asset_ref("town-materials-1.zip#base.material")
    );
    assert_eq!(
        h.attribute(1, AttributeName::Parameters),
        AttributeValue::StringList(vec![
            format!("texture = {BASE_URL}town-textures-generated-1.zip#moss.png"),
            "color = 1 0 0".to_string(),
        ])
    );
    assert_eq!(
        h.attribute(2, AttributeName::MaterialRefs),
        ref_list(&["generated://Mossy_Rock.material"])
    );
    // outputMat, one texture parameter, inputMat and the mesh ref
    assert_eq!(summary.counters.converted_refs, 4);
    assert!(h
        .archive_names()
        .contains(&"town-textures-generated-1.zip".to_string()));
}

#[tokio::test]
async fn excluded_entities_are_left_alone_and_empty_ones_removed() {
    let h = Harness::new();
    h.fx.file_asset("house.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "house.mesh", &[]);
    let scripted = h.fx.mesh_entity(2, "house.mesh", &[]);
    h.fx.world
        .add_component(
            scripted,
            bundler_scene::ComponentDescription::new(21, bundler_scene::ComponentKind::Script),
        )
        .unwrap();
    h.fx.world.add_entity(9, EntityFlags::default());
    h.fx.world.add_entity(
        10,
        EntityFlags {
            temporary: true,
            local: false,
        },
    );
    let controller = h.controller(h.fx.config());

    let summary = controller.start().await.unwrap();

    assert_eq!(summary.counters.entities_processed, 1);
    assert_eq!(summary.counters.empty_entities_removed, 1);
    assert_eq!(h.attribute(2, AttributeName::MeshRef), asset_ref("house.mesh"));
    assert!(h.fx.world.changes().contains(&SceneChange::RemoveEntity {
        entity: EntityId(9),
        scope: ChangeScope::Replicate,
    }));
}

#[tokio::test]
async fn failed_backup_touches_nothing() {
    let h = Harness::new();
    shared_material_scene(&h);
    h.storage.fail_backup();
    let controller = h.controller(h.fx.config());

    let err = controller.start().await.unwrap_err();

    assert!(matches!(err, PipelineError::Backup(_)));
    assert!(h.fx.world.changes().is_empty());
    assert!(!controller.last_summary().unwrap().success);
}

#[tokio::test]
async fn unauthenticated_storage_is_rejected() {
    let h = Harness::new();
    h.storage.refuse_auth();
    let controller = h.controller(h.fx.config());

    let err = controller.start().await.unwrap_err();

    assert!(matches!(err, PipelineError::NotAuthenticated(_)));
    assert!(controller.last_summary().is_some());
    assert_eq!(controller.state(), PipelineState::Idle);
}

#[tokio::test]
async fn stale_working_dir_needs_confirmation() {
    let h = Harness::new();
    h.fx.file_asset("house.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "house.mesh", &[]);
    let work = h.fx.working_dir();
    std::fs::create_dir_all(work.join("models-1")).unwrap();
    std::fs::write(work.join("old-models-1.zip"), "zip").unwrap();
    std::fs::write(work.join("keep.md"), "notes").unwrap();
    h.host.decline_clear();
    let controller = h.controller(h.fx.config());

    let err = controller.start().await.unwrap_err();

    assert!(matches!(err, PipelineError::Aborted(_)));
    assert!(work.join("old-models-1.zip").exists());
    assert_eq!(
        h.host.prompts(),
        vec![ConfirmPrompt::ClearWorkingDirectory { path: work.clone() }]
    );
    assert!(h.storage.backups().is_empty());
}

#[tokio::test]
async fn stop_during_start_up_prompt_cancels_the_run() {
    let h = Harness::new();
    h.fx.file_asset("house.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "house.mesh", &[]);
    let work = h.fx.working_dir();
    std::fs::create_dir_all(&work).unwrap();
    std::fs::write(work.join("old-models-1.zip"), "zip").unwrap();
    let controller = h.controller(h.fx.config());
    let stop = controller.stop_handle();
    let answers = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&answers);
    h.host.on_prompt(move |prompt| {
        if matches!(prompt, ConfirmPrompt::ClearWorkingDirectory { .. }) {
            sink.lock().push((stop.state(), stop.request_stop()));
        }
    });

    let err = controller.start().await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(*answers.lock(), vec![(PipelineState::Starting, true)]);
    assert!(work.join("old-models-1.zip").exists());
    assert!(h.storage.backups().is_empty());
    assert_eq!(h.attribute(1, AttributeName::MeshRef), asset_ref("house.mesh"));
    assert!(controller.last_summary().unwrap().cancelled);
    assert_eq!(controller.state(), PipelineState::Idle);
    assert!(!controller.request_stop());
}

#[tokio::test]
async fn missing_texture_tool_can_disable_processing() {
    let h = Harness::new();
    h.fx.texture("stone.png", 1024, 256, 256);
    h.fx.material("wall.material", &["stone.png"]);
    h.fx.file_asset("wall.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "wall.mesh", &["wall.material"]);
    let mut config = h.crn_config();
    config.texture.tool = h.fx.dir.path().join("no-such-crunch");
    let controller = h.controller(config);

    let summary = controller.start().await.unwrap();

    assert!(!summary.texture_processing);
    assert_eq!(h.runner.count(), 0);
    assert!(matches!(
        h.host.prompts().first(),
        Some(ConfirmPrompt::DisableTextureProcessing { .. })
    ));
}

#[tokio::test]
async fn missing_texture_tool_declined_aborts() {
    let h = Harness::new();
    let mut config = h.crn_config();
    config.texture.tool = h.fx.dir.path().join("no-such-crunch");
    h.host.decline_texture_fallback();
    let controller = h.controller(config);

    let err = controller.start().await.unwrap_err();

    assert!(matches!(err, PipelineError::Aborted(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waits_for_transfers_and_refuses_second_start() {
    let h = Harness::new();
    h.fx.file_asset("house.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "house.mesh", &[]);
    h.fx.world.set_pending(vec![bundler_asset::PendingTransfer {
        reference: "house.mesh".to_string(),
        asset_type: AssetType::Mesh,
    }]);
    let controller = Arc::new(h.controller(h.fx.config()));
    let mut events = controller.subscribe();

    let running = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start().await })
    };
    loop {
        if let PipelineEvent::Progress { action, .. } = events.recv().await.unwrap() {
            if action.starts_with("Waiting for") {
                break;
            }
        }
    }
    assert_eq!(controller.state(), PipelineState::WaitingForAssets);
    assert!(matches!(
        controller.start().await,
        Err(PipelineError::AlreadyRunning)
    ));

    h.fx.world.complete_transfer("house.mesh");
    let summary = running.await.unwrap().unwrap();
    assert!(summary.success);
    assert_eq!(summary.counters.converted_refs, 1);
}

#[tokio::test]
async fn events_bracket_the_run() {
    let h = Harness::new();
    h.fx.file_asset("house.mesh", AssetType::Mesh, 100);
    h.fx.mesh_entity(1, "house.mesh", &[]);
    let controller = h.controller(h.fx.config());
    let mut events = controller.subscribe();

    controller.start().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.first(), Some(&PipelineEvent::Started));
    assert_eq!(seen.last(), Some(&PipelineEvent::Stopped { success: true }));
    assert!(seen
        .iter()
        .any(|e| matches!(e, PipelineEvent::Progress { percent: Some(100), .. })));
    assert!(seen.iter().any(|e| matches!(e, PipelineEvent::Log(_))));
    assert!(h.fx.working_dir().join(bundler_core::MAIN_LOG_FILE).exists());
}
