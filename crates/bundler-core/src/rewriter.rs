//! Reference rewriting
//!
//! Walks the asset references of mesh and generated material components,
//! resolves each through the identity cache and points the attribute at
//! the bundled copy. Every write uses the disconnected scope and is
//! recorded in the run's journal so it can be replicated or rolled back.
//!
//! Material scripts are opened once per run: their texture slots are
//! resolved (and transcoded) before the material's own reference is
//! rewritten, and the copied script is saved with the new texture refs.

use crate::config::IncludeConfig;
use crate::log::RunLog;
use crate::state::RunState;
use bundler_asset::{resolve_relative, AssetClass, AssetSource, MaterialScript, ParsedRef, RecordId};
use bundler_scene::{
    AttributeHandle, AttributeName, AttributeValue, ChangeScope, ComponentInfo, ComponentKind,
    SceneStore,
};
use bundler_tools::{SkipReason, TranscodeOutcome};
use tracing::debug;
use uuid::Uuid;

/// Generated material parameter naming a texture
const TEXTURE_PARAMETER: &str = "texture = ";

/// Prefix of renamed generated materials
pub const GENERATED_SCHEME: &str = "generated://";

/// Components of `kind` that pass the entity filters
#[must_use]
pub fn targets(
    scene: &dyn SceneStore,
    kind: ComponentKind,
    include: &IncludeConfig,
) -> Vec<ComponentInfo> {
    scene
        .components(kind)
        .into_iter()
        .filter(|c| is_target(scene, c, include))
        .collect()
}

/// Temporary or local components and entities are never touched. Script
/// and content tool entities only when opted in.
#[must_use]
pub fn is_target(scene: &dyn SceneStore, component: &ComponentInfo, include: &IncludeConfig) -> bool {
    if component.flags.is_excluded() {
        return false;
    }
    match scene.entity_flags(component.entity) {
        Some(flags) if !flags.is_excluded() => {}
        _ => return false,
    }
    if !include.script_entities && scene.has_component(component.entity, ComponentKind::Script) {
        return false;
    }
    if !include.content_tool_entities
        && scene.has_component(component.entity, ComponentKind::ContentToolMarker)
    {
        return false;
    }
    true
}

/// New name for a generated material's `outputMat`
#[must_use]
pub fn generated_material_name(output_mat: &str) -> String {
    let parsed = ParsedRef::parse(output_mat);
    let base = if parsed.file_name.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        parsed.file_name
    };
    let mut name = format!("{GENERATED_SCHEME}{base}");
    if !name.to_ascii_lowercase().ends_with(".material") {
        name.push_str(".material");
    }
    name.replace(' ', "_")
}

/// Rewrites component attributes for one run
pub struct ReferenceRewriter<'a> {
    run: &'a mut RunState,
    scene: &'a dyn SceneStore,
    assets: &'a dyn AssetSource,
    log: &'a RunLog,
}

impl<'a> ReferenceRewriter<'a> {
    pub fn new(
        run: &'a mut RunState,
        scene: &'a dyn SceneStore,
        assets: &'a dyn AssetSource,
        log: &'a RunLog,
    ) -> Self {
        Self {
            run,
            scene,
            assets,
            log,
        }
    }

    /// Rewrite `meshRef`. Returns the number of converted refs.
    pub async fn rewrite_mesh_ref(&mut self, component: &ComponentInfo) -> usize {
        let handle = component.handle(AttributeName::MeshRef);
        let Some(original) = self.read(&handle) else {
            return 0;
        };
        let reference = single_ref(&original);
        if reference.is_empty() {
            return 0;
        }
        let Some(id) = self.resolve(&reference, AssetClass::Mesh).await else {
            return 0;
        };
        let new = original.parse_like(self.run.cache.record(id).bundle_ref());
        if !self.apply(handle, original, new) {
            return 0;
        }
        self.supersede(&reference);
        self.run.counters.converted_refs += 1;
        1
    }

    /// Rewrite every element of `materialRefs`, resolving each new
    /// material's textures first. The list gets one journal entry.
    pub async fn rewrite_material_refs(&mut self, component: &ComponentInfo) -> usize {
        let handle = component.handle(AttributeName::MaterialRefs);
        let Some(original) = self.read(&handle) else {
            return 0;
        };
        let Some(items) = original.as_list() else {
            debug!(%handle, "material refs attribute is not a list");
            return 0;
        };

        let mut items = items.to_vec();
        let mut converted = 0;
        let mut changed = false;
        for item in &mut items {
            let reference = item.trim().to_string();
            if reference.is_empty() {
                continue;
            }
            if let Some(generated) = self.run.generated_names.get(&reference) {
                item.clone_from(generated);
                changed = true;
                continue;
            }
            let Some(id) = self.resolve_material(&reference).await else {
                continue;
            };
            *item = self.run.cache.record(id).bundle_ref().to_string();
            self.supersede(&reference);
            converted += 1;
            changed = true;
        }

        if !changed {
            return 0;
        }
        let new = list_like(&original, items);
        if !self.apply(handle, original, new) {
            return 0;
        }
        self.run.counters.converted_refs += converted;
        converted
    }

    /// Rewrite `outputMat`, texture parameters and `inputMat`. A failure in
    /// one of them does not affect the others.
    pub async fn rewrite_generated_material(&mut self, component: &ComponentInfo) -> usize {
        let converted = self.rewrite_output_material(component)
            + self.rewrite_texture_parameters(component).await
            + self.rewrite_input_material(component).await;
        self.run.counters.converted_refs += converted;
        converted
    }

    fn rewrite_output_material(&mut self, component: &ComponentInfo) -> usize {
        let handle = component.handle(AttributeName::OutputMat);
        let Some(original) = self.read(&handle) else {
            return 0;
        };
        let name = single_ref(&original);
        if name.is_empty() {
            return 0;
        }
        let generated = generated_material_name(&name);
        self.run
            .generated_names
            .insert(name.clone(), generated.clone());
        let new = original.parse_like(&generated);
        if !self.apply(handle, original, new) {
            return 0;
        }
        self.supersede(&name);
        1
    }

    async fn rewrite_texture_parameters(&mut self, component: &ComponentInfo) -> usize {
        let handle = component.handle(AttributeName::Parameters);
        let Some(original) = self.read(&handle) else {
            return 0;
        };
        let Some(params) = original.as_list() else {
            return 0;
        };

        let mut params = params.to_vec();
        let mut converted = 0;
        for param in &mut params {
            let trimmed = param.trim();
            if !trimmed.starts_with(TEXTURE_PARAMETER) {
                continue;
            }
            let reference = trimmed
                .rfind("= ")
                .map(|pos| trimmed[pos + 2..].trim().to_string())
                .unwrap_or_default();
            if reference.is_empty() {
                continue;
            }
            let Some(id) = self
                .resolve_texture(&reference, AssetClass::GeneratedTexture)
                .await
            else {
                continue;
            };
            *param = format!("{TEXTURE_PARAMETER}{}", self.run.cache.record(id).bundle_ref());
            self.supersede(&reference);
            converted += 1;
        }

        if converted == 0 {
            return 0;
        }
        let new = list_like(&original, params);
        if !self.apply(handle, original, new) {
            return 0;
        }
        converted
    }

    async fn rewrite_input_material(&mut self, component: &ComponentInfo) -> usize {
        let handle = component.handle(AttributeName::InputMat);
        let Some(original) = self.read(&handle) else {
            return 0;
        };
        let reference = single_ref(&original);
        if reference.is_empty() {
            return 0;
        }
        let Some(id) = self.resolve_material(&reference).await else {
            return 0;
        };
        let new = original.parse_like(self.run.cache.record(id).bundle_ref());
        if !self.apply(handle, original, new) {
            return 0;
        }
        self.supersede(&reference);
        1
    }

    /// Resolve a reference; `None` if it cannot be bundled
    async fn resolve(&mut self, reference: &str, class: AssetClass) -> Option<RecordId> {
        let run = &mut *self.run;
        match run
            .cache
            .resolve(reference, class, self.assets, &mut run.allocator)
            .await
        {
            Ok(id) if run.cache.record(id).dont_process() => {
                debug!(reference, "asset is marked as not processable");
                None
            }
            Ok(id) => Some(id),
            Err(err) => {
                self.log.warn(format!("Skipping {reference}: {err}"));
                None
            }
        }
    }

    /// Resolve a texture and transcode its copy on first sight. A texture
    /// the tool failed on is left unbundled.
    async fn resolve_texture(&mut self, reference: &str, class: AssetClass) -> Option<RecordId> {
        let id = self.resolve(reference, class).await?;
        let run = &mut *self.run;
        if run.cache.record(id).texture_post_processed() {
            return Some(id);
        }

        let dimensions = self.assets.texture_dimensions(reference);
        let mut record = run.cache.record(id).clone();
        let cache = &mut run.cache;
        let outcome = run
            .transcoder
            .process(&mut record, dimensions, &mut run.allocator, |planned| {
                cache.reserve_path(planned)
            })
            .await;
        *run.cache.record_mut(id) = record;
        match outcome {
            TranscodeOutcome::Failed(tool) => {
                run.cache.discard(id, &mut run.allocator).await;
                self.log.error(format!(
                    "Texture processing {} for {reference}, the reference is left unchanged",
                    tool.describe()
                ));
                return None;
            }
            TranscodeOutcome::Skipped(SkipReason::UnsupportedFormat(format)) => {
                self.log.warn(format!(
                    "Texture format '{format}' is not supported for processing: {reference}"
                ));
            }
            TranscodeOutcome::Transcoded {
                converted,
                bytes_before,
                bytes_after,
                tool_output,
            } => {
                if run.settings.debug {
                    self.log.info(format!(
                        "  Processed {reference} ({bytes_before} -> {bytes_after} bytes{})",
                        if converted { ", converted" } else { "" }
                    ));
                }
                for line in tool_output {
                    self.log.info(format!("    {line}"));
                }
            }
            TranscodeOutcome::Skipped(_) => {}
        }
        Some(id)
    }

    /// Resolve a material and, once per run, its texture slots
    async fn resolve_material(&mut self, reference: &str) -> Option<RecordId> {
        let id = self.resolve(reference, AssetClass::Material).await?;
        if !self.run.cache.record(id).textures_resolved() {
            self.rewrite_material_textures(id, reference).await;
            self.run.cache.record_mut(id).mark_textures_resolved();
        }
        Some(id)
    }

    async fn rewrite_material_textures(&mut self, id: RecordId, material_ref: &str) {
        let path = self.run.cache.record(id).disk_path().to_path_buf();
        let mut script = match MaterialScript::load(&path).await {
            Ok(script) => script,
            Err(err) => {
                self.log
                    .warn(format!("Cannot read textures of {material_ref}: {err}"));
                return;
            }
        };
        let textures: Vec<String> = script
            .slots()
            .iter()
            .map(|slot| slot.texture_ref.clone())
            .collect();

        let mut changed = false;
        for (index, texture) in textures.iter().enumerate() {
            let reference = resolve_relative(material_ref, texture);
            if reference.is_empty() {
                continue;
            }
            let Some(texture_id) = self.resolve_texture(&reference, AssetClass::Texture).await
            else {
                continue;
            };
            let bundle_ref = self.run.cache.record(texture_id).bundle_ref().to_string();
            if let Err(err) = script.set_texture(index, &bundle_ref) {
                self.log.warn(format!("Cannot update texture of {material_ref}: {err}"));
                continue;
            }
            self.supersede(&reference);
            changed = true;
        }

        if changed {
            if let Err(err) = script.save(&path).await {
                self.log.error(format!(
                    "Failed to rewrite material file after texture changes: {err}"
                ));
            }
        }
    }

    fn read(&self, handle: &AttributeHandle) -> Option<AttributeValue> {
        match self.scene.read(handle) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%handle, error = %err, "attribute not readable");
                None
            }
        }
    }

    /// Write `new` locally and journal the change
    fn apply(&mut self, handle: AttributeHandle, original: AttributeValue, new: AttributeValue) -> bool {
        if let Err(err) = self
            .scene
            .write(&handle, new.clone(), ChangeScope::Disconnected)
        {
            self.log.warn(format!("Failed to rewrite {handle}: {err}"));
            return false;
        }
        if self.run.settings.debug {
            self.log.info(format!("  {handle} -> {}", new.to_text()));
        }
        self.run.journal.record(handle, original, new);
        true
    }

    fn supersede(&mut self, reference: &str) {
        self.run.superseded.insert(reference.to_string());
    }
}

fn single_ref(value: &AttributeValue) -> String {
    value.as_single().unwrap_or_default().trim().to_string()
}

/// List value of the same kind as `original`
fn list_like(original: &AttributeValue, items: Vec<String>) -> AttributeValue {
    match original {
        AttributeValue::StringList(_) => AttributeValue::StringList(items),
        _ => AttributeValue::AssetRefList(items),
    }
}
