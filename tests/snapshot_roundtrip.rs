use archetype_assets::prelude::*;
use archetype_assets::{CacheSnapshot, DeferredScheduler, Image, InlineScheduler, MemorySource};
use std::sync::Arc;

const TRIANGLE: &str = r#"{"vertices": [0,0,0, 1,0,0, 0,1,0], "indices": [0,1,2]}"#;
const SHIP: &str = r#"{
    "meshes": [
        {"name": "hull", "vertices": [0,0,0, 1,0,0, 0,1,0], "indices": [0,1,2]},
        {"name": "sail", "vertices": [0,0,0, 0,1,0, 0,0,1], "indices": [2,1,0]}
    ],
    "materials": [{"name": "paint", "params": [{"name": "gloss", "value": 0.5}], "textures": []}]
}"#;

fn context() -> ResourceContext {
    ResourceContext::builder(CacheConfig::default().with_max_cost(4096))
        .with_scheduler(Arc::new(InlineScheduler))
        .with_source(Arc::new(
            MemorySource::new()
                .with_file("meshes/tri.json", TRIANGLE)
                .with_file("models/ship.json", SHIP),
        ))
        .build()
        .unwrap()
}

/// Loads a mesh, a model with children, a procedural image and a core image
fn populate(ctx: &ResourceContext) -> Result<()> {
    let tri = ResourceHandle::create_with_path(ctx, "meshes/tri.json", ResourceType::Mesh)?;
    ctx.load(&tri)?;
    let ship = ResourceHandle::create_with_path(ctx, "models/ship.json", ResourceType::Model)?;
    ctx.load(&ship)?;
    ctx.create_procedural(
        "noise",
        Image::new(2, 2, vec![1, 2, 3, 4]).into(),
        BehaviorFlags::REMOVABLE,
    )?;
    ctx.create_procedural(
        "white",
        Image::new(1, 1, vec![255]).into(),
        BehaviorFlags::CORE,
    )?;
    ctx.drain_post_construction()?;
    Ok(())
}

#[test]
fn test_roundtrip_restores_identity() -> Result<()> {
    let ctx = context();
    populate(&ctx)?;
    let ship = ctx.get_top_level_by_path("models/ship.json").unwrap();
    let children = ship.children();
    assert_eq!(children.len(), 3);

    let snapshot = ctx.serialize()?;
    let names: Vec<_> = snapshot.resources.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["noise", "ship", "tri"]);
    assert_eq!(snapshot.max_cost_budget, 4096);

    ctx.clear()?;
    assert!(ctx.cache().cleared_removable());
    assert_eq!(ctx.cache().len(), 1);

    let restored = ctx.load_snapshot(snapshot.clone())?;
    ctx.drain_post_construction()?;
    assert_eq!(restored.budget, BudgetStatus::WithinBudget);
    assert_eq!(restored.handles.len(), 3);
    assert!(restored.handles.iter().all(|h| h.is_constructed()));

    for entry in &snapshot.resources {
        let handle = ctx.get_by_uuid(entry.id).unwrap();
        assert_eq!(handle.name(), entry.name);
        assert_eq!(handle.resource_type(), entry.resource_type);
        assert_eq!(handle.behavior_flags(), entry.behavior_flags);
    }

    let ship = ctx.get_top_level_by_path("models/ship.json").unwrap();
    assert_eq!(ship.children(), children);
    assert!(ctx
        .child_by_name(&ship, "paint", ResourceType::Material)
        .is_some_and(|m| m.is_constructed()));
    Ok(())
}

#[test]
fn test_procedural_rebuilt_from_embedded_payload() -> Result<()> {
    let ctx = context();
    populate(&ctx)?;
    let json = ctx.to_json()?;

    let fresh = context();
    fresh.load_json(&json)?;
    fresh.drain_post_construction()?;

    let noise = fresh.get_by_name_and_type("noise", ResourceType::Image).unwrap();
    assert!(noise.is_runtime_generated());
    let payload = fresh.payload(&noise).unwrap();
    assert_eq!(payload.as_image().unwrap().pixels, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_core_and_unsaved_are_skipped() -> Result<()> {
    let ctx = context();
    populate(&ctx)?;
    let scratch = ctx.create_procedural(
        "scratch",
        Image::new(1, 1, vec![0]).into(),
        BehaviorFlags::REMOVABLE | BehaviorFlags::UNSAVED,
    )?;
    assert!(scratch.is_unsaved());

    let snapshot = ctx.serialize()?;
    assert!(snapshot.resources.iter().all(|r| r.name != "scratch"));
    assert!(snapshot.resources.iter().all(|r| r.name != "white"));
    assert!(snapshot
        .resources
        .iter()
        .all(|r| !r.behavior_flags.contains(BehaviorFlags::CHILD)));
    Ok(())
}

#[test]
fn test_serialize_refused_while_loading() {
    let scheduler = Arc::new(DeferredScheduler::new());
    let ctx = ResourceContext::builder(CacheConfig::default())
        .with_scheduler(scheduler.clone())
        .with_source(Arc::new(MemorySource::new().with_file("tri.json", TRIANGLE)))
        .build()
        .unwrap();
    let tri = ResourceHandle::create_with_path(&ctx, "tri.json", ResourceType::Mesh).unwrap();
    ctx.load(&tri).unwrap();

    assert!(matches!(ctx.serialize(), Err(ResourceError::Concurrency(_))));
    assert!(matches!(ctx.clear(), Err(ResourceError::Concurrency(_))));

    scheduler.run_pending();
    ctx.drain_post_construction().unwrap();
    assert!(ctx.serialize().is_ok());
}

#[test]
fn test_save_and_load_file() -> Result<()> {
    let ctx = context();
    populate(&ctx)?;
    let path = std::env::temp_dir().join(format!("snapshot-{}.json", uuid::Uuid::new_v4()));
    ctx.save_to_path(&path)?;

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(raw["maxCostBudget"], 4096);
    assert!(raw["resources"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r.get("type").is_some() && r.get("behaviorFlags").is_some()));

    let fresh = context();
    let reload = fresh.load_from_path(&path)?;
    std::fs::remove_file(&path)?;
    fresh.drain_post_construction()?;
    assert_eq!(reload.handles.len(), 3);
    assert_eq!(fresh.cache().max_cost(), 4096);

    let reread = CacheSnapshot::from_json(&fresh.to_json()?)?;
    assert_eq!(reread.resources.len(), 3);
    Ok(())
}

#[test]
fn test_snapshot_budget_overrun_reported() -> Result<()> {
    let ctx = context();
    populate(&ctx)?;
    let mut snapshot = ctx.serialize()?;
    ctx.clear()?;

    // only the core image is left and it cannot be evicted
    snapshot.max_cost_budget = 0;
    let reload = ctx.load_snapshot(snapshot)?;
    assert_eq!(reload.budget, BudgetStatus::OverBudget { current: 1, max: 0 });
    assert_eq!(reload.handles.len(), 3);
    assert_eq!(ctx.cache().max_cost(), 0);
    Ok(())
}

#[test]
fn test_duplicate_snapshot_entry_rejected() -> Result<()> {
    let ctx = context();
    populate(&ctx)?;
    let snapshot = ctx.serialize()?;
    assert!(matches!(
        ctx.load_snapshot(snapshot),
        Err(ResourceError::Configuration(_))
    ));
    Ok(())
}
