// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cross-module tests for the cache, load processes and post-construction

#[cfg(test)]
mod tests {
    #![allow(clippy::module_inception)]
    use crate::{
        BehaviorFlags, CacheConfig, DeleteFlags, HeadlessContext, Image, InlineScheduler,
        LoadStatus, MemorySource, Mesh, Model, Resource, ResourceContext, ResourceError,
        ResourceEvent, ResourceHandle, ResourceType, Result,
    };
    use std::sync::Arc;

    const SHIP: &str = r#"{
        "meshes": [
            {"name": "hull", "vertices": [0,0,0, 1,0,0, 0,1,0], "indices": [0,1,2]},
            {"name": "sail", "vertices": [0,0,0, 0,1,0, 0,0,1], "indices": [2,1,0]}
        ],
        "materials": []
    }"#;

    fn context(max_cost: u64) -> ResourceContext {
        ResourceContext::builder(CacheConfig::default().with_max_cost(max_cost))
            .with_scheduler(Arc::new(InlineScheduler))
            .with_source(Arc::new(MemorySource::new().with_file("ship.json", SHIP)))
            .build()
            .unwrap()
    }

    fn assert_quiescent_invariants(ctx: &ResourceContext) {
        assert_eq!(ctx.cache().in_flight(), 0);
        let mut total = 0;
        for handle in ctx.cache().handles() {
            if handle.is_constructed() {
                assert!(handle.has_payload());
            }
            if handle.is_child() {
                assert!(!ctx.cache().mru_ids().contains(&handle.id()));
            }
            if let Some(parent) = handle.parent() {
                let parent = ctx.cache().get(parent).unwrap();
                assert!(parent.has_child(handle.id()));
            }
            total += handle.payload().map_or(0, |p| p.cost());
        }
        assert_eq!(ctx.cache().current_cost(), total);
    }

    #[test]
    fn test_children_constructed_before_parent() -> Result<()> {
        let ctx = context(1 << 20);
        let events = ctx.subscribe();
        let ship = ResourceHandle::create_with_path(&ctx, "ship.json", ResourceType::Model)?;

        ctx.load(&ship)?;
        let report = ctx.drain_post_construction()?;
        assert_eq!(report.constructed, vec![ship.id()]);

        let meshes = ctx.children_of_type(&ship, ResourceType::Mesh);
        assert_eq!(meshes.len(), 2);
        assert!(meshes.iter().all(|m| m.is_constructed()));
        assert!(ship.is_constructed());

        let changed: Vec<_> = events
            .try_iter()
            .filter_map(|e| match e {
                ResourceEvent::Changed(id) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(changed.len(), 3);
        assert_eq!(changed.last(), Some(&ship.id()));

        assert_quiescent_invariants(&ctx);
        Ok(())
    }

    #[test]
    fn test_reload_rebinds_same_children() -> Result<()> {
        let ctx = context(1 << 20);
        let ship = ResourceHandle::create_with_path(&ctx, "ship.json", ResourceType::Model)?;
        ctx.load(&ship)?;
        ctx.drain_post_construction()?;
        let before = ship.children();

        assert!(ctx.remove(&ship, DeleteFlags::empty()));
        assert_eq!(ship.status(), LoadStatus::Empty);
        assert_eq!(ctx.cache().current_cost(), 0);

        ctx.load(&ship)?;
        ctx.drain_post_construction()?;
        assert_eq!(ship.children(), before);
        assert_eq!(ctx.cache().len(), 3);
        assert_quiescent_invariants(&ctx);
        Ok(())
    }

    #[test]
    fn test_touch_ignores_children() -> Result<()> {
        let ctx = context(1 << 20);
        let ship = ResourceHandle::create_with_path(&ctx, "ship.json", ResourceType::Model)?;
        let other = ctx.create_procedural(
            "noise",
            Image::new(1, 1, vec![0]).into(),
            BehaviorFlags::REMOVABLE,
        )?;
        ctx.load(&ship)?;
        ctx.drain_post_construction()?;

        ctx.cache().touch(&other);
        let order = ctx.cache().mru_ids();
        assert_eq!(order, vec![other.id(), ship.id()]);

        let hull = ctx.child_by_name(&ship, "HULL", ResourceType::Mesh).unwrap();
        ctx.cache().touch(&hull);
        assert_eq!(ctx.cache().mru_ids(), order);
        Ok(())
    }

    #[test]
    fn test_evicting_parent_unloads_children() -> Result<()> {
        let ctx = context(1 << 20);
        let ship = ResourceHandle::create_with_path(&ctx, "ship.json", ResourceType::Model)?;
        ctx.load(&ship)?;
        ctx.drain_post_construction()?;

        let _ = ctx.cache().set_max_cost(0);
        assert!(!ship.has_payload());
        assert!(ctx
            .children_of_type(&ship, ResourceType::Mesh)
            .iter()
            .all(|m| m.needs_reload()));
        assert_eq!(ctx.cache().current_cost(), 0);
        assert_eq!(ctx.stats().evictions, 1);
        assert_quiescent_invariants(&ctx);
        Ok(())
    }

    #[test]
    fn test_constructed_child_fails_parent() -> Result<()> {
        let ctx = context(1 << 20);
        let ship = ResourceHandle::create(&ctx, ResourceType::Model)?;
        let hull = Arc::new(
            ResourceHandle::new(ResourceType::Mesh)
                .named("hull")
                .with_flags(BehaviorFlags::CHILD | BehaviorFlags::REMOVABLE),
        );
        let _ = ctx.cache().insert(hull.clone())?;
        ctx.add_child(&ship, &hull)?;

        hull.begin_load()?;
        ctx.cache()
            .attach_payload(&hull, Mesh::new(vec![0.0; 9], vec![0, 1, 2]).into())?;
        hull.construct(&HeadlessContext)?;

        ship.begin_load()?;
        ctx.cache().increment_load_count();
        ctx.cache().attach_payload(&ship, Model::default().into())?;

        assert!(matches!(
            ctx.post_construct(&ship),
            Err(ResourceError::Concurrency(_))
        ));
        assert_eq!(ship.status(), LoadStatus::Empty);
        assert!(ship.last_error().is_some());
        assert!(!hull.has_payload());
        assert_quiescent_invariants(&ctx);
        Ok(())
    }
}
