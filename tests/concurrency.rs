use archetype_assets::prelude::*;
use archetype_assets::{DeferredScheduler, Image, MemorySource, RayonScheduler};
use rayon::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const TRIANGLE: &str = r#"{"vertices": [0,0,0, 1,0,0, 0,1,0], "indices": [0,1,2]}"#;

fn deferred_context() -> (ResourceContext, Arc<DeferredScheduler>) {
    let scheduler = Arc::new(DeferredScheduler::new());
    let ctx = ResourceContext::builder(CacheConfig::default())
        .with_scheduler(scheduler.clone())
        .with_source(Arc::new(MemorySource::new().with_file("tri.json", TRIANGLE)))
        .build()
        .unwrap();
    (ctx, scheduler)
}

#[test]
fn test_racing_loads_start_once() {
    let (ctx, scheduler) = deferred_context();
    let handle = ResourceHandle::create_with_path(&ctx, "tri.json", ResourceType::Mesh).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let results: Vec<_> = (0..2)
        .map(|_| {
            let ctx = ctx.clone();
            let handle = handle.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                ctx.load(&handle)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ResourceError::Concurrency(_)))));
    assert!(handle.is_loading());
    assert_eq!(ctx.cache().in_flight(), 1);
    assert_eq!(scheduler.pending(), 1);

    scheduler.run_pending();
    ctx.drain_post_construction().unwrap();
    assert!(handle.is_constructed());
    assert_eq!(ctx.stats().loads, 1);
}

#[test]
fn test_second_load_leaves_state_alone() {
    let (ctx, scheduler) = deferred_context();
    let handle = ResourceHandle::create_with_path(&ctx, "tri.json", ResourceType::Mesh).unwrap();

    ctx.load(&handle).unwrap();
    scheduler.run_pending();
    assert!(handle.has_payload());
    let cost = ctx.cache().current_cost();

    assert!(matches!(ctx.load(&handle), Err(ResourceError::Concurrency(_))));
    assert!(handle.is_loading());
    assert_eq!(ctx.cache().current_cost(), cost);
    assert_eq!(ctx.cache().in_flight(), 1);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn test_remove_racing_load_keeps_counter_balanced() {
    for _ in 0..200 {
        let (ctx, scheduler) = deferred_context();
        let handle =
            ResourceHandle::create_with_path(&ctx, "tri.json", ResourceType::Mesh).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let loader = {
            let (ctx, handle, barrier) = (ctx.clone(), handle.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                ctx.load(&handle)
            })
        };
        let remover = {
            let (ctx, handle, barrier) = (ctx.clone(), handle.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                ctx.remove(&handle, DeleteFlags::empty())
            })
        };
        loader.join().unwrap().unwrap();
        remover.join().unwrap();

        // whichever side won, the load must still land and settle the counter
        assert!(handle.is_loading());
        scheduler.run_pending();
        let report = ctx.drain_post_construction().unwrap();
        assert_eq!(report.constructed, vec![handle.id()]);
        assert!(handle.is_constructed());
        assert_eq!(ctx.cache().in_flight(), 0);
    }
}

#[test]
fn test_parallel_creation_and_loading() -> Result<()> {
    let ctx = ResourceContext::builder(CacheConfig::default())
        .with_scheduler(Arc::new(RayonScheduler::new(4, "race-loader")?))
        .with_source(Arc::new(MemorySource::new().with_file("tri.json", TRIANGLE)))
        .build()?;
    let events = ctx.subscribe();

    let handles: Vec<Arc<ResourceHandle>> = (0..64)
        .into_par_iter()
        .map(|i| -> Result<Arc<ResourceHandle>> {
            let handle = if i % 2 == 0 {
                let handle = ResourceHandle::create_with_path(&ctx, "tri.json", ResourceType::Mesh)?;
                ctx.load(&handle)?;
                handle
            } else {
                ctx.create_procedural(
                    format!("noise{i}"),
                    Image::new(1, 1, vec![0; 4]).into(),
                    BehaviorFlags::REMOVABLE,
                )?
            };
            Ok(handle)
        })
        .collect::<Result<_>>()?;

    let report = ctx.pump(Duration::from_secs(10))?;
    assert!(report.failed.is_empty());
    assert!(handles.iter().all(|h| h.is_constructed()));
    assert_eq!(ctx.cache().len(), 64);
    assert_eq!(ctx.cache().in_flight(), 0);
    assert_eq!(
        ctx.cache().current_cost(),
        handles.iter().map(|h| h.cost()).sum::<u64>()
    );

    let events: Vec<_> = events.try_iter().collect();
    let started = events
        .iter()
        .filter(|e| **e == ResourceEvent::StartedLoading)
        .count();
    let done = events
        .iter()
        .filter(|e| **e == ResourceEvent::DoneLoading)
        .count();
    assert!(started >= 1);
    assert_eq!(started, done);
    Ok(())
}

#[test]
fn test_concurrent_lookups_during_eviction() {
    let ctx = ResourceContext::builder(CacheConfig::default().with_max_cost(64))
        .with_scheduler(Arc::new(DeferredScheduler::new()))
        .build()
        .unwrap();
    let handles: Vec<_> = (0..32)
        .map(|i| {
            let handle = Arc::new(
                ResourceHandle::new(ResourceType::Image)
                    .named(format!("tile{i}"))
                    .with_flags(BehaviorFlags::REMOVABLE),
            );
            let _ = ctx.cache().insert(handle.clone()).unwrap();
            handle
        })
        .collect();

    thread::scope(|scope| {
        scope.spawn(|| {
            for handle in &handles {
                ctx.attach_payload(handle, Image::new(4, 4, vec![0; 16]).into())
                    .unwrap();
                let _ = ctx.cache().enforce_budget();
            }
        });
        scope.spawn(|| {
            for _ in 0..4 {
                for handle in &handles {
                    ctx.cache().touch(handle);
                    assert!(ctx.get_by_uuid(handle.id()).is_some());
                }
            }
        });
    });

    assert!(ctx.cache().current_cost() <= 64);
    let resident: u64 = handles.iter().map(|h| h.cost()).sum();
    assert_eq!(ctx.cache().current_cost(), resident);
}
