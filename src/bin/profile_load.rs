#![allow(dead_code, unused_imports)]

use archetype_assets::{
    BehaviorFlags, CacheConfig, Image, MemorySource, ResourceContext, ResourceHandle,
    ResourceType,
};
use std::sync::Arc;
use std::{fs::File, time::Duration, time::Instant};

#[cfg(feature = "profiling")]
use tracing_subscriber::{self, prelude::*};

const MESH_COUNT: usize = 2_000;

fn mesh_source() -> MemorySource {
    let source = MemorySource::new();
    for i in 0..MESH_COUNT {
        let vertices: Vec<f32> = (0..300).map(|v| (v + i) as f32).collect();
        let indices: Vec<u32> = (0..99).collect();
        source.insert(
            format!("meshes/m{i}.json"),
            serde_json::json!({ "vertices": vertices, "indices": indices }).to_string(),
        );
    }
    source
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(ctx))]
fn profile_loads(ctx: &ResourceContext, count: usize) {
    let _span = tracing::info_span!("load_loop", count = count).entered();
    for i in 0..count {
        if i % 500 == 0 {
            tracing::info!("Queueing mesh {}/{}", i, count);
        }
        let handle =
            ResourceHandle::create_with_path(ctx, format!("meshes/m{i}.json"), ResourceType::Mesh)
                .unwrap();
        ctx.load(&handle).unwrap();
    }
}

#[cfg(feature = "profiling")]
fn main() {
    // Set up tracing subscriber to write to a file
    let file = File::create("trace.json").unwrap();
    let (non_blocking, _guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .init();

    // small budget so the run exercises eviction
    let config = CacheConfig::default().with_max_cost(256 * 1024);
    let ctx = ResourceContext::builder(config)
        .with_source(Arc::new(mesh_source()))
        .build()
        .unwrap();

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        for i in 0..100 {
            ctx.create_procedural(
                format!("noise{i}"),
                Image::new(16, 16, vec![0; 256]).into(),
                BehaviorFlags::REMOVABLE,
            )
            .unwrap();
        }
    }

    println!("Profiling {MESH_COUNT} mesh loads...");
    let start = Instant::now();
    profile_loads(&ctx, MESH_COUNT);
    let report = ctx.pump(Duration::from_secs(60)).unwrap();
    println!(
        "Loaded {} meshes ({} failed) in: {:?}",
        report.constructed.len(),
        report.failed.len(),
        start.elapsed()
    );

    let stats = ctx.stats();
    println!(
        "cost {}/{} bytes, {} evictions, hit ratio {:.2}",
        ctx.cache().current_cost(),
        ctx.cache().max_cost(),
        stats.evictions,
        stats.cache_hit_ratio()
    );
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("profile_load binary requires --features profiling");
}
