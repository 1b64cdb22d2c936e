/// Tests for grid baking, registration and path request resolution.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 8x8 grid of 1m cells centred on the origin, 2x2 sub-sections, no height map.
fn small_config(name: &str) -> GridConfig {
    GridConfig {
        friendly_name: name.to_string(),
        size_x: 8,
        size_z: 8,
        cell_size: 1.0,
        sub_sections_x: 2,
        sub_sections_z: 2,
        sub_sections_cell_overlap: 1,
        generate_heightmap: false,
        granularity: 0.25,
        ..default()
    }
}

fn bake(config: &GridConfig, scene: &StaticScene) -> Arc<Grid> {
    let builder = GridBuilder::new(config, config.origin).unwrap();
    Arc::new(builder.create(scene))
}

fn run_until_idle(scheduler: &mut FrameScheduler) -> usize {
    let mut frames = 0;
    while !scheduler.is_idle() {
        scheduler.run_frame();
        frames += 1;
        assert!(frames < 100_000, "scheduler never went idle");
    }
    frames
}

fn random_scene(rng: &mut fastrand::Rng, half_extent: f32, obstacles: usize) -> StaticScene {
    let mut scene = StaticScene::flat(half_extent, 0.0);
    for _ in 0..obstacles {
        let center = Vec2::new(
            (rng.f32() * 2.0 - 1.0) * half_extent,
            (rng.f32() * 2.0 - 1.0) * half_extent,
        );
        scene = scene.with_obstacle(Obstacle::Cylinder {
            center,
            radius: 0.2 + rng.f32(),
            base: 0.0,
            top: 0.2 + rng.f32() * 3.0,
        });
    }
    scene
}

// ============================================================================
// Bounds and configuration
// ============================================================================

#[test]
fn test_default_grid_bounds() {
    let bounds = compute_bounds(Vec3::ZERO, 10, 10, 2.0, 1.0, 10.0);
    assert_eq!(bounds.center, Vec3::new(0.0, 4.5, 0.0));
    assert_eq!(bounds.size, Vec3::new(20.0, 11.0, 20.0));

    // The default configuration is the same grid
    let component = GridComponent::new(GridConfig::default()).unwrap();
    assert_eq!(component.bounds(), bounds);
}

#[test]
fn test_bounds_are_deterministic() {
    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..200 {
        let origin = Vec3::new(rng.f32() * 200.0 - 100.0, rng.f32() * 20.0, rng.f32() * 200.0 - 100.0);
        let (size_x, size_z) = (rng.u32(1..200), rng.u32(1..200));
        let cell_size = 0.1 + rng.f32() * 4.0;
        let (lower, upper) = (rng.f32() * 5.0, rng.f32() * 50.0);

        let a = compute_bounds(origin, size_x, size_z, cell_size, lower, upper);
        let b = compute_bounds(origin, size_x, size_z, cell_size, lower, upper);
        assert_eq!(a, b);
        assert!(a.contains(origin));
    }
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let mut config = small_config("Tiny cells");
    config.cell_size = 0.05;
    let err = GridBuilder::new(&config, Vec3::ZERO).unwrap_err();
    assert!(err.is_configuration());
    assert!(GridComponent::new(config).is_err());

    let mut config = small_config("Steep");
    config.max_walkable_slope_angle = 95.0;
    assert!(config.check().is_err());

    let mut config = small_config("Too many sections");
    config.size_x = 4;
    config.sub_sections_x = 5;
    assert!(matches!(
        config.check(),
        Err(NavError::Configuration(ConfigError::Invalid { .. }))
    ));
}

#[test]
fn test_sub_section_overlap_must_fit() {
    let mut config = small_config("Overlap");
    config.size_x = 4;
    config.size_z = 4;
    config.sub_sections_cell_overlap = 2;

    // 4 cells in 2 sections leaves 2 cells per section
    match config.check() {
        Err(NavError::Configuration(ConfigError::SubSectionOverlap { overlap, smallest, .. })) => {
            assert_eq!(overlap, 2);
            assert_eq!(smallest, 2);
        }
        other => panic!("expected SubSectionOverlap, got {:?}", other),
    }

    config.sub_sections_cell_overlap = 1;
    assert!(config.check().is_ok());
}

#[test]
fn test_sub_section_count_limited_to_id_range() {
    let mut config = small_config("Crowded");
    config.size_x = 300;
    config.size_z = 300;
    config.sub_sections_x = 300;
    config.sub_sections_z = 300;
    config.sub_sections_cell_overlap = 0;
    assert!(matches!(
        config.check(),
        Err(NavError::Configuration(ConfigError::Invalid { .. }))
    ));
    assert!(GridBuilder::new(&config, Vec3::ZERO).is_err());

    // 256 x 256 uses every id exactly once
    config.sub_sections_x = 256;
    config.sub_sections_z = 256;
    assert!(config.check().is_ok());
    let sections = partition_sub_sections(300, 300, 256, 256, 0);
    assert_eq!(sections.len(), MAX_SUB_SECTIONS);
    assert_eq!(sections.last().unwrap().id, SubSectionId(u16::MAX));
}

#[test]
fn test_tracked_origin_ignores_explicit_origin() {
    let mut component = GridComponent::tracked(small_config("Tracked"), Vec3::new(0.0, 1.0, 0.0)).unwrap();
    let before = component.bounds();

    assert!(!component.set_origin(Vec3::new(50.0, 0.0, 50.0)));
    assert_eq!(component.bounds(), before);

    assert!(component.follow_transform(Vec3::new(10.0, 0.0, -4.0)));
    assert_eq!(component.origin().position(), Vec3::new(10.0, 1.0, -4.0));
    assert_eq!(component.bounds().center.x, 10.0);
    assert!(!component.follow_transform(Vec3::new(10.0, 0.0, -4.0)));

    let mut fixed = GridComponent::new(small_config("Fixed")).unwrap();
    assert!(fixed.set_origin(Vec3::new(3.0, 0.0, 0.0)));
    assert_eq!(fixed.bounds().center.x, 3.0);
}

#[test]
fn test_bounds_frozen_once_built() {
    let scene = StaticScene::flat(50.0, 0.0);
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(1);

    let mut component = GridComponent::new(small_config("Frozen")).unwrap();
    component.ensure_grid(owner, &scene, &mut registry).unwrap();
    let baked_bounds = component.bounds();

    component.set_origin(Vec3::new(20.0, 0.0, 0.0));
    assert_eq!(component.bounds(), baked_bounds);

    component.reset_grid(&mut registry);
    assert_eq!(component.bounds().center.x, 20.0);
}

#[test]
fn test_partition_covers_every_cell_once() {
    let sections = partition_sub_sections(10, 7, 3, 2, 1);
    assert_eq!(sections.len(), 6);

    let mut homes = vec![0; 70];
    for (i, section) in sections.iter().enumerate() {
        assert_eq!(section.id, SubSectionId(i as u16));
        for (x, z) in section.home_cells() {
            homes[z * 10 + x] += 1;
        }
        assert!(section.touch_min.0 <= section.home_min.0 && section.touch_max.0 >= section.home_max.0);
        assert!(section.touch_max.0 <= 10 && section.touch_max.1 <= 7);
    }
    assert!(homes.iter().all(|&count| count == 1));

    // Row-major numbering: section 1 sits right of section 0
    assert_eq!(sections[1].home_min, (sections[0].home_max.0, 0));
}

// ============================================================================
// Baking
// ============================================================================

#[test]
fn test_flat_scene_is_fully_walkable() {
    let config = GridConfig::default();
    let grid = bake(&config, &StaticScene::flat(50.0, 0.0));
    let matrix = grid.cell_matrix();

    assert_eq!(matrix.cells().len(), 100);
    assert_eq!(matrix.walkable_count(), 100);
    for cell in matrix.cells() {
        assert_eq!(cell.cost, 1);
        assert_eq!(cell.height, Some(0.0));
    }
    assert_eq!(matrix.height_map().unwrap().samples_per_cell(), 20);
}

#[test]
fn test_cells_keep_unique_contiguous_coordinates() {
    let grid = bake(&small_config("Coords"), &StaticScene::flat(50.0, 0.0));
    let matrix = grid.cell_matrix();
    for z in 0..8 {
        for x in 0..8 {
            let cell = matrix.get(x, z).unwrap();
            assert_eq!(cell.coords(), (x, z));
            let section = matrix.sub_section(cell.sub_section).unwrap();
            assert!(section.home_contains(x, z));
        }
    }
}

#[test]
fn test_slope_limits_walkability() {
    let config = small_config("Slopes");
    let ramp = |angle| StaticScene::default().with_surface(Surface::ramp_x(Vec2::splat(-10.0), Vec2::splat(10.0), 0.0, angle));

    let gentle = bake(&config, &ramp(20.0));
    assert_eq!(gentle.cell_matrix().walkable_count(), 64);
    // 1 + floor(4 * 20 / 30)
    assert!(gentle.cell_matrix().cells().iter().all(|c| c.cost == 3));

    let steep = bake(&config, &ramp(40.0));
    assert_eq!(steep.cell_matrix().walkable_count(), 0);
    assert!(steep.cell_matrix().cells().iter().all(|c| c.cost == BLOCKED_COST));
}

#[test]
fn test_obstacles_and_scale_height() {
    let config = small_config("Obstacles");
    let scene = StaticScene::flat(50.0, 0.0)
        // Pillar on cell (2, 2)
        .with_obstacle(Obstacle::Cylinder { center: Vec2::new(-1.5, -1.5), radius: 0.2, base: 0.0, top: 2.0 })
        // Kerb on cell (5, 5), low enough to step onto
        .with_obstacle(Obstacle::Cylinder { center: Vec2::new(1.5, 1.5), radius: 0.2, base: 0.0, top: 0.3 })
        // Wall over the last row
        .with_obstacle(Obstacle::Box { min: Vec3::new(-4.0, 0.0, 3.2), max: Vec3::new(4.0, 3.0, 4.0) });

    let grid = bake(&config, &scene);
    let matrix = grid.cell_matrix();

    assert!(!matrix.get(2, 2).unwrap().walkable);
    assert!(matrix.get(1, 2).unwrap().walkable);
    assert!(matrix.get(5, 5).unwrap().walkable);
    assert!((0..8).all(|x| !matrix.get(x, 7).unwrap().walkable));
    assert!((0..8).all(|x| matrix.get(x, 6).unwrap().walkable));
    assert_eq!(matrix.walkable_count(), 64 - 1 - 8);
}

#[test]
fn test_height_map_blocks_tall_steps() {
    let mut config = small_config("Platform");
    config.generate_heightmap = true;
    // Platform edge runs through the middle of column 4
    let scene = StaticScene::flat(50.0, 0.0)
        .with_surface(Surface::flat(Vec2::new(0.5, -10.0), Vec2::new(10.0, 10.0), 2.0));

    let grid = bake(&config, &scene);
    let matrix = grid.cell_matrix();
    assert_eq!(matrix.height_map().unwrap().samples_per_cell(), 4);

    for z in 0..8 {
        assert!(matrix.get(3, z).unwrap().walkable);
        assert_eq!(matrix.get(3, z).unwrap().height, Some(0.0));
        assert!(!matrix.get(4, z).unwrap().walkable);
        assert!(matrix.get(6, z).unwrap().walkable);
        assert_eq!(matrix.get(6, z).unwrap().height, Some(2.0));
    }

    assert_eq!(grid.sample_height(Vec3::new(2.5, 0.0, 0.0)), Some(2.0));
    assert_eq!(grid.sample_height(Vec3::new(-2.5, 0.0, 0.0)), Some(0.0));
    assert_eq!(matrix.cell_center(6, 0).y, 2.0);
}

#[test]
fn test_cliff_on_cell_edge_blocks_crossing() {
    // Plateau edge lies exactly on the boundary between columns 3 and 4
    let scene = StaticScene::flat(50.0, 0.0)
        .with_surface(Surface::flat(Vec2::new(0.0, -10.0), Vec2::new(10.0, 10.0), 5.0));

    for heightmap in [false, true] {
        let mut config = small_config("Cliff");
        config.generate_heightmap = heightmap;
        config.max_scale_height = 0.5;
        let grid = bake(&config, &scene);
        let matrix = grid.cell_matrix();

        for z in 0..8 {
            let low = matrix.get(3, z).unwrap();
            let high = matrix.get(4, z).unwrap();
            assert!(low.walkable && high.walkable, "heightmap={} z={}", heightmap, z);
            assert!(!low.can_cross(CellEdge::East));
            assert!(!high.can_cross(CellEdge::West));
            assert!(!matrix.can_step(3, z, CellEdge::East));
            assert!(!matrix.can_step(4, z, CellEdge::West));

            assert!(matrix.can_step(2, z, CellEdge::East));
            assert!(matrix.can_step(5, z, CellEdge::West));
            if z < 7 {
                assert!(matrix.can_step(3, z, CellEdge::North));
                assert!(matrix.can_step(4, z, CellEdge::North));
            }
        }
        // Border edges stay open; there is no neighbour to step onto
        assert!(matrix.get(0, 0).unwrap().can_cross(CellEdge::West));
        assert!(!matrix.can_step(0, 0, CellEdge::West));
    }
}

#[test]
fn test_ramp_edges_are_crossable() {
    let config = small_config("Ramp");
    let scene = StaticScene::default().with_surface(Surface::ramp_x(Vec2::splat(-10.0), Vec2::splat(10.0), 0.0, 20.0));
    let grid = bake(&config, &scene);
    assert!(grid.cell_matrix().cells().iter().all(|c| c.walkable && c.blocked_edges == 0));
}

#[test]
fn test_sliced_bake_matches_synchronous_bake() {
    let mut rng = fastrand::Rng::with_seed(42);
    for round in 0..5 {
        let scene = Arc::new(random_scene(&mut rng, 12.0, 15));
        let config = GridConfig {
            friendly_name: format!("Random {}", round),
            size_x: 12,
            size_z: 12,
            cell_size: 1.0,
            sub_sections_x: 3,
            sub_sections_z: 3,
            sub_sections_cell_overlap: 1,
            granularity: 0.5,
            ..default()
        };
        let builder = GridBuilder::new(&config, Vec3::ZERO).unwrap();
        let sync_grid = builder.create(scene.as_ref());

        let sliced = builder.clone().with_cell_batch_size(1 + rng.usize(..10));
        let result: Arc<Mutex<Option<Arc<Grid>>>> = Arc::default();
        let slot = result.clone();
        let mut scheduler = FrameScheduler::default();
        let handle = sliced.create_sliced(scene.clone(), Duration::ZERO, &mut scheduler, move |grid| {
            *slot.lock().unwrap() = Some(grid);
        });

        let frames = run_until_idle(&mut scheduler);
        assert!(frames > 1, "zero budget should take several steps");
        assert!(handle.is_finished());

        let sliced_grid = result.lock().unwrap().take().unwrap();
        assert_eq!(sliced_grid.cell_matrix(), sync_grid.cell_matrix());
        assert_ne!(sliced_grid.id(), sync_grid.id());
    }
}

#[test]
fn test_build_task_progress() {
    let builder = GridBuilder::new(&small_config("Progress"), Vec3::ZERO).unwrap().with_cell_batch_size(16);
    let scene = StaticScene::flat(50.0, 0.0);
    let mut task = BuildTask::full(&builder);
    assert_eq!(task.progress(), 0.0);
    assert_eq!(task.mode(), &BuildMode::Full);

    assert!(!task.step(&scene, Duration::ZERO));
    assert_eq!(task.progress(), 0.25);
    while !task.step(&scene, Duration::ZERO) {}
    assert_eq!(task.steps(), 4);
    assert_eq!(task.finish().cell_matrix().walkable_count(), 64);
}

// ============================================================================
// Baked data
// ============================================================================

#[test]
fn test_baked_round_trip_preserves_queries() {
    let mut rng = fastrand::Rng::with_seed(3);
    let mut config = small_config("Round trip");
    config.generate_heightmap = true;
    let scene = random_scene(&mut rng, 8.0, 6);
    let original = bake(&config, &scene);

    let bytes = original.to_baked_data().to_bytes().unwrap();
    let baked = BakedGridData::from_bytes(&bytes).unwrap();
    assert_eq!(baked, original.to_baked_data());

    let builder = GridBuilder::new(&config, Vec3::ZERO).unwrap();
    let restored = builder.create_from_baked(&baked).unwrap();

    for _ in 0..500 {
        let point = Vec3::new(rng.f32() * 12.0 - 6.0, rng.f32() * 14.0 - 2.0, rng.f32() * 12.0 - 6.0);
        assert_eq!(original.contains(point), restored.contains(point));
        assert_eq!(original.cell_at(point), restored.cell_at(point));
    }
    assert_eq!(original.cell_matrix(), restored.cell_matrix());
}

#[test]
fn test_baked_data_mismatch_fails_fast() {
    let config = small_config("Baked");
    let baked = bake(&config, &StaticScene::flat(50.0, 0.0)).to_baked_data();

    let mut bigger = config.clone();
    bigger.size_x = 9;
    let builder = GridBuilder::new(&bigger, Vec3::ZERO).unwrap();
    assert!(matches!(
        builder.create_from_baked(&baked),
        Err(NavError::Configuration(ConfigError::BakedDataMismatch { .. }))
    ));

    let mut scheduler = FrameScheduler::default();
    assert!(builder.create_from_baked_sliced(baked.clone(), &mut scheduler, |_| {}).is_err());
    assert!(scheduler.is_idle());

    let mut with_heights = config.clone();
    with_heights.generate_heightmap = true;
    let builder = GridBuilder::new(&with_heights, Vec3::ZERO).unwrap();
    assert!(builder.create_from_baked(&baked).is_err());
}

#[test]
fn test_baked_data_rejected_after_origin_moves() {
    let mut config = small_config("Moved");
    config.generate_heightmap = true;
    let scene = StaticScene::flat(50.0, 0.0).with_surface(Surface::flat(Vec2::new(0.0, -10.0), Vec2::new(10.0, 10.0), 1.0));
    let original = bake(&config, &scene);
    let baked = original.to_baked_data();
    assert_eq!(baked.bounds, original.bounds());

    let moved = GridBuilder::new(&config, Vec3::new(10.0, 0.0, 0.0)).unwrap();
    assert!(matches!(
        moved.create_from_baked(&baked),
        Err(NavError::Configuration(ConfigError::BakedDataMismatch { .. }))
    ));
    let mut scheduler = FrameScheduler::default();
    assert!(moved.create_from_baked_sliced(baked.clone(), &mut scheduler, |_| {}).is_err());
    assert!(scheduler.is_idle());

    // A component moved away from its bake cannot adopt it
    let owner = Entity::from_bits(4);
    let mut registry = GridRegistry::new();
    let mut component = GridComponent::new(config.clone()).unwrap().with_baked_data(baked.clone());
    assert!(component.set_origin(Vec3::new(0.0, 0.0, -5.0)));
    assert!(component.ensure_grid(owner, &scene, &mut registry).is_err());
    assert!(registry.height_maps().is_empty());

    let restored = GridBuilder::new(&config, Vec3::ZERO).unwrap().create_from_baked(&baked).unwrap();
    let point = Vec3::new(2.5, 0.0, 0.0);
    assert_eq!(restored.sample_height(point), original.sample_height(point));
    assert_eq!(restored.sample_height(point), Some(1.0));
}

#[test]
fn test_sliced_rehydration_completes_in_one_step() {
    let config = small_config("Rehydrate");
    let baked = bake(&config, &StaticScene::flat(50.0, 0.0)).to_baked_data();
    let builder = GridBuilder::new(&config, Vec3::ZERO).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut scheduler = FrameScheduler::default();
    builder
        .create_from_baked_sliced(baked, &mut scheduler, move |grid| {
            assert_eq!(grid.cell_matrix().walkable_count(), 64);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(scheduler.run_frame(), 1);
    assert!(scheduler.is_idle());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ensure_grid_drops_unstored_baked_data() {
    let config = small_config("Unstored");
    let baked = bake(&config, &StaticScene::flat(50.0, 0.0)).to_baked_data();
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(3);

    let mut component = GridComponent::new(config).unwrap().with_baked_data(baked);
    component.store_baked_data_as_asset = false;
    // Empty scene: anything walkable came from the baked data
    let grid = component.ensure_grid(owner, &StaticScene::default(), &mut registry).unwrap();

    assert_eq!(grid.cell_matrix().walkable_count(), 64);
    assert!(component.baked_data.is_none());
    assert!(registry.is_registered(grid.id()));
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_double_registration_is_noop() {
    let grid = bake(&small_config("Twice"), &StaticScene::flat(50.0, 0.0));
    let mut registry = GridRegistry::new();

    assert!(registry.register_grid(grid.clone()));
    assert!(!registry.register_grid(grid.clone()));
    assert_eq!(registry.grid_count(), 1);

    assert!(registry.unregister_grid(grid.id()).is_some());
    assert!(registry.unregister_grid(grid.id()).is_none());
}

#[test]
fn test_registry_never_reports_orphan_height_maps() {
    let scene = StaticScene::flat(100.0, 0.0);
    let grids: Vec<Arc<Grid>> = (0..6)
        .map(|i| {
            let mut config = small_config(&format!("Pool {}", i));
            config.size_x = 4;
            config.size_z = 4;
            config.granularity = 0.5;
            config.generate_heightmap = i % 2 == 0;
            config.origin = Vec3::new(i as f32 * 10.0, 0.0, 0.0);
            bake(&config, &scene)
        })
        .collect();
    let entities: Vec<Entity> = (1..4).map(|i| Entity::from_bits(i)).collect();

    let mut rng = fastrand::Rng::with_seed(11);
    let mut registry = GridRegistry::new();
    for _ in 0..2_000 {
        let grid = &grids[rng.usize(..grids.len())];
        let entity = entities[rng.usize(..entities.len())];
        match rng.u8(..5) {
            0 => { registry.register_grid(grid.clone()); }
            1 => { registry.unregister_grid(grid.id()); }
            2 => { registry.register_grid_component(entity); }
            3 => { registry.bind_component(entity, grid.clone()); }
            _ => { registry.unregister_grid_component(entity); }
        }

        for id in registry.height_maps().ids() {
            assert!(registry.is_registered(id), "height map live for unregistered grid {:?}", id);
        }
        for grid in registry.grids() {
            assert_eq!(registry.height_maps().is_registered(grid.id()), grid.has_height_map());
        }
        for entity in &entities {
            if let Some(bound) = registry.grid_for_component(*entity) {
                assert!(registry.is_registered(bound.id()));
            }
        }
    }
}

#[test]
fn test_registry_height_queries() {
    let mut config = small_config("Heights");
    config.generate_heightmap = true;
    let scene = StaticScene::flat(50.0, 1.5);
    config.origin = Vec3::new(0.0, 1.0, 0.0);
    let grid = bake(&config, &scene);

    let mut registry = GridRegistry::new();
    assert_eq!(registry.sample_height(Vec3::new(0.0, 0.0, 0.0)), None);
    registry.register_grid(grid.clone());
    assert_eq!(registry.sample_height(Vec3::new(0.3, 0.0, -2.0)), Some(1.5));
    assert_eq!(registry.sample_height(Vec3::new(30.0, 0.0, 0.0)), None);

    registry.unregister_grid(grid.id());
    assert!(registry.height_maps().is_empty());
    assert_eq!(registry.sample_height(Vec3::new(0.3, 0.0, -2.0)), None);
}

// ============================================================================
// Path requests
// ============================================================================

fn registry_with(grids: &[Arc<Grid>]) -> GridRegistry {
    let mut registry = GridRegistry::new();
    for grid in grids {
        registry.register_grid(grid.clone());
    }
    registry
}

/// 9x9 grid centred on the origin whose centre cell is walled in: the nearest walkable
/// cell is `distance` rings out.
fn walled_in_grid(distance: u32) -> Arc<Grid> {
    let mut config = small_config(&format!("Walled {}", distance));
    config.size_x = 9;
    config.size_z = 9;
    config.sub_sections_cell_overlap = 0;
    config.obstacle_sensitivity_range = 0.0;
    let reach = distance as f32 - 1.0;
    let scene = StaticScene::flat(50.0, 0.0).with_obstacle(Obstacle::Box {
        min: Vec3::new(-reach, 0.0, -reach),
        max: Vec3::new(reach, 3.0, reach),
    });
    bake(&config, &scene)
}

#[test]
fn test_escape_distance_boundary() {
    for distance in 1..=3 {
        let grid = walled_in_grid(distance);
        let registry = registry_with(&[grid.clone()]);
        assert!(!grid.cell_at(Vec3::ZERO).unwrap().walkable);

        for max_escape in 0..=4 {
            let mut request = PathRequest::new(Vec3::new(-4.0, 0.0, -4.0), Vec3::ZERO);
            request.navigate_to_nearest_if_blocked = true;
            request.max_escape_cell_distance_if_origin_blocked = max_escape;

            let result = request.resolve(&registry);
            if distance <= max_escape {
                assert!(result.is_ok(), "D={} max={} should resolve", distance, max_escape);
                let to = request.resolved_to().unwrap();
                let cell = grid.cell_at(to).unwrap();
                assert!(cell.walkable);
                let ring = (cell.x as i32 - 4).abs().max((cell.z as i32 - 4).abs());
                assert_eq!(ring as u32, distance);
            } else {
                assert_eq!(
                    result,
                    Err(NavError::UnreachableDestination { endpoint: Endpoint::To, position: Vec3::ZERO, max_distance: max_escape })
                );
                assert!(request.to_grid().is_none());
            }
        }
    }
}

#[test]
fn test_blocked_destination_without_escape_resolves_as_is() {
    let grid = walled_in_grid(2);
    let registry = registry_with(&[grid]);
    let mut request = PathRequest::new(Vec3::new(-4.0, 0.0, -4.0), Vec3::ZERO);
    request.navigate_to_nearest_if_blocked = false;

    request.resolve(&registry).unwrap();
    assert_eq!(request.resolved_to(), Some(Vec3::ZERO));
}

#[test]
fn test_blocked_origin_escapes() {
    let grid = walled_in_grid(1);
    let registry = registry_with(&[grid.clone()]);
    let mut request = PathRequest::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 4.0));
    request.max_escape_cell_distance_if_origin_blocked = 1;

    request.resolve(&registry).unwrap();
    let from = request.resolved_from().unwrap();
    assert!(grid.cell_at(from).unwrap().walkable);
    assert!(from.distance(Vec3::ZERO) <= 1.5);

    request.recycle(Vec3::ZERO, Vec3::new(4.0, 0.0, 4.0));
    request.max_escape_cell_distance_if_origin_blocked = 0;
    assert!(matches!(
        request.resolve(&registry),
        Err(NavError::UnreachableDestination { endpoint: Endpoint::From, .. })
    ));
}

#[test]
fn test_huge_escape_distance_stops_at_grid_edge() {
    let mut config = small_config("Buried");
    config.size_x = 10;
    config.size_z = 10;
    config.sub_sections_cell_overlap = 0;
    config.obstacle_sensitivity_range = 0.0;
    let scene = StaticScene::flat(50.0, 0.0).with_obstacle(Obstacle::Box {
        min: Vec3::new(-6.0, 0.0, -6.0),
        max: Vec3::new(6.0, 3.0, 6.0),
    });
    let grid = bake(&config, &scene);
    assert_eq!(grid.cell_matrix().walkable_count(), 0);
    let registry = registry_with(&[grid]);

    let started = std::time::Instant::now();
    let mut request = PathRequest::new(Vec3::new(0.5, 0.0, 0.5), Vec3::new(-3.5, 0.0, -3.5));
    request.max_escape_cell_distance_if_origin_blocked = u32::MAX;
    assert!(matches!(
        request.resolve(&registry),
        Err(NavError::UnreachableDestination { endpoint: Endpoint::From, .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(1), "escape search took {:?}", started.elapsed());

    // Walled in up to the outermost ring: found at the edge, whatever the limit
    let walled = walled_in_grid(4);
    let (cell, ring) = walled.cell_matrix().nearest_walkable(4, 4, u32::MAX).unwrap();
    assert_eq!(ring, 4);
    assert!(cell.walkable);
    assert_eq!((cell.x, cell.z), (4, 0));
    assert!(walled.cell_matrix().nearest_walkable(4, 4, 3).is_none());
}

#[test]
fn test_off_grid_origin_rejected_when_prevented() {
    let grid = bake(&small_config("Bounded"), &StaticScene::flat(50.0, 0.0));
    let registry = registry_with(&[grid]);

    let mut request = PathRequest::new(Vec3::new(100.0, 0.0, 100.0), Vec3::ZERO);
    request.prevent_off_grid_navigation = true;
    assert_eq!(
        request.resolve(&registry),
        Err(NavError::ResolutionFailure { endpoint: Endpoint::From, position: Vec3::new(100.0, 0.0, 100.0) })
    );
    assert!(request.from_grid().is_none());
    assert!(request.to_grid().is_none());
    assert_eq!(request.state(), PathRequestState::Created);
}

#[test]
fn test_off_grid_origin_falls_back_to_nearest_grid() {
    let near = bake(&small_config("Near"), &StaticScene::flat(50.0, 0.0));
    let mut far_config = small_config("Far");
    far_config.origin = Vec3::new(-40.0, 0.0, 0.0);
    let far = bake(&far_config, &StaticScene::flat(50.0, 0.0));
    let registry = registry_with(&[far, near.clone()]);

    let mut request = PathRequest::new(Vec3::new(100.0, 0.0, 1.0), Vec3::ZERO);
    request.resolve(&registry).unwrap();

    assert_eq!(request.from_grid().unwrap().id(), near.id());
    let from = request.resolved_from().unwrap();
    assert!(near.contains(from));
    assert_eq!(from.x, 3.5);
    assert_eq!(from.z, 1.0);
}

#[test]
fn test_no_grids_is_a_resolution_failure() {
    let registry = GridRegistry::new();
    let mut request = PathRequest::new(Vec3::ZERO, Vec3::ONE);
    assert!(matches!(
        request.resolve(&registry),
        Err(NavError::ResolutionFailure { endpoint: Endpoint::From, .. })
    ));
}

#[test]
fn test_request_waypoint_lifecycle() {
    let grid = bake(&small_config("Lifecycle"), &StaticScene::flat(50.0, 0.0));
    let registry = registry_with(&[grid.clone()]);
    let (a, b) = (Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));

    let mut request = PathRequest::new(Vec3::new(-3.0, 0.0, -3.0), Vec3::new(3.0, 0.0, 3.0));
    request.request_type = RequestType::IntelOnly;
    assert!(!request.plan([a, b]));

    request.resolve(&registry).unwrap();
    assert_eq!(request.state(), PathRequestState::Resolved);
    assert_eq!(request.to_grid().unwrap().id(), grid.id());

    assert!(request.plan([a, b]));
    assert_eq!(request.next_waypoint(), Some(a));
    assert_eq!(request.state(), PathRequestState::Planned);
    assert_eq!(request.next_waypoint(), Some(b));
    assert_eq!(request.state(), PathRequestState::Consumed);
    assert_eq!(request.next_waypoint(), None);

    request.discard();
    assert_eq!(request.state(), PathRequestState::Discarded);
    assert!(request.from_grid().is_none());

    request.recycle(Vec3::ZERO, Vec3::ONE);
    assert_eq!(request.state(), PathRequestState::Created);
    assert_eq!(request.request_type, RequestType::IntelOnly);
    request.resolve(&registry).unwrap();
    request.plan([a, b, a]);
    assert_eq!(request.drain_waypoints(), vec![a, b, a]);
    assert_eq!(request.state(), PathRequestState::Consumed);
}

// ============================================================================
// Component lifecycle
// ============================================================================

fn slow_component(name: &str) -> GridComponent {
    let mut component = GridComponent::new(small_config(name)).unwrap().with_build_budget(Duration::ZERO);
    component.cell_batch_size = 4;
    component
}

#[test]
fn test_rebuild_during_build_is_rejected() {
    let geometry: Arc<dyn WorldGeometry> = Arc::new(StaticScene::flat(50.0, 0.0));
    let mut scheduler = FrameScheduler::default();
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(5);
    let mut component = slow_component("Conflict");

    let finished: Arc<Mutex<Vec<Arc<Grid>>>> = Arc::default();
    let sink = finished.clone();
    let handle = component
        .initialize(geometry.clone(), &mut scheduler, move |grid| sink.lock().unwrap().push(grid))
        .unwrap()
        .unwrap();
    scheduler.run_frame();

    let second = component.initialize(geometry.clone(), &mut scheduler, |_| panic!("second build ran"));
    assert!(matches!(second, Err(NavError::ConcurrentBuildConflict { ref grid }) if grid == "Conflict"));
    assert_eq!(scheduler.pending(), 1);

    run_until_idle(&mut scheduler);
    assert!(handle.is_finished());
    let grid = finished.lock().unwrap().pop().unwrap();
    assert!(finished.lock().unwrap().is_empty());
    assert_eq!(grid.cell_matrix().walkable_count(), 64);

    assert!(component.finish_build(owner, grid.clone(), &mut registry));
    assert!(!component.is_building());
    assert_eq!(registry.grid_for_component(owner).unwrap().id(), grid.id());

    // Built grids make further initialisation a no-op
    assert!(matches!(component.initialize(geometry, &mut scheduler, |_| {}), Ok(None)));
}

#[test]
fn test_disable_mid_build_suppresses_callback() {
    let geometry: Arc<dyn WorldGeometry> = Arc::new(StaticScene::flat(50.0, 0.0));
    let mut scheduler = FrameScheduler::default();
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(6);
    registry.register_grid_component(owner);
    let mut component = slow_component("Disabled");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = component
        .initialize(geometry, &mut scheduler, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
        .unwrap();
    scheduler.run_frame();
    assert!(!handle.is_finished());

    assert_eq!(component.disable(&mut registry), None);
    assert!(handle.is_cancelled());
    assert!(!component.enabled);

    run_until_idle(&mut scheduler);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!handle.is_finished());
    assert_eq!(registry.grid_count(), 0);
    assert!(registry.grid_for_component(owner).is_none());
}

#[test]
fn test_disable_unregisters_grid_and_height_map() {
    let mut config = small_config("Teardown");
    config.generate_heightmap = true;
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(8);
    let mut component = GridComponent::new(config).unwrap();

    let grid = component.ensure_grid(owner, &StaticScene::flat(50.0, 0.0), &mut registry).unwrap();
    assert!(registry.height_maps().is_registered(grid.id()));

    assert_eq!(component.disable(&mut registry), Some(grid.bounds()));
    assert!(!registry.is_registered(grid.id()));
    assert!(registry.height_maps().is_empty());
    assert!(!component.has_grid());
}

#[test]
fn test_editor_area_is_clamped_inside_bounds() {
    let scene = StaticScene::flat(50.0, 0.0);
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(9);
    let mut component = GridComponent::new(small_config("Editor")).unwrap();

    let area = Bounds::new(Vec3::new(0.0, 5.0, 0.0), Vec3::splat(100.0));
    let clamped = component.ensure_for_editor(owner, false, area, &scene, &mut registry).unwrap();

    assert_eq!(clamped.min(), Vec3::new(-3.5, 0.0, -3.5));
    assert_eq!(clamped.max(), Vec3::new(3.5, 0.0, 3.5));
    let first = component.grid().unwrap().id();

    // Without refresh the existing grid is kept
    component.ensure_for_editor(owner, false, area, &scene, &mut registry).unwrap();
    assert_eq!(component.grid().unwrap().id(), first);
    assert!(registry.is_registered(first));
}

#[test]
fn test_editor_preview_only_rescans_touched_sub_sections() {
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(10);
    let mut component = GridComponent::new(small_config("Preview")).unwrap();
    let area = Bounds::new(Vec3::new(-2.5, 0.0, -2.5), Vec3::new(0.5, 1.0, 0.5));

    component.ensure_for_editor(owner, false, area, &StaticScene::flat(50.0, 0.0), &mut registry).unwrap();
    let before = component.grid().unwrap().clone();

    // New pillars on cell (1, 1), inside the area, and on cell (6, 6), far from it
    let edited = StaticScene::flat(50.0, 0.0)
        .with_obstacle(Obstacle::Cylinder { center: Vec2::new(-2.5, -2.5), radius: 0.2, base: 0.0, top: 3.0 })
        .with_obstacle(Obstacle::Cylinder { center: Vec2::new(2.5, 2.5), radius: 0.2, base: 0.0, top: 3.0 });
    let clamped = component.ensure_for_editor(owner, true, area, &edited, &mut registry).unwrap();
    assert_eq!(clamped.center.x, -2.5);

    let after = component.grid().unwrap().clone();
    assert_ne!(after.id(), before.id());
    assert!(!registry.is_registered(before.id()));
    assert_eq!(registry.grid_for_component(owner).unwrap().id(), after.id());

    let matrix = after.cell_matrix();
    assert!(!matrix.get(1, 1).unwrap().walkable);
    assert!(matrix.get(6, 6).unwrap().walkable);
}

#[test]
fn test_editor_refresh_after_move_rebuilds_whole_grid() {
    let scene = StaticScene::flat(50.0, 0.0);
    let mut registry = GridRegistry::new();
    let owner = Entity::from_bits(12);
    let mut component = GridComponent::new(small_config("Moved")).unwrap();
    let area = Bounds::new(Vec3::ZERO, Vec3::splat(1.0));

    component.ensure_for_editor(owner, false, area, &scene, &mut registry).unwrap();
    component.set_origin(Vec3::new(10.0, 0.0, 0.0));
    assert!(component.origin_moved());

    component.ensure_for_editor(owner, true, area, &scene, &mut registry).unwrap();
    assert!(!component.origin_moved());
    assert_eq!(component.bounds().center.x, 10.0);
    assert_eq!(registry.grid_count(), 1);
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn test_config_deserialization_uses_defaults() {
    let config: GridConfig = serde_json::from_str(r#"{ "friendly_name": "Partial", "size_x": 4 }"#).unwrap();
    assert_eq!(config.size_x, 4);
    assert_eq!(config.size_z, 10);
    assert_eq!(config.cell_size, 2.0);
    assert_eq!(config.sub_sections_cell_overlap, 2);
    assert!(config.generate_heightmap);
    assert_eq!(config.max_walkable_slope_angle, 30.0);
}

#[test]
fn test_shipped_navigation_settings_are_valid() {
    let settings: NavigationSettings = ron::from_str(include_str!("../../assets/navigation.ron")).unwrap();
    assert_eq!(settings.build_budget(), Duration::from_millis(5));
    assert!(!settings.grids.is_empty());
    for config in &settings.grids {
        config.check().unwrap();
    }
}
