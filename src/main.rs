use bevy::prelude::*;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use kestrel::nav::{
    GridStatus, GridStatusMessage, NavigationPlugin, NavigationSettings, Obstacle, PathRequest,
    PathRequestMessage, PathResolvedMessage, SceneGeometry, StaticScene, Surface,
};

/// Frames after which the demo gives up waiting for builds.
const MAX_DEMO_FRAMES: u32 = 3_000;
const REQUESTS_PER_GRID: usize = 8;
const RANDOM_OBSTACLES: usize = 40;

fn setup_file_logging() -> Option<String> {
    let log_dir = PathBuf::from("logs");
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create logs directory: {}", e);
        return None;
    }

    // Keep only the most recent runs
    cleanup_old_logs(&log_dir, 25);

    let now = chrono::Local::now();
    let log_filename = format!("kestrel_{}.log", now.format("%Y%m%d_%H%M%S"));
    let log_path_str = log_dir.join(&log_filename).to_string_lossy().to_string();

    let file_appender = RollingFileAppender::new(Rotation::NEVER, &log_dir, &log_filename);
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false);
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bevy_ecs=info,kestrel=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Some(log_path_str)
}

fn cleanup_old_logs(log_dir: &PathBuf, keep_count: usize) {
    if let Ok(entries) = fs::read_dir(log_dir) {
        let mut log_files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|s| s.starts_with("kestrel") && s.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();

        // Oldest first
        log_files.sort_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));

        if log_files.len() > keep_count {
            for file in log_files.iter().take(log_files.len() - keep_count) {
                let _ = fs::remove_file(file.path());
            }
        }
    }
}

#[derive(Resource, Default)]
struct DemoState {
    frames: u32,
    requested: usize,
    resolved: usize,
    rejected: usize,
}

/// Flat ground with a ramp and a scatter of pillars, covering every configured grid.
fn build_demo_scene(mut commands: Commands, settings: Option<Res<NavigationSettings>>) {
    let half_extent = settings
        .as_ref()
        .map(|s| {
            s.grids
                .iter()
                .map(|g| g.origin.x.abs().max(g.origin.z.abs()) + g.size_x.max(g.size_z) as f32 * g.cell_size)
                .fold(50.0_f32, f32::max)
        })
        .unwrap_or(50.0);

    let mut rng = rand::rng();
    let mut scene = StaticScene::flat(half_extent, 0.0).with_surface(Surface::ramp_x(
        Vec2::new(-half_extent * 0.5, -half_extent * 0.2),
        Vec2::new(-half_extent * 0.2, half_extent * 0.2),
        0.0,
        20.0,
    ));
    for _ in 0..RANDOM_OBSTACLES {
        let center = Vec2::new(
            rng.random_range(-half_extent..half_extent),
            rng.random_range(-half_extent..half_extent),
        );
        scene = scene.with_obstacle(Obstacle::Cylinder {
            center,
            radius: rng.random_range(0.5..3.0),
            base: 0.0,
            top: rng.random_range(1.0..6.0),
        });
    }
    info!("Demo scene: {} surfaces, {} obstacles", scene.surfaces.len(), scene.obstacles.len());
    commands.insert_resource(SceneGeometry::new(scene));
}

fn request_paths_when_ready(
    mut status: MessageReader<GridStatusMessage>,
    mut requests: MessageWriter<PathRequestMessage>,
    settings: Option<Res<NavigationSettings>>,
    mut state: ResMut<DemoState>,
) {
    let escape = settings.map(|s| s.default_escape_cell_distance).unwrap_or(3);
    let mut rng = rand::rng();
    for message in status.read() {
        if message.status != GridStatus::InitializationComplete {
            continue;
        }
        let (min, max) = (message.grid_bounds.min(), message.grid_bounds.max());
        let y = 0.0_f32.clamp(min.y, max.y);
        for _ in 0..REQUESTS_PER_GRID {
            let from = Vec3::new(rng.random_range(min.x..max.x), y, rng.random_range(min.z..max.z));
            let to = Vec3::new(rng.random_range(min.x..max.x), y, rng.random_range(min.z..max.z));
            let mut request = PathRequest::new(from, to).with_requester(message.entity);
            request.max_escape_cell_distance_if_origin_blocked = escape;
            request.navigate_to_nearest_if_blocked = rng.random_bool(0.5);
            requests.write(PathRequestMessage(request));
            state.requested += 1;
        }
    }
}

fn report_and_exit(
    mut resolved: MessageReader<PathResolvedMessage>,
    mut state: ResMut<DemoState>,
    mut exit: MessageWriter<AppExit>,
) {
    state.frames += 1;
    for message in resolved.read() {
        match &message.result {
            Ok(()) => {
                state.resolved += 1;
                info!(
                    "Resolved {:?} -> {:?} on grid '{}'",
                    message.request.resolved_from(),
                    message.request.resolved_to(),
                    message.request.to_grid().map(|g| g.name()).unwrap_or("?")
                );
            }
            Err(_) => state.rejected += 1,
        }
    }

    let done = state.requested > 0 && state.resolved + state.rejected >= state.requested;
    if done || state.frames >= MAX_DEMO_FRAMES {
        info!(
            "Demo finished after {} frames: {} requests, {} resolved, {} rejected",
            state.frames, state.requested, state.resolved, state.rejected
        );
        exit.write(AppExit::Success);
    }
}

fn main() {
    let log_file = setup_file_logging();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║  Kestrel navigation grids - headless demo                ║");
    if let Some(log_file) = &log_file {
        println!("╠══════════════════════════════════════════════════════════╣");
        println!("║  Log file: {:<45} ║", log_file);
    }
    println!("╚══════════════════════════════════════════════════════════╝");

    let mut app = App::new();
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(1.0 / 60.0))));
    if log_file.is_none() {
        app.add_plugins(LogPlugin::default());
    }
    app.add_plugins(NavigationPlugin::default())
        .init_resource::<DemoState>()
        .add_systems(PostStartup, build_demo_scene)
        .add_systems(Update, (request_paths_when_ready, report_and_exit).chain())
        .run();
}
