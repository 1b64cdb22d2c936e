pub mod nav;

// ============================================================================
// Profiling Macros
// ============================================================================

/// Log a message every 100th build step when the perf_stats feature is enabled.
///
/// Time-sliced builds can run for thousands of steps on large grids; logging every
/// step would drown everything else, so only every 100th one is reported.
///
/// # Example
/// ```ignore
/// profile_log!(job.steps, "Grid '{}' at {:.0}%", name, progress * 100.0);
/// ```
///
/// # Zero-Cost Abstraction
/// When compiled without the `perf_stats` feature, this expands to an empty block.
/// Even the arguments are not evaluated.
#[macro_export]
#[cfg(feature = "perf_stats")]
macro_rules! profile_log {
    ($step:expr, $($arg:tt)*) => {
        if $step % 100 == 0 {
            bevy::prelude::info!($($arg)*);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "perf_stats"))]
macro_rules! profile_log {
    ($step:expr, $($arg:tt)*) => {};
}
