//! Profiling support via Tracy.
//!
//! Instrumentation is compiled in only with the `profiling` feature:
//!
//! ```toml
//! [dependencies]
//! redlilium-rhi = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! Without the feature every macro expands to nothing (or to a plain
//! evaluation of its value argument), so call sites stay in place.
//!
//! ```ignore
//! use redlilium_rhi::{frame_mark, profile_plot, profile_scope};
//!
//! fn upload() {
//!     profile_scope!("upload");
//!     // ...
//! }
//!
//! profile_plot!("resident_texture_bytes", bytes);
//! frame_mark!();
//! ```

#[cfg(feature = "profiling")]
pub use tracy_client::{self, Client, frame_mark as tracy_frame_mark, span};

/// Mark the end of a frame for Tracy's frame analysis.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Create a profiling span for the current scope.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Plot a value over time in Tracy.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:literal, $value:expr) => {
        if let Some(client) = $crate::profiling::Client::running() {
            client.plot($crate::profiling::tracy_client::plot_name!($name), $value as f64);
        }
    };
}

/// Plot a value (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:literal, $value:expr) => {
        let _ = $value;
    };
}
