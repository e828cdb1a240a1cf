// Stethoscope Core - heart-sound detection and device-mode control
// Tick-driven acoustic event classification behind a byte-command protocol

// Module declarations
pub mod analysis;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod telemetry;

// Re-exports for convenience
pub use config::DeviceConfig;
pub use engine::DeviceEngine;
pub use protocol::{Dispatch, Dispatcher};
pub use session::{DeviceMode, InputSource, Session};
pub use telemetry::TelemetryFrame;

#[cfg(test)]
mod tests {
    #[test]
    fn test_module_structure() {
        // Verify all modules are accessible
        // This ensures the crate compiles with proper module hierarchy
    }
}
