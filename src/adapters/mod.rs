// Adapters layer: concrete implementations for external systems.

pub mod system;

pub use system::SystemRunner;
