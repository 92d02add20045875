pub mod protocol;
pub mod rest;
pub mod state;
pub mod sweep;

// Re-export the router so the binary that builds the web server can reach it directly.
pub use rest::router;
pub use sweep::spawn_abandonment_sweep;
