pub mod cache;
pub mod config;
pub mod decode;
pub mod detour;
pub mod error;
pub mod events;
pub mod folders;
pub mod order;
pub mod random;
pub mod scan;
pub mod tasks {
    pub mod engine;
    pub mod loader;
}
