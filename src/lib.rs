pub mod audio;
pub mod config;
pub mod core;
pub mod life;
pub mod synth;
