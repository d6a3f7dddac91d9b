pub mod audio;
pub mod driver;
pub mod particle;
pub mod population;
pub mod rate_history;

pub use driver::{Controls, Simulation, Stats, TickReport};
