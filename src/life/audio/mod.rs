pub mod backend;
pub mod events;
pub mod scheduler;
pub mod voice_manager;

pub use backend::Backend;
pub use events::{OneShot, SlotId, SynthCommand, VoiceParam};
pub use scheduler::DelayQueue;
pub use voice_manager::{MAX_VOICES, VoiceManager, VoiceParams};
