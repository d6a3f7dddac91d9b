use crate::life::audio::events::SynthCommand;
use crate::synth::SynthError;

/// Whatever turns voice commands into sound.
///
/// Implementations own envelopes and parameter ramping; enforcing the voice
/// budget is the caller's job.
pub trait Backend {
    /// False until initialization has completed. Callers treat every voice
    /// operation as a no-op while this is false.
    fn is_ready(&self) -> bool;

    /// Bring the backend up. Called when audio is switched on while the
    /// backend is not ready; the default has nothing to start.
    fn init(&mut self) -> Result<(), SynthError> {
        Ok(())
    }

    fn submit(&mut self, cmd: SynthCommand) -> Result<(), SynthError>;
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn init(&mut self) -> Result<(), SynthError> {
        (**self).init()
    }

    fn submit(&mut self, cmd: SynthCommand) -> Result<(), SynthError> {
        (**self).submit(cmd)
    }
}
