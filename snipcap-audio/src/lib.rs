// In-process audio host: a small software audio graph plus sprite, buffer
// and media-element playback hosts that implement the engine's traits.
pub mod graph;
pub mod hosts;
pub mod recorder;

pub use graph::{Signal, SoftContext, SoftDestination, SoftNode};
pub use hosts::{
    SoftContextFactory, SoftGraphHost, SoftMediaElement, SoftMediaHost, SoftSound, SoftSprite,
    SoftSpriteHost, SoftSpriteLibrary,
};
pub use recorder::WavRecorder;
