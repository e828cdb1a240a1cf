// Analysis module - acoustic heart-sound event detection
//
// Amplitude readings from the peak sampler feed the HeartSoundDetector
// finite-state classifier; confirmed S1/S2 pairs feed the RateAverager,
// which publishes a rolling beats-per-minute estimate once three
// inter-beat intervals have accumulated.

pub mod heart_rate;
pub mod heart_sound;

pub use heart_rate::RateAverager;
pub use heart_sound::{DetectorOutput, HeartSoundDetector};
