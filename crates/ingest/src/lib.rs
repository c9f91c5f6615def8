pub mod augment;
pub mod classify;
pub mod extract;
pub mod fingerprint;
pub mod normalize;
pub mod pipeline;

pub use augment::{AugmentBackend, AugmentConfig, AugmentError, HttpAugmenter, MockAugmenter};
pub use classify::classify;
pub use extract::extract;
pub use fingerprint::{fingerprint_bytes, fingerprint_file, sha256_bytes, to_hex};
pub use normalize::{normalize, NormalizedRecord};
pub use pipeline::{spawn_intake_watcher, IntakeOutcome, IntakePipeline, PipelineError};
