pub mod directory;

pub use directory::{aci, check_invariants, pni, ObservedEvent, RecordingObserver, TestDirectory};
