pub mod snapshot;

pub use snapshot::StateSnapshot;
