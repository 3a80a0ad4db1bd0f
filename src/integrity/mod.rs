pub mod cascade;
pub mod graph;
pub mod guard;
pub mod orphans;
pub mod references;
pub mod relatives;

pub use cascade::CascadeDeleter;
