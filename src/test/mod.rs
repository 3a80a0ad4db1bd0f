mod references;
pub mod utils;

pub use utils::test_utils;
