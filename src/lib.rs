pub mod executor;
pub mod fix;
pub mod logging;
pub mod model;
pub mod report;
pub mod traits;
pub mod workspace;

// Re-export common types for convenience
pub use executor::*;
pub use fix::maven::MavenFixer;
pub use fix::python::PythonFixer;
pub use model::*;
pub use traits::*;
pub use workspace::{FsWorkspace, MemoryWorkspace};
