pub mod directory;
pub mod grading;
pub mod import;
pub mod workflow;
