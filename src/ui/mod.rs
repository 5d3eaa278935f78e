pub mod display;
pub mod icons;
pub mod progress;

pub use progress::WorkflowUI;
