pub mod component;
pub mod generator;
pub mod model;
pub mod parameter;
pub mod prompt;

pub use component::*;
pub use generator::*;
pub use model::*;
pub use parameter::*;
pub use prompt::*;
