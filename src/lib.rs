pub mod compile;
pub mod error;
pub mod events;
pub mod executable;
pub mod layout;
pub mod library;
pub mod link_type;
pub mod manifest;
mod misc;
pub mod package;
pub mod paths;
pub mod project;
pub mod target;
pub mod toolchain;

pub use compile::Driver;
pub use error::Error;
pub use paths::PathSet;
pub use project::Project;
pub use target::BuildContext;
