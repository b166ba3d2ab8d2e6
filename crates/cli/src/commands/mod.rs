pub mod classify;
pub mod errors;
pub mod org;
pub mod push;
pub mod transform;
pub mod validate;

pub use classify::ClassifyCommand;
pub use errors::ErrorsCommand;
pub use org::OrgCommand;
pub use push::PushCommand;
pub use transform::{SourceArgs, TransformCommand};
pub use validate::ValidateCommand;
