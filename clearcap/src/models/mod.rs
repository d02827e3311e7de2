mod artifact;
mod credentials;
mod resolution;

pub use artifact::*;
pub use credentials::*;
pub use resolution::*;
