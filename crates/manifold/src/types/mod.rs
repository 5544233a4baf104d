pub mod change;
pub mod collection;
pub mod id;

pub use change::{Change, ChangeError};
pub use id::{Id, Keyed};
