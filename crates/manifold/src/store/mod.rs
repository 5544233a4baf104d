pub mod object;
pub mod snapshot;

pub use object::{ObjectStore, StoreError};
pub use snapshot::Snapshot;

use std::{cell::RefCell, rc::Rc};

/// Shared handle to the canonical store, held by the cache and by every
/// id-cached index that resolves records through the store on read.
pub(crate) type SharedStore<R> = Rc<RefCell<ObjectStore<R>>>;
