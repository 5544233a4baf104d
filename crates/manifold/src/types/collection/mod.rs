pub mod bimap;

pub use bimap::{BiMap, BiMapConflict};
