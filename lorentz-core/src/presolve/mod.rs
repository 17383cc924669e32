//! Problem-data conditioning applied before the interior-point loop.

pub mod ruiz;

pub use ruiz::{equilibrate, Equilibration};
