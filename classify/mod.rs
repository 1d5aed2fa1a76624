// Feature matching and the kernel classifier trained on the reference dataset.

pub mod features;
pub mod model;
pub mod platt;
pub mod reference;
pub mod scaling;
pub mod svm;
pub mod tuning;
