pub mod documents;
pub mod patients;

pub use documents::*;
pub use patients::*;
