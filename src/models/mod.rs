pub mod poem;

pub use poem::*;
