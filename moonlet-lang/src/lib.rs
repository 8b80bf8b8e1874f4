pub mod interner;
pub mod runtime;
