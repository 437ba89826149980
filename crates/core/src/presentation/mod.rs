pub mod domain;
pub mod presenter;
