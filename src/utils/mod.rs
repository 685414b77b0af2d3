//! Small shared helpers with no domain logic of their own.

pub mod collections;
pub mod id_generator;
