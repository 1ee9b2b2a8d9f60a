//! Testing utilities, available behind the `testing` feature.

pub mod postgres;
