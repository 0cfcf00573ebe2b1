#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod bootstrap;
pub mod config;
pub mod data;
pub mod effect;
pub mod error;
pub mod probability;
pub mod single_proxy;
pub mod two_proxy;

pub use data::{FieldId, ObservationTable};
pub use error::RestorationError;
