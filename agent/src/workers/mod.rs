//! Background workers

pub mod auto_update;
