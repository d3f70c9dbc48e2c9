//! Integration tests, built as a single test binary

mod common;
mod test_control_endpoint;
mod test_self_update;
