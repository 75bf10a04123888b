//! the test_utils folder here will share utils between unit tests

pub use common::*;
