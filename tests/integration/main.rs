//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one part of the service
//! against the mock adapters in [`mock_hw`].  Everything but
//! `threaded_tests` runs on a manual clock.

mod discovery_tests;
mod dispatch_tests;
mod threaded_tests;
