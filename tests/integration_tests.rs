//! Integration tests entry point
//!
//! Includes the integration test modules from the integration/ subdirectory
//! so they compile as one test binary.

mod integration;
