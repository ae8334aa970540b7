//! Source-scanning policy checks for the gateway workspace
//!
//! Two rules, one test file each under `tests/`:
//! - production code never parks a task in `sleep()`; it waits on I/O or on
//!   a timer owned by a select loop
//! - async functions never call blocking std I/O
//!
//! This library exists only so cargo treats the package as a test target.

#![allow(dead_code)]

pub fn anchor() {}
