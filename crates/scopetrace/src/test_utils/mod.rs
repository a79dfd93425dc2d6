//! Test support: throwaway fixture projects and a scripted in-process
//! code-intelligence server.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

pub mod fixture_project;
pub mod scripted_server;

pub use fixture_project::FixtureProject;
pub use scripted_server::{ScriptedLauncher, ScriptedServer};
