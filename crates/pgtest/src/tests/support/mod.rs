//! Test harness utilities shared by unit and behavioural suites.

mod fake_install;
mod postmaster;
mod world;

pub use fake_install::{
    FakeInstall, InitBehaviour, StartBehaviour, StopBehaviour, write_executable,
};
pub use world::ClusterWorld;
