//! Test suites for the cluster manager.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]
#![expect(
    clippy::print_stderr,
    reason = "scenario cleanup reports failures it cannot propagate from Drop"
)]

pub(crate) mod support;
