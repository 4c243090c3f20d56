//! Child process supervision tests.

#[cfg(unix)]
mod supervisor_test;
