//! Framing and correlation tests.

mod correlator_test;
mod framer_test;
