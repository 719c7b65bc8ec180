//! Cross-module test suites exercising the full loading pipeline.


#[cfg(test)]
pub mod test_helpers;
