//! Test modules for the pipeline



#[cfg(test)]
pub mod framework;
