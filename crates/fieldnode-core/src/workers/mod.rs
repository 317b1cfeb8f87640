pub mod ingest;
pub mod initial_check;
pub mod maintenance;
pub mod network;
pub mod reporting;
pub mod sampling;
pub mod sensor_setup;

#[cfg(test)]
mod initial_check_tests;
#[cfg(test)]
mod maintenance_tests;
#[cfg(test)]
mod reporting_tests;
#[cfg(test)]
mod sampling_tests;
