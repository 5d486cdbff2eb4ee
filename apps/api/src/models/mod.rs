pub mod account;
pub mod candidate;
pub mod job;
pub mod matches;
