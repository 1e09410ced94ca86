pub mod error;
pub mod events;
pub mod health;
pub mod jobs;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;
