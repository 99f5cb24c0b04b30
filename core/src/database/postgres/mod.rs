pub mod client;
pub mod copy_update;
