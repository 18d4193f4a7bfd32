pub mod channels;
pub mod subscribers;
