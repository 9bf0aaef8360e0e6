pub mod message_handler;
pub mod socket;
