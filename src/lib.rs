pub mod cmdline;
pub mod media;
pub mod messages;
pub mod peer;
pub mod relay_server;
pub mod room;
pub mod signaling;
