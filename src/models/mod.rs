pub mod chat;
pub mod code;
pub mod request;
pub mod websocket;
