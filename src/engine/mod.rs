// Gateway Engine — session lifecycle, Evolution backend and HTTP surface.

pub mod http;
pub mod server;
pub mod whatsapp;
