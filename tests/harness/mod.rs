#![allow(dead_code)]

pub mod mock_ollama;
pub mod server;
