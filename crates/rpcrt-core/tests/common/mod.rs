pub mod memory_server;
