pub mod bank;
pub mod commands;
pub mod devices;
pub mod modbus;
pub mod registers;
pub mod server;
pub mod temperature;
