// db stuff
pub mod db;
pub mod schema;
pub mod models;
pub mod store;

// scoring rules
pub mod flag;
pub mod throttle;
pub mod scoring;
pub mod gate;

// what the frontend gets to see
pub mod pagination;
pub mod views;

// labs
pub mod runtime;
pub mod challd;
pub mod ports;
pub mod labs;

pub mod config;
pub mod service;

#[cfg(test)]
mod testing;
