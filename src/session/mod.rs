pub mod manager;
pub mod service;
pub mod storage;
