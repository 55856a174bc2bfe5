pub mod db;
pub mod email;
pub mod redis;
pub mod storage;
