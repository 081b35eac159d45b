pub mod db;
pub mod enhancer;
pub mod storage;
