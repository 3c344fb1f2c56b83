pub mod download;
pub mod planet_collect;
