pub mod bake;
pub mod version;
