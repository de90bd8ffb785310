pub mod color;
pub mod edge;
pub mod ela;
pub mod frequency;
pub mod noise;
pub mod texture;
