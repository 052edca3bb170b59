pub mod command;
pub mod dsi;
pub mod frames;
pub mod seek;
