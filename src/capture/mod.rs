pub mod audio;
pub mod screen;
