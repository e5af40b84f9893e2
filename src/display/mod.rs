pub mod display;

pub use display::{RunExit, Sdl2Display};
