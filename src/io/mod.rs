pub mod buf;
pub mod buf_mut;
pub mod wire;

pub use buf::Buf;
pub use buf_mut::BufMut;
pub use wire::{Ready, WireHandle};
