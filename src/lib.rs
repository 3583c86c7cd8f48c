mod dmi;
mod meta;
mod rsi;
mod state;

pub use dmi::*;
pub use meta::{Flags, MAXIMUM_RSI_VERSION, MINIMUM_RSI_VERSION};
pub use rsi::*;
pub use state::*;
