pub mod event;
pub mod forecast;
pub mod reading;
pub mod time;

pub use event::*;
pub use forecast::*;
pub use reading::*;
pub use time::*;
