pub mod clock;
pub mod dir;
pub mod id;
pub mod logging;
pub mod time;
