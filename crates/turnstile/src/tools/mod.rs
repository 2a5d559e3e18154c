//! The demo tool and the actions the terminal host performs.

mod confirm;
mod weather;

pub use confirm::{CONFIRM_WITH_USER, ConfirmRequest, confirm_with_user};
pub use weather::GetWeatherTool;
